//! Radical inverse low-discrepancy points.
//!
//! Photon shooting indexes into a global Halton sequence so that every
//! iteration distributes photons deterministically regardless of which worker
//! thread traces which photon.

/// First 64 primes, one per Halton dimension.
pub const PRIMES: [u32; 64] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67,
    71, 73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149,
    151, 157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229,
    233, 239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311,
];

/// Radical inverse of `a` in the base given by `PRIMES[base_index]`.
pub fn radical_inverse(base_index: usize, mut a: u64) -> f32 {
    let base = PRIMES[base_index] as u64;
    let inv_base = 1.0 / base as f64;
    let mut reversed: u64 = 0;
    let mut inv_base_n = 1.0f64;
    while a != 0 {
        let next = a / base;
        let digit = a - next * base;
        reversed = reversed * base + digit;
        inv_base_n *= inv_base;
        a = next;
    }
    ((reversed as f64 * inv_base_n).min(1.0 - f64::EPSILON)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base2_sequence() {
        assert_eq!(radical_inverse(0, 0), 0.0);
        assert!((radical_inverse(0, 1) - 0.5).abs() < 1e-6);
        assert!((radical_inverse(0, 2) - 0.25).abs() < 1e-6);
        assert!((radical_inverse(0, 3) - 0.75).abs() < 1e-6);
        assert!((radical_inverse(0, 4) - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_base3_sequence() {
        assert!((radical_inverse(1, 1) - 1.0 / 3.0).abs() < 1e-6);
        assert!((radical_inverse(1, 2) - 2.0 / 3.0).abs() < 1e-6);
        assert!((radical_inverse(1, 3) - 1.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_in_unit_interval() {
        for dim in 0..PRIMES.len() {
            for a in [0u64, 1, 17, 1_000_003] {
                let v = radical_inverse(dim, a);
                assert!((0.0..1.0).contains(&v));
            }
        }
    }
}
