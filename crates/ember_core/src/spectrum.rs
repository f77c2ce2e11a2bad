use glam::Vec3;

/// RGB radiance/power triple (values typically >= 0, unbounded above).
pub type Spectrum = Vec3;

/// Helpers for treating a [`Vec3`] as an RGB spectrum.
pub trait SpectrumExt {
    /// True if every channel is zero.
    fn is_black(&self) -> bool;

    /// Gamma-correct (exponent 0.6), clamp to [0, 1] and pack to 8-bit RGB.
    fn to_srgb_bytes(&self) -> [u8; 3];
}

impl SpectrumExt for Spectrum {
    #[inline]
    fn is_black(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    fn to_srgb_bytes(&self) -> [u8; 3] {
        let quantize = |c: f32| (255.0 * c.clamp(0.0, 1.0).powf(0.6)) as u8;
        [quantize(self.x), quantize(self.y), quantize(self.z)]
    }
}
