//! Worker pool and blocking parallel-for substrate.
//!
//! A fixed set of worker threads serves a shared job list. Each call to
//! [`Scheduler::parallel_for`] / [`Scheduler::parallel_for_2d`] registers one
//! job, then the calling thread works alongside the pool until every chunk
//! of that job has run. Chunks are claimed under a single mutex, sized so
//! each thread sees roughly eight of them; faster workers simply claim more.
//!
//! The scheduler is an explicit object handed to the render driver rather
//! than process-global state, but the intent is still one pool per process
//! lifetime.

use std::mem;
use std::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use ember_math::{Bounds2i, IVec2};

enum JobKind {
    Range {
        next: i32,
        end: i32,
        chunk: i32,
        func: *const (dyn Fn(i32, i32) + Sync + 'static),
    },
    Tiles {
        extent: Bounds2i,
        next_start: IVec2,
        tile: i32,
        func: *const (dyn Fn(Bounds2i) + Sync + 'static),
    },
}

/// One outstanding parallel loop. Lives on the calling thread's stack for
/// the duration of the call; the pool only ever touches it through the
/// registered pointer while the caller is blocked inside the loop.
struct JobState {
    active_workers: usize,
    kind: JobKind,
}

/// A claimed unit of work, executed outside the pool lock.
enum WorkItem {
    Range(i32, i32, *const (dyn Fn(i32, i32) + Sync + 'static)),
    Tile(Bounds2i, *const (dyn Fn(Bounds2i) + Sync + 'static)),
}

impl JobState {
    fn have_work(&self) -> bool {
        match &self.kind {
            JobKind::Range { next, end, .. } => next < end,
            JobKind::Tiles {
                extent, next_start, ..
            } => next_start.y < extent.max.y,
        }
    }

    fn finished(&self) -> bool {
        !self.have_work() && self.active_workers == 0
    }

    /// Advance the cursor by one chunk. Must be called under the pool lock.
    fn claim_chunk(&mut self) -> WorkItem {
        match &mut self.kind {
            JobKind::Range {
                next, end, chunk, func,
            } => {
                let start = *next;
                let stop = (start + *chunk).min(*end);
                *next = stop;
                WorkItem::Range(start, stop, *func)
            }
            JobKind::Tiles {
                extent,
                next_start,
                tile,
                func,
            } => {
                let b = Bounds2i {
                    min: *next_start,
                    max: *next_start + IVec2::splat(*tile),
                }
                .intersect(extent);
                next_start.x += *tile;
                if next_start.x >= extent.max.x {
                    next_start.x = extent.min.x;
                    next_start.y += *tile;
                }
                WorkItem::Tile(b, *func)
            }
        }
    }
}

struct JobPtr(NonNull<JobState>);

// Jobs are only dereferenced under the pool mutex while their owner is
// blocked in parallel_for, so moving the pointer across threads is sound.
unsafe impl Send for JobPtr {}

struct JobList {
    jobs: Vec<JobPtr>,
    shutdown: bool,
}

struct Pool {
    state: Mutex<JobList>,
    cv: Condvar,
}

/// Fixed-size worker pool. The thread that calls a parallel loop always
/// participates, so a pool of size `n` spawns `n - 1` OS threads.
pub struct Scheduler {
    pool: Arc<Pool>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// `num_threads = None` sizes the pool to hardware concurrency.
    pub fn new(num_threads: Option<usize>) -> Self {
        let n = num_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1);
        let pool = Arc::new(Pool {
            state: Mutex::new(JobList {
                jobs: Vec::new(),
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let workers = (1..n)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::Builder::new()
                    .name(format!("ember-worker-{i}"))
                    .spawn(move || {
                        let mut guard = pool.state.lock().unwrap();
                        while !guard.shutdown {
                            guard = work_or_wait(&pool, guard);
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        log::debug!("scheduler started with {} threads", n);
        Self { pool, workers }
    }

    /// Total threads serving loops, caller included.
    pub fn thread_count(&self) -> usize {
        self.workers.len() + 1
    }

    /// Run `func(start, end)` over chunked subranges of `[start, end)`,
    /// blocking until the whole range has executed.
    pub fn parallel_for(&self, start: i32, end: i32, func: impl Fn(i32, i32) + Sync) {
        if end <= start {
            return;
        }
        let chunk = ((end - start) / (8 * self.thread_count() as i32)).max(1);
        if end - start < chunk {
            func(start, end);
            return;
        }
        let func_ref: &(dyn Fn(i32, i32) + Sync) = &func;
        // Erase the borrow's lifetime: this function does not return until
        // the job has been removed from the pool's list.
        let func_ptr: *const (dyn Fn(i32, i32) + Sync + 'static) =
            unsafe { mem::transmute(func_ref) };
        let mut job = JobState {
            active_workers: 0,
            kind: JobKind::Range {
                next: start,
                end,
                chunk,
                func: func_ptr,
            },
        };
        self.drive(&mut job);
    }

    /// Run `func(tile)` over square tiles covering `extent`, blocking until
    /// every tile has executed. Tile side targets eight chunks per thread,
    /// clamped to `[1, 32]`.
    pub fn parallel_for_2d(&self, extent: Bounds2i, func: impl Fn(Bounds2i) + Sync) {
        if extent.area() <= 0 {
            return;
        }
        let tile = tile_size(extent, self.thread_count());
        let func_ref: &(dyn Fn(Bounds2i) + Sync) = &func;
        let func_ptr: *const (dyn Fn(Bounds2i) + Sync + 'static) =
            unsafe { mem::transmute(func_ref) };
        let mut job = JobState {
            active_workers: 0,
            kind: JobKind::Tiles {
                extent,
                next_start: extent.min,
                tile,
                func: func_ptr,
            },
        };
        self.drive(&mut job);
    }

    /// Register the job and work on it (or any other outstanding job) until
    /// it completes.
    fn drive(&self, job: &mut JobState) {
        let job_ptr = NonNull::from(&mut *job);
        let mut guard = self.pool.state.lock().unwrap();
        guard.jobs.push(JobPtr(job_ptr));
        self.pool.cv.notify_all();
        while !unsafe { job_ptr.as_ref() }.finished() {
            guard = work_or_wait(&self.pool, guard);
        }
        drop(guard);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut guard = self.pool.state.lock().unwrap();
            guard.shutdown = true;
            self.pool.cv.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

pub(crate) fn tile_size(extent: Bounds2i, threads: usize) -> i32 {
    let d = extent.max - extent.min;
    let target = ((d.x * d.y) as f32 / (8 * threads) as f32).sqrt() as i32;
    target.clamp(1, 32)
}

/// Claim and run one chunk of the first job with remaining work, or wait for
/// the condition variable when nothing is runnable. The lock is released
/// around the chunk execution and reacquired before returning.
fn work_or_wait<'a>(pool: &'a Pool, mut guard: MutexGuard<'a, JobList>) -> MutexGuard<'a, JobList> {
    let found = guard.jobs.iter().position(|j| unsafe { j.0.as_ref() }.have_work());
    match found {
        Some(idx) => {
            let mut job_ptr = guard.jobs[idx].0;
            let item = {
                let job = unsafe { job_ptr.as_mut() };
                job.active_workers += 1;
                let item = job.claim_chunk();
                if !job.have_work() {
                    // Job self-removes once its range is exhausted
                    guard.jobs.swap_remove(idx);
                }
                item
            };
            drop(guard);
            match item {
                WorkItem::Range(start, end, func) => unsafe { (*func)(start, end) },
                WorkItem::Tile(tile, func) => unsafe { (*func)(tile) },
            }
            let guard = pool.state.lock().unwrap();
            let job = unsafe { job_ptr.as_mut() };
            job.active_workers -= 1;
            if job.finished() {
                pool.cv.notify_all();
            }
            guard
        }
        None => pool.cv.wait(guard).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_each_index_visited_exactly_once() {
        for pool_size in [1usize, 4, 16] {
            let scheduler = Scheduler::new(Some(pool_size));
            for n in [0i32, 1, 10_000] {
                let counts: Vec<AtomicU32> =
                    (0..n).map(|_| AtomicU32::new(0)).collect();
                scheduler.parallel_for(0, n, |start, end| {
                    for i in start..end {
                        counts[i as usize].fetch_add(1, Ordering::Relaxed);
                    }
                });
                assert!(
                    counts.iter().all(|c| c.load(Ordering::Relaxed) == 1),
                    "pool {} n {}",
                    pool_size,
                    n
                );
            }
        }
    }

    #[test]
    fn test_tiles_cover_extent_exactly_once() {
        let scheduler = Scheduler::new(Some(4));
        let extent = Bounds2i {
            min: IVec2::new(-3, 2),
            max: IVec2::new(97, 71),
        };
        let w = (extent.max.x - extent.min.x) as usize;
        let h = (extent.max.y - extent.min.y) as usize;
        let counts: Vec<AtomicU32> = (0..w * h).map(|_| AtomicU32::new(0)).collect();
        scheduler.parallel_for_2d(extent, |tile| {
            for y in tile.min.y..tile.max.y {
                for x in tile.min.x..tile.max.x {
                    let i = (y - extent.min.y) as usize * w + (x - extent.min.x) as usize;
                    counts[i].fetch_add(1, Ordering::Relaxed);
                }
            }
        });
        assert!(counts.iter().all(|c| c.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_empty_ranges() {
        let scheduler = Scheduler::new(Some(2));
        scheduler.parallel_for(5, 5, |_, _| panic!("must not run"));
        let empty = Bounds2i {
            min: IVec2::ZERO,
            max: IVec2::ZERO,
        };
        scheduler.parallel_for_2d(empty, |_| panic!("must not run"));
    }

    #[test]
    fn test_sequential_loops_reuse_pool() {
        let scheduler = Scheduler::new(Some(4));
        let total = AtomicU32::new(0);
        for _ in 0..10 {
            scheduler.parallel_for(0, 100, |start, end| {
                total.fetch_add((end - start) as u32, Ordering::Relaxed);
            });
        }
        assert_eq!(total.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_caller_participates_with_single_thread_pool() {
        // A pool of one spawns no workers; the calling thread must still
        // complete the loop
        let scheduler = Scheduler::new(Some(1));
        assert_eq!(scheduler.thread_count(), 1);
        let total = AtomicU32::new(0);
        scheduler.parallel_for(0, 1000, |start, end| {
            total.fetch_add((end - start) as u32, Ordering::Relaxed);
        });
        assert_eq!(total.load(Ordering::Relaxed), 1000);
    }
}
