//! Heap profiling of pool workloads using dhat.
//!
//! Profiling adds overhead and is only compiled in with the `memory_profiling`
//! feature; the benchmark binary installs `dhat::Alloc` as its global allocator in
//! that case.
//!
//! ```bash
//! cargo bench -p rusty_pool_bench --features memory_profiling
//! ```
//!
//! The detailed profile is written to `dhat-heap.json`, viewable at
//! <https://nnethercote.github.io/dh_view/dh_view.html>.

use std::fmt;

/// Heap usage captured around a workload.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub bytes_allocated: u64,
    pub allocation_count: u64,
    pub peak_bytes: u64,
}

impl MemoryStats {
    /// Peak bytes per pooled item, the footprint that matters for chunk sizing.
    pub fn peak_bytes_per_item(&self, items: usize) -> f64 {
        if items == 0 {
            0.0
        } else {
            self.peak_bytes as f64 / items as f64
        }
    }

    pub fn allocations_per_item(&self, items: usize) -> f64 {
        if items == 0 {
            0.0
        } else {
            self.allocation_count as f64 / items as f64
        }
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocated: {} bytes ({} allocs), peak: {} bytes",
            self.bytes_allocated, self.allocation_count, self.peak_bytes
        )
    }
}

#[cfg(feature = "memory_profiling")]
struct Profiler(dhat::Profiler);

#[cfg(feature = "memory_profiling")]
impl Profiler {
    fn start() -> Self {
        Self(dhat::Profiler::new_heap())
    }

    fn finish(self) -> MemoryStats {
        let stats = dhat::HeapStats::get();
        drop(self.0);
        MemoryStats {
            bytes_allocated: stats.total_bytes,
            allocation_count: stats.total_blocks,
            peak_bytes: stats.max_bytes as u64,
        }
    }
}

#[cfg(not(feature = "memory_profiling"))]
struct Profiler;

#[cfg(not(feature = "memory_profiling"))]
impl Profiler {
    fn start() -> Self {
        Self
    }

    fn finish(self) -> MemoryStats {
        MemoryStats::default()
    }
}

/// Run a workload and report its heap usage. Without the `memory_profiling` feature
/// the stats are empty.
pub fn measure_memory<F, R>(f: F) -> (R, MemoryStats)
where
    F: FnOnce() -> R,
{
    let profiler = Profiler::start();
    let result = f();
    (result, profiler.finish())
}
