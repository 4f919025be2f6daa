//! Engine-wide tuning knobs.
//!
//! Cache and thread parameters drive the matmul tile size, the block-copy
//! partition limit and the point at which kernels fan out to worker threads.
//! Defaults can be overridden through the environment:
//!
//! - `STRIDED_L2_CACHE`: L2 cache size in bytes
//! - `STRIDED_THREADS`: number of worker threads assumed for partitioning
//! - `STRIDED_PARALLEL_THRESHOLD`: minimum element count for threaded kernels

use std::sync::{Arc, OnceLock};

/// Default L2 cache size assumed when nothing else is known (1 MiB).
pub const DEFAULT_L2_CACHE_SIZE: usize = 1 << 20;

/// Minimum number of elements to justify multi-threaded execution.
pub const MINTHREADLENGTH: usize = 1 << 15;

/// Number of kept-axis groups handed to one task by axis reductions.
pub const REDUCE_CHUNK: usize = 128;

/// Cache and threading parameters shared by every tensor of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// L2 cache size in bytes.
    pub l2_cache_size: usize,
    /// Worker threads assumed when partitioning work.
    pub threads: usize,
    /// Minimum element count before a kernel fans out.
    pub parallel_threshold: usize,
    pub reduce_chunk: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            l2_cache_size: DEFAULT_L2_CACHE_SIZE,
            threads: available_threads(),
            parallel_threshold: MINTHREADLENGTH,
            reduce_chunk: REDUCE_CHUNK,
        }
    }
}

fn available_threads() -> usize {
    #[cfg(feature = "parallel")]
    {
        rayon::current_num_threads().max(1)
    }
    #[cfg(not(feature = "parallel"))]
    {
        1
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring invalid engine setting");
            None
        }
    }
}

impl EngineConfig {
    /// Defaults with any `STRIDED_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_usize("STRIDED_L2_CACHE") {
            config.l2_cache_size = v;
        }
        if let Some(v) = env_usize("STRIDED_THREADS") {
            config.threads = v;
        }
        if let Some(v) = env_usize("STRIDED_PARALLEL_THRESHOLD") {
            config.parallel_threshold = v;
        }
        config
    }

    /// Process-wide configuration, read from the environment on first use.
    pub fn global() -> Arc<EngineConfig> {
        static GLOBAL: OnceLock<Arc<EngineConfig>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let config = EngineConfig::from_env();
                tracing::debug!(?config, "engine configuration initialized");
                Arc::new(config)
            })
            .clone()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_l2_cache_size(mut self, bytes: usize) -> Self {
        self.l2_cache_size = bytes.max(1);
        self
    }

    pub fn with_parallel_threshold(mut self, elements: usize) -> Self {
        self.parallel_threshold = elements;
        self
    }

    /// Square matmul tile edge: `sqrt(L2 / 2 / threads / elem_size)`,
    /// rounded down to a multiple of 8 once it reaches 8.
    pub fn mm_tile(&self, elem_size: usize) -> usize {
        let budget = self.l2_cache_size as f64 / 2.0 / self.threads as f64 / elem_size as f64;
        let tile = budget.sqrt().floor() as usize;
        let tile = if tile >= 8 { tile - tile % 8 } else { tile };
        tile.max(1)
    }

    /// Element count under which a block-copy partition is copied by one task.
    pub fn copy_block_limit(&self, elem_size: usize) -> usize {
        (self.l2_cache_size / (elem_size * 2 * self.threads * 8)).max(1)
    }
}
