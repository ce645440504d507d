//! Runtime-configurable parameters for the collective engine.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `COLLEX_`) or by constructing a custom `CollexConfig`.

use std::time::Duration;

/// Algorithm used for uniform-count allgather.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllgatherAlgorithm {
    /// Bruck's log-depth exchange.
    #[default]
    Bruck,
    /// N-1 rounds around a ring.
    Ring,
}

impl AllgatherAlgorithm {
    /// Parse a config value, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bruck" => Some(Self::Bruck),
            "ring" => Some(Self::Ring),
            _ => None,
        }
    }
}

/// Tuning parameters for the engine and the in-process transport.
#[derive(Debug, Clone)]
pub struct CollexConfig {
    /// How long a local node waits for the next message before giving up.
    pub collective_timeout: Duration,

    /// Algorithm behind the uniform `allgather` entry point.
    pub allgather: AllgatherAlgorithm,

    /// Number of freed workspace buffers kept around for reuse.
    pub workspace_pool_size: usize,

    /// Consecutive global ranks sharing one node in the local cluster.
    pub ranks_per_node: u32,
}

impl Default for CollexConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            allgather: AllgatherAlgorithm::Bruck,
            workspace_pool_size: 64,
            ranks_per_node: 1,
        }
    }
}

impl CollexConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `COLLEX_COLLECTIVE_TIMEOUT_SECS`
    /// - `COLLEX_ALLGATHER` (`bruck` or `ring`)
    /// - `COLLEX_WORKSPACE_POOL_SIZE`
    /// - `COLLEX_RANKS_PER_NODE`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("COLLEX_COLLECTIVE_TIMEOUT_SECS")
            && let Ok(s) = v.parse::<u64>()
        {
            cfg.collective_timeout = Duration::from_secs(s);
        }
        if let Ok(v) = std::env::var("COLLEX_ALLGATHER") {
            match AllgatherAlgorithm::parse(&v) {
                Some(algo) => cfg.allgather = algo,
                None => tracing::warn!(value = %v, "ignoring unknown COLLEX_ALLGATHER"),
            }
        }
        if let Ok(v) = std::env::var("COLLEX_WORKSPACE_POOL_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.workspace_pool_size = n;
        }
        if let Ok(v) = std::env::var("COLLEX_RANKS_PER_NODE")
            && let Ok(n) = v.parse::<u32>()
            && n > 0
        {
            cfg.ranks_per_node = n;
        }

        cfg
    }
}
