//! Engine configuration.

/// Process-wide settings, fixed when the engine starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvmConfiguration {
    /// Number of worker threads. Must be at least 1.
    pub thread_count: usize,
    /// Keep debug information when transforming contract code.
    pub preserve_debuggability: bool,
    /// Log every contract fault at `warn` level.
    pub enable_verbose_contract_errors: bool,
    /// Log task start/abort/finish at `info` level instead of `trace`.
    pub enable_verbose_concurrent_executor: bool,
    /// Forward contract `print`/`println` output to the log on commit.
    pub enable_blockchain_println: bool,
    /// Upper bound on the number of contracts kept in the hot cache.
    pub hot_cache_capacity: usize,
}

impl Default for AvmConfiguration {
    fn default() -> Self {
        Self {
            thread_count: 4,
            preserve_debuggability: false,
            enable_verbose_contract_errors: false,
            enable_verbose_concurrent_executor: false,
            enable_blockchain_println: false,
            hot_cache_capacity: 4_096,
        }
    }
}

impl AvmConfiguration {
    pub fn with_threads(thread_count: usize) -> Self {
        Self {
            thread_count,
            ..Self::default()
        }
    }
}
