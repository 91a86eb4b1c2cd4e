//! Store configuration.

use std::path::PathBuf;

/// Default bound on simultaneously open extra-file handles.
pub const DEFAULT_EXTRA_FILE_HANDLE_LIMIT: usize = 64;

/// Options supplied when opening a [`crate::StatisticsStore`].
///
/// The chunk count is part of the on-disk layout: reopening an existing
/// store with a different value reads garbage. It never changes without a
/// full rebuild.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory holding the store's files; created if missing.
    pub directory: PathBuf,
    /// Number of graph partitions. Fixes the column count at `3 * chunks`.
    pub number_of_chunks: u16,
    /// Maximum number of extra-file handles kept open at once.
    pub extra_file_handle_limit: usize,
}

impl StoreOptions {
    pub fn new(directory: impl Into<PathBuf>, number_of_chunks: u16) -> Self {
        Self {
            directory: directory.into(),
            number_of_chunks,
            extra_file_handle_limit: DEFAULT_EXTRA_FILE_HANDLE_LIMIT,
        }
    }

    /// Sets the bound on simultaneously open extra-file handles.
    pub fn extra_file_handle_limit(mut self, limit: usize) -> Self {
        self.extra_file_handle_limit = limit;
        self
    }
}
