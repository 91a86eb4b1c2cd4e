//! Placement and persistence of rows across the index file and the
//! shape-sharded extra files.

mod row_file;

pub use row_file::RowFile;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::alloc::RunLengthIdAllocator;
use crate::error::{Result, StoreError};

/// On-disk name of the fixed-stride index file.
pub const INDEX_FILE_NAME: &str = "statistics";

/// On-disk name of the serialized free-space run lists.
pub const FREE_SPACE_INDEX_FILE_NAME: &str = "freeSpaceIndex";

/// Per-extra-file bookkeeping that stays resident even when the file
/// handle itself is evicted from the LRU cache.
#[derive(Debug)]
struct ExtraFileState {
    row_len: usize,
    alloc: RunLengthIdAllocator,
}

/// Owns the index file plus a pool of extra files, one per row shape that
/// overflows the index row. File ids are `i64`: non-negative ids are shape
/// ids, negative ids name the compacted temporaries defrag builds before
/// swapping them in.
///
/// Allocator state is always resident; only the open handles are bounded,
/// by an LRU cache. Evicting a handle closes the descriptor and nothing
/// else, so reopening is cheap.
#[derive(Debug)]
pub struct FileManager {
    dir: PathBuf,
    index: RowFile,
    main_row_len: usize,
    states: BTreeMap<i64, ExtraFileState>,
    handles: LruCache<i64, RowFile>,
}

fn extra_path(dir: &Path, file_id: i64) -> PathBuf {
    dir.join(file_id.to_string())
}

impl FileManager {
    pub fn open(dir: &Path, main_row_len: usize, handle_limit: usize) -> Result<Self> {
        remove_stale_temporaries(dir)?;
        let index = RowFile::open(&dir.join(INDEX_FILE_NAME), true)?;
        let states = load_free_space_index(dir)?;
        let capacity = NonZeroUsize::new(handle_limit).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            main_row_len,
            states,
            handles: LruCache::new(capacity),
        })
    }

    pub fn read_index_row(&mut self, id: u64) -> Result<Option<Vec<u8>>> {
        self.index.read_row(id, self.main_row_len)
    }

    pub fn write_index_row(&mut self, id: u64, row: &[u8]) -> Result<()> {
        debug_assert_eq!(row.len(), self.main_row_len);
        self.index.write_row(id, row)
    }

    /// Length of the index file in bytes.
    pub fn index_len(&self) -> Result<u64> {
        self.index.len()
    }

    /// Allocates the smallest free slot of `file_id` and writes `row`
    /// there, creating the file and its allocator on first use.
    pub fn allocate_external_row(
        &mut self,
        file_id: i64,
        row_len: usize,
        row: &[u8],
    ) -> Result<u64> {
        debug_assert_eq!(row.len(), row_len);
        let slot = self.state_mut(file_id, row_len)?.alloc.allocate();
        let handle = Self::handle_mut(&mut self.handles, &self.dir, file_id, true)?;
        handle.write_row(slot, row)?;
        Ok(slot)
    }

    /// Overwrites an existing slot in place (no allocation). Materializes
    /// the file's allocator state if it is not resident yet, so the file
    /// is known to later defrag and free-space persistence.
    pub fn overwrite_external_row(&mut self, file_id: i64, slot: u64, row: &[u8]) -> Result<()> {
        self.state_mut(file_id, row.len())?;
        let handle = Self::handle_mut(&mut self.handles, &self.dir, file_id, false)?;
        handle.write_row(slot, row)
    }

    /// Reads an external row, materializing allocator state like
    /// [`overwrite_external_row`](Self::overwrite_external_row). Unlike
    /// the index file, missing bytes here are corruption: the index row
    /// claimed the slot exists.
    pub fn read_external_row(&mut self, file_id: i64, slot: u64, row_len: usize) -> Result<Vec<u8>> {
        self.state_mut(file_id, row_len)?;
        let handle = Self::handle_mut(&mut self.handles, &self.dir, file_id, false)?;
        handle.read_row(slot, row_len)?.ok_or_else(|| {
            StoreError::Corruption(format!("row {slot} missing from extra file {file_id}"))
        })
    }

    /// Releases a slot. The bytes stay physically stale until the slot is
    /// reused; releasing an unknown slot is a no-op.
    pub fn delete_external_row(&mut self, file_id: i64, slot: u64, row_len: usize) -> Result<()> {
        self.state_mut(file_id, row_len)?.alloc.release(slot);
        Ok(())
    }

    /// Shape ids (non-negative file ids) with resident allocator state.
    pub fn shape_file_ids(&self) -> Vec<i64> {
        self.states.keys().copied().filter(|&id| id >= 0).collect()
    }

    /// Occupied slots of an extra file, per its allocator.
    pub fn used_slots(&self, file_id: i64) -> u64 {
        self.states
            .get(&file_id)
            .map(|s| s.alloc.used_count())
            .unwrap_or(0)
    }

    /// Replaces `file_id` with its compacted `-file_id` twin: both handles
    /// are closed, the twin is renamed over the original and its hole-free
    /// allocator adopted. A shape with no twin had no surviving rows; its
    /// stale file and allocator are dropped instead.
    ///
    /// The close/rename/adopt sequence is not crash-atomic; a crash in the
    /// middle can leave a replaced file paired with stale allocator
    /// metadata. Known limitation.
    pub fn swap_in_compacted(&mut self, file_id: i64) -> Result<()> {
        self.handles.pop(&file_id);
        self.handles.pop(&-file_id);
        match self.states.remove(&-file_id) {
            Some(twin) => {
                fs::rename(extra_path(&self.dir, -file_id), extra_path(&self.dir, file_id))?;
                debug!(file_id, rows = twin.alloc.used_count(), "compacted extra file");
                match self.states.entry(file_id) {
                    Entry::Occupied(mut entry) => {
                        if entry.get().row_len != twin.row_len {
                            return Err(StoreError::Corruption(format!(
                                "extra file {file_id} row length changed during defrag"
                            )));
                        }
                        entry.get_mut().alloc = twin.alloc;
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(twin);
                    }
                }
            }
            None => {
                self.states.remove(&file_id);
                let path = extra_path(&self.dir, file_id);
                if path.exists() {
                    debug!(file_id, "dropping extra file with no surviving rows");
                    fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }

    /// Removes extra files whose allocator reports zero used slots. The
    /// handles involved are closed first.
    pub fn delete_empty_files(&mut self) -> Result<()> {
        let empty: Vec<i64> = self
            .states
            .iter()
            .filter(|(_, s)| s.alloc.is_empty())
            .map(|(&id, _)| id)
            .collect();
        for file_id in empty {
            self.handles.pop(&file_id);
            self.states.remove(&file_id);
            let path = extra_path(&self.dir, file_id);
            if path.exists() {
                debug!(file_id, "deleting empty extra file");
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Persists every (non-temporary) extra file's free-space run list.
    /// Format: repeated big-endian records
    /// `(file_id: i64, row_len: i64, run_count: i64, runs: [i64])`.
    pub fn write_free_space_index(&self) -> Result<()> {
        let mut buf = Vec::new();
        for (&file_id, state) in &self.states {
            if file_id < 0 {
                continue;
            }
            buf.extend_from_slice(&file_id.to_be_bytes());
            buf.extend_from_slice(&(state.row_len as i64).to_be_bytes());
            buf.extend_from_slice(&(state.alloc.runs().len() as i64).to_be_bytes());
            for &run in state.alloc.runs() {
                buf.extend_from_slice(&run.to_be_bytes());
            }
        }
        fs::write(self.dir.join(FREE_SPACE_INDEX_FILE_NAME), buf)?;
        Ok(())
    }

    /// Closes every open handle. Allocator state stays resident.
    pub fn close(&mut self) {
        self.handles.clear();
    }

    /// Deletes every file in the store directory and reinitializes to an
    /// empty index file.
    pub fn clear(&mut self) -> Result<()> {
        self.handles.clear();
        self.states.clear();
        for entry in fs::read_dir(&self.dir)? {
            fs::remove_file(entry?.path())?;
        }
        self.index = RowFile::open(&self.dir.join(INDEX_FILE_NAME), true)?;
        Ok(())
    }

    fn state_mut(&mut self, file_id: i64, row_len: usize) -> Result<&mut ExtraFileState> {
        match self.states.entry(file_id) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                if state.row_len != row_len {
                    return Err(StoreError::Corruption(format!(
                        "extra file {file_id} has row length {}, expected {row_len}",
                        state.row_len
                    )));
                }
                Ok(state)
            }
            Entry::Vacant(entry) => {
                let path = extra_path(&self.dir, file_id);
                let alloc = if path.exists() {
                    // The file predates this session but its free-space
                    // list was never persisted (e.g. crash before the
                    // first flush). Marking every whole slot used keeps
                    // new allocations from clobbering live rows.
                    let slots = fs::metadata(&path)?.len() / row_len as u64;
                    if slots > 0 {
                        RunLengthIdAllocator::from_runs(vec![slots as i64])
                    } else {
                        RunLengthIdAllocator::new()
                    }
                } else {
                    RunLengthIdAllocator::new()
                };
                Ok(entry.insert(ExtraFileState { row_len, alloc }))
            }
        }
    }

    fn handle_mut<'a>(
        handles: &'a mut LruCache<i64, RowFile>,
        dir: &Path,
        file_id: i64,
        create: bool,
    ) -> Result<&'a mut RowFile> {
        if !handles.contains(&file_id) {
            let path = extra_path(dir, file_id);
            if !create && !path.exists() {
                return Err(StoreError::Corruption(format!(
                    "extra file {file_id} does not exist"
                )));
            }
            // Pushing may evict the least-recently-used handle, which
            // closes it on drop.
            handles.push(file_id, RowFile::open(&path, true)?);
        }
        handles.get_mut(&file_id).ok_or_else(|| {
            StoreError::Corruption(format!("extra file handle {file_id} not cached"))
        })
    }
}

/// Deletes leftover `-file_id` twins from an interrupted defrag. The
/// originals they were meant to replace are still intact, so the twins
/// are throwaway; keeping them would poison a later defrag of the same
/// shape with dead prefix rows.
fn remove_stale_temporaries(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_temporary = name
            .to_str()
            .and_then(|n| n.parse::<i64>().ok())
            .is_some_and(|id| id < 0);
        if is_temporary {
            debug!(name = %name.to_string_lossy(), "removing stale defrag temporary");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn load_free_space_index(dir: &Path) -> Result<BTreeMap<i64, ExtraFileState>> {
    let mut states = BTreeMap::new();
    let path = dir.join(FREE_SPACE_INDEX_FILE_NAME);
    if !path.exists() {
        return Ok(states);
    }
    let bytes = fs::read(&path)?;
    let mut offset = 0usize;
    while offset < bytes.len() {
        let file_id = read_i64(&bytes, &mut offset)?;
        let row_len = read_i64(&bytes, &mut offset)?;
        let run_count = read_i64(&bytes, &mut offset)?;
        if row_len <= 0 || run_count < 0 {
            return Err(StoreError::Corruption(format!(
                "free-space index record for file {file_id} is malformed"
            )));
        }
        let mut runs = Vec::with_capacity(run_count as usize);
        for _ in 0..run_count {
            let run = read_i64(&bytes, &mut offset)?;
            if run == 0 {
                return Err(StoreError::Corruption(format!(
                    "free-space index for file {file_id} contains a zero-length run"
                )));
            }
            runs.push(run);
        }
        states.insert(
            file_id,
            ExtraFileState {
                row_len: row_len as usize,
                alloc: RunLengthIdAllocator::from_runs(runs),
            },
        );
    }
    Ok(states)
}

fn read_i64(bytes: &[u8], offset: &mut usize) -> Result<i64> {
    let end = *offset + 8;
    let span = bytes
        .get(*offset..end)
        .ok_or_else(|| StoreError::Corruption("truncated free-space index".into()))?;
    *offset = end;
    Ok(i64::from_be_bytes(span.try_into().expect("eight bytes")))
}
