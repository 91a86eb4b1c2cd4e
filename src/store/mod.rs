//! The statistics store facade.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::codec::{IndexRow, ResourceType, RowData, RowLayout};
use crate::error::{Result, StoreError};
use crate::files::FileManager;
use crate::options::StoreOptions;

/// On-disk name of the per-chunk triple totals.
pub const TRIPLES_PER_CHUNK_FILE_NAME: &str = "triplesPerChunk";

/// Resource ids carry ownership metadata in their top 16 bits; only the
/// low 48 bits address a row in this engine.
pub const RESOURCE_ID_MASK: u64 = (1 << 48) - 1;

/// Disk-resident per-resource occurrence statistics.
///
/// For every resource id the store counts how often the resource occurs as
/// subject, property, and object within each chunk of the graph. Rows live
/// in a fixed-stride index file and spill to shape-sharded extra files
/// when they outgrow their inline slot; a row that spilled stays external
/// even if it would fit inline again.
///
/// Single-writer by design: no internal locking, callers interleaving
/// reads with writes accept the resulting races. All I/O is synchronous.
/// Id 0 is reserved: increments for it are no-ops and reads return zeros.
pub struct StatisticsStore {
    dir: PathBuf,
    layout: RowLayout,
    files: FileManager,
    triples_per_chunk: Vec<u64>,
    dirty: bool,
    closed: bool,
}

impl StatisticsStore {
    pub fn open(options: StoreOptions) -> Result<Self> {
        let layout = RowLayout::new(options.number_of_chunks)?;
        fs::create_dir_all(&options.directory)?;
        let files = FileManager::open(
            &options.directory,
            layout.main_row_len(),
            options.extra_file_handle_limit,
        )?;
        let triples_per_chunk = load_triples_per_chunk(&options.directory, layout.chunks())?;
        info!(
            dir = %options.directory.display(),
            chunks = layout.chunks(),
            "opened statistics store"
        );
        Ok(Self {
            dir: options.directory,
            layout,
            files,
            triples_per_chunk,
            dirty: false,
            closed: false,
        })
    }

    pub fn increment_subject_count(&mut self, resource_id: u64, chunk: usize) -> Result<()> {
        self.increment_occurrences(resource_id, ResourceType::Subject, chunk)
    }

    pub fn increment_property_count(&mut self, resource_id: u64, chunk: usize) -> Result<()> {
        self.increment_occurrences(resource_id, ResourceType::Property, chunk)
    }

    pub fn increment_object_count(&mut self, resource_id: u64, chunk: usize) -> Result<()> {
        self.increment_occurrences(resource_id, ResourceType::Object, chunk)
    }

    /// Bumps the triple total of `chunk`. Purely in memory until
    /// [`flush`](Self::flush).
    pub fn increment_number_of_triples_per_chunk(&mut self, chunk: usize) -> Result<()> {
        self.check_chunk(chunk)?;
        self.triples_per_chunk[chunk] += 1;
        Ok(())
    }

    /// Per-chunk triple totals.
    pub fn get_chunk_sizes(&self) -> &[u64] {
        &self.triples_per_chunk
    }

    /// The resource's full occurrence vector (`3 * chunks` columns), all
    /// zeros if the resource has no statistics.
    pub fn get_statistics_for_resource(&mut self, resource_id: u64) -> Result<Vec<u64>> {
        let id = resource_id & RESOURCE_ID_MASK;
        if id == 0 {
            return Ok(vec![0; self.layout.columns()]);
        }
        match self.load_row(id)? {
            Some((data, _)) => Ok(data.to_dense(&self.layout)),
            None => Ok(vec![0; self.layout.columns()]),
        }
    }

    /// Smallest id with no persisted row at or above it.
    pub fn max_id(&self) -> Result<u64> {
        Ok(self.files.index_len()? / self.layout.main_row_len() as u64)
    }

    /// Bulk-load path: encodes a dense vector directly, bypassing the
    /// increment logic. Intended for migration from another store.
    ///
    /// Calling this twice for the same id does not release a previously
    /// referenced extra-file slot; the orphaned bytes are reclaimed by the
    /// next defrag. Documented caveat of the bulk path, not a bug.
    pub fn insert_entry(&mut self, resource_id: u64, occurrences: &[u64]) -> Result<()> {
        if occurrences.len() != self.layout.columns() {
            return Err(StoreError::InvalidArgument(format!(
                "occurrence vector has {} columns, store has {}",
                occurrences.len(),
                self.layout.columns()
            )));
        }
        let id = resource_id & RESOURCE_ID_MASK;
        if id == 0 {
            return Ok(());
        }
        let Some(data) = RowData::from_dense(&self.layout, occurrences) else {
            // The all-zero vector is represented by an absent row.
            return Ok(());
        };
        if data.fits_inline(&self.layout) {
            let row = self.layout.encode_inline(&data);
            self.files.write_index_row(id, &row)?;
        } else {
            let shape = data.shape();
            let file_id = self.layout.shape_id(shape) as i64;
            let slot = self
                .files
                .allocate_external_row(file_id, data.data_len(), data.bytes())?;
            self.files
                .write_index_row(id, &self.layout.encode_external(shape, slot))?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Persists the chunk totals; if the store is dirty, defragments the
    /// extra files and persists the free-space index.
    pub fn flush(&mut self) -> Result<()> {
        self.write_triples_per_chunk()?;
        if self.dirty {
            self.defrag()?;
            self.dirty = false;
        }
        self.files.write_free_space_index()?;
        Ok(())
    }

    /// Rewrites every externally stored row into a compacted temporary
    /// twin of its extra file (fresh, hole-free allocation), then swaps
    /// the twins in. Extra files with no surviving rows are deleted.
    ///
    /// Not crash-atomic across the swap: a crash in the middle can leave a
    /// replaced extra file paired with stale allocator metadata.
    pub fn defrag(&mut self) -> Result<()> {
        let id_upper_bound = self.max_id()?;
        // Shapes with resident allocator state, plus every shape seen
        // while scanning: a file touched only through reads since a crash
        // recovery may not be resident yet, but its twin must still be
        // swapped in.
        let mut shape_file_ids: BTreeSet<i64> =
            self.files.shape_file_ids().into_iter().collect();
        let mut moved = 0u64;
        for id in 1..id_upper_bound {
            let Some(raw) = self.files.read_index_row(id)? else {
                break;
            };
            let Some(IndexRow::External { shape, slot }) = self.layout.decode_index_row(&raw)?
            else {
                continue;
            };
            let file_id = self.layout.shape_id(shape) as i64;
            shape_file_ids.insert(file_id);
            let row_len = self.layout.data_len(shape);
            let bytes = self.files.read_external_row(file_id, slot, row_len)?;
            let new_slot = self.files.allocate_external_row(-file_id, row_len, &bytes)?;
            self.files
                .write_index_row(id, &self.layout.encode_external(shape, new_slot))?;
            moved += 1;
        }
        for file_id in shape_file_ids {
            self.files.swap_in_compacted(file_id)?;
        }
        self.files.delete_empty_files()?;
        debug!(rows = moved, "defragmented external storage");
        Ok(())
    }

    /// Destroys all statistics: deletes the directory contents and
    /// reinitializes empty state.
    pub fn clear(&mut self) -> Result<()> {
        self.files.clear()?;
        self.triples_per_chunk = vec![0; self.layout.chunks()];
        self.dirty = false;
        info!(dir = %self.dir.display(), "cleared statistics store");
        Ok(())
    }

    /// Flushes and releases every file handle. Called automatically on
    /// drop (best effort) if not called explicitly.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.files.close();
        self.closed = true;
        Ok(())
    }

    /// Dumps all statistics as CSV, one line per resource id.
    pub fn write_csv(&mut self, out: &mut impl io::Write) -> Result<()> {
        write!(out, "TriplesPerChunk")?;
        for total in &self.triples_per_chunk {
            write!(out, "\t{total}")?;
        }
        writeln!(out)?;
        write!(out, "ResourceID")?;
        for kind in ["subject", "property", "object"] {
            for chunk in 0..self.layout.chunks() {
                write!(out, ";{kind}InChunk{chunk}")?;
            }
        }
        writeln!(out, ";overallOccurrence")?;
        for id in 1..self.max_id()? {
            let stats = self.get_statistics_for_resource(id)?;
            if stats.iter().all(|&v| v == 0) {
                continue;
            }
            write!(out, "{id}")?;
            for value in &stats {
                write!(out, ";{value}")?;
            }
            writeln!(out, ";{}", stats.iter().sum::<u64>())?;
        }
        Ok(())
    }

    fn check_chunk(&self, chunk: usize) -> Result<()> {
        if chunk >= self.layout.chunks() {
            return Err(StoreError::InvalidArgument(format!(
                "chunk {chunk} out of range, store has {} chunks",
                self.layout.chunks()
            )));
        }
        Ok(())
    }

    fn increment_occurrences(
        &mut self,
        resource_id: u64,
        resource_type: ResourceType,
        chunk: usize,
    ) -> Result<()> {
        self.check_chunk(chunk)?;
        let id = resource_id & RESOURCE_ID_MASK;
        if id == 0 {
            return Ok(());
        }
        let column = self.layout.column_of(resource_type, chunk);
        match self.load_row(id)? {
            None => {
                let data = RowData::new_single(&self.layout, column);
                let row = self.layout.encode_inline(&data);
                self.files.write_index_row(id, &row)?;
            }
            Some((mut data, location)) => {
                data.increment(&self.layout, column);
                self.persist_row(id, data, location)?;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Loads a resource's row, following the extra-file reference when the
    /// data is external. The second component is the external location
    /// `(file id, slot, row length)` the data was read from, if any.
    fn load_row(&mut self, id: u64) -> Result<Option<(RowData, Option<(i64, u64, usize)>)>> {
        let Some(raw) = self.files.read_index_row(id)? else {
            return Ok(None);
        };
        match self.layout.decode_index_row(&raw)? {
            None => Ok(None),
            Some(IndexRow::Inline(data)) => Ok(Some((data, None))),
            Some(IndexRow::External { shape, slot }) => {
                let file_id = self.layout.shape_id(shape) as i64;
                let row_len = self.layout.data_len(shape);
                let bytes = self.files.read_external_row(file_id, slot, row_len)?;
                let data = RowData::from_parts(&self.layout, shape, bytes)?;
                Ok(Some((data, Some((file_id, slot, row_len)))))
            }
        }
    }

    /// Writes back a mutated row, relocating it as its shape demands.
    fn persist_row(
        &mut self,
        id: u64,
        data: RowData,
        old_location: Option<(i64, u64, usize)>,
    ) -> Result<()> {
        let shape = data.shape();
        match old_location {
            None if data.fits_inline(&self.layout) => {
                let row = self.layout.encode_inline(&data);
                self.files.write_index_row(id, &row)
            }
            None => {
                // Inline capacity exceeded: promote to the extra file of
                // the row's new shape.
                let file_id = self.layout.shape_id(shape) as i64;
                let slot = self
                    .files
                    .allocate_external_row(file_id, data.data_len(), data.bytes())?;
                debug!(id, file_id, slot, "promoted row to extra file");
                self.files
                    .write_index_row(id, &self.layout.encode_external(shape, slot))
            }
            Some((old_file_id, old_slot, old_row_len)) => {
                // Once external, always external.
                let file_id = self.layout.shape_id(shape) as i64;
                let slot = if file_id != old_file_id {
                    self.files
                        .delete_external_row(old_file_id, old_slot, old_row_len)?;
                    let slot = self
                        .files
                        .allocate_external_row(file_id, data.data_len(), data.bytes())?;
                    debug!(id, old_file_id, file_id, "relocated row between extra files");
                    slot
                } else {
                    self.files
                        .overwrite_external_row(file_id, old_slot, data.bytes())?;
                    old_slot
                };
                self.files
                    .write_index_row(id, &self.layout.encode_external(shape, slot))
            }
        }
    }

    fn write_triples_per_chunk(&self) -> Result<()> {
        let mut bytes = Vec::with_capacity(self.triples_per_chunk.len() * 8);
        for &total in &self.triples_per_chunk {
            bytes.extend_from_slice(&total.to_be_bytes());
        }
        fs::write(self.dir.join(TRIPLES_PER_CHUNK_FILE_NAME), bytes)?;
        Ok(())
    }
}

impl Drop for StatisticsStore {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                warn!(%err, "failed to close statistics store");
            }
        }
    }
}

fn load_triples_per_chunk(dir: &std::path::Path, chunks: usize) -> Result<Vec<u64>> {
    let mut totals = vec![0u64; chunks];
    let bytes = match fs::read(dir.join(TRIPLES_PER_CHUNK_FILE_NAME)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(totals),
        Err(err) => return Err(err.into()),
    };
    for (i, total) in totals.iter_mut().enumerate() {
        let span = match bytes.get(i * 8..i * 8 + 8) {
            Some(span) => span,
            None => break,
        };
        *total = u64::from_be_bytes(span.try_into().expect("eight bytes"));
    }
    Ok(totals)
}
