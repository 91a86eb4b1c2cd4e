//! occstore is a disk-resident per-resource occurrence-statistics store.
//!
//! For every resource of an RDF graph partitioned into chunks, the store
//! counts how often the resource occurs as subject, property, and object
//! within each chunk. Rows are stored as adaptive sparse vectors: only the
//! occupied columns are encoded, counters grow byte by byte, and a row
//! whose encoding no longer fits into its fixed index slot spills to an
//! extra file shared with all rows of the same encoded shape.
//!
//! ```no_run
//! use occstore::{StatisticsStore, StoreOptions};
//!
//! # fn main() -> occstore::Result<()> {
//! let mut store = StatisticsStore::open(StoreOptions::new("/tmp/stats", 4))?;
//! store.increment_subject_count(42, 0)?;
//! store.increment_object_count(42, 3)?;
//! store.increment_number_of_triples_per_chunk(0)?;
//! let occurrences = store.get_statistics_for_resource(42)?;
//! assert_eq!(occurrences[0], 1);
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod alloc;
pub mod bitpack;
pub mod codec;
pub mod error;
pub mod files;
pub mod options;
pub mod store;

pub use crate::codec::ResourceType;
pub use crate::error::{Result, StoreError};
pub use crate::options::StoreOptions;
pub use crate::store::StatisticsStore;
