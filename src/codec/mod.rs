//! Adaptive sparse-vector row codec.
//!
//! Every resource id conceptually owns a `u64` occurrence vector with one
//! column per `(resource type, chunk)` pair, almost all zero. A row stores
//! only the nonzero columns, in one of two position encodings, preceded by
//! a small metadata field describing the row's *shape* (how many columns
//! are set and how wide each counter is). The shape alone determines the
//! encoded byte length, which is what lets overflow files shard by shape.
//!
//! Index row layout (`main_row_len` bytes, fixed stride):
//!
//! ```text
//! +-------------------+------------------------------+
//! | metadata          | data (8 bytes)               |
//! | metadata_len      | inline positions+values      |
//! | bytes, big-endian | (zero padded), or big-endian |
//! |                   | extra-file slot id           |
//! +-------------------+------------------------------+
//! ```
//!
//! The metadata field packs `position_count - 1` into its top
//! `position_count_bits` bits and `bytes_per_value - 1` into its low
//! [`VALUE_WIDTH_BITS`] bits. An all-zero index row means the resource has
//! no statistics yet; a live row always has a nonzero byte (counters start
//! at 1), so the two cannot collide.

mod row;

pub use row::RowData;

use crate::bitpack::{bit_width, read_uint_be, write_uint_be};
use crate::error::{Result, StoreError};

/// Byte length of the data field of an index row. Rows whose encoded data
/// fits in this many bytes are stored inline; longer rows spill to an
/// extra file and the field holds the slot id instead.
pub const ROW_DATA_LEN: usize = 8;

/// Bits of the metadata field reserved for `bytes_per_value - 1`.
pub const VALUE_WIDTH_BITS: u32 = 3;

/// Widest supported counter, in bytes.
pub const MAX_VALUE_WIDTH: usize = 8;

/// Role a resource plays in a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Subject = 0,
    Property = 1,
    Object = 2,
}

/// How the nonzero column numbers of a row are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionEncoding {
    /// Sorted column numbers, `list_entry_len` bytes each, then values.
    List,
    /// One MSB0 bit per column, then values in ascending column order.
    Bitmap,
}

/// A row's shape: nonzero-column count and counter byte width. Together
/// with the [`RowLayout`] this fixes the encoded data length exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub position_count: usize,
    pub bytes_per_value: usize,
}

/// Byte-layout constants derived once from the chunk count. The chunk
/// count is fixed at store creation; changing it requires a full rebuild.
#[derive(Debug, Clone)]
pub struct RowLayout {
    chunks: usize,
    columns: usize,
    position_count_bits: u32,
    metadata_len: usize,
    bitmap_len: usize,
    list_entry_len: usize,
}

impl RowLayout {
    pub fn new(number_of_chunks: u16) -> Result<Self> {
        if number_of_chunks == 0 {
            return Err(StoreError::InvalidArgument(
                "number_of_chunks must be at least 1".into(),
            ));
        }
        let chunks = number_of_chunks as usize;
        let columns = 3 * chunks;
        let position_count_bits = bit_width(columns as u64 - 1).max(1);
        let metadata_len = (position_count_bits + VALUE_WIDTH_BITS).div_ceil(8) as usize;
        let bitmap_len = columns.div_ceil(8);
        let list_entry_len = bit_width(columns as u64).div_ceil(8) as usize;
        Ok(Self {
            chunks,
            columns,
            position_count_bits,
            metadata_len,
            bitmap_len,
            list_entry_len,
        })
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Number of columns of the conceptual occurrence vector.
    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata_len
    }

    pub fn bitmap_len(&self) -> usize {
        self.bitmap_len
    }

    pub fn list_entry_len(&self) -> usize {
        self.list_entry_len
    }

    /// Fixed length of every index-file row.
    pub fn main_row_len(&self) -> usize {
        self.metadata_len + ROW_DATA_LEN
    }

    /// Column number of a `(resource type, chunk)` pair.
    pub fn column_of(&self, resource_type: ResourceType, chunk: usize) -> usize {
        resource_type as usize * self.chunks + chunk
    }

    /// The cheaper position encoding for a given nonzero-column count.
    /// Ties favor the list encoding.
    pub fn encoding_for(&self, position_count: usize) -> PositionEncoding {
        if position_count * self.list_entry_len <= self.bitmap_len {
            PositionEncoding::List
        } else {
            PositionEncoding::Bitmap
        }
    }

    /// Byte length of the position part of a row with this shape.
    pub fn position_len(&self, shape: Shape) -> usize {
        match self.encoding_for(shape.position_count) {
            PositionEncoding::List => shape.position_count * self.list_entry_len,
            PositionEncoding::Bitmap => self.bitmap_len,
        }
    }

    /// Total encoded data length (positions + values) of this shape.
    pub fn data_len(&self, shape: Shape) -> usize {
        self.position_len(shape) + shape.position_count * shape.bytes_per_value
    }

    /// The metadata-field value of a shape. Doubles as the extra-file id
    /// for rows of this shape that overflow the index row.
    pub fn shape_id(&self, shape: Shape) -> u64 {
        let shift = self.metadata_len as u32 * 8 - self.position_count_bits;
        ((shape.position_count as u64 - 1) << shift) | (shape.bytes_per_value as u64 - 1)
    }

    /// Decodes and validates a metadata-field value.
    pub fn shape_of_id(&self, id: u64) -> Result<Shape> {
        let shift = self.metadata_len as u32 * 8 - self.position_count_bits;
        let shape = Shape {
            position_count: (id >> shift) as usize + 1,
            bytes_per_value: (id & ((1 << VALUE_WIDTH_BITS) - 1)) as usize + 1,
        };
        if shape.position_count > self.columns
            || shape.bytes_per_value > MAX_VALUE_WIDTH
            || self.shape_id(shape) != id
        {
            return Err(StoreError::Corruption(format!(
                "invalid row metadata field {id:#x}"
            )));
        }
        Ok(shape)
    }

    /// Parses an index row. Returns `None` for the all-zero row, which by
    /// definition means the resource has no statistics.
    pub fn decode_index_row(&self, row: &[u8]) -> Result<Option<IndexRow>> {
        if row.len() != self.main_row_len() {
            return Err(StoreError::Corruption(format!(
                "index row has {} bytes, expected {}",
                row.len(),
                self.main_row_len()
            )));
        }
        if row.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        let meta = read_uint_be(row, 0, self.metadata_len);
        let shape = self.shape_of_id(meta)?;
        let data_len = self.data_len(shape);
        if data_len <= ROW_DATA_LEN {
            let bytes = row[self.metadata_len..self.metadata_len + data_len].to_vec();
            Ok(Some(IndexRow::Inline(RowData::from_parts(
                self, shape, bytes,
            )?)))
        } else {
            Ok(Some(IndexRow::External {
                shape,
                slot: read_uint_be(row, self.metadata_len, ROW_DATA_LEN),
            }))
        }
    }

    /// Encodes a row whose data fits the index row's data field.
    pub fn encode_inline(&self, data: &RowData) -> Vec<u8> {
        debug_assert!(data.fits_inline(self));
        let mut row = vec![0u8; self.main_row_len()];
        write_uint_be(&mut row, 0, self.metadata_len, self.shape_id(data.shape()));
        row[self.metadata_len..self.metadata_len + data.bytes().len()]
            .copy_from_slice(data.bytes());
        row
    }

    /// Encodes an index row referencing an extra-file slot.
    pub fn encode_external(&self, shape: Shape, slot: u64) -> Vec<u8> {
        let mut row = vec![0u8; self.main_row_len()];
        write_uint_be(&mut row, 0, self.metadata_len, self.shape_id(shape));
        write_uint_be(&mut row, self.metadata_len, ROW_DATA_LEN, slot);
        row
    }
}

/// A parsed index row: either the row data itself or a pointer into the
/// extra file of the row's shape.
#[derive(Debug)]
pub enum IndexRow {
    Inline(RowData),
    External { shape: Shape, slot: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants_for_two_chunks() {
        let layout = RowLayout::new(2).unwrap();
        assert_eq!(layout.columns(), 6);
        assert_eq!(layout.metadata_len(), 1);
        assert_eq!(layout.bitmap_len(), 1);
        assert_eq!(layout.list_entry_len(), 1);
        assert_eq!(layout.main_row_len(), 9);
    }

    #[test]
    fn layout_constants_for_forty_chunks() {
        let layout = RowLayout::new(40).unwrap();
        assert_eq!(layout.columns(), 120);
        // bit_width(119) = 7, plus 3 value-width bits -> 2 metadata bytes.
        assert_eq!(layout.metadata_len(), 2);
        assert_eq!(layout.bitmap_len(), 15);
        assert_eq!(layout.list_entry_len(), 1);
        assert_eq!(layout.main_row_len(), 10);
    }

    #[test]
    fn list_entry_widens_past_256_columns() {
        let layout = RowLayout::new(100).unwrap();
        assert_eq!(layout.columns(), 300);
        assert_eq!(layout.list_entry_len(), 2);
    }

    #[test]
    fn zero_chunks_rejected() {
        assert!(RowLayout::new(0).is_err());
    }

    #[test]
    fn encoding_crossover_favors_list_on_tie() {
        let layout = RowLayout::new(2).unwrap();
        // bitmap_len == 1, list_entry_len == 1: one column ties -> list.
        assert_eq!(layout.encoding_for(1), PositionEncoding::List);
        assert_eq!(layout.encoding_for(2), PositionEncoding::Bitmap);

        let layout = RowLayout::new(40).unwrap();
        // bitmap_len == 15: list wins up to 15 columns.
        assert_eq!(layout.encoding_for(15), PositionEncoding::List);
        assert_eq!(layout.encoding_for(16), PositionEncoding::Bitmap);
    }

    #[test]
    fn shape_id_round_trip() {
        for chunks in [1u16, 2, 4, 40, 100] {
            let layout = RowLayout::new(chunks).unwrap();
            for position_count in [1, 2, layout.columns() / 2, layout.columns()] {
                for bytes_per_value in 1..=MAX_VALUE_WIDTH {
                    let shape = Shape {
                        position_count,
                        bytes_per_value,
                    };
                    let id = layout.shape_id(shape);
                    assert_eq!(layout.shape_of_id(id).unwrap(), shape);
                }
            }
        }
    }

    #[test]
    fn shape_id_rejects_garbage() {
        let layout = RowLayout::new(2).unwrap();
        // position_count would exceed the column count.
        let bad = layout.shape_id(Shape {
            position_count: 6,
            bytes_per_value: 8,
        }) + (1 << VALUE_WIDTH_BITS);
        assert!(layout.shape_of_id(bad).is_err());
    }

    #[test]
    fn index_row_all_zero_is_absent() {
        let layout = RowLayout::new(2).unwrap();
        let row = vec![0u8; layout.main_row_len()];
        assert!(layout.decode_index_row(&row).unwrap().is_none());
    }

    #[test]
    fn index_row_wrong_length_is_corruption() {
        let layout = RowLayout::new(2).unwrap();
        assert!(layout.decode_index_row(&[0u8; 4]).is_err());
    }

    #[test]
    fn external_row_round_trip() {
        let layout = RowLayout::new(40).unwrap();
        let shape = Shape {
            position_count: 20,
            bytes_per_value: 3,
        };
        assert!(layout.data_len(shape) > ROW_DATA_LEN);
        let row = layout.encode_external(shape, 1234);
        match layout.decode_index_row(&row).unwrap() {
            Some(IndexRow::External { shape: s, slot }) => {
                assert_eq!(s, shape);
                assert_eq!(slot, 1234);
            }
            other => panic!("expected external row, got {other:?}"),
        }
    }
}
