//! In-memory row data and the minimal-diff increment paths.

use crate::bitpack::{
    byte_width, count_ones_before, read_uint_be, set_bit, set_bit_positions, write_uint_be,
};
use crate::error::{Result, StoreError};

use super::{PositionEncoding, RowLayout, Shape, MAX_VALUE_WIDTH, ROW_DATA_LEN};

/// One resource's sparse occurrence vector in its encoded form: the
/// position bytes followed by the counter values, plus the row's shape.
///
/// Counters only ever grow, so a row's shape is monotone: the column count
/// never shrinks and the value width never narrows. An increment changes
/// the bytes in place when the shape allows it and re-encodes only when
/// the position encoding flips or a counter outgrows its width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowData {
    shape: Shape,
    bytes: Vec<u8>,
}

impl RowData {
    /// A fresh row: one column, one-byte counter at 1, list encoded.
    pub fn new_single(layout: &RowLayout, column: usize) -> Self {
        debug_assert!(column < layout.columns());
        let entry_len = layout.list_entry_len();
        let mut bytes = vec![0u8; entry_len + 1];
        write_uint_be(&mut bytes, 0, entry_len, column as u64);
        bytes[entry_len] = 1;
        Self {
            shape: Shape {
                position_count: 1,
                bytes_per_value: 1,
            },
            bytes,
        }
    }

    /// Reassembles a row from its shape and raw data bytes (e.g. read back
    /// from an extra file). The byte length must match the shape exactly.
    pub fn from_parts(layout: &RowLayout, shape: Shape, bytes: Vec<u8>) -> Result<Self> {
        let expected = layout.data_len(shape);
        if bytes.len() != expected {
            return Err(StoreError::Corruption(format!(
                "row data has {} bytes, shape requires {expected}",
                bytes.len()
            )));
        }
        Ok(Self { shape, bytes })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the encoded data fits the index row's data field.
    pub fn fits_inline(&self, layout: &RowLayout) -> bool {
        layout.metadata_len() + self.bytes.len() <= layout.main_row_len()
    }

    fn encoding(&self, layout: &RowLayout) -> PositionEncoding {
        layout.encoding_for(self.shape.position_count)
    }

    fn position_len(&self, layout: &RowLayout) -> usize {
        layout.position_len(self.shape)
    }

    /// Index of `column`'s counter in the value area, or `None` if the
    /// column has no entry yet.
    fn value_index_of(&self, layout: &RowLayout, column: usize) -> Option<usize> {
        match self.encoding(layout) {
            PositionEncoding::List => {
                let entry_len = layout.list_entry_len();
                (0..self.shape.position_count)
                    .find(|&i| read_uint_be(&self.bytes, i * entry_len, entry_len) == column as u64)
            }
            PositionEncoding::Bitmap => {
                if crate::bitpack::get_bit(&self.bytes, column) {
                    Some(count_ones_before(&self.bytes, column))
                } else {
                    None
                }
            }
        }
    }

    /// Increments the counter of `column` by one, growing the row's shape
    /// as needed. The three paths:
    ///
    /// 1. column present, counter fits: overwrite the value in place;
    /// 2. column present, counter overflows its width: widen
    ///    `bytes_per_value` by one and rewrite the value area (positions
    ///    untouched);
    /// 3. column absent: splice a position+value entry in if the optimal
    ///    encoding is unchanged, otherwise re-encode the whole row under
    ///    the flipped encoding.
    pub fn increment(&mut self, layout: &RowLayout, column: usize) {
        debug_assert!(column < layout.columns());
        match self.value_index_of(layout, column) {
            Some(index) => self.bump_value(layout, index),
            None => self.insert_column(layout, column),
        }
    }

    fn bump_value(&mut self, layout: &RowLayout, index: usize) {
        let width = self.shape.bytes_per_value;
        let position_len = self.position_len(layout);
        let offset = position_len + index * width;
        let value = read_uint_be(&self.bytes, offset, width);
        let overflows = width < MAX_VALUE_WIDTH && value + 1 >= 1u64 << (8 * width);
        if !overflows {
            // Counters are unsigned within their width; at the maximum
            // width an increment saturating here is unreachable in
            // practice (2^64 - 1 occurrences).
            write_uint_be(&mut self.bytes, offset, width, value.saturating_add(1));
            return;
        }
        // Widen by one byte and rewrite every value at the new width.
        // Values are read at the old width first, so nothing truncates.
        let count = self.shape.position_count;
        let mut values: Vec<u64> = (0..count)
            .map(|i| read_uint_be(&self.bytes, position_len + i * width, width))
            .collect();
        values[index] += 1;
        let new_width = width + 1;
        self.bytes.resize(position_len + count * new_width, 0);
        for (i, v) in values.iter().enumerate() {
            write_uint_be(&mut self.bytes, position_len + i * new_width, new_width, *v);
        }
        self.shape.bytes_per_value = new_width;
    }

    fn insert_column(&mut self, layout: &RowLayout, column: usize) {
        let new_count = self.shape.position_count + 1;
        if layout.encoding_for(new_count) != self.encoding(layout) {
            // The optimal encoding flips: decode to dense and re-encode
            // from scratch under the new encoding.
            let mut dense = self.to_dense(layout);
            dense[column] = 1;
            *self = Self::from_dense_with_width(layout, &dense, self.shape.bytes_per_value)
                .expect("dense vector with a fresh column is nonzero");
            return;
        }
        let width = self.shape.bytes_per_value;
        match self.encoding(layout) {
            PositionEncoding::List => {
                let entry_len = layout.list_entry_len();
                // Keep list entries sorted ascending.
                let insert_at = (0..self.shape.position_count)
                    .find(|&i| read_uint_be(&self.bytes, i * entry_len, entry_len) > column as u64)
                    .unwrap_or(self.shape.position_count);
                let position_len = self.position_len(layout);
                // Splice the value slot first, while the old position
                // length still gives its offset.
                let value_offset = position_len + insert_at * width;
                self.bytes
                    .splice(value_offset..value_offset, std::iter::repeat(0).take(width));
                let entry_offset = insert_at * entry_len;
                self.bytes.splice(
                    entry_offset..entry_offset,
                    std::iter::repeat(0).take(entry_len),
                );
                write_uint_be(&mut self.bytes, entry_offset, entry_len, column as u64);
                write_uint_be(
                    &mut self.bytes,
                    position_len + entry_len + insert_at * width,
                    width,
                    1,
                );
            }
            PositionEncoding::Bitmap => {
                let insert_at = count_ones_before(&self.bytes, column);
                set_bit(&mut self.bytes, column);
                let offset = self.position_len(layout) + insert_at * width;
                self.bytes
                    .splice(offset..offset, std::iter::repeat(0).take(width));
                write_uint_be(&mut self.bytes, offset, width, 1);
            }
        }
        self.shape.position_count = new_count;
    }

    /// Column numbers carrying values, in value order (ascending).
    fn positions(&self, layout: &RowLayout) -> Vec<usize> {
        match self.encoding(layout) {
            PositionEncoding::List => {
                let entry_len = layout.list_entry_len();
                (0..self.shape.position_count)
                    .map(|i| read_uint_be(&self.bytes, i * entry_len, entry_len) as usize)
                    .collect()
            }
            PositionEncoding::Bitmap => {
                set_bit_positions(&self.bytes[..layout.bitmap_len()], layout.columns())
            }
        }
    }

    /// Expands the row into the full dense occurrence vector.
    pub fn to_dense(&self, layout: &RowLayout) -> Vec<u64> {
        let mut dense = vec![0u64; layout.columns()];
        let position_len = self.position_len(layout);
        let width = self.shape.bytes_per_value;
        for (i, column) in self.positions(layout).into_iter().enumerate() {
            dense[column] = read_uint_be(&self.bytes, position_len + i * width, width);
        }
        dense
    }

    /// Encodes a dense vector, choosing the optimal encoding and the
    /// minimal value width. Returns `None` for the all-zero vector, which
    /// is never persisted.
    pub fn from_dense(layout: &RowLayout, dense: &[u64]) -> Option<Self> {
        Self::from_dense_with_width(layout, dense, 1)
    }

    /// Like [`from_dense`](Self::from_dense) but never narrows below
    /// `min_width`, preserving value-width monotonicity across re-encodes.
    fn from_dense_with_width(layout: &RowLayout, dense: &[u64], min_width: usize) -> Option<Self> {
        debug_assert_eq!(dense.len(), layout.columns());
        let nonzero: Vec<(usize, u64)> = dense
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0)
            .map(|(c, &v)| (c, v))
            .collect();
        if nonzero.is_empty() {
            return None;
        }
        let shape = Shape {
            position_count: nonzero.len(),
            bytes_per_value: nonzero
                .iter()
                .map(|&(_, v)| byte_width(v))
                .max()
                .unwrap_or(1)
                .max(min_width),
        };
        let position_len = layout.position_len(shape);
        let width = shape.bytes_per_value;
        let mut bytes = vec![0u8; layout.data_len(shape)];
        match layout.encoding_for(shape.position_count) {
            PositionEncoding::List => {
                let entry_len = layout.list_entry_len();
                for (i, &(column, _)) in nonzero.iter().enumerate() {
                    write_uint_be(&mut bytes, i * entry_len, entry_len, column as u64);
                }
            }
            PositionEncoding::Bitmap => {
                for &(column, _) in &nonzero {
                    set_bit(&mut bytes, column);
                }
            }
        }
        for (i, &(_, value)) in nonzero.iter().enumerate() {
            write_uint_be(&mut bytes, position_len + i * width, width, value);
        }
        Some(Self { shape, bytes })
    }
}
