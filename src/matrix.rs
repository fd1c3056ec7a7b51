//! Physical wiring transform.
//!
//! The fixture is wired serpentine: the data line runs down the first bar,
//! up the second, down the third and so on. Frames are produced in logical
//! row-major order, so before transmission every pixel is moved to its
//! position along the wire. Physical index of the LED at logical
//! `(row, col)` is `col * rows + row` once the bar direction is accounted for.
//!
//! `flip_x` mirrors the bar order before the direction parity is computed,
//! `flip_y` mirrors the LED order inside a bar after it.

use crate::frame::CHANNELS;

/// Wiring parameters for a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WiringLayout {
    /// LEDs per bar.
    pub rows: usize,
    /// Number of bars.
    pub cols: usize,
    /// Reverse the bar order.
    pub flip_x: bool,
    /// Reverse the LED order inside each bar.
    pub flip_y: bool,
}

impl WiringLayout {
    /// Reorder a logical frame into wiring order.
    #[must_use]
    pub fn apply(&self, logical: &[u8]) -> Vec<u8> {
        transform(logical, self.rows, self.cols, self.flip_x, self.flip_y)
    }

    /// Recover the logical frame from a buffer in wiring order.
    #[must_use]
    pub fn invert(&self, physical: &[u8]) -> Vec<u8> {
        inverse(physical, self.rows, self.cols, self.flip_x, self.flip_y)
    }
}

/// Logical pixel index that ends up at physical `(col, row)`.
fn source_pixel(row: usize, col: usize, rows: usize, cols: usize, flip_x: bool, flip_y: bool) -> usize {
    let source_col = if flip_x { cols - 1 - col } else { col };
    let alternate_row = if source_col % 2 == 0 { row } else { rows - 1 - row };
    let source_row = if flip_y { rows - 1 - alternate_row } else { alternate_row };
    source_row * cols + source_col
}

/// Reorder `buffer` (logical, row-major) into serpentine wiring order.
///
/// The result is always `rows * cols * 3` bytes. Bytes missing from a short
/// input read as zero. Channel values are never altered.
#[must_use]
pub fn transform(buffer: &[u8], rows: usize, cols: usize, flip_x: bool, flip_y: bool) -> Vec<u8> {
    let mut result = vec![0u8; rows * cols * CHANNELS];
    for col in 0..cols {
        for row in 0..rows {
            let src = source_pixel(row, col, rows, cols, flip_x, flip_y) * CHANNELS;
            let dst = (col * rows + row) * CHANNELS;
            for i in 0..CHANNELS {
                result[dst + i] = buffer.get(src + i).copied().unwrap_or(0);
            }
        }
    }
    result
}

/// Inverse of [`transform`] for the same parameters.
#[must_use]
pub fn inverse(buffer: &[u8], rows: usize, cols: usize, flip_x: bool, flip_y: bool) -> Vec<u8> {
    let mut result = vec![0u8; rows * cols * CHANNELS];
    for col in 0..cols {
        for row in 0..rows {
            let dst = source_pixel(row, col, rows, cols, flip_x, flip_y) * CHANNELS;
            let src = (col * rows + row) * CHANNELS;
            for i in 0..CHANNELS {
                result[dst + i] = buffer.get(src + i).copied().unwrap_or(0);
            }
        }
    }
    result
}
