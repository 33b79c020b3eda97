//! Sudoku Board
//!
//! Square grid of cells with the row/column/box constraint checks used both
//! by move validation and by the generator.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Plain grid snapshot, row-major, 0 = empty.
pub type Grid = Vec<Vec<u8>>;

// =============================================================================
// BOARD SIZE
// =============================================================================

/// Supported board sizes. Each is a perfect square.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub enum BoardSize {
    /// 4x4 with 2x2 boxes.
    Four,
    /// 9x9 with 3x3 boxes.
    #[default]
    Nine,
    /// 16x16 with 4x4 boxes.
    Sixteen,
}

impl BoardSize {
    /// All supported sizes, smallest first.
    pub const ALL: [BoardSize; 3] = [BoardSize::Four, BoardSize::Nine, BoardSize::Sixteen];

    /// Side length (N).
    #[inline]
    pub const fn side(self) -> usize {
        match self {
            BoardSize::Four => 4,
            BoardSize::Nine => 9,
            BoardSize::Sixteen => 16,
        }
    }

    /// Box side length (√N).
    #[inline]
    pub const fn box_len(self) -> usize {
        match self {
            BoardSize::Four => 2,
            BoardSize::Nine => 3,
            BoardSize::Sixteen => 4,
        }
    }

    /// Total number of cells (N²).
    #[inline]
    pub const fn cell_count(self) -> usize {
        self.side() * self.side()
    }

    /// Number of cells the generator clears from a solved board.
    ///
    /// 40 for the classic 9x9, half the board otherwise.
    pub const fn holes(self) -> usize {
        match self {
            BoardSize::Nine => 40,
            _ => self.cell_count() / 2,
        }
    }
}

impl TryFrom<i64> for BoardSize {
    type Error = BoardError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(BoardSize::Four),
            9 => Ok(BoardSize::Nine),
            16 => Ok(BoardSize::Sixteen),
            other => Err(BoardError::InvalidSize(other)),
        }
    }
}

impl TryFrom<u32> for BoardSize {
    type Error = BoardError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BoardSize::try_from(value as i64)
    }
}

impl From<BoardSize> for u32 {
    fn from(size: BoardSize) -> Self {
        size.side() as u32
    }
}

impl std::fmt::Display for BoardSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}x{0}", self.side())
    }
}

/// Board construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// Size is not 4, 9 or 16.
    #[error("Unsupported board size {0} (expected 4, 9 or 16)")]
    InvalidSize(i64),

    /// Grid is not square or a row has the wrong length.
    #[error("Grid dimensions do not match a {expected}x{expected} board")]
    DimensionMismatch {
        /// Side length implied by the row count.
        expected: usize,
    },

    /// Cell holds a value above N.
    #[error("Value {value} at ({row}, {col}) is out of range")]
    ValueOutOfRange {
        /// Row of the bad cell.
        row: usize,
        /// Column of the bad cell.
        col: usize,
        /// Offending value.
        value: u8,
    },

    /// Cell repeats a value already present in its row, column or box.
    #[error("Value {value} at ({row}, {col}) repeats in its row, column or box")]
    Conflict {
        /// Row of the conflicting cell.
        row: usize,
        /// Column of the conflicting cell.
        col: usize,
        /// Repeated value.
        value: u8,
    },
}

// =============================================================================
// BOARD
// =============================================================================

/// An N x N Sudoku board.
///
/// Invariant: every nonzero value appears at most once per row, column and box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    size: BoardSize,
    cells: Vec<u8>,
}

impl Board {
    /// Create an empty board.
    pub fn empty(size: BoardSize) -> Self {
        Self {
            size,
            cells: vec![0; size.cell_count()],
        }
    }

    /// Import a grid, rejecting anything that breaks the board invariant.
    pub fn from_grid(grid: &[Vec<u8>]) -> Result<Self, BoardError> {
        let size = BoardSize::try_from(grid.len() as i64)?;
        let n = size.side();
        if grid.iter().any(|row| row.len() != n) {
            return Err(BoardError::DimensionMismatch { expected: n });
        }

        let mut board = Board::empty(size);
        for (row, values) in grid.iter().enumerate() {
            for (col, &value) in values.iter().enumerate() {
                if value == 0 {
                    continue;
                }
                if value as usize > n {
                    return Err(BoardError::ValueOutOfRange { row, col, value });
                }
                if !board.place(row, col, value) {
                    return Err(BoardError::Conflict { row, col, value });
                }
            }
        }

        Ok(board)
    }

    /// Board size.
    #[inline]
    pub fn size(&self) -> BoardSize {
        self.size
    }

    /// Value at a cell, `None` when out of range. 0 means empty.
    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        let n = self.size.side();
        if row >= n || col >= n {
            return None;
        }
        Some(self.cells[row * n + col])
    }

    /// Whether `value` may be written at (`row`, `col`).
    ///
    /// False for out-of-range coordinates or values, for occupied cells, and
    /// when the value already appears in the cell's row, column or box.
    pub fn is_legal_placement(&self, row: usize, col: usize, value: u8) -> bool {
        let n = self.size.side();
        if row >= n || col >= n || value == 0 || value as usize > n {
            return false;
        }
        if self.cells[row * n + col] != 0 {
            return false;
        }
        !self.in_row(row, value) && !self.in_col(col, value) && !self.in_box(row, col, value)
    }

    /// Write `value` if the placement is legal. Returns whether it applied.
    pub fn place(&mut self, row: usize, col: usize, value: u8) -> bool {
        if !self.is_legal_placement(row, col, value) {
            return false;
        }
        let n = self.size.side();
        self.cells[row * n + col] = value;
        true
    }

    /// True iff no cell is empty.
    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(|&v| v != 0)
    }

    /// Number of empty cells.
    pub fn empty_cells(&self) -> usize {
        self.cells.iter().filter(|&&v| v == 0).count()
    }

    /// Check the Sudoku invariant over every filled cell.
    pub fn is_consistent(&self) -> bool {
        let n = self.size.side();
        let b = self.size.box_len();
        let mut rows = vec![0u32; n];
        let mut cols = vec![0u32; n];
        let mut boxes = vec![0u32; n];

        for row in 0..n {
            for col in 0..n {
                let value = self.cells[row * n + col];
                if value == 0 {
                    continue;
                }
                if value as usize > n {
                    return false;
                }
                let bit = 1u32 << value;
                let bx = (row / b) * b + col / b;
                if rows[row] & bit != 0 || cols[col] & bit != 0 || boxes[bx] & bit != 0 {
                    return false;
                }
                rows[row] |= bit;
                cols[col] |= bit;
                boxes[bx] |= bit;
            }
        }
        true
    }

    /// Snapshot as nested rows.
    pub fn to_grid(&self) -> Grid {
        self.cells
            .chunks(self.size.side())
            .map(|row| row.to_vec())
            .collect()
    }

    /// Raw write used by the generator, which tracks constraints itself.
    pub(crate) fn set(&mut self, row: usize, col: usize, value: u8) {
        let n = self.size.side();
        self.cells[row * n + col] = value;
    }

    fn in_row(&self, row: usize, value: u8) -> bool {
        let n = self.size.side();
        self.cells[row * n..(row + 1) * n].contains(&value)
    }

    fn in_col(&self, col: usize, value: u8) -> bool {
        let n = self.size.side();
        (0..n).any(|row| self.cells[row * n + col] == value)
    }

    fn in_box(&self, row: usize, col: usize, value: u8) -> bool {
        let n = self.size.side();
        let b = self.size.box_len();
        let top = row - row % b;
        let left = col - col % b;
        (top..top + b).any(|r| (left..left + b).any(|c| self.cells[r * n + c] == value))
    }
}

// =============================================================================
// TESTS
// =============================================================================
