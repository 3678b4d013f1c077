//! Read-only training and prediction data behind one access interface.
//!
//! Dense row-major and compressed-sparse-column backings are interchangeable:
//! everything downstream reads cells through [`Data::get`]. A NaN feature cell
//! denotes a missing value and is routed by the splitter's missing-value
//! direction; the outcome column must be finite.

use crate::error::ForestError;

/// Backing storage for a [`Data`] matrix.
#[derive(Debug, Clone)]
enum Storage {
    /// Row-major dense values, length `num_rows * num_cols`.
    Dense { values: Vec<f64> },
    /// Compressed sparse column: `col_ptrs` has `num_cols + 1` entries,
    /// `row_indices` are strictly increasing within each column.
    SparseCsc {
        values: Vec<f64>,
        row_indices: Vec<usize>,
        col_ptrs: Vec<usize>,
    },
}

/// A read-only `num_rows x num_cols` matrix of f64 cells with an optional
/// designated outcome column.
#[derive(Debug, Clone)]
pub struct Data {
    storage: Storage,
    num_rows: usize,
    num_cols: usize,
    outcome_index: Option<usize>,
}

impl Data {
    /// Create a dense matrix from row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ShapeMismatch`] when `values.len()` is not
    /// `num_rows * num_cols`.
    pub fn dense(values: Vec<f64>, num_rows: usize, num_cols: usize) -> Result<Self, ForestError> {
        let expected = num_rows * num_cols;
        if values.len() != expected {
            return Err(ForestError::ShapeMismatch {
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            storage: Storage::Dense { values },
            num_rows,
            num_cols,
            outcome_index: None,
        })
    }

    /// Create a sparse matrix from CSC buffers. Cells not present are zero.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidSparseLayout`] when the buffer triple is
    /// inconsistent: wrong `col_ptrs` length, non-monotone column pointers,
    /// mismatched value/index lengths, out-of-range or non-increasing row
    /// indices within a column.
    pub fn sparse_csc(
        num_rows: usize,
        num_cols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, ForestError> {
        if col_ptrs.len() != num_cols + 1 {
            return Err(ForestError::InvalidSparseLayout {
                reason: format!(
                    "col_ptrs has {} entries, expected {}",
                    col_ptrs.len(),
                    num_cols + 1
                ),
            });
        }
        if row_indices.len() != values.len() {
            return Err(ForestError::InvalidSparseLayout {
                reason: format!(
                    "row_indices has {} entries but values has {}",
                    row_indices.len(),
                    values.len()
                ),
            });
        }
        if col_ptrs[0] != 0 || col_ptrs[num_cols] != values.len() {
            return Err(ForestError::InvalidSparseLayout {
                reason: "column pointers must start at 0 and end at the value count".to_string(),
            });
        }
        for col in 0..num_cols {
            let (start, end) = (col_ptrs[col], col_ptrs[col + 1]);
            if start > end {
                return Err(ForestError::InvalidSparseLayout {
                    reason: format!("column pointers decrease at column {col}"),
                });
            }
            for i in start..end {
                if row_indices[i] >= num_rows {
                    return Err(ForestError::InvalidSparseLayout {
                        reason: format!("row index {} out of range in column {col}", row_indices[i]),
                    });
                }
                if i > start && row_indices[i] <= row_indices[i - 1] {
                    return Err(ForestError::InvalidSparseLayout {
                        reason: format!("row indices not strictly increasing in column {col}"),
                    });
                }
            }
        }
        Ok(Self {
            storage: Storage::SparseCsc {
                values,
                row_indices,
                col_ptrs,
            },
            num_rows,
            num_cols,
            outcome_index: None,
        })
    }

    /// Designate the outcome column.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::OutcomeIndexOutOfRange`] when the index is not
    /// a valid column.
    pub fn with_outcome_index(mut self, outcome_index: usize) -> Result<Self, ForestError> {
        if outcome_index >= self.num_cols {
            return Err(ForestError::OutcomeIndexOutOfRange {
                outcome_index,
                num_cols: self.num_cols,
            });
        }
        self.outcome_index = Some(outcome_index);
        Ok(self)
    }

    /// Read one cell.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match &self.storage {
            Storage::Dense { values } => values[row * self.num_cols + col],
            Storage::SparseCsc {
                values,
                row_indices,
                col_ptrs,
            } => {
                let slice = &row_indices[col_ptrs[col]..col_ptrs[col + 1]];
                match slice.binary_search(&row) {
                    Ok(pos) => values[col_ptrs[col] + pos],
                    Err(_) => 0.0,
                }
            }
        }
    }

    /// Return the number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Return the number of columns.
    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Return the designated outcome column, if any.
    #[must_use]
    pub fn outcome_index(&self) -> Option<usize> {
        self.outcome_index
    }
}
