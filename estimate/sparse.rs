use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SparseError {
    #[error("Row pointer array has length {found}, expected {expected} (rows + 1).")]
    PointerLength { expected: usize, found: usize },

    #[error("Row pointers must start at 0 and end at the entry count {nnz}.")]
    PointerEnds { nnz: usize },

    #[error("Row pointers must be strictly increasing; row {row} is empty or reversed.")]
    PointerOrder { row: usize },

    #[error("Column index {col} at entry {entry} is outside the {ncols} columns.")]
    ColumnOutOfRange {
        entry: usize,
        col: usize,
        ncols: usize,
    },

    #[error("Row index {row} is outside the {nrows} rows.")]
    RowOutOfRange { row: usize, nrows: usize },

    #[error("Index array has {indices} entries but data array has {data}.")]
    DataLength { indices: usize, data: usize },
}

/// One `(row, column, value)` entry used to assemble an [`ActivationMatrix`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// Compressed-row matrix mapping each beta slot to its per-time-point contributions.
///
/// Row `r` holds the entries `indptr[r]..indptr[r + 1]` of `indices`/`data`. Every row
/// owns at least one stored entry, so `indptr` is strictly increasing.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivationMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl ActivationMatrix {
    /// Wraps raw CSR arrays after validating them.
    pub fn from_parts(
        nrows: usize,
        ncols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self, SparseError> {
        if indptr.len() != nrows + 1 {
            return Err(SparseError::PointerLength {
                expected: nrows + 1,
                found: indptr.len(),
            });
        }
        if indices.len() != data.len() {
            return Err(SparseError::DataLength {
                indices: indices.len(),
                data: data.len(),
            });
        }
        if indptr[0] != 0 || indptr[nrows] != indices.len() {
            return Err(SparseError::PointerEnds { nnz: indices.len() });
        }
        if let Some(row) = indptr.windows(2).position(|w| w[0] >= w[1]) {
            return Err(SparseError::PointerOrder { row });
        }
        if let Some(entry) = indices.iter().position(|&c| c >= ncols) {
            return Err(SparseError::ColumnOutOfRange {
                entry,
                col: indices[entry],
                ncols,
            });
        }
        Ok(Self {
            nrows,
            ncols,
            indptr,
            indices,
            data,
        })
    }

    /// Assembles from unordered triplets. Duplicate coordinates are summed; a row with
    /// no triplet receives an explicit zero in column 0.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[Triplet],
    ) -> Result<Self, SparseError> {
        if ncols == 0 && nrows > 0 {
            return Err(SparseError::ColumnOutOfRange {
                entry: 0,
                col: 0,
                ncols,
            });
        }
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nrows];
        for (entry, t) in triplets.iter().enumerate() {
            if t.row >= nrows {
                return Err(SparseError::RowOutOfRange { row: t.row, nrows });
            }
            if t.col >= ncols {
                return Err(SparseError::ColumnOutOfRange {
                    entry,
                    col: t.col,
                    ncols,
                });
            }
            rows[t.row].push((t.col, t.value));
        }

        let mut indptr = Vec::with_capacity(nrows + 1);
        let mut indices = Vec::with_capacity(triplets.len());
        let mut data = Vec::with_capacity(triplets.len());
        indptr.push(0);
        for mut row in rows {
            if row.is_empty() {
                row.push((0, 0.0));
            }
            row.sort_by_key(|&(col, _)| col);
            for (col, value) in row {
                if indices.len() > *indptr.last().unwrap_or(&0) && indices.last() == Some(&col) {
                    if let Some(last) = data.last_mut() {
                        *last += value;
                    }
                } else {
                    indices.push(col);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }

        Self::from_parts(nrows, ncols, indptr, indices, data)
    }

    /// Keeps every entry whose magnitude exceeds `tol`.
    pub fn from_dense(dense: ArrayView2<f64>, tol: f64) -> Result<Self, SparseError> {
        let triplets: Vec<Triplet> = dense
            .indexed_iter()
            .filter(|&(_, &v)| v.abs() > tol)
            .map(|((row, col), &value)| Triplet { row, col, value })
            .collect();
        Self::from_triplets(dense.nrows(), dense.ncols(), &triplets)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Column indices and values stored for row `r`.
    #[inline]
    pub fn row(&self, r: usize) -> (&[usize], &[f64]) {
        let range = self.indptr[r]..self.indptr[r + 1];
        (&self.indices[range.clone()], &self.data[range])
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for r in 0..self.nrows {
            let (cols, values) = self.row(r);
            for (&c, &v) in cols.iter().zip(values) {
                dense[[r, c]] += v;
            }
        }
        dense
    }
}
