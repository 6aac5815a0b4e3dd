//! Equal contiguous row partitioning of a square matrix.
//!
//! Worker `k` of `W` owns global rows `k·b .. (k+1)·b` with `b = dim / W`.
//! The same block size and the same rank order drive both the row scatter
//! and the result gather, so the two offset schemes are defined once here.

use std::ops::Range;

use crate::error::{Error, Result};

/// A validated split of `dim` rows over `workers` workers.
///
/// Construction fails unless `dim > 0` and `dim % workers == 0`, so every
/// range handed out by this type is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    dim: usize,
    workers: usize,
    rows_per_worker: usize,
}

impl Partition {
    /// Validate `dim` against the worker count.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCount`] if `workers` is zero
    /// - [`Error::InvalidDimension`] if `dim` is zero
    /// - [`Error::NotDivisible`] if `dim % workers != 0`
    pub fn new(dim: usize, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::InvalidCount("partition over zero workers".into()));
        }
        if dim == 0 {
            return Err(Error::InvalidDimension("dimension must be positive".into()));
        }
        if dim % workers != 0 {
            return Err(Error::NotDivisible { dim, workers });
        }
        Ok(Partition {
            dim,
            workers,
            rows_per_worker: dim / workers,
        })
    }

    /// Side length of the matrix and length of the vector.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of workers the rows are split over.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Rows owned by each worker (`b`).
    pub fn rows_per_worker(&self) -> usize {
        self.rows_per_worker
    }

    /// Elements in one worker's row block (`b · dim`).
    pub fn block_len(&self) -> usize {
        self.rows_per_worker * self.dim
    }

    /// Elements in the full matrix (`dim²`).
    pub fn matrix_len(&self) -> usize {
        self.dim * self.dim
    }

    /// Global rows owned by `rank`.
    pub fn row_range(&self, rank: usize) -> Range<usize> {
        let start = rank * self.rows_per_worker;
        start..start + self.rows_per_worker
    }

    /// Offsets of `rank`'s block inside the row-major matrix.
    pub fn element_range(&self, rank: usize) -> Range<usize> {
        let start = rank * self.block_len();
        start..start + self.block_len()
    }

    /// Offsets of `rank`'s results inside the global result vector.
    ///
    /// Identical to [`row_range`](Self::row_range): one result per row.
    pub fn result_range(&self, rank: usize) -> Range<usize> {
        self.row_range(rank)
    }
}

/// A worker's contiguous block of matrix rows, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock {
    first_row: usize,
    dim: usize,
    data: Vec<f64>,
}

impl RowBlock {
    /// Wrap `data` as rows of length `dim` starting at global row `first_row`.
    pub fn new(first_row: usize, dim: usize, data: Vec<f64>) -> Result<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(Error::InvalidCount(format!(
                "{} elements do not form rows of length {dim}",
                data.len()
            )));
        }
        Ok(RowBlock {
            first_row,
            dim,
            data,
        })
    }

    /// Global index of the first row in this block.
    pub fn first_row(&self) -> usize {
        self.first_row
    }

    /// Number of rows in this block.
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    /// Returns `true` if the block holds no rows.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row length.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Local row `i` as a slice of `dim` values.
    pub fn row(&self, i: usize) -> Option<&[f64]> {
        let start = i.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Iterate over the rows in order.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.dim)
    }

    /// The raw row-major storage.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_uneven_dimensions() {
        assert!(matches!(
            Partition::new(0, 2),
            Err(Error::InvalidDimension(_))
        ));
        assert!(matches!(
            Partition::new(3, 2),
            Err(Error::NotDivisible { dim: 3, workers: 2 })
        ));
        assert!(matches!(Partition::new(4, 0), Err(Error::InvalidCount(_))));
    }

    #[test]
    fn ranges_tile_the_matrix() {
        let p = Partition::new(6, 3).unwrap();
        assert_eq!(p.rows_per_worker(), 2);
        assert_eq!(p.block_len(), 12);
        assert_eq!(p.row_range(1), 2..4);
        assert_eq!(p.element_range(2), 24..36);
        assert_eq!(p.result_range(0), 0..2);

        let mut covered = 0;
        for k in 0..p.workers() {
            assert_eq!(p.element_range(k).start, covered);
            covered = p.element_range(k).end;
        }
        assert_eq!(covered, p.matrix_len());
    }

    #[test]
    fn row_block_yields_rows() {
        let block = RowBlock::new(1, 2, vec![3.0, 4.0]).unwrap();
        assert_eq!(block.first_row(), 1);
        assert_eq!(block.len(), 1);
        assert_eq!(block.row(0), Some(&[3.0, 4.0][..]));
        assert_eq!(block.row(1), None);
    }

    #[test]
    fn row_block_requires_whole_rows() {
        assert!(RowBlock::new(0, 3, vec![0.0; 4]).is_err());
        assert!(RowBlock::new(0, 0, Vec::new()).is_err());
        let block = RowBlock::new(4, 2, vec![0.0; 4]).unwrap();
        assert_eq!(block.rows().count(), 2);
        assert!(!block.is_empty());
    }
}
