//! Dense node × attribute matrix.
//!
//! Every per-(node, attribute) quantity in the pipeline (observed scores,
//! p-values, calls) is stored in one of these: a flat row-major `Vec`
//! indexed by dense node and attribute positions.

use serde::{Deserialize, Serialize};

/// Row-major matrix with `rows` nodes and `cols` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Clone> Matrix<T> {
    /// A matrix with every cell set to `value`.
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self { rows, cols, data: vec![value; rows * cols] }
    }
}

impl<T> Matrix<T> {
    /// Wrap row-major data. Returns `None` when the length does not match.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.data[row * self.cols + col]
    }

    #[inline]
    pub fn get_mut(&mut self, row: usize, col: usize) -> &mut T {
        &mut self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Iterate one column top to bottom.
    pub fn column(&self, col: usize) -> impl Iterator<Item = &T> + '_ {
        (0..self.rows).map(move |r| &self.data[r * self.cols + col])
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Apply `f` to every cell, keeping the shape.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Matrix<U> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_indexing() {
        let m = Matrix::from_vec(2, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(*m.get(1, 0), 4);
        assert_eq!(m.row(0), &[1, 2, 3]);
        assert_eq!(m.column(2).copied().collect::<Vec<_>>(), vec![3, 6]);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Matrix::from_vec(2, 2, vec![0u8; 3]).is_none());
    }

    #[test]
    fn map_keeps_shape() {
        let m = Matrix::filled(3, 2, 1.5f64).map(|v| *v * 2.0);
        assert_eq!(m.shape(), (3, 2));
        assert!(m.as_slice().iter().all(|v| *v == 3.0));
    }
}
