use crate::error::{KdIndexError, Result};
use crate::r#type::IndexableNum;

/// A non-owning, stride-aware view over row-major point data.
///
/// Rows are points and columns are dimensions. The row stride is counted in
/// elements and may exceed the column count, so padded or interleaved storage
/// can be indexed without copying. Point `i`'s coordinates are
/// `data[i * row_stride..i * row_stride + cols]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointView<'a, N: IndexableNum> {
    data: &'a [N],
    rows: usize,
    cols: usize,
    row_stride: usize,
}

impl<'a, N: IndexableNum> PointView<'a, N> {
    /// Create a view over contiguous (unpadded) row-major data.
    ///
    /// The number of rows is inferred from the slice length, which must be a
    /// multiple of `cols`.
    pub fn new(data: &'a [N], cols: usize) -> Result<Self> {
        if cols == 0 {
            return Err(KdIndexError::InvalidInput(
                "Dimensionality must be non-zero.".to_string(),
            ));
        }
        if data.len() % cols != 0 {
            return Err(KdIndexError::InvalidInput(format!(
                "Data length {} is not a multiple of {} columns.",
                data.len(),
                cols
            )));
        }
        Ok(Self {
            data,
            rows: data.len() / cols,
            cols,
            row_stride: cols,
        })
    }

    /// Create a view with an explicit row stride (in elements).
    ///
    /// The stride must be at least `cols`. The final row only needs `cols`
    /// elements; trailing padding may be absent.
    pub fn with_stride(data: &'a [N], rows: usize, cols: usize, row_stride: usize) -> Result<Self> {
        if cols == 0 {
            return Err(KdIndexError::InvalidInput(
                "Dimensionality must be non-zero.".to_string(),
            ));
        }
        if row_stride < cols {
            return Err(KdIndexError::InvalidInput(format!(
                "Row stride {} is smaller than {} columns.",
                row_stride, cols
            )));
        }
        let required = if rows == 0 {
            0
        } else {
            (rows - 1) * row_stride + cols
        };
        if data.len() < required {
            return Err(KdIndexError::InvalidInput(format!(
                "Data length {} too short for {} rows with stride {}.",
                data.len(),
                rows,
                row_stride
            )));
        }
        Ok(Self {
            data,
            rows,
            cols,
            row_stride,
        })
    }

    /// The number of points in this view.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The dimensionality of each point.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The row stride in elements.
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Whether rows are stored back to back without padding.
    pub fn is_contiguous(&self) -> bool {
        self.row_stride == self.cols
    }

    /// The coordinates of point `i`.
    ///
    /// Panics if `i >= rows`.
    #[inline]
    pub fn row(&self, i: usize) -> &'a [N] {
        debug_assert!(i < self.rows);
        let start = i * self.row_stride;
        &self.data[start..start + self.cols]
    }

    /// Iterate over the coordinate slices of all points.
    pub fn iter_rows(&self) -> impl Iterator<Item = &'a [N]> + '_ {
        (0..self.rows).map(|i| self.row(i))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn contiguous_view() {
        let data = vec![1.0_f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = PointView::new(&data, 3).unwrap();
        assert_eq!(view.rows(), 2);
        assert_eq!(view.row(1), &[4.0, 5.0, 6.0]);
        assert!(view.is_contiguous());
    }

    #[test]
    fn padded_view() {
        // 2 points of 2 dims with one padding element per row; the final row
        // carries no padding.
        let data = vec![1.0_f64, 2.0, 99.0, 3.0, 4.0];
        let view = PointView::with_stride(&data, 2, 2, 3).unwrap();
        assert_eq!(view.row(0), &[1.0, 2.0]);
        assert_eq!(view.row(1), &[3.0, 4.0]);
        assert!(!view.is_contiguous());
    }

    #[test]
    fn rejects_bad_shapes() {
        let data = vec![1.0_f64, 2.0, 3.0];
        assert!(matches!(
            PointView::new(&data, 2),
            Err(KdIndexError::InvalidInput(_))
        ));
        assert!(matches!(
            PointView::new(&data, 0),
            Err(KdIndexError::InvalidInput(_))
        ));
        assert!(matches!(
            PointView::with_stride(&data, 2, 2, 1),
            Err(KdIndexError::InvalidInput(_))
        ));
        assert!(matches!(
            PointView::with_stride(&data, 3, 2, 2),
            Err(KdIndexError::InvalidInput(_))
        ));
    }
}
