//! Row-indexed embedding matrices and the TuckER core tensor, loaded from
//! `.npy` arrays.

use std::path::Path;

use ndarray::{Array2, Array3};
use ndarray_npy::read_npy;

use crate::types::MetaQaError;

/// Dense row-major `(rows, dim)` matrix of `f32` embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Wrap a flat row-major buffer. `data.len()` must be a multiple of `dim`.
    pub fn new(data: Vec<f32>, dim: usize) -> Option<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return None;
        }
        Some(Self {
            rows: data.len() / dim,
            dim,
            data,
        })
    }

    /// Build from a list of equally sized rows. An empty list gives a `0 x dim` matrix.
    pub fn from_rows(rows: &[Vec<f32>], dim: usize) -> Option<Self> {
        if rows.iter().any(|r| r.len() != dim) {
            return None;
        }
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Some(Self {
            rows: rows.len(),
            dim,
            data,
        })
    }

    pub(crate) fn from_parts(rows: usize, dim: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(rows * dim, data.len());
        Self { rows, dim, data }
    }

    pub fn from_array(array: &Array2<f32>) -> Self {
        let (rows, dim) = array.dim();
        Self {
            rows,
            dim,
            data: array.iter().copied().collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if i >= self.rows {
            return None;
        }
        Some(&self.data[i * self.dim..(i + 1) * self.dim])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Load a 2-D embedding array from a `.npy` file.
///
/// `f32` arrays are read directly; `f64` arrays are narrowed to `f32`.
pub fn load_embeddings(path: &Path) -> Result<EmbeddingMatrix, MetaQaError> {
    let array: Array2<f32> = match read_npy::<_, Array2<f32>>(path) {
        Ok(a) => a,
        Err(f32_err) => match read_npy::<_, Array2<f64>>(path) {
            Ok(a) => a.mapv(|v| v as f32),
            Err(_) => {
                return Err(MetaQaError::Embeddings {
                    path: path.to_path_buf(),
                    reason: f32_err.to_string(),
                })
            }
        },
    };
    let matrix = EmbeddingMatrix::from_array(&array);
    tracing::info!(
        path = %path.display(),
        rows = matrix.rows(),
        dim = matrix.dim(),
        "Loaded embeddings"
    );
    Ok(matrix)
}

/// Dense row-major `(relation_dim, entity_dim, entity_dim)` core tensor.
///
/// Contracting it with a relation vector gives the `(entity_dim, entity_dim)`
/// matrix that maps a head embedding to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreTensor {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl CoreTensor {
    /// Wrap a flat row-major buffer of the given shape.
    pub fn new(data: Vec<f32>, shape: [usize; 3]) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Load a 3-D core tensor from a `.npy` file, narrowing `f64` to `f32`.
pub fn load_core_tensor(path: &Path) -> Result<CoreTensor, MetaQaError> {
    let array: Array3<f32> = match read_npy::<_, Array3<f32>>(path) {
        Ok(a) => a,
        Err(f32_err) => match read_npy::<_, Array3<f64>>(path) {
            Ok(a) => a.mapv(|v| v as f32),
            Err(_) => {
                return Err(MetaQaError::Embeddings {
                    path: path.to_path_buf(),
                    reason: f32_err.to_string(),
                })
            }
        },
    };
    let (d0, d1, d2) = array.dim();
    let core = CoreTensor {
        shape: [d0, d1, d2],
        data: array.iter().copied().collect(),
    };
    tracing::info!(path = %path.display(), shape = ?core.shape, "Loaded core tensor");
    Ok(core)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_npy::write_npy;

    #[test]
    fn test_row_access() {
        let m = EmbeddingMatrix::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2).unwrap();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.row(1), Some(&[3.0_f32, 4.0][..]));
        assert_eq!(m.row(3), None);
    }

    #[test]
    fn test_rejects_ragged_buffer() {
        assert!(EmbeddingMatrix::new(vec![1.0, 2.0, 3.0], 2).is_none());
        assert!(EmbeddingMatrix::new(vec![1.0], 0).is_none());
        assert!(EmbeddingMatrix::from_rows(&[vec![1.0], vec![1.0, 2.0]], 1).is_none());
    }

    #[test]
    fn test_load_f32_and_f64() {
        let tmp = tempfile::TempDir::new().unwrap();

        let p32 = tmp.path().join("e32.npy");
        write_npy(&p32, &array![[1.0_f32, 2.0], [3.0, 4.0]]).unwrap();
        let m = load_embeddings(&p32).unwrap();
        assert_eq!((m.rows(), m.dim()), (2, 2));
        assert_eq!(m.row(1), Some(&[3.0_f32, 4.0][..]));

        let p64 = tmp.path().join("e64.npy");
        write_npy(&p64, &array![[0.5_f64, -0.5, 1.5]]).unwrap();
        let m = load_embeddings(&p64).unwrap();
        assert_eq!((m.rows(), m.dim()), (1, 3));
        assert_eq!(m.row(0), Some(&[0.5_f32, -0.5, 1.5][..]));
    }

    #[test]
    fn test_load_core_tensor() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("W.npy");
        let w = Array3::from_shape_fn((2, 3, 3), |(r, i, j)| (r * 9 + i * 3 + j) as f64);
        write_npy(&path, &w).unwrap();

        let core = load_core_tensor(&path).unwrap();
        assert_eq!(core.shape(), [2, 3, 3]);
        assert_eq!(core.as_slice()[10], 10.0);

        // A 2-D array is not a core tensor.
        let flat = tmp.path().join("flat.npy");
        write_npy(&flat, &array![[1.0_f32, 2.0]]).unwrap();
        assert!(matches!(load_core_tensor(&flat), Err(MetaQaError::Embeddings { .. })));
    }

    #[test]
    fn test_core_tensor_shape_checked() {
        assert!(CoreTensor::new(vec![0.0; 8], [2, 2, 2]).is_some());
        assert!(CoreTensor::new(vec![0.0; 7], [2, 2, 2]).is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_embeddings(Path::new("/nonexistent/E.npy")).unwrap_err();
        assert!(matches!(err, MetaQaError::Embeddings { .. }));
    }
}
