//! Binds the raw weights blob to per-layer parameter tensors.
//!
//! The blob is the flat little-endian f32 concatenation of every parameter
//! tensor, in metadata order. Each layer parameter is located by
//! prefix-matching the lookup key `"<layerName>/<paramName>"` against the
//! metadata `weight_name` entries.

use crate::errors::WeightBindingError;
use crate::model_config::WeightEntry;
use crate::tensor::Tensor;

/// Read-only weight blob plus its metadata, shared by all layers of a model.
pub struct WeightStore {
    elements: Vec<f32>,
    metadata: Vec<WeightEntry>,
}

impl WeightStore {
    /// Wraps blob bytes and metadata. Fails when the byte length is not a
    /// whole number of f32 elements.
    pub fn new(bytes: &[u8], metadata: Vec<WeightEntry>) -> Result<Self, WeightBindingError> {
        if bytes.len() % std::mem::size_of::<f32>() != 0 {
            return Err(WeightBindingError::MisalignedBlob { bytes: bytes.len() });
        }
        let elements = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { elements, metadata })
    }

    /// An empty store, for graphs whose layers declare no parameters.
    pub fn empty() -> Self {
        Self {
            elements: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Resolves the ordered parameter list of one layer into tensors.
    ///
    /// Runs once per layer immediately after its node is constructed.
    pub fn bind(
        &self,
        layer_name: &str,
        param_names: &[&'static str],
    ) -> Result<Vec<Tensor>, WeightBindingError> {
        param_names
            .iter()
            .map(|param| self.bind_one(layer_name, param))
            .collect()
    }

    fn bind_one(&self, layer_name: &str, param: &str) -> Result<Tensor, WeightBindingError> {
        let key = format!("{layer_name}/{param}");
        let entry = self
            .metadata
            .iter()
            .find(|e| e.weight_name.starts_with(&key))
            .ok_or(WeightBindingError::NoMetadataMatch { key })?;

        let end = entry.offset + entry.length;
        if end > self.elements.len() {
            return Err(WeightBindingError::OutOfBounds {
                weight_name: entry.weight_name.clone(),
                offset: entry.offset,
                end,
                blob_elements: self.elements.len(),
            });
        }

        let expected: usize = entry.shape.iter().product();
        if entry.length != expected {
            return Err(WeightBindingError::ShapeMismatch {
                weight_name: entry.weight_name.clone(),
                length: entry.length,
                shape: entry.shape.clone(),
                expected,
            });
        }

        let data = self.elements[entry.offset..end].to_vec();
        Tensor::from_data(data, entry.shape.clone()).map_err(|_| {
            WeightBindingError::ShapeMismatch {
                weight_name: entry.weight_name.clone(),
                length: entry.length,
                shape: entry.shape.clone(),
                expected,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn entry(name: &str, offset: usize, length: usize, shape: Vec<usize>) -> WeightEntry {
        WeightEntry {
            weight_name: name.to_string(),
            offset,
            length,
            shape,
        }
    }

    #[test]
    fn test_bind_resolves_params_in_order() {
        let store = WeightStore::new(
            &blob(&[1.0, 2.0, 3.0, 4.0, 0.5, -0.5]),
            vec![
                entry("dense_1/W", 0, 4, vec![2, 2]),
                entry("dense_1/b", 4, 2, vec![2]),
            ],
        )
        .unwrap();

        let tensors = store.bind("dense_1", &["W", "b"]).unwrap();
        assert_eq!(tensors[0].shape(), &[2, 2]);
        assert_eq!(tensors[0].data(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(tensors[1].data(), &[0.5, -0.5]);
    }

    #[test]
    fn test_bind_prefix_matches_decorated_names() {
        let store = WeightStore::new(
            &blob(&[7.0]),
            vec![entry("dense_1/W:0", 0, 1, vec![1, 1])],
        )
        .unwrap();

        let tensors = store.bind("dense_1", &["W"]).unwrap();
        assert_eq!(tensors[0].data(), &[7.0]);
    }

    #[test]
    fn test_bind_missing_entry() {
        let store = WeightStore::new(&blob(&[1.0]), vec![entry("other/W", 0, 1, vec![1])]).unwrap();

        let result = store.bind("dense_1", &["W"]);
        assert!(matches!(
            result,
            Err(WeightBindingError::NoMetadataMatch { key }) if key == "dense_1/W"
        ));
    }

    #[test]
    fn test_bind_out_of_bounds() {
        let store =
            WeightStore::new(&blob(&[1.0, 2.0]), vec![entry("dense_1/W", 1, 4, vec![4])]).unwrap();

        assert!(matches!(
            store.bind("dense_1", &["W"]),
            Err(WeightBindingError::OutOfBounds {
                offset: 1,
                end: 5,
                blob_elements: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_bind_shape_product_mismatch() {
        let store = WeightStore::new(
            &blob(&[1.0, 2.0, 3.0]),
            vec![entry("dense_1/W", 0, 3, vec![2, 2])],
        )
        .unwrap();

        assert!(matches!(
            store.bind("dense_1", &["W"]),
            Err(WeightBindingError::ShapeMismatch {
                length: 3,
                expected: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_misaligned_blob_rejected() {
        assert!(matches!(
            WeightStore::new(&[0u8; 6], vec![]),
            Err(WeightBindingError::MisalignedBlob { bytes: 6 })
        ));
    }
}
