//! 128-d face descriptor extraction via ONNX Runtime.
//!
//! A detected face is aligned to the canonical 112x112 crop from its
//! landmarks, normalized to the network's input distribution, and pushed
//! through a MobileFaceNet-style head. The output is returned raw: the
//! roster averaging policy and the match threshold are both defined on
//! unnormalized descriptors, so no L2 step is applied here.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{DetectedFace, Embedding, EMBEDDING_DIM};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// File name of the descriptor model inside the model directory.
pub const DESCRIPTOR_MODEL_FILE: &str = "mobilefacenet_128.onnx";

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor model not found: {0}")]
    ModelNotFound(String),
    #[error("descriptor inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Descriptor network session. One per pipeline; inference is CPU-bound.
pub struct DescriptorExtractor {
    session: Session,
}

impl DescriptorExtractor {
    pub fn load(model_path: &Path) -> Result<Self, DescriptorError> {
        if !model_path.exists() {
            return Err(DescriptorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "descriptor model loaded");

        Ok(Self { session })
    }

    /// Extract the 128-d descriptor for one detected face in a grayscale
    /// frame.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &DetectedFace,
    ) -> Result<Embedding, DescriptorError> {
        let aligned = alignment::align_face(frame, width, height, &face.landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DescriptorError::InferenceFailed(e.to_string()))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(DescriptorError::InferenceFailed(format!(
                "expected a {EMBEDDING_DIM}-d descriptor, got {} values",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: raw.to_vec(),
        })
    }
}

/// Turn an aligned 112x112 grayscale crop into the NCHW input tensor,
/// replicating the single channel and mapping pixel values into [-1, 1].
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));

    for y in 0..ALIGNED_SIZE {
        for x in 0..ALIGNED_SIZE {
            let pixel = aligned.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
            let value = (pixel - PIXEL_MEAN) / PIXEL_STD;
            tensor[[0, 0, y, x]] = value;
            tensor[[0, 1, y, x]] = value;
            tensor[[0, 2, y, x]] = value;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_shape_is_nchw_112() {
        let crop = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
        assert_eq!(
            preprocess(&crop).shape(),
            &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]
        );
    }

    #[test]
    fn preprocess_maps_extremes_into_unit_range() {
        let mut crop = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
        crop[0] = 0;
        crop[1] = 255;
        let tensor = preprocess(&crop);

        assert!((tensor[[0, 0, 0, 0]] - (-1.0)).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 1]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn preprocess_midpoint_maps_near_zero() {
        let crop = vec![127u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = preprocess(&crop);
        let value = tensor[[0, 0, 40, 40]];
        assert!(value.abs() < 0.005, "127 should land near 0, got {value}");
    }

    #[test]
    fn preprocess_fills_all_channels_identically() {
        let crop: Vec<u8> = (0..ALIGNED_SIZE * ALIGNED_SIZE)
            .map(|i| (i % 256) as u8)
            .collect();
        let tensor = preprocess(&crop);

        for &(y, x) in &[(0, 0), (56, 56), (111, 111), (13, 97)] {
            assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
            assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
        }
    }
}
