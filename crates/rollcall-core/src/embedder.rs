//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Produces 512-dimensional, L2-normalized face embeddings from aligned
//! 112×112 face crops (w600k_r50 model).

use crate::alignment;
use crate::types::{BoundingBox, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 112;
const PIXEL_MEAN: f32 = 127.5;
// ArcFace normalization is symmetric, unlike the detector's 127.5/128.
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector output is required for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace embedder"
        );

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face in a grayscale frame.
    ///
    /// The face must carry landmarks; it is warped to the canonical
    /// 112×112 position before inference.
    pub fn extract(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, EmbedderError> {
        let landmarks = face.landmarks.as_ref().ok_or(EmbedderError::NoLandmarks)?;

        let aligned = alignment::align_face(gray, width, height, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so downstream cosine scoring reduces to a dot product.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding {
            values,
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }

    /// Turn a 112×112 grayscale crop into the NCHW float input tensor.
    fn preprocess(aligned: &[u8]) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                let pixel = aligned.get(y * INPUT_SIZE + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - PIXEL_MEAN) / PIXEL_STD;
                // Grayscale replicated across the three input channels.
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}
