use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Always processes all dimensions, no early exit.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// One enrolled face template: a student identifier plus the embedding
/// the enrollment pipeline extracted for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prototype {
    pub student_id: String,
    pub embedding: Embedding,
}
