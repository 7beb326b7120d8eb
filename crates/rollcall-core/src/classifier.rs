//! Label classification against the enrolled gallery.
//!
//! A probe embedding is scored against every enrolled prototype by cosine
//! similarity and the best-scoring student id wins. Probes whose best score
//! falls below the configured floor are reported as "unknown" rather than
//! being forced onto the nearest enrollee.

use crate::types::{Embedding, Prototype};
use std::path::Path;
use thiserror::Error;

/// Label reported when no prototype scores above the floor.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("gallery file not found: {0}")]
    GalleryNotFound(String),
    #[error("failed to read gallery: {0}")]
    GalleryRead(#[from] std::io::Error),
    #[error("failed to parse gallery: {0}")]
    GalleryParse(#[from] serde_json::Error),
    #[error("gallery is empty — enroll at least one student")]
    EmptyGallery,
    #[error("gallery embedding dimension mismatch: expected {expected}, student {student_id} has {actual}")]
    DimensionMismatch {
        student_id: String,
        expected: usize,
        actual: usize,
    },
}

/// Outcome of classifying one probe embedding.
#[derive(Debug, Clone)]
pub struct Identification {
    pub student_id: String,
    /// Cosine similarity of the winning prototype [-1, 1].
    pub similarity: f32,
}

impl Identification {
    pub fn unknown() -> Self {
        Self {
            student_id: UNKNOWN_LABEL.to_string(),
            similarity: 0.0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.student_id == UNKNOWN_LABEL
    }
}

/// Nearest-prototype classifier over the enrolled gallery.
#[derive(Debug)]
pub struct Classifier {
    gallery: Vec<Prototype>,
    unknown_floor: f32,
}

impl Classifier {
    pub fn new(gallery: Vec<Prototype>, unknown_floor: f32) -> Result<Self, ClassifierError> {
        validate_gallery(&gallery)?;
        Ok(Self { gallery, unknown_floor })
    }

    /// Load a gallery from a JSON file of [`Prototype`] entries.
    pub fn load(gallery_path: &str, unknown_floor: f32) -> Result<Self, ClassifierError> {
        if !Path::new(gallery_path).exists() {
            return Err(ClassifierError::GalleryNotFound(gallery_path.to_string()));
        }

        let raw = std::fs::read_to_string(gallery_path)?;
        let gallery: Vec<Prototype> = serde_json::from_str(&raw)?;
        validate_gallery(&gallery)?;

        tracing::info!(
            path = gallery_path,
            students = gallery.len(),
            dim = gallery[0].embedding.dim(),
            "loaded enrollment gallery"
        );

        Ok(Self { gallery, unknown_floor })
    }

    pub fn gallery_len(&self) -> usize {
        self.gallery.len()
    }

    /// Classify a probe embedding: best-similarity student id, or unknown.
    ///
    /// Every prototype is scored, no early exit.
    pub fn classify(&self, probe: &Embedding) -> Identification {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx = 0usize;

        for (i, proto) in self.gallery.iter().enumerate() {
            let sim = probe.similarity(&proto.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = i;
            }
        }

        if best_sim < self.unknown_floor {
            return Identification::unknown();
        }

        Identification {
            student_id: self.gallery[best_idx].student_id.clone(),
            similarity: best_sim,
        }
    }
}

fn validate_gallery(gallery: &[Prototype]) -> Result<(), ClassifierError> {
    let Some(first) = gallery.first() else {
        return Err(ClassifierError::EmptyGallery);
    };

    let expected = first.embedding.dim();
    for proto in gallery {
        let actual = proto.embedding.dim();
        if actual != expected {
            return Err(ClassifierError::DimensionMismatch {
                student_id: proto.student_id.clone(),
                expected,
                actual,
            });
        }
    }

    Ok(())
}
