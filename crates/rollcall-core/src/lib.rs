//! rollcall-core — Face detection, embedding and classification.
//!
//! SCRFD for face detection and ArcFace for face embeddings, both running
//! via ONNX Runtime on CPU, plus a nearest-prototype classifier over the
//! enrolled gallery.

pub mod alignment;
pub mod classifier;
pub mod detector;
pub mod embedder;
pub mod types;

pub use classifier::{Classifier, Identification, UNKNOWN_LABEL};
pub use detector::FaceDetector;
pub use embedder::FaceEmbedder;
pub use types::{BoundingBox, Embedding, Prototype};
