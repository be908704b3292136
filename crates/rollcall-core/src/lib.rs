//! rollcall-core — Face detection, embedding and gallery search.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference. Gallery search ranks enrolled
//! reference images against a probe crop; vote resolution collapses the
//! ranked rows into one winning identity per face.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod types;
pub mod vote;

pub use detector::{FaceDetector, ScrfdDetector};
pub use embedder::ArcFaceEmbedder;
pub use matcher::{EmbeddingMatcher, MatchError, Matcher};
pub use types::{BoundingBox, Embedding, GalleryImage, MatchCandidate};
pub use vote::{resolve_identity, VotePolicy};
