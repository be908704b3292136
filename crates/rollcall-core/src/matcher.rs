//! Gallery search: rank enrolled reference images against a probe face crop.
//!
//! The matcher runs its own detection pass on probe crops and reference
//! images, independent of whatever detector produced the crop. The two can
//! legitimately disagree — a crop the photo-level detector called a face may
//! contain nothing the matcher can work with, which surfaces as
//! [`MatchError::NoFaceInCrop`] and is recoverable per face.

use crate::detector::{DetectorError, ScrfdDetector};
use crate::embedder::{ArcFaceEmbedder, EmbedderError};
use crate::types::{Embedding, GalleryImage, MatchCandidate};
use image::RgbImage;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    /// The matcher's own detector found no face in the probe crop.
    #[error("no face found in the probe crop")]
    NoFaceInCrop,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Strategy for searching a class's gallery with a probe face crop.
///
/// Returns candidate rows ranked ascending by distance — possibly several
/// rows per identity (one per matching reference image), possibly empty.
pub trait Matcher {
    fn search(
        &mut self,
        probe: &RgbImage,
        gallery: &[GalleryImage],
    ) -> Result<Vec<MatchCandidate>, MatchError>;
}

/// ONNX-backed matcher: embeds the probe and every reference image, keeps
/// rows within the similarity threshold.
///
/// Reference embeddings are cached by path; enrolled images are immutable,
/// so a cache entry never goes stale. Entries that cannot be used (unreadable,
/// undecodable, or no detectable face) are cached as misses so they are not
/// re-examined on every request.
pub struct EmbeddingMatcher {
    detector: ScrfdDetector,
    embedder: ArcFaceEmbedder,
    /// Minimum cosine similarity for a reference row to count as a match.
    similarity_threshold: f32,
    /// When set, a probe crop with no detectable face is an error rather
    /// than being embedded whole.
    enforce_detection: bool,
    cache: HashMap<PathBuf, Option<Embedding>>,
}

impl EmbeddingMatcher {
    pub fn new(
        detector: ScrfdDetector,
        embedder: ArcFaceEmbedder,
        similarity_threshold: f32,
        enforce_detection: bool,
    ) -> Self {
        Self {
            detector,
            embedder,
            similarity_threshold,
            enforce_detection,
            cache: HashMap::new(),
        }
    }

    fn probe_embedding(&mut self, probe: &RgbImage) -> Result<Embedding, MatchError> {
        let faces = self.detector.detect(probe)?;
        match faces.first() {
            Some(face) => Ok(self.embedder.embed_face(probe, face)?),
            None if self.enforce_detection => Err(MatchError::NoFaceInCrop),
            // Embed the whole crop as-is; the photo-level detector already
            // vouched for the region.
            None => Ok(self.embedder.embed_crop(probe)?),
        }
    }

    fn reference_embedding(&mut self, entry: &GalleryImage) -> Option<Embedding> {
        if let Some(cached) = self.cache.get(&entry.path) {
            return cached.clone();
        }
        let computed = self.compute_reference_embedding(entry);
        self.cache.insert(entry.path.clone(), computed.clone());
        computed
    }

    /// Embed one reference image, or record why it is unusable.
    fn compute_reference_embedding(&mut self, entry: &GalleryImage) -> Option<Embedding> {
        let bytes = match std::fs::read(&entry.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err, "unreadable reference image");
                return None;
            }
        };
        let decoded = match image::load_from_memory(&bytes) {
            Ok(decoded) => decoded.to_rgb8(),
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err, "undecodable reference image");
                return None;
            }
        };
        let faces = match self.detector.detect(&decoded) {
            Ok(faces) => faces,
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err, "detection failed on reference image");
                return None;
            }
        };
        let Some(face) = faces.first() else {
            tracing::warn!(path = %entry.path.display(), "no face in reference image");
            return None;
        };
        match self.embedder.embed_face(&decoded, face) {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err, "embedding failed on reference image");
                None
            }
        }
    }
}

impl Matcher for EmbeddingMatcher {
    fn search(
        &mut self,
        probe: &RgbImage,
        gallery: &[GalleryImage],
    ) -> Result<Vec<MatchCandidate>, MatchError> {
        let probe_embedding = self.probe_embedding(probe)?;

        let mut rows = Vec::with_capacity(gallery.len());
        for entry in gallery {
            if let Some(reference) = self.reference_embedding(entry) {
                rows.push((entry.identity.clone(), probe_embedding.distance(&reference)));
            }
        }

        Ok(rank_candidates(rows, self.similarity_threshold))
    }
}

/// Keep rows within the similarity threshold, ranked ascending by distance.
///
/// Rows for the same identity are all kept — the vote step counts them.
pub fn rank_candidates(rows: Vec<(String, f32)>, similarity_threshold: f32) -> Vec<MatchCandidate> {
    let max_distance = 1.0 - similarity_threshold;

    let mut candidates: Vec<MatchCandidate> = rows
        .into_iter()
        .filter(|(_, distance)| *distance <= max_distance)
        .map(|(identity, distance)| MatchCandidate { identity, distance })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    candidates
}
