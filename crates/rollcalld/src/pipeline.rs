//! The recognition pipeline: decode → detect/match → annotate → persist.
//!
//! Everything a request touches is request-scoped: the decoded photo, the
//! face crops inside the engine, and the annotated copy all live in memory,
//! and the persisted output gets a request-unique name. Two concurrent
//! requests can never observe each other's intermediates. Recognition never
//! writes to the gallery.

use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::annotate;
use crate::engine::{EngineError, EngineHandle};
use crate::gallery::{Gallery, GalleryError};
use crate::storage;

/// Fixed first line of the textual summary.
const SUMMARY_PREAMBLE: &str = "All unique identities found in the group photo:";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot decode the uploaded photo: {0}")]
    InvalidImage(image::ImageError),
    #[error("cannot encode the annotated photo: {0}")]
    EncodeFailed(image::ImageError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one recognition request.
pub struct RecognitionResult {
    /// Unique resolved identities, in first-resolution order.
    pub identities: Vec<String>,
    /// How many faces the detector reported, matched or not.
    pub faces_detected: usize,
    /// File name of the persisted output inside the output directory.
    pub output_name: String,
    /// Human-readable summary: preamble plus one identity per line.
    pub summary: String,
}

pub struct RecognitionPipeline {
    gallery: Arc<Gallery>,
    engine: EngineHandle,
    output_dir: PathBuf,
}

impl RecognitionPipeline {
    pub fn new(
        gallery: Arc<Gallery>,
        engine: EngineHandle,
        output_dir: PathBuf,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self { gallery, engine, output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Recognize every enrolled identity visible in the photo, scoped to one
    /// class's gallery subtree.
    pub async fn recognize(
        &self,
        photo_bytes: &[u8],
        class: &str,
    ) -> Result<RecognitionResult, PipelineError> {
        let photo = image::load_from_memory(photo_bytes)
            .map_err(PipelineError::InvalidImage)?
            .to_rgb8();

        // An unknown or empty class is still queried; it just matches nothing.
        let gallery_images = self.gallery.class_images(class).await?;

        let pass = self.engine.recognize(photo.clone(), gallery_images).await?;

        let mut identities: Vec<String> = Vec::new();
        for face in &pass.resolved {
            if !identities.contains(&face.identity) {
                identities.push(face.identity.clone());
            }
        }

        let output_name = format!("{}.jpg", Uuid::new_v4());
        let output_path = self.output_dir.join(&output_name);

        if pass.resolved.is_empty() {
            // Nothing to draw: persist the original bytes untouched, so the
            // output is byte-identical to the input.
            storage::write_atomic(&output_path, photo_bytes)?;
        } else {
            let annotated = annotate::annotate(&photo, &pass.resolved);
            let mut encoded = Vec::new();
            annotated
                .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
                .map_err(PipelineError::EncodeFailed)?;
            storage::write_atomic(&output_path, &encoded)?;
        }

        tracing::info!(
            class,
            faces = pass.faces_detected,
            resolved = pass.resolved.len(),
            identities = ?identities,
            output = %output_name,
            "recognition complete"
        );

        Ok(RecognitionResult {
            summary: summary_text(&identities),
            identities,
            faces_detected: pass.faces_detected,
            output_name,
        })
    }
}

/// Preamble plus one identity per line, in resolution order.
fn summary_text(identities: &[String]) -> String {
    let mut text = String::from(SUMMARY_PREAMBLE);
    for identity in identities {
        text.push('\n');
        text.push_str(identity);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHandle;
    use image::RgbImage;
    use rollcall_core::detector::{DetectorError, FaceDetector};
    use rollcall_core::{BoundingBox, GalleryImage, MatchCandidate, MatchError, Matcher, VotePolicy};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct StubDetector {
        boxes: Vec<BoundingBox>,
    }

    impl FaceDetector for StubDetector {
        fn detect(&mut self, _photo: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.boxes.clone())
        }
    }

    /// Pops one canned response per search; shared so tests can refill it.
    struct StubMatcher {
        responses: Arc<Mutex<VecDeque<Result<Vec<MatchCandidate>, MatchError>>>>,
    }

    impl Matcher for StubMatcher {
        fn search(
            &mut self,
            _probe: &RgbImage,
            _gallery: &[GalleryImage],
        ) -> Result<Vec<MatchCandidate>, MatchError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Vec::new()))
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    fn candidate(identity: &str, distance: f32) -> MatchCandidate {
        MatchCandidate { identity: identity.to_string(), distance }
    }

    fn photo_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([90, 90, 90]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct Fixture {
        pipeline: RecognitionPipeline,
        output_dir: std::path::PathBuf,
        _gallery_dir: tempfile::TempDir,
        _output_tmp: tempfile::TempDir,
    }

    fn fixture(
        boxes: Vec<BoundingBox>,
        responses: Vec<Result<Vec<MatchCandidate>, MatchError>>,
    ) -> Fixture {
        let gallery_dir = tempfile::tempdir().unwrap();
        let output_tmp = tempfile::tempdir().unwrap();
        let output_dir = output_tmp.path().join("annotated");

        let gallery = Arc::new(Gallery::open(gallery_dir.path()).unwrap());
        let matcher = StubMatcher {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
        };
        let engine =
            EngineHandle::spawn_with(StubDetector { boxes }, matcher, VotePolicy::Majority);
        let pipeline =
            RecognitionPipeline::new(gallery, engine, output_dir.clone()).unwrap();

        Fixture {
            pipeline,
            output_dir,
            _gallery_dir: gallery_dir,
            _output_tmp: output_tmp,
        }
    }

    #[tokio::test]
    async fn test_undecodable_photo_is_rejected() {
        let fx = fixture(vec![], vec![]);
        let err = fx.pipeline.recognize(b"not an image", "CS101").await;
        assert!(matches!(err, Err(PipelineError::InvalidImage(_))));
        // No output persisted on the failure path.
        assert_eq!(std::fs::read_dir(&fx.output_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_no_faces_output_is_byte_identical() {
        let fx = fixture(vec![], vec![]);
        let input = photo_bytes(64, 48);

        let result = fx.pipeline.recognize(&input, "CS101").await.unwrap();

        assert_eq!(result.faces_detected, 0);
        assert!(result.identities.is_empty());
        let persisted = std::fs::read(fx.output_dir.join(&result.output_name)).unwrap();
        assert_eq!(persisted, input);
    }

    #[tokio::test]
    async fn test_faces_without_matches_output_is_byte_identical() {
        // Faces detected, but nothing in the gallery matches either of them.
        let fx = fixture(
            vec![bbox(5.0, 5.0, 20.0, 20.0), bbox(35.0, 5.0, 20.0, 20.0)],
            vec![Ok(vec![]), Ok(vec![])],
        );
        let input = photo_bytes(64, 48);

        let result = fx.pipeline.recognize(&input, "CS101").await.unwrap();

        assert_eq!(result.faces_detected, 2);
        assert!(result.identities.is_empty());
        assert_eq!(result.summary, SUMMARY_PREAMBLE);
        let persisted = std::fs::read(fx.output_dir.join(&result.output_name)).unwrap();
        assert_eq!(persisted, input);
    }

    #[tokio::test]
    async fn test_one_match_one_stranger() {
        let fx = fixture(
            vec![bbox(10.0, 30.0, 30.0, 30.0), bbox(60.0, 30.0, 30.0, 30.0)],
            vec![
                Ok(vec![candidate("42", 0.2), candidate("42", 0.3)]),
                Ok(vec![]),
            ],
        );
        let input = photo_bytes(120, 100);

        let result = fx.pipeline.recognize(&input, "CS101").await.unwrap();

        assert_eq!(result.identities, vec!["42"]);
        assert!(result.summary.contains("42"));
        assert_eq!(result.summary, format!("{SUMMARY_PREAMBLE}\n42"));

        // Output re-encoded with exactly one marker drawn.
        let persisted = std::fs::read(fx.output_dir.join(&result.output_name)).unwrap();
        assert_ne!(persisted, input);
        let decoded = image::load_from_memory(&persisted).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (120, 100));
    }

    #[tokio::test]
    async fn test_duplicate_identity_across_faces_is_deduplicated() {
        let fx = fixture(
            vec![bbox(10.0, 30.0, 30.0, 30.0), bbox(60.0, 30.0, 30.0, 30.0)],
            vec![
                Ok(vec![candidate("42", 0.2)]),
                Ok(vec![candidate("42", 0.4)]),
            ],
        );

        let result = fx
            .pipeline
            .recognize(&photo_bytes(120, 100), "CS101")
            .await
            .unwrap();

        assert_eq!(result.identities, vec!["42"]);
        assert_eq!(result.summary.matches("42").count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_share_outputs() {
        let fx = Arc::new(fixture(vec![], vec![]));

        // Two different photos recognized concurrently: each output must be
        // byte-identical to its own input and named uniquely.
        let input_a = photo_bytes(32, 32);
        let input_b = photo_bytes(80, 60);

        let (fx_a, fx_b) = (fx.clone(), fx.clone());
        let (bytes_a, bytes_b) = (input_a.clone(), input_b.clone());
        let (res_a, res_b) = tokio::join!(
            async move { fx_a.pipeline.recognize(&bytes_a, "CS101").await.unwrap() },
            async move { fx_b.pipeline.recognize(&bytes_b, "CS101").await.unwrap() },
        );

        assert_ne!(res_a.output_name, res_b.output_name);
        let out_a = std::fs::read(fx.output_dir.join(&res_a.output_name)).unwrap();
        let out_b = std::fs::read(fx.output_dir.join(&res_b.output_name)).unwrap();
        assert_eq!(out_a, input_a);
        assert_eq!(out_b, input_b);
    }

    #[test]
    fn test_summary_lists_identities_line_by_line() {
        let identities = vec!["42".to_string(), "17".to_string()];
        assert_eq!(
            summary_text(&identities),
            format!("{SUMMARY_PREAMBLE}\n42\n17")
        );
    }
}
