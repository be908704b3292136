use image::RgbImage;
use rollcall_core::detector::DetectorError;
use rollcall_core::embedder::{self, EmbedderError};
use rollcall_core::{
    ArcFaceEmbedder, BoundingBox, EmbeddingMatcher, FaceDetector, GalleryImage, MatchError,
    Matcher, ScrfdDetector, VotePolicy,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("matcher error: {0}")]
    Matcher(MatchError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One face the pipeline will annotate: where it is and who it is.
#[derive(Debug, Clone)]
pub struct ResolvedFace {
    pub bbox: BoundingBox,
    pub identity: String,
}

/// Result of one detection-and-matching pass over a photo.
pub struct RecognitionPass {
    /// How many faces the photo-level detector reported (resolved or not).
    pub faces_detected: usize,
    /// Faces that resolved to an identity, in detection order.
    pub resolved: Vec<ResolvedFace>,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Recognize {
        photo: RgbImage,
        gallery: Vec<GalleryImage>,
        reply: oneshot::Sender<Result<RecognitionPass, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect every face in the photo and match each against the gallery.
    pub async fn recognize(
        &self,
        photo: RgbImage,
        gallery: Vec<GalleryImage>,
    ) -> Result<RecognitionPass, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                photo,
                gallery,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Spawn an engine thread around the given detector and matcher.
    ///
    /// The thread owns both capabilities for its lifetime and serves requests
    /// in arrival order; callers queue on the bounded channel.
    pub fn spawn_with<D, M>(mut detector: D, mut matcher: M, policy: VotePolicy) -> Self
    where
        D: FaceDetector + Send + 'static,
        M: Matcher + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

        std::thread::Builder::new()
            .name("rollcall-engine".into())
            .spawn(move || {
                tracing::info!("engine thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        EngineRequest::Recognize {
                            photo,
                            gallery,
                            reply,
                        } => {
                            let result =
                                run_recognize(&mut detector, &mut matcher, &photo, &gallery, policy);
                            let _ = reply.send(result);
                        }
                    }
                }
                tracing::info!("engine thread exiting");
            })
            .expect("failed to spawn engine thread");

        Self { tx }
    }
}

/// Load both ONNX models and start the engine thread. Fails fast at startup
/// if any model is unavailable.
///
/// The matcher gets its own detector session: gallery images and probe crops
/// are detected independently of the photo-level pass, so the two judgments
/// can disagree without taking the request down.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let scrfd_path = config.scrfd_model_path();

    let detector = ScrfdDetector::load(&scrfd_path)?;
    tracing::info!(path = %scrfd_path, "photo detector loaded");

    let matcher_detector = ScrfdDetector::load(&scrfd_path)?;
    let embedder = ArcFaceEmbedder::load(&config.arcface_model_path())?;
    tracing::info!(path = %config.arcface_model_path(), "embedder loaded");

    let matcher = EmbeddingMatcher::new(
        matcher_detector,
        embedder,
        config.similarity_threshold,
        config.enforce_detection,
    );

    Ok(EngineHandle::spawn_with(detector, matcher, config.vote_policy))
}

/// One detection-and-matching pass: detect faces, crop each (clamped to the
/// photo bounds), search the class gallery, and vote a winner per face.
///
/// Per-face failures recover: a face whose crop the matcher rejects, or that
/// matches nothing within threshold, is skipped and the rest of the photo
/// still processes. Iteration follows detection order, so identical input
/// produces identical output.
fn run_recognize<D, M>(
    detector: &mut D,
    matcher: &mut M,
    photo: &RgbImage,
    gallery: &[GalleryImage],
    policy: VotePolicy,
) -> Result<RecognitionPass, EngineError>
where
    D: FaceDetector,
    M: Matcher,
{
    let faces = detector.detect(photo)?;
    if faces.is_empty() {
        return Ok(RecognitionPass {
            faces_detected: 0,
            resolved: Vec::new(),
        });
    }

    tracing::debug!(faces = faces.len(), gallery = gallery.len(), "matching detected faces");

    let mut resolved = Vec::new();
    for (index, face) in faces.iter().enumerate() {
        let Some(crop) = embedder::crop_clamped(photo, face) else {
            tracing::debug!(index, "face box lies entirely outside the photo, skipping");
            continue;
        };

        let candidates = match matcher.search(&crop, gallery) {
            Ok(candidates) => candidates,
            Err(MatchError::NoFaceInCrop) => {
                tracing::debug!(index, "matcher found no face in this crop, skipping");
                continue;
            }
            Err(err) => return Err(EngineError::Matcher(err)),
        };

        match rollcall_core::resolve_identity(&candidates, policy) {
            Some(identity) => {
                tracing::debug!(index, %identity, rows = candidates.len(), "face resolved");
                resolved.push(ResolvedFace {
                    bbox: face.clone(),
                    identity,
                });
            }
            None => {
                tracing::debug!(index, "no gallery match within threshold, skipping");
            }
        }
    }

    Ok(RecognitionPass {
        faces_detected: faces.len(),
        resolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::MatchCandidate;
    use std::collections::VecDeque;

    struct StubDetector {
        boxes: Vec<BoundingBox>,
    }

    impl FaceDetector for StubDetector {
        fn detect(&mut self, _photo: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.boxes.clone())
        }
    }

    struct StubMatcher {
        responses: VecDeque<Result<Vec<MatchCandidate>, MatchError>>,
    }

    impl Matcher for StubMatcher {
        fn search(
            &mut self,
            _probe: &RgbImage,
            _gallery: &[GalleryImage],
        ) -> Result<Vec<MatchCandidate>, MatchError> {
            self.responses.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    fn candidate(identity: &str, distance: f32) -> MatchCandidate {
        MatchCandidate { identity: identity.to_string(), distance }
    }

    fn photo() -> RgbImage {
        RgbImage::from_pixel(100, 100, image::Rgb([60, 60, 60]))
    }

    #[test]
    fn test_zero_faces_short_circuits() {
        let mut detector = StubDetector { boxes: vec![] };
        let mut matcher = StubMatcher { responses: VecDeque::new() };

        let pass =
            run_recognize(&mut detector, &mut matcher, &photo(), &[], VotePolicy::Majority)
                .unwrap();

        assert_eq!(pass.faces_detected, 0);
        assert!(pass.resolved.is_empty());
    }

    #[test]
    fn test_matched_and_unmatched_faces() {
        let mut detector = StubDetector {
            boxes: vec![bbox(10.0, 10.0, 30.0, 30.0), bbox(60.0, 10.0, 30.0, 30.0)],
        };
        // First face matches "42" via two rows; second matches nothing.
        let mut matcher = StubMatcher {
            responses: VecDeque::from([
                Ok(vec![candidate("42", 0.2), candidate("42", 0.3)]),
                Ok(vec![]),
            ]),
        };

        let pass =
            run_recognize(&mut detector, &mut matcher, &photo(), &[], VotePolicy::Majority)
                .unwrap();

        assert_eq!(pass.faces_detected, 2);
        assert_eq!(pass.resolved.len(), 1);
        assert_eq!(pass.resolved[0].identity, "42");
    }

    #[test]
    fn test_majority_vote_across_candidate_rows() {
        let mut detector = StubDetector { boxes: vec![bbox(10.0, 10.0, 30.0, 30.0)] };
        // "17" has the best distance but "42" has more rows.
        let mut matcher = StubMatcher {
            responses: VecDeque::from([Ok(vec![
                candidate("17", 0.05),
                candidate("42", 0.30),
                candidate("42", 0.35),
            ])]),
        };

        let pass =
            run_recognize(&mut detector, &mut matcher, &photo(), &[], VotePolicy::Majority)
                .unwrap();

        assert_eq!(pass.resolved[0].identity, "42");
    }

    #[test]
    fn test_closest_policy_takes_best_row() {
        let mut detector = StubDetector { boxes: vec![bbox(10.0, 10.0, 30.0, 30.0)] };
        let mut matcher = StubMatcher {
            responses: VecDeque::from([Ok(vec![
                candidate("17", 0.05),
                candidate("42", 0.30),
                candidate("42", 0.35),
            ])]),
        };

        let pass =
            run_recognize(&mut detector, &mut matcher, &photo(), &[], VotePolicy::Closest)
                .unwrap();

        assert_eq!(pass.resolved[0].identity, "17");
    }

    #[test]
    fn test_no_face_in_crop_recovers_per_face() {
        let mut detector = StubDetector {
            boxes: vec![bbox(10.0, 10.0, 30.0, 30.0), bbox(60.0, 10.0, 30.0, 30.0)],
        };
        let mut matcher = StubMatcher {
            responses: VecDeque::from([
                Err(MatchError::NoFaceInCrop),
                Ok(vec![candidate("7", 0.2)]),
            ]),
        };

        let pass =
            run_recognize(&mut detector, &mut matcher, &photo(), &[], VotePolicy::Majority)
                .unwrap();

        // The rejected crop is skipped, not fatal; the second face resolves.
        assert_eq!(pass.faces_detected, 2);
        assert_eq!(pass.resolved.len(), 1);
        assert_eq!(pass.resolved[0].identity, "7");
    }

    #[test]
    fn test_out_of_bounds_box_is_clipped_not_fatal() {
        let mut detector = StubDetector {
            // Overhangs the photo edge; clamped crop still searches.
            boxes: vec![bbox(80.0, 80.0, 50.0, 50.0), bbox(500.0, 500.0, 20.0, 20.0)],
        };
        let mut matcher = StubMatcher {
            responses: VecDeque::from([Ok(vec![candidate("42", 0.2)])]),
        };

        let pass =
            run_recognize(&mut detector, &mut matcher, &photo(), &[], VotePolicy::Majority)
                .unwrap();

        // Second box is entirely outside and never reaches the matcher.
        assert_eq!(pass.faces_detected, 2);
        assert_eq!(pass.resolved.len(), 1);
    }

    #[tokio::test]
    async fn test_engine_handle_round_trip() {
        let detector = StubDetector { boxes: vec![bbox(10.0, 10.0, 30.0, 30.0)] };
        let matcher = StubMatcher {
            responses: VecDeque::from([Ok(vec![candidate("42", 0.2)])]),
        };
        let handle = EngineHandle::spawn_with(detector, matcher, VotePolicy::Majority);

        let pass = handle.recognize(photo(), Vec::new()).await.unwrap();

        assert_eq!(pass.faces_detected, 1);
        assert_eq!(pass.resolved[0].identity, "42");
    }
}
