//! ArcFace face embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from face crops, using the w600k_r50
//! ArcFace model. Faces with landmarks are warped to the canonical position
//! first; landmark-less crops are resized as-is.

use crate::alignment;
use crate::types::{BoundingBox, Embedding};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// ArcFace normalization is symmetric, unlike SCRFD's.
const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face region")]
    EmptyRegion,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract an embedding for a detected face within a photo.
    ///
    /// With landmarks the face is aligned to the canonical 112×112 position;
    /// without them the (clamped) bounding box is cropped and resized, which
    /// degrades accuracy but never fails on detector output.
    pub fn embed_face(
        &mut self,
        photo: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, EmbedderError> {
        let canonical = match &face.landmarks {
            Some(landmarks) => alignment::align_face(photo, landmarks),
            None => {
                let crop = crop_clamped(photo, face).ok_or(EmbedderError::EmptyRegion)?;
                resize_to_canonical(&crop)
            }
        };
        self.embed_canonical(&canonical)
    }

    /// Extract an embedding from an arbitrary face crop by resizing it to the
    /// canonical input. Used when the caller has no landmark information at
    /// all (e.g. a probe crop the matcher's detector found nothing in).
    pub fn embed_crop(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(EmbedderError::EmptyRegion);
        }
        self.embed_canonical(&resize_to_canonical(crop))
    }

    fn embed_canonical(&mut self, canonical: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(canonical);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so cosine similarity reduces to a dot product.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    /// Preprocess a 112×112 RGB crop into a NCHW float tensor.
    fn preprocess(canonical: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in canonical.enumerate_pixels() {
            if (x as usize) < size && (y as usize) < size {
                for c in 0..3 {
                    tensor[[0, c, y as usize, x as usize]] =
                        (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
                }
            }
        }

        tensor
    }
}

fn resize_to_canonical(crop: &RgbImage) -> RgbImage {
    image::imageops::resize(crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle)
}

/// Crop a face box from a photo, clipped to the image bounds.
///
/// Returns `None` when the clamped region is empty (box entirely outside the
/// photo) — out-of-bounds detector output must clip, not crash.
pub fn crop_clamped(photo: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let (width, height) = photo.dimensions();

    let x0 = face.x.max(0.0) as u32;
    let y0 = face.y.max(0.0) as u32;
    let x1 = ((face.x + face.width).min(width as f32).max(0.0)) as u32;
    let y1 = ((face.y + face.height).min(height as f32).max(0.0)) as u32;

    if x0 >= x1.min(width) || y0 >= y1.min(height) {
        return None;
    }

    Some(image::imageops::crop_imm(photo, x0, y0, x1 - x0, y1 - y0).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_preprocess_output_shape() {
        let canonical =
            RgbImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, image::Rgb([128; 3]));
        let tensor = ArcFaceEmbedder::preprocess(&canonical);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let canonical =
            RgbImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, image::Rgb([128; 3]));
        let tensor = ArcFaceEmbedder::preprocess(&canonical);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_keeps_channels_distinct() {
        let canonical =
            RgbImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, image::Rgb([255, 0, 128]));
        let tensor = ArcFaceEmbedder::preprocess(&canonical);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
        assert!(tensor[[0, 2, 0, 0]].abs() < 0.01);
    }

    #[test]
    fn test_crop_clamped_inside_bounds() {
        let photo = RgbImage::new(100, 80);
        let crop = crop_clamped(&photo, &bbox(10.0, 10.0, 30.0, 20.0)).unwrap();
        assert_eq!(crop.dimensions(), (30, 20));
    }

    #[test]
    fn test_crop_clamped_clips_overhang() {
        let photo = RgbImage::new(100, 80);
        // Box extends past the right and bottom edges.
        let crop = crop_clamped(&photo, &bbox(90.0, 70.0, 40.0, 40.0)).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));
    }

    #[test]
    fn test_crop_clamped_negative_origin() {
        let photo = RgbImage::new(100, 80);
        let crop = crop_clamped(&photo, &bbox(-15.0, -10.0, 40.0, 30.0)).unwrap();
        // Negative origin clips to (0, 0); the far edge stays where it was.
        assert_eq!(crop.dimensions(), (25, 20));
    }

    #[test]
    fn test_crop_clamped_fully_outside() {
        let photo = RgbImage::new(100, 80);
        assert!(crop_clamped(&photo, &bbox(200.0, 200.0, 50.0, 50.0)).is_none());
        assert!(crop_clamped(&photo, &bbox(-60.0, -60.0, 50.0, 50.0)).is_none());
    }

    #[test]
    fn test_resize_to_canonical_dimensions() {
        let crop = RgbImage::new(37, 61);
        let canonical = resize_to_canonical(&crop);
        assert_eq!(canonical.dimensions(), (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
    }
}
