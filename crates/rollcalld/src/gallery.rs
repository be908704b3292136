//! The identity gallery: class → student → enrolled face images.
//!
//! Physical layout is a directory tree under the gallery root:
//!
//! ```text
//! <root>/<class>/<student>/<timestamp_ms>.jpg
//! ```
//!
//! which lets the matcher enumerate every (student, image) pair of a class
//! without knowing anything about its indexing. Enrolled images are immutable
//! once written; enrollment only ever appends.

use chrono::Utc;
use rollcall_core::GalleryImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::storage;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid {field} {value:?}: must be a plain name without path separators")]
    InvalidName { field: &'static str, value: String },
    #[error("class {0:?} has not been created")]
    ClassNotFound(String),
    #[error("not a decodable image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared, append-mostly gallery state.
///
/// Enrollments to the same (class, student) are serialized by a keyed lock so
/// concurrent writers cannot collide on a timestamp key; different keys never
/// block each other. Recognition only reads.
pub struct Gallery {
    root: PathBuf,
    enroll_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl Gallery {
    /// Open (and create if needed) the gallery root.
    pub fn open(root: &Path) -> Result<Self, GalleryError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            enroll_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Create a class entry. Idempotent: returns `true` iff it was newly
    /// created, `false` if it already existed.
    pub async fn create_class(&self, class: &str) -> Result<bool, GalleryError> {
        validate_component("class name", class)?;

        let dir = self.root.join(class);
        if tokio::fs::try_exists(&dir).await? {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(class, "class created");
        Ok(true)
    }

    /// Append one enrolled image for a student.
    ///
    /// The class must already exist. The student entry is created on first
    /// enrollment; later enrollments append under a fresh timestamp key (the
    /// multi-shot case the matcher's recall depends on). The write is atomic:
    /// no reader ever observes a partial image file.
    pub async fn enroll_image(
        &self,
        class: &str,
        student: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, GalleryError> {
        validate_component("class name", class)?;
        validate_component("student id", student)?;

        // Reject bytes that cannot serve as a reference image before any
        // filesystem change — a corrupt entry would silently cost matcher
        // recall on every later request.
        image::load_from_memory(bytes)?;

        let class_dir = self.root.join(class);
        if !tokio::fs::try_exists(&class_dir).await? {
            return Err(GalleryError::ClassNotFound(class.to_string()));
        }

        let lock = self.student_lock(class, student).await;
        let _guard = lock.lock().await;

        let student_dir = class_dir.join(student);
        tokio::fs::create_dir_all(&student_dir).await?;

        // Millisecond timestamp as the image key; bump forward on collision
        // (two enrollments inside the same millisecond, under the same lock).
        let mut timestamp = Utc::now().timestamp_millis();
        let mut path = student_dir.join(format!("{timestamp}.jpg"));
        while tokio::fs::try_exists(&path).await? {
            timestamp += 1;
            path = student_dir.join(format!("{timestamp}.jpg"));
        }

        storage::write_atomic(&path, bytes)?;
        tracing::info!(class, student, path = %path.display(), "image enrolled");
        Ok(path)
    }

    /// Enumerate every (student, image) pair of a class, in deterministic
    /// (sorted) order. An unknown or empty class yields an empty list —
    /// recognition still queries it and simply matches nothing.
    pub async fn class_images(&self, class: &str) -> Result<Vec<GalleryImage>, GalleryError> {
        validate_component("class name", class)?;

        let class_dir = self.root.join(class);
        if !tokio::fs::try_exists(&class_dir).await? {
            return Ok(Vec::new());
        }

        let mut students = Vec::new();
        let mut entries = tokio::fs::read_dir(&class_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                students.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        students.sort();

        let mut images = Vec::new();
        for student in &students {
            let mut files = Vec::new();
            let mut dir = tokio::fs::read_dir(class_dir.join(student)).await?;
            while let Some(entry) = dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                // Dot-prefixed names are staged writes in flight.
                if entry.file_type().await?.is_file() && !name.starts_with('.') {
                    files.push(entry.path());
                }
            }
            files.sort();
            images.extend(files.into_iter().map(|path| GalleryImage {
                identity: student.clone(),
                path,
            }));
        }

        Ok(images)
    }

    async fn student_lock(&self, class: &str, student: &str) -> Arc<Mutex<()>> {
        let mut locks = self.enroll_locks.lock().await;
        locks
            .entry((class.to_string(), student.to_string()))
            .or_default()
            .clone()
    }
}

/// Class and student names become path components; only plain names pass.
fn validate_component(field: &'static str, value: &str) -> Result<(), GalleryError> {
    let plain = !value.is_empty()
        && !value.starts_with('.')
        && !value.contains(['/', '\\'])
        && !value.contains('\0');
    if plain {
        Ok(())
    } else {
        Err(GalleryError::InvalidName {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn open_gallery(dir: &tempfile::TempDir) -> Gallery {
        Gallery::open(dir.path()).unwrap()
    }

    #[tokio::test]
    async fn test_create_class_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = open_gallery(&dir);

        assert!(gallery.create_class("CS101").await.unwrap());
        assert!(!gallery.create_class("CS101").await.unwrap());
        assert!(dir.path().join("CS101").is_dir());
    }

    #[tokio::test]
    async fn test_enroll_unknown_class_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = open_gallery(&dir);

        let err = gallery.enroll_image("CS101", "42", &png_bytes()).await;
        assert!(matches!(err, Err(GalleryError::ClassNotFound(_))));
        assert!(!dir.path().join("CS101").exists());
    }

    #[tokio::test]
    async fn test_enroll_twice_yields_two_entries() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = open_gallery(&dir);
        gallery.create_class("CS101").await.unwrap();

        let first = gallery.enroll_image("CS101", "42", &png_bytes()).await.unwrap();
        let second = gallery.enroll_image("CS101", "42", &png_bytes()).await.unwrap();

        assert_ne!(first, second);
        let images = gallery.class_images("CS101").await.unwrap();
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|img| img.identity == "42"));
    }

    #[tokio::test]
    async fn test_concurrent_enrollments_all_survive() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Arc::new(open_gallery(&dir));
        gallery.create_class("CS101").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gallery = gallery.clone();
            let bytes = png_bytes();
            handles.push(tokio::spawn(async move {
                gallery.enroll_image("CS101", "42", &bytes).await.unwrap()
            }));
        }
        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap());
        }

        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8, "every concurrent enrollment must keep its own key");

        let images = gallery.class_images("CS101").await.unwrap();
        assert_eq!(images.len(), 8);
        for img in &images {
            // Full, decodable content — never a torn write.
            image::load_from_memory(&std::fs::read(&img.path).unwrap()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_enroll_rejects_undecodable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = open_gallery(&dir);
        gallery.create_class("CS101").await.unwrap();

        let err = gallery.enroll_image("CS101", "42", b"not an image").await;
        assert!(matches!(err, Err(GalleryError::InvalidImage(_))));
        assert!(!dir.path().join("CS101").join("42").exists());
    }

    #[tokio::test]
    async fn test_class_images_unknown_class_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = open_gallery(&dir);
        assert!(gallery.class_images("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_class_images_sorted_and_grouped() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = open_gallery(&dir);
        gallery.create_class("CS101").await.unwrap();

        gallery.enroll_image("CS101", "7", &png_bytes()).await.unwrap();
        gallery.enroll_image("CS101", "42", &png_bytes()).await.unwrap();
        gallery.enroll_image("CS101", "42", &png_bytes()).await.unwrap();

        let images = gallery.class_images("CS101").await.unwrap();
        let identities: Vec<&str> = images.iter().map(|img| img.identity.as_str()).collect();
        // Students sorted lexicographically, images in timestamp order.
        assert_eq!(identities, vec!["42", "42", "7"]);
    }

    #[tokio::test]
    async fn test_names_with_separators_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = open_gallery(&dir);

        for bad in ["", "..", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(
                    gallery.create_class(bad).await,
                    Err(GalleryError::InvalidName { .. })
                ),
                "class name {bad:?} should be rejected"
            );
        }

        gallery.create_class("CS101").await.unwrap();
        assert!(matches!(
            gallery.enroll_image("CS101", "../42", &png_bytes()).await,
            Err(GalleryError::InvalidName { .. })
        ));
    }
}
