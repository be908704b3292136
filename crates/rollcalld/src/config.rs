use rollcall_core::VotePolicy;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP API binds to.
    pub listen_addr: SocketAddr,
    /// Root of the identity gallery (class → student → enrolled images).
    pub gallery_dir: PathBuf,
    /// Directory annotated output photos are persisted to.
    pub output_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Minimum cosine similarity for a gallery row to count as a match.
    pub similarity_threshold: f32,
    /// How ranked candidates collapse into one identity per face.
    pub vote_policy: VotePolicy,
    /// Whether a probe crop with no detectable face is skipped (on) or
    /// embedded whole (off).
    pub enforce_detection: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let gallery_dir = std::env::var("ROLLCALL_GALLERY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery"));

        let output_dir = std::env::var("ROLLCALL_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("annotated"));

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let listen_addr = std::env::var("ROLLCALL_LISTEN_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let vote_policy = std::env::var("ROLLCALL_VOTE_POLICY")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(policy) => Some(policy),
                Err(err) => {
                    tracing::warn!(error = %err, "invalid ROLLCALL_VOTE_POLICY, using majority");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            listen_addr,
            gallery_dir,
            output_dir,
            model_dir,
            similarity_threshold: env_f32("ROLLCALL_SIMILARITY_THRESHOLD", 0.40),
            vote_policy,
            enforce_detection: std::env::var("ROLLCALL_ENFORCE_DETECTION")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
