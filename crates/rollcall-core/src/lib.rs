//! rollcall-core: the face identification pipeline behind attendance
//! sessions.
//!
//! Detection is SCRFD and description is a 128-d MobileFaceNet head,
//! both via ONNX Runtime CPU inference. Identities come from a CSV
//! roster matched by Euclidean nearest neighbor, and the frame tracker
//! carries them between recognitions.

pub mod alignment;
pub mod descriptor;
pub mod detector;
pub mod matcher;
pub mod roster;
pub mod tracker;
pub mod types;

pub use descriptor::{DescriptorError, DescriptorExtractor, DESCRIPTOR_MODEL_FILE};
pub use detector::{DetectorError, FaceDetector, DETECTOR_MODEL_FILE};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use roster::{EnrolledFace, Roster, RosterError};
pub use tracker::{FramePlan, FrameTracker, DEFAULT_RECLASSIFY_INTERVAL};
pub use types::{DetectedFace, Embedding, Identity, TrackedFace, EMBEDDING_DIM};

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
