//! facemark-core — Face landmark detection results and overlay rendering.
//!
//! The landmark engine itself is opaque: an ONNX face-mesh model (plus an
//! optional blend-shape model) run through ONNX Runtime. Everything the
//! detection loop needs from it goes through the [`LandmarkEngine`] trait.

pub mod blendshapes;
pub mod connectors;
pub mod engine;
pub mod landmarker;
pub mod model;
pub mod overlay;
pub mod tessellation;
pub mod types;

pub use engine::{DetectionError, DetectorHandle, InitializationError, LandmarkEngine};
pub use landmarker::{LandmarkerConfig, OnnxLandmarker};
pub use overlay::{BlendshapePanel, OverlayRenderer, OverlayStyle, Surface};
pub use types::{BlendshapeCategory, Delegate, DetectionResult, FaceInstance, Landmark, RunningMode};
