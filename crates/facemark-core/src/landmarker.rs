//! Face-mesh landmarker via ONNX Runtime.
//!
//! Runs a 478-point face-mesh model on a letterboxed copy of the frame and,
//! when configured, a blend-shape model on a 146-point subset of the mesh.
//! Both models are opaque; this module only prepares tensors and validates
//! what comes back before anything downstream sees it.

use crate::blendshapes::{
    self, BLENDSHAPE_COUNT, BLENDSHAPE_INPUT_POINTS, BLENDSHAPE_LANDMARK_SUBSET,
};
use crate::engine::{DetectionError, InitializationError, LandmarkEngine};
use crate::model::{self, ModelSource};
use crate::types::{BlendshapeCategory, Delegate, DetectionResult, FaceInstance, Landmark, RunningMode};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4};
use ort::ep::{ExecutionProvider, CUDA as CUDAExecutionProvider};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::PathBuf;

const MESH_INPUT_SIZE: u32 = 256;
pub const MESH_POINT_COUNT: usize = 478;
const DEFAULT_MIN_FACE_PRESENCE: f32 = 0.5;
/// Largest |x| or |y| accepted for a normalized landmark.
const MAX_COORD_EXCURSION: f32 = 4.0;

/// Engine options.
#[derive(Debug, Clone)]
pub struct LandmarkerConfig {
    pub model: Option<ModelSource>,
    pub blendshape_model: Option<ModelSource>,
    pub cache_dir: Option<PathBuf>,
    pub delegate: Delegate,
    pub running_mode: RunningMode,
    /// Faces requested. The mesh model sees the whole frame, so at most one
    /// face is ever reported.
    pub num_faces: u32,
    pub output_blendshapes: bool,
    pub min_face_presence: f32,
}

impl Default for LandmarkerConfig {
    fn default() -> Self {
        Self {
            model: None,
            blendshape_model: None,
            cache_dir: None,
            delegate: Delegate::Cpu,
            running_mode: RunningMode::Image,
            num_faces: 1,
            output_blendshapes: true,
            min_face_presence: DEFAULT_MIN_FACE_PRESENCE,
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// ONNX face-mesh engine.
pub struct OnnxLandmarker {
    mesh: Session,
    blendshapes: Option<Session>,
    mode: RunningMode,
    min_face_presence: f32,
    last_timestamp_ms: Option<f64>,
}

impl OnnxLandmarker {
    /// Resolve assets and build sessions. Blocking; run off the UI task.
    fn load(config: &LandmarkerConfig) -> Result<Self, InitializationError> {
        let source = config
            .model
            .as_ref()
            .ok_or(InitializationError::NoModelConfigured)?;
        let mesh_path = model::resolve(source, config.cache_dir.as_deref())?;
        let mesh = build_session(&mesh_path, config.delegate)?;

        if mesh.outputs().len() < 2 {
            return Err(InitializationError::InvalidModel(format!(
                "face-mesh model needs landmark and presence outputs, got {}",
                mesh.outputs().len()
            )));
        }

        let blendshapes = match (&config.blendshape_model, config.output_blendshapes) {
            (Some(source), true) => {
                let path = model::resolve(source, config.cache_dir.as_deref())?;
                Some(build_session(&path, config.delegate)?)
            }
            (None, true) => {
                tracing::warn!("blend shapes requested but no blend-shape model configured");
                None
            }
            (_, false) => None,
        };

        if config.num_faces > 1 {
            tracing::warn!(
                requested = config.num_faces,
                "full-frame mesh model reports at most one face"
            );
        }

        tracing::info!(
            path = %mesh_path.display(),
            delegate = %config.delegate,
            blendshapes = blendshapes.is_some(),
            mode = ?config.running_mode,
            "face landmarker loaded"
        );

        Ok(Self {
            mesh,
            blendshapes,
            mode: config.running_mode,
            min_face_presence: config.min_face_presence,
            last_timestamp_ms: None,
        })
    }

    fn run(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<DetectionResult, DetectionError> {
        let expected = (width as usize) * (height as usize) * 3;
        if rgb.len() != expected || width == 0 || height == 0 {
            return Err(DetectionError::InvalidFrame {
                expected,
                actual: rgb.len(),
            });
        }

        let (input, letterbox) = preprocess(rgb, width, height)?;

        let (raw_mesh, presence_logit) = {
            let outputs = self
                .mesh
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, mesh) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::MalformedOutput(format!("landmarks: {e}")))?;
            let (_, presence) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::MalformedOutput(format!("presence: {e}")))?;
            let logit = presence.first().copied().ok_or_else(|| {
                DetectionError::MalformedOutput("empty presence tensor".into())
            })?;
            (mesh.to_vec(), logit)
        };

        let presence = sigmoid(presence_logit);
        if presence < self.min_face_presence {
            tracing::trace!(presence, "no face");
            return Ok(DetectionResult::empty());
        }

        let landmarks = decode_landmarks(&raw_mesh, &letterbox, width, height)?;

        let blendshapes = match self.blendshapes.as_mut() {
            Some(session) => {
                let input = blendshape_input(&landmarks, width, height);
                let outputs =
                    session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
                let (_, scores) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectionError::MalformedOutput(format!("blend shapes: {e}")))?;
                decode_blendshapes(scores)?
            }
            None => Vec::new(),
        };

        Ok(DetectionResult {
            faces: vec![FaceInstance {
                landmarks,
                blendshapes,
            }],
        })
    }
}

impl LandmarkEngine for OnnxLandmarker {
    type Config = LandmarkerConfig;

    async fn initialize(config: LandmarkerConfig) -> Result<Self, InitializationError> {
        tokio::task::spawn_blocking(move || Self::load(&config))
            .await
            .map_err(|e| InitializationError::Task(e.to_string()))?
    }

    fn running_mode(&self) -> RunningMode {
        self.mode
    }

    async fn set_mode(&mut self, mode: RunningMode) -> Result<(), DetectionError> {
        if self.mode != mode {
            tracing::debug!(from = ?self.mode, to = ?mode, "landmarker mode change");
            self.mode = mode;
            self.last_timestamp_ms = None;
        }
        Ok(())
    }

    async fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectionError> {
        if self.mode == RunningMode::Stream {
            if let Some(previous_ms) = self.last_timestamp_ms {
                if timestamp_ms < previous_ms {
                    return Err(DetectionError::NonMonotonicTimestamp {
                        timestamp_ms,
                        previous_ms,
                    });
                }
            }
            self.last_timestamp_ms = Some(timestamp_ms);
        }
        self.run(rgb, width, height)
    }
}

fn build_session(path: &std::path::Path, delegate: Delegate) -> Result<Session, InitializationError> {
    let builder = Session::builder()?.with_intra_threads(2).map_err(ort::Error::from)?;
    let mut builder = match delegate {
        Delegate::Cpu => builder,
        Delegate::Gpu => {
            let cuda = CUDAExecutionProvider::default();
            if !cuda.is_available().unwrap_or(false) {
                return Err(InitializationError::DelegateUnavailable(delegate));
            }
            builder.with_execution_providers([cuda.build()]).map_err(ort::Error::from)?
        }
    };
    Ok(builder.commit_from_file(path)?)
}

/// Letterbox an RGB frame into the mesh model's NHWC input in [0, 1].
fn preprocess(rgb: &[u8], width: u32, height: u32) -> Result<(Array4<f32>, LetterboxInfo), DetectionError> {
    let size = MESH_INPUT_SIZE;
    let letterbox = letterbox_for(width, height, size);

    let frame = RgbImage::from_raw(width, height, rgb.to_vec()).ok_or(DetectionError::InvalidFrame {
        expected: (width as usize) * (height as usize) * 3,
        actual: rgb.len(),
    })?;
    let new_w = ((width as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(&frame, new_w, new_h, FilterType::Triangle);

    let x0 = letterbox.pad_x.floor() as usize;
    let y0 = letterbox.pad_y.floor() as usize;
    let s = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, s, s, 3));
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        if tx >= s || ty >= s {
            continue;
        }
        for c in 0..3 {
            tensor[[0, ty, tx, c]] = px[c] as f32 / 255.0;
        }
    }

    Ok((tensor, letterbox))
}

fn letterbox_for(width: u32, height: u32, size: u32) -> LetterboxInfo {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    LetterboxInfo {
        scale,
        pad_x: (size as f32 - new_w) / 2.0,
        pad_y: (size as f32 - new_h) / 2.0,
    }
}

/// Map raw mesh output (model-input pixels, x/y/z triples) to normalized
/// frame coordinates, validating shape and values.
fn decode_landmarks(
    raw: &[f32],
    letterbox: &LetterboxInfo,
    width: u32,
    height: u32,
) -> Result<Vec<Landmark>, DetectionError> {
    if raw.len() % 3 != 0 {
        return Err(DetectionError::MalformedOutput(format!(
            "landmark tensor length {} is not a multiple of 3",
            raw.len()
        )));
    }
    let points = raw.len() / 3;
    if points != MESH_POINT_COUNT {
        return Err(DetectionError::MalformedOutput(format!(
            "expected {MESH_POINT_COUNT} landmarks, got {points}"
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(DetectionError::MalformedOutput("non-finite landmark coordinate".into()));
    }

    let (w, h) = (width as f32, height as f32);
    let landmarks: Vec<Landmark> = raw
        .chunks_exact(3)
        .map(|p| Landmark {
            x: (p[0] - letterbox.pad_x) / letterbox.scale / w,
            y: (p[1] - letterbox.pad_y) / letterbox.scale / h,
            z: p[2] / letterbox.scale / w,
        })
        .collect();

    // A face may hang off the frame edge, but not by whole frame widths.
    if let Some(i) = landmarks
        .iter()
        .position(|lm| lm.x.abs() > MAX_COORD_EXCURSION || lm.y.abs() > MAX_COORD_EXCURSION)
    {
        return Err(DetectionError::MalformedOutput(format!(
            "landmark {i} at ({}, {}) is far outside the frame",
            landmarks[i].x, landmarks[i].y
        )));
    }
    Ok(landmarks)
}

/// Pixel-space x/y of the mesh subset the blend-shape model consumes.
fn blendshape_input(landmarks: &[Landmark], width: u32, height: u32) -> Array3<f32> {
    let mut input = Array3::<f32>::zeros((1, BLENDSHAPE_INPUT_POINTS, 2));
    for (row, &idx) in BLENDSHAPE_LANDMARK_SUBSET.iter().enumerate() {
        if let Some(lm) = landmarks.get(idx as usize) {
            input[[0, row, 0]] = lm.x * width as f32;
            input[[0, row, 1]] = lm.y * height as f32;
        }
    }
    input
}

/// Validate blend-shape scores and attach category names.
fn decode_blendshapes(scores: &[f32]) -> Result<Vec<BlendshapeCategory>, DetectionError> {
    if scores.len() != BLENDSHAPE_COUNT {
        return Err(DetectionError::MalformedOutput(format!(
            "expected {BLENDSHAPE_COUNT} blend-shape scores, got {}",
            scores.len()
        )));
    }

    scores
        .iter()
        .enumerate()
        .map(|(index, &score)| {
            if !score.is_finite() {
                return Err(DetectionError::MalformedOutput(format!(
                    "non-finite blend-shape score at {index}"
                )));
            }
            let name = blendshapes::name_for(index).unwrap_or("unknown");
            Ok(BlendshapeCategory {
                index,
                score: score.clamp(0.0, 1.0),
                category_name: name.to_string(),
                display_name: None,
            })
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
