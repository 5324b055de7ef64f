use facemark_core::model::ModelSource;
use facemark_core::{Delegate, LandmarkerConfig, OverlayStyle, RunningMode};
use facemark_hw::StreamConstraints;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid overlay colors: {0}")]
    Colors(#[from] facemark_core::overlay::OverlayError),
}

/// Overlay colours as CSS hex strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// The translucent triangle mesh; always drawn one pixel wide.
    pub mesh: String,
    pub left: String,
    pub right: String,
    pub contour: String,
    pub line_width: u32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            mesh: "#C0C0C070".into(),
            left: "#30FF30".into(),
            right: "#FF3030".into(),
            contour: "#E0E0E0".into(),
            line_width: 1,
        }
    }
}

/// Application configuration.
///
/// Loaded from an optional TOML file named by `FACEMARK_CONFIG`, then
/// overridden by `FACEMARK_*` environment variables, then by CLI flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub width: u32,
    pub height: u32,
    /// Local face-mesh ONNX model; takes precedence over `model_url`.
    pub model_path: Option<PathBuf>,
    pub model_url: Option<String>,
    pub blendshape_model_path: Option<PathBuf>,
    pub blendshape_model_url: Option<String>,
    /// Where downloaded models are cached (default: platform cache dir).
    pub model_cache_dir: Option<PathBuf>,
    pub delegate: Delegate,
    pub num_faces: u32,
    pub output_blendshapes: bool,
    pub min_face_presence: f32,
    /// Display refresh rate driving the detection loop.
    pub refresh_hz: f64,
    /// Flip the overlay horizontally, as for a selfie view.
    pub mirror: bool,
    /// Extra attempts after a refused or failed camera request.
    pub capture_retries: u32,
    pub retry_delay_ms: u64,
    /// Write the overlay surface here as PNG every `snapshot_every` renders.
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
    /// Log the blend-shape panel every `panel_every` renders (0 disables).
    pub panel_every: u64,
    pub colors: ColorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".into(),
            width: 640,
            height: 480,
            model_path: None,
            model_url: None,
            blendshape_model_path: None,
            blendshape_model_url: None,
            model_cache_dir: None,
            delegate: Delegate::Cpu,
            num_faces: 1,
            output_blendshapes: true,
            min_face_presence: 0.5,
            refresh_hz: 60.0,
            mirror: false,
            capture_retries: 3,
            retry_delay_ms: 1000,
            snapshot_path: None,
            snapshot_every: 30,
            panel_every: 60,
            colors: ColorConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEMARK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FACEMARK_*` overrides from `lookup`. Unparseable values are
    /// ignored with a warning and the previous value kept.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEMARK_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEMARK_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEMARK_MODEL_URL") {
            self.model_url = Some(v);
        }
        if let Some(v) = lookup("FACEMARK_BLENDSHAPE_MODEL_PATH") {
            self.blendshape_model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEMARK_BLENDSHAPE_MODEL_URL") {
            self.blendshape_model_url = Some(v);
        }
        if let Some(v) = lookup("FACEMARK_MODEL_CACHE_DIR") {
            self.model_cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEMARK_SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(v));
        }
        env_parse(&lookup, "FACEMARK_WIDTH", &mut self.width);
        env_parse(&lookup, "FACEMARK_HEIGHT", &mut self.height);
        env_parse(&lookup, "FACEMARK_DELEGATE", &mut self.delegate);
        env_parse(&lookup, "FACEMARK_NUM_FACES", &mut self.num_faces);
        env_parse(&lookup, "FACEMARK_MIN_FACE_PRESENCE", &mut self.min_face_presence);
        env_parse(&lookup, "FACEMARK_REFRESH_HZ", &mut self.refresh_hz);
        env_parse(&lookup, "FACEMARK_CAPTURE_RETRIES", &mut self.capture_retries);
        env_parse(&lookup, "FACEMARK_RETRY_DELAY_MS", &mut self.retry_delay_ms);
        env_parse(&lookup, "FACEMARK_SNAPSHOT_EVERY", &mut self.snapshot_every);
        env_parse(&lookup, "FACEMARK_PANEL_EVERY", &mut self.panel_every);
        if let Some(v) = lookup("FACEMARK_MIRROR") {
            self.mirror = v != "0";
        }
        if let Some(v) = lookup("FACEMARK_BLENDSHAPES") {
            self.output_blendshapes = v != "0";
        }
    }

    pub fn stream_constraints(&self) -> StreamConstraints {
        StreamConstraints {
            device: self.camera_device.clone(),
            width: self.width,
            height: self.height,
        }
    }

    pub fn landmarker_config(&self, running_mode: RunningMode) -> LandmarkerConfig {
        LandmarkerConfig {
            model: source(&self.model_path, &self.model_url),
            blendshape_model: source(&self.blendshape_model_path, &self.blendshape_model_url),
            cache_dir: self.model_cache_dir.clone(),
            delegate: self.delegate,
            running_mode,
            num_faces: self.num_faces,
            output_blendshapes: self.output_blendshapes,
            min_face_presence: self.min_face_presence,
        }
    }

    pub fn overlay_style(&self) -> Result<OverlayStyle, ConfigError> {
        let c = &self.colors;
        Ok(OverlayStyle::from_hex(&c.mesh, &c.left, &c.right, &c.contour, c.line_width)?)
    }
}

fn source(path: &Option<PathBuf>, url: &Option<String>) -> Option<ModelSource> {
    match (path, url) {
        (Some(path), _) => Some(ModelSource::Path(path.clone())),
        (None, Some(url)) => Some(ModelSource::Url(url.clone())),
        (None, None) => None,
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}
