use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One point of the face mesh.
///
/// `x` and `y` are normalized to [0, 1] of the source frame; `z` is depth
/// relative to the face centre, on roughly the same scale as `x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A named facial-expression coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendshapeCategory {
    /// Position in the model's output vector.
    pub index: usize,
    /// Score in [0, 1].
    pub score: f32,
    pub category_name: String,
    /// Human-readable name; engines are free to leave this unset.
    pub display_name: Option<String>,
}

impl BlendshapeCategory {
    /// Display name, falling back to the category name.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.category_name,
        }
    }
}

/// A single detected face: its mesh and (optionally empty) blend shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceInstance {
    pub landmarks: Vec<Landmark>,
    pub blendshapes: Vec<BlendshapeCategory>,
}

/// Output of one detection call. Never mutated after the engine returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub faces: Vec<FaceInstance>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Blend shapes of the first face, or an empty slice.
    pub fn primary_blendshapes(&self) -> &[BlendshapeCategory] {
        self.faces
            .first()
            .map(|f| f.blendshapes.as_slice())
            .unwrap_or(&[])
    }
}

/// How the engine interprets successive calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMode {
    /// Independent still images; timestamps are ignored.
    #[default]
    Image,
    /// Frames of one continuous stream; timestamps must not decrease.
    Stream,
}

/// Compute backend requested for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

impl FromStr for Delegate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Delegate::Cpu),
            "gpu" | "cuda" => Ok(Delegate::Gpu),
            other => Err(format!("unknown delegate '{other}' (expected cpu or gpu)")),
        }
    }
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Cpu => f.write_str("cpu"),
            Delegate::Gpu => f.write_str("gpu"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, display: Option<&str>) -> BlendshapeCategory {
        BlendshapeCategory {
            index: 0,
            score: 0.5,
            category_name: name.into(),
            display_name: display.map(String::from),
        }
    }

    #[test]
    fn test_label_prefers_display_name() {
        assert_eq!(category("jawOpen", Some("Jaw open")).label(), "Jaw open");
    }

    #[test]
    fn test_label_falls_back_to_category_name() {
        assert_eq!(category("jawOpen", None).label(), "jawOpen");
        assert_eq!(category("jawOpen", Some("")).label(), "jawOpen");
    }

    #[test]
    fn test_primary_blendshapes_empty_result() {
        assert!(DetectionResult::empty().primary_blendshapes().is_empty());
    }

    #[test]
    fn test_delegate_parse() {
        assert_eq!("GPU".parse::<Delegate>(), Ok(Delegate::Gpu));
        assert_eq!("cpu".parse::<Delegate>(), Ok(Delegate::Cpu));
        assert!("tpu".parse::<Delegate>().is_err());
    }

    #[test]
    fn test_result_serializes_with_snake_case_fields() {
        let result = DetectionResult {
            faces: vec![FaceInstance {
                landmarks: vec![Landmark { x: 0.5, y: 0.25, z: 0.0 }],
                blendshapes: vec![category("eyeBlinkLeft", None)],
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["faces"][0]["blendshapes"][0]["category_name"], "eyeBlinkLeft");
        assert_eq!(json["faces"][0]["landmarks"][0]["y"], 0.25);
    }
}
