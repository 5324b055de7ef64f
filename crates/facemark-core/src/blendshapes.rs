//! ARKit-style blend-shape vocabulary and the mesh subset the blend-shape model reads.

/// Number of blend-shape scores the model emits.
pub const BLENDSHAPE_COUNT: usize = 52;

/// Category names in model output order.
pub const BLENDSHAPE_NAMES: [&str; BLENDSHAPE_COUNT] = [
    "_neutral",
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "eyeBlinkLeft",
    "eyeBlinkRight",
    "eyeLookDownLeft",
    "eyeLookDownRight",
    "eyeLookInLeft",
    "eyeLookInRight",
    "eyeLookOutLeft",
    "eyeLookOutRight",
    "eyeLookUpLeft",
    "eyeLookUpRight",
    "eyeSquintLeft",
    "eyeSquintRight",
    "eyeWideLeft",
    "eyeWideRight",
    "jawForward",
    "jawLeft",
    "jawOpen",
    "jawRight",
    "mouthClose",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthFunnel",
    "mouthLeft",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthPucker",
    "mouthRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
    "noseSneerLeft",
    "noseSneerRight",
];

/// Number of mesh points fed to the blend-shape model.
pub const BLENDSHAPE_INPUT_POINTS: usize = 146;

/// Mesh indices (into the 478-point topology) fed to the blend-shape model, in order.
pub const BLENDSHAPE_LANDMARK_SUBSET: [u16; BLENDSHAPE_INPUT_POINTS] = [
    0, 1, 4, 5, 6, 7, 8, 10, 13, 14, 17, 21,
    33, 37, 39, 40, 46, 52, 53, 54, 55, 58, 61, 63,
    65, 66, 67, 70, 78, 80, 81, 82, 84, 87, 88, 91,
    93, 95, 103, 105, 107, 109, 127, 132, 133, 136, 144, 145,
    146, 148, 149, 150, 152, 153, 154, 155, 157, 158, 159, 160,
    161, 162, 163, 168, 172, 173, 176, 178, 181, 185, 191, 195,
    197, 234, 246, 249, 251, 263, 267, 269, 270, 276, 282, 283,
    284, 285, 288, 291, 293, 295, 296, 297, 300, 308, 310, 311,
    312, 314, 317, 318, 321, 323, 324, 332, 334, 336, 338, 356,
    361, 362, 365, 373, 374, 375, 377, 378, 379, 380, 381, 382,
    384, 385, 386, 387, 388, 389, 390, 397, 398, 400, 402, 405,
    409, 415, 454, 466, 468, 469, 470, 471, 472, 473, 474, 475,
    476, 477,
];

/// Category name for a model output index.
pub fn name_for(index: usize) -> Option<&'static str> {
    BLENDSHAPE_NAMES.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_unique() {
        let set: HashSet<_> = BLENDSHAPE_NAMES.iter().collect();
        assert_eq!(set.len(), BLENDSHAPE_COUNT);
    }

    #[test]
    fn test_name_for() {
        assert_eq!(name_for(0), Some("_neutral"));
        assert_eq!(name_for(25), Some("jawOpen"));
        assert_eq!(name_for(51), Some("noseSneerRight"));
        assert_eq!(name_for(52), None);
    }

    #[test]
    fn test_subset_sorted_and_within_mesh() {
        assert!(BLENDSHAPE_LANDMARK_SUBSET.windows(2).all(|w| w[0] < w[1]));
        assert!(BLENDSHAPE_LANDMARK_SUBSET.iter().all(|&i| i < 478));
    }
}
