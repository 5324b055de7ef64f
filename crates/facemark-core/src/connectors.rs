//! Connector groups of the 478-point face mesh.
//!
//! Each group is a list of landmark-index pairs drawn as line segments.
//! "Left" and "right" are the subject's, not the viewer's.

use image::Rgba;

/// A landmark-index pair drawn as one segment.
pub type Edge = (u16, u16);

pub const FACE_OVAL: &[Edge] = &[
    (10, 338), (338, 297), (297, 332), (332, 284), (284, 251), (251, 389),
    (389, 356), (356, 454), (454, 323), (323, 361), (361, 288), (288, 397),
    (397, 365), (365, 379), (379, 378), (378, 400), (400, 377), (377, 152),
    (152, 148), (148, 176), (176, 149), (149, 150), (150, 136), (136, 172),
    (172, 58), (58, 132), (132, 93), (93, 234), (234, 127), (127, 162),
    (162, 21), (21, 54), (54, 103), (103, 67), (67, 109), (109, 10),
];

pub const LIPS: &[Edge] = &[
    (61, 146), (146, 91), (91, 181), (181, 84), (84, 17), (17, 314),
    (314, 405), (405, 321), (321, 375), (375, 291), (61, 185), (185, 40),
    (40, 39), (39, 37), (37, 0), (0, 267), (267, 269), (269, 270),
    (270, 409), (409, 291), (78, 95), (95, 88), (88, 178), (178, 87),
    (87, 14), (14, 317), (317, 402), (402, 318), (318, 324), (324, 308),
    (78, 191), (191, 80), (80, 81), (81, 82), (82, 13), (13, 312),
    (312, 311), (311, 310), (310, 415), (415, 308),
];

pub const LEFT_EYE: &[Edge] = &[
    (263, 249), (249, 390), (390, 373), (373, 374), (374, 380), (380, 381),
    (381, 382), (382, 362), (263, 466), (466, 388), (388, 387), (387, 386),
    (386, 385), (385, 384), (384, 398), (398, 362),
];

pub const LEFT_EYEBROW: &[Edge] = &[
    (276, 283), (283, 282), (282, 295), (295, 285),
    (300, 293), (293, 334), (334, 296), (296, 336),
];

pub const LEFT_IRIS: &[Edge] = &[(474, 475), (475, 476), (476, 477), (477, 474)];

pub const RIGHT_EYE: &[Edge] = &[
    (33, 7), (7, 163), (163, 144), (144, 145), (145, 153), (153, 154),
    (154, 155), (155, 133), (33, 246), (246, 161), (161, 160), (160, 159),
    (159, 158), (158, 157), (157, 173), (173, 133),
];

pub const RIGHT_EYEBROW: &[Edge] = &[
    (46, 53), (53, 52), (52, 65), (65, 55),
    (70, 63), (63, 105), (105, 66), (66, 107),
];

pub const RIGHT_IRIS: &[Edge] = &[(469, 470), (470, 471), (471, 472), (472, 469)];

/// Which colour slot a group takes from the overlay style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Contour,
    /// The translucent triangle mesh under everything else.
    Mesh,
}

/// A named set of edges sharing one colour slot.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorGroup {
    pub name: &'static str,
    pub edges: &'static [Edge],
    pub side: Side,
}

/// Every group the overlay draws, in draw order.
pub const GROUPS: &[ConnectorGroup] = &[
    ConnectorGroup { name: "right_eye", edges: RIGHT_EYE, side: Side::Right },
    ConnectorGroup { name: "right_eyebrow", edges: RIGHT_EYEBROW, side: Side::Right },
    ConnectorGroup { name: "left_eye", edges: LEFT_EYE, side: Side::Left },
    ConnectorGroup { name: "left_eyebrow", edges: LEFT_EYEBROW, side: Side::Left },
    ConnectorGroup { name: "face_oval", edges: FACE_OVAL, side: Side::Contour },
    ConnectorGroup { name: "lips", edges: LIPS, side: Side::Contour },
    ConnectorGroup { name: "right_iris", edges: RIGHT_IRIS, side: Side::Right },
    ConnectorGroup { name: "left_iris", edges: LEFT_IRIS, side: Side::Left },
];

/// Stroke used for one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectorStyle {
    pub color: Rgba<u8>,
    pub line_width: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_edges_within_mesh() {
        for group in GROUPS {
            for &(a, b) in group.edges {
                assert!(a < 478 && b < 478, "{}: ({a}, {b})", group.name);
            }
        }
    }

    #[test]
    fn test_closed_loops() {
        // Oval and irises are closed: every vertex appears exactly twice.
        for edges in [FACE_OVAL, LEFT_IRIS, RIGHT_IRIS] {
            let mut counts = std::collections::HashMap::new();
            for &(a, b) in edges {
                *counts.entry(a).or_insert(0) += 1;
                *counts.entry(b).or_insert(0) += 1;
            }
            assert!(counts.values().all(|&c| c == 2));
        }
    }

    #[test]
    fn test_group_names_unique() {
        let names: std::collections::HashSet<_> = GROUPS.iter().map(|g| g.name).collect();
        assert_eq!(names.len(), GROUPS.len());
    }
}
