//! Triangle mesh over the face landmarks.
//!
//! The mesh layer drawn under the feature outlines is a Delaunay
//! triangulation (Bowyer-Watson) of the 468 face-surface points. The iris
//! points are left out.

use crate::connectors::Edge;
use crate::types::Landmark;
use std::collections::{BTreeSet, HashMap};

/// Face-surface points; indices from here on are iris landmarks.
pub const TESSELLATION_POINTS: usize = 468;

/// Points closer than this (in normalized units) are treated as one.
const MERGE_DISTANCE: f64 = 1e-9;

/// Points farther than this outside the unit square are left out of the mesh.
const MAX_EXCURSION: f64 = 4.0;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    v: [usize; 3],
    cx: f64,
    cy: f64,
    r2: f64,
}

impl Triangle {
    fn new(v: [usize; 3], pts: &[(f64, f64)]) -> Self {
        let (ax, ay) = pts[v[0]];
        let (bx, by) = pts[v[1]];
        let (cx, cy) = pts[v[2]];
        let d = 2.0 * (ax * (by - cy) + bx * (cy - ay) + cx * (ay - by));
        if d.abs() < f64::EPSILON {
            // Degenerate: never contains anything, so it is never split.
            return Self {
                v,
                cx: ax,
                cy: ay,
                r2: -1.0,
            };
        }
        let (a2, b2, c2) = (ax * ax + ay * ay, bx * bx + by * by, cx * cx + cy * cy);
        let ux = (a2 * (by - cy) + b2 * (cy - ay) + c2 * (ay - by)) / d;
        let uy = (a2 * (cx - bx) + b2 * (ax - cx) + c2 * (bx - ax)) / d;
        Self {
            v,
            cx: ux,
            cy: uy,
            r2: (ax - ux).powi(2) + (ay - uy).powi(2),
        }
    }

    fn circumcircle_contains(&self, (x, y): (f64, f64)) -> bool {
        (x - self.cx).powi(2) + (y - self.cy).powi(2) < self.r2
    }
}

/// Delaunay edges over the x/y of the first [`TESSELLATION_POINTS`]
/// landmarks, as landmark-index pairs with the smaller index first.
///
/// Fewer than three usable points yield no edges.
pub fn tessellate(landmarks: &[Landmark]) -> Vec<Edge> {
    let mut pts: Vec<(f64, f64)> = Vec::with_capacity(TESSELLATION_POINTS + 3);
    let mut index: Vec<usize> = Vec::with_capacity(TESSELLATION_POINTS);
    for (i, lm) in landmarks.iter().take(TESSELLATION_POINTS).enumerate() {
        let p = (lm.x as f64, lm.y as f64);
        let usable = |v: f64| v.is_finite() && v.abs() <= MAX_EXCURSION;
        if !usable(p.0) || !usable(p.1) {
            continue;
        }
        let duplicate = pts
            .iter()
            .any(|q| (p.0 - q.0).abs() < MERGE_DISTANCE && (p.1 - q.1).abs() < MERGE_DISTANCE);
        if !duplicate {
            pts.push(p);
            index.push(i);
        }
    }
    let n = pts.len();
    if n < 3 {
        return Vec::new();
    }

    // Super-triangle enclosing every point.
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for &(x, y) in &pts {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let span = (max_x - min_x).max(max_y - min_y).max(1e-6);
    let (mid_x, mid_y) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);
    pts.push((mid_x - 20.0 * span, mid_y - span));
    pts.push((mid_x, mid_y + 20.0 * span));
    pts.push((mid_x + 20.0 * span, mid_y - span));

    let mut triangles = vec![Triangle::new([n, n + 1, n + 2], &pts)];
    for i in 0..n {
        let p = pts[i];
        let (bad, good): (Vec<Triangle>, Vec<Triangle>) =
            triangles.into_iter().partition(|t| t.circumcircle_contains(p));

        // The cavity boundary is every edge used by exactly one bad triangle.
        let mut uses: HashMap<(usize, usize), u32> = HashMap::new();
        for t in &bad {
            for (a, b) in [(t.v[0], t.v[1]), (t.v[1], t.v[2]), (t.v[2], t.v[0])] {
                *uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        triangles = good;
        triangles.extend(
            uses.into_iter()
                .filter(|&(_, count)| count == 1)
                .map(|((a, b), _)| Triangle::new([a, b, i], &pts)),
        );
    }

    let mut edges = BTreeSet::new();
    for t in triangles.iter().filter(|t| t.v.iter().all(|&v| v < n)) {
        for (a, b) in [(t.v[0], t.v[1]), (t.v[1], t.v[2]), (t.v[2], t.v[0])] {
            let (a, b) = (index[a], index[b]);
            edges.insert((a.min(b) as u16, a.max(b) as u16));
        }
    }
    edges.into_iter().collect()
}
