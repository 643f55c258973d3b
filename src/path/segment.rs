// src/path/segment.rs
//! Geometric primitives a [`Path`](super::Path) is assembled from.
//!
//! Every segment is parametrized by its own arc length `s ∈ [0, length]`.
//! Straight runs have a constant tangent and zero curvature, blend arcs have a
//! constant curvature magnitude of `1 / radius`.

use nalgebra::DVector;

/// Below this distance two configurations are treated as identical.
pub(crate) const MIN_SEGMENT_LENGTH: f64 = 1e-6;

/// Cosine threshold beyond which two directions count as (anti-)parallel.
const PARALLEL_COS_THRESHOLD: f64 = 0.999999;

/// A single segment together with its starting offset inside the owning path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    offset: f64,
    kind: SegmentKind,
}

/// Segment geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    Linear(LinearSegment),
    CircularBlend(CircularBlend),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearSegment {
    start: DVector<f64>,
    end: DVector<f64>,
    length: f64,
}

/// Circular arc `center + radius * (x cos(s/r) + y sin(s/r))`.
///
/// `x` points from the center to the arc start and `y` is the incoming
/// direction, so the arc is tangent to both straight runs it connects.
#[derive(Debug, Clone, PartialEq)]
pub struct CircularBlend {
    center: DVector<f64>,
    radius: f64,
    x: DVector<f64>,
    y: DVector<f64>,
    length: f64,
}

/// How a corner between two straight runs is handled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Corner {
    /// The runs are collinear and continue in the same direction.
    Straight,
    /// The runs are anti-parallel; motion must stop at the corner.
    Reversal,
    /// The turn is too slight for an arc but the corner is off the line;
    /// the runs meet at the corner itself.
    Kink,
    Blend(CircularBlend),
}

impl LinearSegment {
    pub fn new(start: DVector<f64>, end: DVector<f64>) -> Self {
        let length = (&end - &start).norm();
        Self { start, end, length }
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn start(&self) -> &DVector<f64> {
        &self.start
    }

    pub fn end(&self) -> &DVector<f64> {
        &self.end
    }

    fn config(&self, s: f64) -> DVector<f64> {
        let u = (s / self.length).clamp(0.0, 1.0);
        &self.start * (1.0 - u) + &self.end * u
    }

    fn tangent(&self) -> DVector<f64> {
        (&self.end - &self.start) / self.length
    }
}

impl CircularBlend {
    /// Build the arc blending the corner `start -> corner -> end`.
    ///
    /// `start` and `end` are the points where the incoming and outgoing
    /// straight runs may be cut at the latest (the run midpoints), so the arc
    /// never reaches past them. The arc stays within `max_deviation` of
    /// `corner`.
    pub(crate) fn for_corner(
        start: &DVector<f64>,
        corner: &DVector<f64>,
        end: &DVector<f64>,
        max_deviation: f64,
    ) -> Corner {
        let start_distance = (corner - start).norm();
        let end_distance = (end - corner).norm();
        if start_distance < MIN_SEGMENT_LENGTH || end_distance < MIN_SEGMENT_LENGTH {
            return Corner::Straight;
        }

        let start_direction = (corner - start) / start_distance;
        let end_direction = (end - corner) / end_distance;
        let cos_angle = start_direction.dot(&end_direction);
        if cos_angle > PARALLEL_COS_THRESHOLD {
            let chord = end - start;
            let offset = corner - start;
            let along = offset.dot(&chord) / chord.norm_squared();
            return if (offset - chord * along).norm() <= MIN_SEGMENT_LENGTH {
                Corner::Straight
            } else {
                Corner::Kink
            };
        }
        if cos_angle < -PARALLEL_COS_THRESHOLD {
            return Corner::Reversal;
        }

        let angle = cos_angle.acos();
        let half = 0.5 * angle;

        // distance from the corner to the two tangent points
        let distance = start_distance
            .min(end_distance)
            .min(max_deviation * half.sin() / (1.0 - half.cos()));

        let radius = distance / half.tan();
        let center = corner + (&end_direction - &start_direction).normalize() * (radius / half.cos());
        let x = (corner - &start_direction * distance - &center).normalize();

        Corner::Blend(Self {
            center,
            radius,
            x,
            y: start_direction,
            length: angle * radius,
        })
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    fn config(&self, s: f64) -> DVector<f64> {
        let angle = s / self.radius;
        &self.center + (&self.x * angle.cos() + &self.y * angle.sin()) * self.radius
    }

    fn tangent(&self, s: f64) -> DVector<f64> {
        let angle = s / self.radius;
        &self.y * angle.cos() - &self.x * angle.sin()
    }

    fn curvature(&self, s: f64) -> DVector<f64> {
        let angle = s / self.radius;
        (&self.x * angle.cos() + &self.y * angle.sin()) * (-1.0 / self.radius)
    }

    /// Offsets at which one component of the curvature is extremal.
    fn switching_points(&self) -> Vec<f64> {
        let mut points: Vec<f64> = self
            .x
            .iter()
            .zip(self.y.iter())
            .map(|(&x, &y)| {
                let angle = y.atan2(x);
                if angle < 0.0 { angle + std::f64::consts::PI } else { angle }
            })
            .map(|angle| angle * self.radius)
            .filter(|&s| s < self.length)
            .collect();
        points.sort_by(f64::total_cmp);
        points
    }
}

impl PathSegment {
    pub(crate) fn new(kind: SegmentKind) -> Self {
        Self { offset: 0.0, kind }
    }

    pub(crate) fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    /// Arc-length position of this segment's start within the path.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    pub fn length(&self) -> f64 {
        match &self.kind {
            SegmentKind::Linear(line) => line.length,
            SegmentKind::CircularBlend(arc) => arc.length,
        }
    }

    /// Configuration at local offset `s`.
    pub fn config(&self, s: f64) -> DVector<f64> {
        match &self.kind {
            SegmentKind::Linear(line) => line.config(s),
            SegmentKind::CircularBlend(arc) => arc.config(s),
        }
    }

    /// Unit tangent at local offset `s`.
    pub fn tangent(&self, s: f64) -> DVector<f64> {
        match &self.kind {
            SegmentKind::Linear(line) => line.tangent(),
            SegmentKind::CircularBlend(arc) => arc.tangent(s),
        }
    }

    /// Second derivative of the configuration w.r.t. arc length.
    pub fn curvature(&self, s: f64) -> DVector<f64> {
        match &self.kind {
            SegmentKind::Linear(line) => DVector::zeros(line.start.len()),
            SegmentKind::CircularBlend(arc) => arc.curvature(s),
        }
    }

    /// Local offsets of non-discontinuity switching points, sorted.
    pub fn switching_points(&self) -> Vec<f64> {
        match &self.kind {
            SegmentKind::Linear(_) => Vec::new(),
            SegmentKind::CircularBlend(arc) => arc.switching_points(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    fn right_angle_blend(max_deviation: f64) -> CircularBlend {
        match CircularBlend::for_corner(&v(&[0.5, 0.0]), &v(&[1.0, 0.0]), &v(&[1.0, 0.5]), max_deviation) {
            Corner::Blend(arc) => arc,
            other => panic!("expected a blend, got {:?}", other),
        }
    }

    #[test]
    fn test_linear_segment_geometry() {
        let seg = PathSegment::new(SegmentKind::Linear(LinearSegment::new(v(&[0.0, 0.0]), v(&[3.0, 4.0]))));
        assert_relative_eq!(seg.length(), 5.0);
        assert_relative_eq!(seg.config(2.5), v(&[1.5, 2.0]));
        assert_relative_eq!(seg.tangent(1.0), v(&[0.6, 0.8]));
        assert_eq!(seg.curvature(1.0), v(&[0.0, 0.0]));
        assert!(seg.switching_points().is_empty());
        // clamped beyond the ends
        assert_eq!(seg.config(7.0), v(&[3.0, 4.0]));
        assert_eq!(seg.config(-1.0), v(&[0.0, 0.0]));
    }

    #[test]
    fn test_blend_is_tangent_to_both_runs() {
        let arc = right_angle_blend(0.1);
        let seg = PathSegment::new(SegmentKind::CircularBlend(arc.clone()));
        assert_relative_eq!(seg.tangent(0.0), v(&[1.0, 0.0]), epsilon = 1e-12);
        assert_relative_eq!(seg.tangent(seg.length()), v(&[0.0, 1.0]), epsilon = 1e-12);
        // start point lies on the incoming run, end point on the outgoing run
        assert_relative_eq!(seg.config(0.0)[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(seg.config(seg.length())[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_blend_respects_max_deviation() {
        for &deviation in &[0.01, 0.05, 0.1] {
            let arc = right_angle_blend(deviation);
            let seg = PathSegment::new(SegmentKind::CircularBlend(arc));
            let corner = v(&[1.0, 0.0]);
            let closest = (0..=100)
                .map(|i| (seg.config(seg.length() * i as f64 / 100.0) - &corner).norm())
                .fold(f64::INFINITY, f64::min);
            assert!(closest <= deviation + 1e-9, "deviation {} exceeded: {}", deviation, closest);
            assert_relative_eq!(closest, deviation, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_blend_limited_by_run_length() {
        // huge tolerance: the arc must stop at the run midpoints
        let arc = right_angle_blend(10.0);
        assert_relative_eq!(arc.radius(), 0.5, epsilon = 1e-9);
        let seg = PathSegment::new(SegmentKind::CircularBlend(arc));
        assert_relative_eq!(seg.config(0.0), v(&[0.5, 0.0]), epsilon = 1e-9);
        assert_relative_eq!(seg.config(seg.length()), v(&[1.0, 0.5]), epsilon = 1e-9);
    }

    #[test]
    fn test_blend_curvature_and_unit_tangent() {
        let arc = right_angle_blend(0.1);
        let radius = arc.radius();
        let seg = PathSegment::new(SegmentKind::CircularBlend(arc));
        for i in 0..=10 {
            let s = seg.length() * i as f64 / 10.0;
            assert_relative_eq!(seg.tangent(s).norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(seg.curvature(s).norm(), 1.0 / radius, epsilon = 1e-9);
            // curvature is orthogonal to the tangent
            assert_relative_eq!(seg.curvature(s).dot(&seg.tangent(s)), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_blend_switching_points_inside_arc() {
        let arc = right_angle_blend(0.1);
        let seg = PathSegment::new(SegmentKind::CircularBlend(arc));
        let points = seg.switching_points();
        assert!(points.windows(2).all(|w| w[0] <= w[1]));
        assert!(points.iter().all(|&s| (0.0..seg.length()).contains(&s)));
    }

    #[test]
    fn test_corner_classification() {
        let straight = CircularBlend::for_corner(&v(&[0.0]), &v(&[1.0]), &v(&[2.0]), 0.1);
        assert_eq!(straight, Corner::Straight);
        let reversal = CircularBlend::for_corner(&v(&[0.0]), &v(&[1.0]), &v(&[0.5]), 0.1);
        assert_eq!(reversal, Corner::Reversal);
        let degenerate = CircularBlend::for_corner(&v(&[1.0, 0.0]), &v(&[1.0, 0.0]), &v(&[1.0, 1.0]), 0.1);
        assert_eq!(degenerate, Corner::Straight);
        // nearly parallel runs over a long distance still bend at the corner
        let kink = CircularBlend::for_corner(&v(&[500.0, 0.25]), &v(&[1000.0, 0.5]), &v(&[1500.0, 0.25]), 0.1);
        assert_eq!(kink, Corner::Kink);
    }
}
