// src/path/mod.rs
//! Blended waypoint paths parametrized by arc length.
//!
//! A [`Path`] replaces every interior waypoint corner with a circular arc so
//! the tangent is continuous and the curvature is piecewise constant. The
//! time parameterization relies on both being available at every `s`.

mod segment;

pub use segment::{CircularBlend, LinearSegment, PathSegment, SegmentKind};

use nalgebra::DVector;
use segment::{Corner, MIN_SEGMENT_LENGTH};
use thiserror::Error;

/// Maximum deviation allowed at intermediate waypoints, in radians for
/// revolute joints or meters for prismatic ones.
pub const DEFAULT_PATH_TOLERANCE: f64 = 0.1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PathError {
    #[error("A path needs at least 2 distinct waypoints, got {0}")]
    TooFewWaypoints(usize),
    #[error("Path tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),
    #[error("Waypoint {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("Waypoint {0} contains a non-finite coordinate")]
    NonFinite(usize),
}

/// Why the path needs special treatment at a switching point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchingKind {
    /// Curvature component extremum inside a blend arc.
    Feature,
    /// Segment boundary where the curvature jumps.
    Discontinuity,
    /// Segment boundary where the direction reverses; velocity must be zero.
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchingPoint {
    pub position: f64,
    pub kind: SwitchingKind,
}

impl SwitchingPoint {
    pub fn is_discontinuity(&self) -> bool {
        !matches!(self.kind, SwitchingKind::Feature)
    }
}

#[derive(Debug, Clone)]
pub struct Path {
    length: f64,
    segments: Vec<PathSegment>,
    switching_points: Vec<SwitchingPoint>,
}

impl Path {
    /// Create a path through `waypoints`, blending interior corners so that
    /// the path stays within `max_deviation` of every interior waypoint.
    pub fn create(waypoints: &[DVector<f64>], max_deviation: f64) -> Result<Self, PathError> {
        if !(max_deviation > 0.0 && max_deviation.is_finite()) {
            tracing::error!("Invalid path tolerance {}", max_deviation);
            return Err(PathError::InvalidTolerance(max_deviation));
        }
        let points = distinct_waypoints(waypoints)?;
        if points.len() < 2 {
            tracing::error!("A path needs at least 2 distinct waypoints, got {}", points.len());
            return Err(PathError::TooFewWaypoints(points.len()));
        }

        // (segment, kind of the boundary at its end)
        let mut pieces: Vec<(PathSegment, SwitchingKind)> = Vec::new();
        let mut start_config = points[0].clone();

        for window in points.windows(3) {
            let (prev, corner, next) = (&window[0], &window[1], &window[2]);
            let blend_start = (prev + corner) * 0.5;
            let blend_end = (corner + next) * 0.5;
            match CircularBlend::for_corner(&blend_start, corner, &blend_end, max_deviation) {
                Corner::Straight => {}
                Corner::Kink => {
                    push_linear(&mut pieces, &start_config, corner, SwitchingKind::Discontinuity);
                    start_config = corner.clone();
                }
                Corner::Reversal => {
                    push_linear(&mut pieces, &start_config, corner, SwitchingKind::Reversal);
                    start_config = corner.clone();
                }
                Corner::Blend(arc) => {
                    let arc = PathSegment::new(SegmentKind::CircularBlend(arc));
                    let arc_start = arc.config(0.0);
                    let arc_end = arc.config(arc.length());
                    push_linear(&mut pieces, &start_config, &arc_start, SwitchingKind::Discontinuity);
                    pieces.push((arc, SwitchingKind::Discontinuity));
                    start_config = arc_end;
                }
            }
        }
        let last = &points[points.len() - 1];
        push_linear(&mut pieces, &start_config, last, SwitchingKind::Discontinuity);

        let mut length = 0.0;
        let mut segments = Vec::with_capacity(pieces.len());
        let mut switching_points: Vec<SwitchingPoint> = Vec::new();
        for (mut segment, boundary) in pieces {
            segment.set_offset(length);
            for local in segment.switching_points() {
                let position = length + local;
                // a feature on the segment's own start boundary adds nothing
                if switching_points.last().is_some_and(|p| p.position >= position) {
                    continue;
                }
                switching_points.push(SwitchingPoint {
                    position,
                    kind: SwitchingKind::Feature,
                });
            }
            length += segment.length();
            while switching_points.last().is_some_and(|p| p.position >= length) {
                switching_points.pop();
            }
            switching_points.push(SwitchingPoint { position: length, kind: boundary });
            segments.push(segment);
        }
        // the end of the path is not a switching point
        switching_points.pop();

        tracing::debug!(
            "Created path: {} waypoints, {} segments, {} switching points, length {:.6}",
            points.len(),
            segments.len(),
            switching_points.len(),
            length
        );

        Ok(Self {
            length,
            segments,
            switching_points,
        })
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Number of configuration dimensions.
    pub fn dimension(&self) -> usize {
        self.segments[0].config(0.0).len()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn switching_points(&self) -> &[SwitchingPoint] {
        &self.switching_points
    }

    pub fn config(&self, s: f64) -> DVector<f64> {
        if s >= self.length {
            let last = &self.segments[self.segments.len() - 1];
            return last.config(last.length());
        }
        let (segment, local) = self.segment_at(s);
        segment.config(local)
    }

    pub fn tangent(&self, s: f64) -> DVector<f64> {
        let (segment, local) = self.segment_at(s);
        segment.tangent(local)
    }

    pub fn curvature(&self, s: f64) -> DVector<f64> {
        let (segment, local) = self.segment_at(s);
        segment.curvature(local)
    }

    /// First switching point strictly after `s`; the path end if there is none.
    pub fn next_switching_point(&self, s: f64) -> SwitchingPoint {
        let idx = self.switching_points.partition_point(|p| p.position <= s);
        self.switching_points
            .get(idx)
            .copied()
            .unwrap_or(SwitchingPoint {
                position: self.length,
                kind: SwitchingKind::Discontinuity,
            })
    }

    /// Segment containing `s` and the local offset into it. A boundary
    /// position belongs to the segment starting there.
    fn segment_at(&self, s: f64) -> (&PathSegment, f64) {
        let s = s.clamp(0.0, self.length);
        let idx = self
            .segments
            .partition_point(|segment| segment.offset() <= s)
            .saturating_sub(1);
        let segment = &self.segments[idx];
        (segment, s - segment.offset())
    }
}

fn push_linear(
    pieces: &mut Vec<(PathSegment, SwitchingKind)>,
    from: &DVector<f64>,
    to: &DVector<f64>,
    boundary: SwitchingKind,
) {
    if (to - from).norm() > MIN_SEGMENT_LENGTH {
        let line = LinearSegment::new(from.clone(), to.clone());
        pieces.push((PathSegment::new(SegmentKind::Linear(line)), boundary));
    } else if boundary == SwitchingKind::Reversal {
        // the run collapsed, the reversal moves onto the preceding boundary
        if let Some(last) = pieces.last_mut() {
            last.1 = SwitchingKind::Reversal;
        }
    }
}

/// Validate the waypoints and collapse consecutive duplicates.
fn distinct_waypoints(waypoints: &[DVector<f64>]) -> Result<Vec<DVector<f64>>, PathError> {
    let Some(first) = waypoints.first() else {
        return Err(PathError::TooFewWaypoints(0));
    };
    let dimension = first.len();
    let mut points: Vec<DVector<f64>> = Vec::with_capacity(waypoints.len());
    for (index, waypoint) in waypoints.iter().enumerate() {
        if waypoint.len() != dimension || dimension == 0 {
            tracing::error!("Waypoint {} has dimension {}, expected {}", index, waypoint.len(), dimension);
            return Err(PathError::DimensionMismatch {
                index,
                expected: dimension,
                found: waypoint.len(),
            });
        }
        if waypoint.iter().any(|c| !c.is_finite()) {
            tracing::error!("Waypoint {} contains a non-finite coordinate", index);
            return Err(PathError::NonFinite(index));
        }
        match points.last() {
            Some(prev) if (waypoint - prev).norm() <= MIN_SEGMENT_LENGTH => {
                tracing::debug!("Skipping waypoint {}: duplicates its predecessor", index);
            }
            _ => points.push(waypoint.clone()),
        }
    }
    Ok(points)
}
