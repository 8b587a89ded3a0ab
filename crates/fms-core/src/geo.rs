//! Spatial math for route tracking: great-circle distances and courses,
//! point-to-segment and point-to-polyline classification, bounding regions.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const METERS_PER_NM: f64 = 1852.0;
pub const METERS_PER_FOOT: f64 = 0.3048;

/// Positions closer than this (degrees) are treated as the same point.
pub const POS_EPSILON_DEG: f64 = 1e-6;

pub fn nm_to_meter(nm: f64) -> f64 {
    nm * METERS_PER_NM
}

pub fn meter_to_nm(meter: f64) -> f64 {
    meter / METERS_PER_NM
}

pub fn feet_to_meter(feet: f64) -> f64 {
    feet * METERS_PER_FOOT
}

/// Normalize a course to [0, 360).
pub fn normalize_course(course_deg: f64) -> f64 {
    let c = course_deg % 360.0;
    if c < 0.0 {
        c + 360.0
    } else {
        c
    }
}

/// Absolute difference between two courses, normalized to [0, 180].
pub fn course_difference(course1_deg: f64, course2_deg: f64) -> f64 {
    let diff = (course1_deg - course2_deg + 360.0) % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// A geographic position with altitude in feet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pos {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt_ft: f64,
}

impl Pos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            alt_ft: 0.0,
        }
    }

    pub fn with_alt(lat: f64, lon: f64, alt_ft: f64) -> Self {
        Self { lat, lon, alt_ft }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Compare positions with a small lat/lon tolerance, ignoring altitude.
    pub fn almost_eq(&self, other: &Pos) -> bool {
        (self.lat - other.lat).abs() < POS_EPSILON_DEG
            && (self.lon - other.lon).abs() < POS_EPSILON_DEG
    }

    /// Great-circle distance in meters (Haversine).
    pub fn distance_meter_to(&self, other: &Pos) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let dphi = (other.lat - self.lat).to_radians();
        let dlambda = (other.lon - self.lon).to_radians();
        let a = (dphi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Initial true course from this position to another, in [0, 360).
    pub fn course_deg_to(&self, other: &Pos) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let dlambda = (other.lon - self.lon).to_radians();

        let x = dlambda.sin() * phi2.cos();
        let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();

        normalize_course(x.atan2(y).to_degrees())
    }

    /// Position reached by travelling a distance along a true course.
    pub fn endpoint(&self, distance_m: f64, course_deg: f64) -> Pos {
        if distance_m.abs() <= f64::EPSILON {
            return *self;
        }

        let lat1 = self.lat.to_radians();
        let lon1 = self.lon.to_radians();
        let bearing_rad = course_deg.to_radians();
        let angular_distance = distance_m / EARTH_RADIUS_M;

        let sin_lat1 = lat1.sin();
        let cos_lat1 = lat1.cos();
        let sin_ad = angular_distance.sin();
        let cos_ad = angular_distance.cos();

        let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
        let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

        let y = bearing_rad.sin() * sin_ad * cos_lat1;
        let x = cos_ad - sin_lat1 * sin_lat2;
        let mut lon2 = lon1 + y.atan2(x);
        lon2 = (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI)
            - std::f64::consts::PI;

        Pos {
            lat: lat2.to_degrees(),
            lon: lon2.to_degrees(),
            alt_ft: self.alt_ft,
        }
    }

    /// Interpolate along the great circle between two positions.
    /// `fraction` is clamped to [0, 1]; altitude interpolates linearly.
    pub fn interpolate(&self, other: &Pos, fraction: f64) -> Pos {
        let fraction = fraction.clamp(0.0, 1.0);
        let distance_m = self.distance_meter_to(other);
        if distance_m <= f64::EPSILON {
            return *self;
        }
        let course = self.course_deg_to(other);
        let mut pos = self.endpoint(distance_m * fraction, course);
        pos.alt_ft = self.alt_ft + fraction * (other.alt_ft - self.alt_ft);
        pos
    }
}

/// A position plus the sampled true course over ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PosCourse {
    pub pos: Pos,
    pub course_deg: f64,
}

impl PosCourse {
    pub fn new(pos: Pos, course_deg: f64) -> Self {
        Self { pos, course_deg }
    }

    pub fn is_valid(&self) -> bool {
        self.pos.is_valid() && self.course_deg.is_finite()
    }
}

/// A segment between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub pos1: Pos,
    pub pos2: Pos,
}

impl Line {
    pub fn new(pos1: Pos, pos2: Pos) -> Self {
        Self { pos1, pos2 }
    }

    pub fn distance_to(&self, pos: &Pos) -> LineDistance {
        distance_to_line(pos, &self.pos1, &self.pos2)
    }

    pub fn length_meter(&self) -> f64 {
        self.pos1.distance_meter_to(&self.pos2)
    }
}

/// Where a position falls relative to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossTrackStatus {
    Invalid,
    BeforeStart,
    AlongTrack,
    AfterEnd,
}

/// Result of classifying a position against a segment or polyline.
///
/// `distance_m` is the signed cross-track distance in meters, positive to the
/// right of the course. For before-start / after-end the magnitude is the
/// distance to the respective endpoint. `dist_from_start_m` and
/// `dist_to_end_m` are along-track distances of the abeam point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineDistance {
    pub status: CrossTrackStatus,
    pub distance_m: f64,
    pub dist_from_start_m: f64,
    pub dist_to_end_m: f64,
}

impl LineDistance {
    pub const INVALID: LineDistance = LineDistance {
        status: CrossTrackStatus::Invalid,
        distance_m: f64::MAX,
        dist_from_start_m: f64::MAX,
        dist_to_end_m: f64::MAX,
    };

    pub fn is_valid(&self) -> bool {
        self.status != CrossTrackStatus::Invalid
    }

    pub fn is_along_track(&self) -> bool {
        self.status == CrossTrackStatus::AlongTrack
    }
}

impl Default for LineDistance {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Classify `pos` against the segment `start` -> `end`.
///
/// Projection happens in a local ENU frame anchored at the segment start,
/// which is accurate for the leg lengths this engine deals with.
pub fn distance_to_line(pos: &Pos, start: &Pos, end: &Pos) -> LineDistance {
    if !pos.is_valid() || !start.is_valid() || !end.is_valid() {
        return LineDistance::INVALID;
    }

    let ref_lat = start.lat;
    let m_lat = meters_per_deg_lat(ref_lat);
    let m_lon = meters_per_deg_lon(ref_lat).max(1e-9);

    // Point and segment end in local coords
    let px = (pos.lon - start.lon) * m_lon;
    let py = (pos.lat - start.lat) * m_lat;
    let sx = (end.lon - start.lon) * m_lon;
    let sy = (end.lat - start.lat) * m_lat;

    let seg_len_sq = sx * sx + sy * sy;
    if seg_len_sq < 1e-6 {
        // Degenerate segment: distance to the point, along track by definition
        return LineDistance {
            status: CrossTrackStatus::AlongTrack,
            distance_m: pos.distance_meter_to(start),
            dist_from_start_m: 0.0,
            dist_to_end_m: 0.0,
        };
    }

    let seg_len = seg_len_sq.sqrt();
    let t = (px * sx + py * sy) / seg_len_sq;
    // Positive to the right of the course
    let cross = (px * sy - py * sx) / seg_len;

    if t < 0.0 {
        LineDistance {
            status: CrossTrackStatus::BeforeStart,
            distance_m: pos.distance_meter_to(start).copysign(cross),
            dist_from_start_m: t * seg_len,
            dist_to_end_m: (1.0 - t) * seg_len,
        }
    } else if t > 1.0 {
        LineDistance {
            status: CrossTrackStatus::AfterEnd,
            distance_m: pos.distance_meter_to(end).copysign(cross),
            dist_from_start_m: t * seg_len,
            dist_to_end_m: (1.0 - t) * seg_len,
        }
    } else {
        LineDistance {
            status: CrossTrackStatus::AlongTrack,
            distance_m: cross,
            dist_from_start_m: t * seg_len,
            dist_to_end_m: (1.0 - t) * seg_len,
        }
    }
}

/// Classify `pos` against a multi-point polyline.
///
/// Picks the along-track segment with the smallest absolute cross-track;
/// `dist_from_start_m`/`dist_to_end_m` are measured along the whole polyline
/// and stay meaningful even when the position is off either end.
pub fn distance_to_polyline(pos: &Pos, points: &[Pos]) -> LineDistance {
    if points.len() < 2 || !pos.is_valid() {
        return LineDistance::INVALID;
    }

    let total: f64 = points
        .windows(2)
        .map(|w| w[0].distance_meter_to(&w[1]))
        .sum();

    let mut best: Option<LineDistance> = None;
    let mut cum = 0.0;
    for w in points.windows(2) {
        let seg = distance_to_line(pos, &w[0], &w[1]);
        if seg.is_along_track() {
            let better = match &best {
                Some(b) => seg.distance_m.abs() < b.distance_m.abs(),
                None => true,
            };
            if better {
                let from_start = cum + seg.dist_from_start_m;
                best = Some(LineDistance {
                    status: CrossTrackStatus::AlongTrack,
                    distance_m: seg.distance_m,
                    dist_from_start_m: from_start,
                    dist_to_end_m: total - from_start,
                });
            }
        }
        cum += w[0].distance_meter_to(&w[1]);
    }

    if let Some(best) = best {
        return best;
    }

    // Off either end: classify against the nearer terminal segment
    let first = distance_to_line(pos, &points[0], &points[1]);
    let last = distance_to_line(pos, &points[points.len() - 2], &points[points.len() - 1]);
    if first.status == CrossTrackStatus::BeforeStart {
        LineDistance {
            status: CrossTrackStatus::BeforeStart,
            distance_m: first.distance_m,
            dist_from_start_m: first.dist_from_start_m,
            dist_to_end_m: total - first.dist_from_start_m,
        }
    } else {
        let from_start = total + last.dist_from_start_m - points[points.len() - 2]
            .distance_meter_to(&points[points.len() - 1]);
        LineDistance {
            status: CrossTrackStatus::AfterEnd,
            distance_m: last.distance_m,
            dist_from_start_m: from_start,
            dist_to_end_m: total - from_start,
        }
    }
}

/// Interpolate a position at `fraction` of a polyline's total arc length.
pub fn interpolate_polyline(points: &[Pos], fraction: f64) -> Option<Pos> {
    if points.is_empty() {
        return None;
    }
    if points.len() == 1 {
        return Some(points[0]);
    }

    let total: f64 = points
        .windows(2)
        .map(|w| w[0].distance_meter_to(&w[1]))
        .sum();
    if total <= f64::EPSILON {
        return Some(points[0]);
    }

    let target = fraction.clamp(0.0, 1.0) * total;
    let mut cum = 0.0;
    for w in points.windows(2) {
        let seg_len = w[0].distance_meter_to(&w[1]);
        if cum + seg_len >= target {
            let seg_fraction = if seg_len <= f64::EPSILON {
                0.0
            } else {
                (target - cum) / seg_len
            };
            return Some(w[0].interpolate(&w[1], seg_fraction));
        }
        cum += seg_len;
    }

    Some(points[points.len() - 1])
}

/// A geographic bounding box. `west`/`east` may wrap across the antimeridian,
/// in which case `west > east`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl Rect {
    pub fn from_positions<'a, I>(positions: I) -> Rect
    where
        I: IntoIterator<Item = &'a Pos>,
    {
        let mut iter = positions.into_iter();
        let Some(first) = iter.next() else {
            return Rect::default();
        };

        let mut rect = Rect {
            west: first.lon,
            east: first.lon,
            south: first.lat,
            north: first.lat,
        };
        for pos in iter {
            rect.extend(pos);
        }
        rect
    }

    pub fn is_point(&self) -> bool {
        self.west == self.east && self.south == self.north
    }

    pub fn contains_lon(&self, lon: f64) -> bool {
        if self.west <= self.east {
            (self.west..=self.east).contains(&lon)
        } else {
            // Wrapped across the antimeridian
            lon >= self.west || lon <= self.east
        }
    }

    pub fn contains(&self, pos: &Pos) -> bool {
        (self.south..=self.north).contains(&pos.lat) && self.contains_lon(pos.lon)
    }

    /// Grow the box to include `pos`, extending longitudes by the shorter wrap.
    pub fn extend(&mut self, pos: &Pos) {
        self.south = self.south.min(pos.lat);
        self.north = self.north.max(pos.lat);

        if self.contains_lon(pos.lon) {
            return;
        }

        // Span added when extending westwards vs eastwards
        let west_span = normalize_course(self.west - pos.lon);
        let east_span = normalize_course(pos.lon - self.east);
        if west_span <= east_span {
            self.west = pos.lon;
        } else {
            self.east = pos.lon;
        }
    }
}
