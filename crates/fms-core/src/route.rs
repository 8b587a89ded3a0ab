//! The route: an ordered leg sequence plus aggregate state, the active-leg
//! advancement state machine, distance/position queries and procedure
//! splicing. The flight-plan entry list is mutated in lockstep with the
//! legs; both always have the same length and ordering.

use serde::{Deserialize, Serialize};

use crate::geo::{self, CrossTrackStatus, LineDistance, Pos, PosCourse, Rect};
use crate::leg::{Leg, LegKind, MagvarSource, NavaidRef};
use crate::plan::{EntryBuilder, EntryKind, Flightplan, FlightplanEntry, RouteError};
use crate::procedure::{ProcedureLegType, ProcedureLegs, TurnDirection};

/// Segments farther away than this cannot seed the active leg.
const ACTIVE_CAPTURE_MAX_DISTANCE_NM: f64 = 100.0;

/// Hold exit when the hold fix is also the next leg's start: stay within
/// this cross-track of the next segment...
const HOLD_EXIT_MAX_CROSS_NM: f64 = 0.5;
/// ...having travelled at least this far into it...
const HOLD_EXIT_MIN_TRAVEL_NM: f64 = 0.75;
/// ...on a matching course.
const HOLD_EXIT_COURSE_DIFF_DEG: f64 = 25.0;

/// Hold exit via the helper line: the boundary sits half a mile past the
/// line on the non-holding side. Cross-track is positive to the right of
/// the line's course and a right-turn hold circles on the right, so
/// right-turn holds exit across the negative threshold and left-turn holds
/// across the positive one.
const HOLD_EXIT_BOUNDARY_NM: f64 = 0.5;

/// Entering a hold ignores course and uses pure proximity.
const HOLD_ENTRY_MAX_CROSS_NM: f64 = 0.5;

/// Procedure turns may switch early: candidate must be closer by this margin.
const PROC_TURN_SWITCH_MARGIN_M: f64 = 100.0;
const PROC_TURN_COURSE_DIFF_DEG: f64 = 45.0;

/// Plain legs: candidate must be closer by this margin. The asymmetry keeps
/// a stationary sample from oscillating between adjacent legs.
const LEG_SWITCH_MARGIN_M: f64 = 10.0;
const LEG_SWITCH_COURSE_DIFF_DEG: f64 = 90.0;

// Procedure category bits used for scoped erasure.
const PROC_DEPARTURE: u8 = 1;
const PROC_STAR: u8 = 1 << 1;
const PROC_APPROACH: u8 = 1 << 2;
const PROC_TRANSITION: u8 = 1 << 3;
const PROC_MISSED: u8 = 1 << 4;
const PROC_ARRIVAL: u8 = PROC_APPROACH | PROC_TRANSITION | PROC_MISSED;
const PROC_ALL: u8 = PROC_DEPARTURE | PROC_STAR | PROC_ARRIVAL;

fn kind_matches(kind: LegKind, types: u8) -> bool {
    match kind {
        LegKind::Route => false,
        LegKind::Departure => types & PROC_DEPARTURE != 0,
        LegKind::Star => types & PROC_STAR != 0,
        LegKind::Arrival => types & PROC_APPROACH != 0,
        LegKind::Transition => types & PROC_TRANSITION != 0,
        LegKind::Missed => types & PROC_MISSED != 0,
    }
}

/// Externally owned display filter consulted during leg advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShownTypes(u8);

impl ShownTypes {
    pub const NONE: ShownTypes = ShownTypes(0);
    pub const MISSED: ShownTypes = ShownTypes(1);
    pub const ALL: ShownTypes = ShownTypes(u8::MAX);

    pub fn contains(self, other: ShownTypes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: ShownTypes) -> ShownTypes {
        ShownTypes(self.0 | other.0)
    }

    pub fn without(self, other: ShownTypes) -> ShownTypes {
        ShownTypes(self.0 & !other.0)
    }
}

impl Default for ShownTypes {
    fn default() -> Self {
        ShownTypes::ALL
    }
}

/// Descent-rate rule: distance flown per 1000 ft of altitude loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TodRule {
    pub dist_nm_per_1000_ft: f64,
}

impl Default for TodRule {
    fn default() -> Self {
        Self {
            dist_nm_per_1000_ft: 3.0,
        }
    }
}

/// Distance accounting for the current position against the active leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteDistances {
    /// Cumulative distance from route start to the current position.
    pub dist_from_start_nm: f64,
    /// Cumulative distance from the current position to the route end.
    pub dist_to_dest_nm: f64,
    /// Distance from the current position to the end of the active segment.
    pub next_leg_distance_nm: f64,
    /// Cross-track distance, `None` while not along track.
    pub cross_track_distance_nm: Option<f64>,
}

/// A navaid on the route near a query position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyNavaid {
    pub index: usize,
    pub ident: String,
    pub position: Pos,
    pub distance_nm: f64,
}

/// Nearby route navaids bucketed by kind, each sorted by distance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteObjectsNearby {
    pub airports: Vec<NearbyNavaid>,
    pub vors: Vec<NearbyNavaid>,
    pub ndbs: Vec<NearbyNavaid>,
    pub waypoints: Vec<NearbyNavaid>,
    pub user_points: Vec<NearbyNavaid>,
}

/// Compare cross-track distances with a hysteresis margin: true when `next`
/// is closer than `active` by more than `margin_m`.
fn is_closer(next: &LineDistance, active: &LineDistance, margin_m: f64) -> bool {
    next.distance_m.abs() + margin_m < active.distance_m.abs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    legs: Vec<Leg>,
    plan: Flightplan,

    active_leg: Option<usize>,
    active_leg_result: LineDistance,
    active_pos: Option<PosCourse>,

    total_distance_nm: f64,
    bounding_rect: Rect,
    uses_true_course: bool,
    shown: ShownTypes,

    departure_legs: ProcedureLegs,
    star_legs: ProcedureLegs,
    arrival_legs: ProcedureLegs,
    departure_legs_offset: Option<usize>,
    star_legs_offset: Option<usize>,
    arrival_legs_offset: Option<usize>,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            legs: Vec::new(),
            plan: Flightplan::default(),
            active_leg: None,
            active_leg_result: LineDistance::INVALID,
            active_pos: None,
            total_distance_nm: 0.0,
            bounding_rect: Rect::default(),
            uses_true_course: true,
            shown: ShownTypes::ALL,
            departure_legs: ProcedureLegs::default(),
            star_legs: ProcedureLegs::default(),
            arrival_legs: ProcedureLegs::default(),
            departure_legs_offset: None,
            star_legs_offset: None,
            arrival_legs_offset: None,
        }
    }
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a route from a flight plan, one leg per entry, and run the full
    /// recompute pass.
    pub fn from_flightplan(plan: Flightplan, magvar: &dyn MagvarSource) -> Result<Self, RouteError> {
        if plan.is_empty() {
            return Err(RouteError::EmptyPlan);
        }

        let mut legs = Vec::with_capacity(plan.len());
        for (index, entry) in plan.entries().iter().enumerate() {
            if !entry.position.is_valid() {
                return Err(RouteError::InvalidEntryPosition {
                    index,
                    ident: entry.ident.clone(),
                });
            }
            let navaid = match entry.kind {
                EntryKind::Airport => NavaidRef::Airport {
                    elevation_ft: entry.position.alt_ft,
                },
                EntryKind::Vor => NavaidRef::Vor {
                    magvar: entry.magvar.unwrap_or(0.0),
                },
                EntryKind::Ndb => NavaidRef::Ndb {
                    magvar: entry.magvar.unwrap_or(0.0),
                },
                EntryKind::Waypoint => NavaidRef::Waypoint,
                EntryKind::User => NavaidRef::User,
            };
            legs.push(Leg::route_point(entry.ident.clone(), entry.position, navaid));
        }

        let mut route = Route {
            legs,
            plan,
            ..Route::default()
        };
        route.update_all(magvar);
        Ok(route)
    }

    /// Append a plain waypoint, keeping legs and entries in lockstep.
    pub fn append_waypoint(&mut self, entry: FlightplanEntry, magvar: &dyn MagvarSource) {
        let navaid = match entry.kind {
            EntryKind::Airport => NavaidRef::Airport {
                elevation_ft: entry.position.alt_ft,
            },
            EntryKind::Vor => NavaidRef::Vor {
                magvar: entry.magvar.unwrap_or(0.0),
            },
            EntryKind::Ndb => NavaidRef::Ndb {
                magvar: entry.magvar.unwrap_or(0.0),
            },
            EntryKind::Waypoint => NavaidRef::Waypoint,
            EntryKind::User => NavaidRef::User,
        };
        self.legs
            .push(Leg::route_point(entry.ident.clone(), entry.position, navaid));
        self.plan.push(entry);
        self.update_all(magvar);
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Leg> {
        self.legs.get(index)
    }

    pub fn first(&self) -> Option<&Leg> {
        self.legs.first()
    }

    pub fn last(&self) -> Option<&Leg> {
        self.legs.last()
    }

    pub fn flightplan(&self) -> &Flightplan {
        &self.plan
    }

    pub fn total_distance_nm(&self) -> f64 {
        self.total_distance_nm
    }

    pub fn bounding_rect(&self) -> &Rect {
        &self.bounding_rect
    }

    /// True while no leg carries a resolved magnetic variation; courses are
    /// then reported as true courses.
    pub fn uses_true_course(&self) -> bool {
        self.uses_true_course
    }

    pub fn shown_types(&self) -> ShownTypes {
        self.shown
    }

    pub fn set_shown_types(&mut self, shown: ShownTypes) {
        self.shown = shown;
    }

    pub fn departure_legs_offset(&self) -> Option<usize> {
        self.departure_legs_offset
    }

    pub fn star_legs_offset(&self) -> Option<usize> {
        self.star_legs_offset
    }

    pub fn arrival_legs_offset(&self) -> Option<usize> {
        self.arrival_legs_offset
    }

    pub fn has_departure_procedure(&self) -> bool {
        !self.departure_legs.is_empty()
    }

    pub fn has_star_procedure(&self) -> bool {
        !self.star_legs.is_empty()
    }

    pub fn has_arrival_procedure(&self) -> bool {
        !self.arrival_legs.is_empty()
    }

    pub fn has_transition_procedure(&self) -> bool {
        self.arrival_legs.has_transition()
    }

    pub fn has_valid_departure(&self) -> bool {
        self.plan
            .entries()
            .first()
            .is_some_and(|e| e.kind == EntryKind::Airport)
            && self.legs.first().is_some_and(|l| l.position().is_valid())
    }

    pub fn has_valid_destination(&self) -> bool {
        self.plan
            .entries()
            .last()
            .is_some_and(|e| e.kind == EntryKind::Airport)
            && self.legs.last().is_some_and(|l| l.position().is_valid())
    }

    pub fn has_entries(&self) -> bool {
        self.plan.len() > 2
    }

    pub fn can_calc_route(&self) -> bool {
        self.plan.len() >= 2
    }

    /// The trailing destination airport behind an arrival or STAR; its leg
    /// distance is not part of the flyable route.
    pub fn is_airport_after_arrival(&self, index: usize) -> bool {
        (self.has_arrival_procedure() || self.has_star_procedure())
            && index + 1 == self.legs.len()
            && self.legs[index].navaid().is_airport()
    }

    // ===== Active-leg tracking =====

    pub fn active_leg_index(&self) -> Option<usize> {
        self.active_leg
    }

    pub fn active_leg(&self) -> Option<&Leg> {
        self.active_leg.and_then(|i| self.legs.get(i))
    }

    pub fn active_leg_result(&self) -> &LineDistance {
        &self.active_leg_result
    }

    pub fn active_pos(&self) -> Option<&PosCourse> {
        self.active_pos.as_ref()
    }

    pub fn is_active_missed(&self) -> bool {
        self.active_leg().is_some_and(|leg| leg.is_missed())
    }

    /// Past the last flyable leg (or about to enter a missed approach) and
    /// beyond the active segment's end.
    pub fn is_passed_last_leg(&self) -> bool {
        let Some(active) = self.active_leg else {
            return false;
        };
        let len = self.legs.len();
        (active + 1 >= len || (active + 1 < len && self.legs[active + 1].is_missed()))
            && self.active_leg_result.status == CrossTrackStatus::AfterEnd
    }

    pub fn reset_active(&mut self) {
        self.active_leg = None;
        self.active_leg_result = LineDistance::INVALID;
        self.active_pos = None;
    }

    /// Explicitly assign the active leg, clamped into `[1, len)`, and
    /// re-evaluate the stored position sample against the new segment.
    pub fn set_active_leg(&mut self, index: usize) {
        if self.legs.len() < 2 {
            return;
        }
        let active = if (1..self.legs.len()).contains(&index) {
            index
        } else {
            1
        };
        self.active_leg = Some(active);
        self.active_leg_result = match &self.active_pos {
            Some(sample) => geo::distance_to_line(
                &sample.pos,
                &self.position_at(active - 1),
                &self.position_at(active),
            ),
            None => LineDistance::INVALID,
        };
    }

    /// Re-run advancement with the stored position sample.
    pub fn update_active_leg(&mut self) {
        if let Some(sample) = self.active_pos {
            self.update_active_leg_and_pos(sample);
        }
    }

    /// Advance the active leg from a live position+course sample.
    ///
    /// Idempotent for a repeated identical sample: the margins in the
    /// plain-leg and procedure-turn rules are asymmetric, so a stationary
    /// aircraft never oscillates between two adjacent legs.
    pub fn update_active_leg_and_pos(&mut self, sample: PosCourse) {
        if self.legs.is_empty() || !sample.is_valid() {
            self.reset_active();
            return;
        }

        let len = self.legs.len();

        if self.active_leg.is_none() && len > 1 {
            // Start with the nearest leg
            match self.nearest_all_leg_index(&sample) {
                Some((index, _)) => self.active_leg = Some(index),
                None => {
                    // Too far away from any segment
                    self.active_leg = None;
                    self.active_leg_result = LineDistance::INVALID;
                    self.active_pos = Some(sample);
                    return;
                }
            }
        }

        // Clamp in case the route shrank since the last sample
        let mut active = self.active_leg.unwrap_or(0).min(len - 1);
        self.active_pos = Some(sample);

        if len == 1 {
            // Special case point route: degenerates to a point check
            active = 0;
            let point = self.position_at(0);
            self.active_leg_result = geo::distance_to_line(&sample.pos, &point, &point);
        } else {
            if active == 0 {
                // Index 0 is the origin, not a traversable leg
                active = 1;
            }
            self.active_leg_result = geo::distance_to_line(
                &sample.pos,
                &self.position_at(active - 1),
                &self.position_at(active),
            );
        }

        // Get potential next leg and course difference
        let mut next = active + 1;
        if next < len {
            if self.legs[active].is_hold() {
                // Initial fixes are points instead of lines; try the legs after
                while self.legs[next].procedure_leg_type() == Some(ProcedureLegType::InitialFix)
                    && next < len - 2
                {
                    next += 1;
                }
            }

            let pos1 = self.position_at(next - 1);
            let pos2 = self.position_at(next);
            let leg_course = pos1.course_deg_to(&pos2);
            let course_diff = geo::course_difference(sample.course_deg, leg_course);
            let next_result = geo::distance_to_line(&sample.pos, &pos1, &pos2);

            let switch_to_next = if self.legs[active].is_hold() {
                let (hold_line, turn_direction) = match self.legs[active].procedure() {
                    Some(hold) => (hold.hold_line, hold.turn_direction),
                    None => (None, TurnDirection::None),
                };
                let same_start = self.legs[next]
                    .procedure()
                    .is_some_and(|p| p.line.pos1.almost_eq(self.legs[active].position()));

                if same_start {
                    // Hold fix is the next leg's starting point: leave once
                    // established on the next segment with a matching course
                    next_result.is_along_track()
                        && next_result.distance_m.abs() < geo::nm_to_meter(HOLD_EXIT_MAX_CROSS_NM)
                        && next_result.dist_from_start_m > geo::nm_to_meter(HOLD_EXIT_MIN_TRAVEL_NM)
                        && course_diff < HOLD_EXIT_COURSE_DIFF_DEG
                } else if let Some(hold_line) = hold_line {
                    // Hold fix differs from the next leg start: use the helper
                    // line, boundary side depending on the turn direction
                    let boundary_m = geo::nm_to_meter(match turn_direction {
                        TurnDirection::Right => -HOLD_EXIT_BOUNDARY_NM,
                        _ => HOLD_EXIT_BOUNDARY_NM,
                    });
                    let hold_result = hold_line.distance_to(&sample.pos);
                    hold_result.is_along_track() && hold_result.distance_m < boundary_m
                } else {
                    false
                }
            } else if self.legs[next].is_hold() {
                // Ignore all other rules and use proximity to activate a hold
                next_result.distance_m.abs() < geo::nm_to_meter(HOLD_ENTRY_MAX_CROSS_NM)
            } else if self.legs[active].procedure_leg_type() == Some(ProcedureLegType::ProcedureTurn)
            {
                // The turn can happen before the current leg's end
                is_closer(&next_result, &self.active_leg_result, PROC_TURN_SWITCH_MARGIN_M)
                    && course_diff < PROC_TURN_COURSE_DIFF_DEG
            } else {
                // At the end of the current leg, or measurably closer to the
                // next one on a compatible course
                self.active_leg_result.status == CrossTrackStatus::AfterEnd
                    || (is_closer(&next_result, &self.active_leg_result, LEG_SWITCH_MARGIN_M)
                        && course_diff < LEG_SWITCH_COURSE_DIFF_DEG)
            };

            if switch_to_next {
                // Do not track onto missed legs while they are hidden
                if self.shown.contains(ShownTypes::MISSED) || !self.legs[next].is_missed() {
                    tracing::debug!(from = active, to = next, "switching active leg");
                    active = next;
                    self.active_leg_result = geo::distance_to_line(
                        &sample.pos,
                        &self.position_at(active - 1),
                        &self.position_at(active),
                    );
                }
            }
        }

        self.active_leg = Some(active);
    }

    // ===== Distance and position queries =====

    /// Distance accounting for the current position, `None` without an
    /// active leg. Missed-approach legs are excluded from the sums unless
    /// the aircraft is itself on a missed-approach leg.
    pub fn route_distances(&self) -> Option<RouteDistances> {
        // The stored index may be stale after the route shrank
        let active = self.active_leg?.min(self.legs.len().checked_sub(1)?);
        let sample = self.active_pos?;

        // Procedure legs with real geometry are measured against the whole
        // polyline instead of the two-point segment
        let geometry_result = self.legs[active]
            .procedure()
            .filter(|p| p.geometry.len() > 2)
            .map(|p| geo::distance_to_polyline(&sample.pos, &p.geometry));

        let cross_track_distance_nm = match &geometry_result {
            Some(line_dist) => line_dist
                .is_along_track()
                .then(|| geo::meter_to_nm(line_dist.distance_m)),
            None => self
                .active_leg_result
                .is_along_track()
                .then(|| geo::meter_to_nm(self.active_leg_result.distance_m)),
        };

        let active_is_missed = self.legs[active].is_missed();

        let dist_to_cur = match &geometry_result {
            Some(line_dist) => geo::meter_to_nm(line_dist.dist_to_end_m),
            None => geo::meter_to_nm(self.legs[active].position().distance_meter_to(&sample.pos)),
        };

        let mut dist_from_start = 0.0;
        for i in 0..=active {
            if !self.legs[i].is_missed() || active_is_missed {
                dist_from_start += self.legs[i].distance_to_nm();
            } else {
                break;
            }
        }
        dist_from_start = (dist_from_start - dist_to_cur).abs();

        let mut dist_to_dest = 0.0;
        for i in active + 1..self.legs.len() {
            if !self.legs[i].is_missed() || active_is_missed {
                dist_to_dest += self.legs[i].distance_to_nm();
            }
        }
        dist_to_dest = (dist_to_dest + dist_to_cur).abs();

        Some(RouteDistances {
            dist_from_start_nm: dist_from_start,
            dist_to_dest_nm: dist_to_dest,
            next_leg_distance_nm: dist_to_cur,
            cross_track_distance_nm,
        })
    }

    /// Position at a cumulative along-route distance; `None` outside
    /// `[0, total]`.
    pub fn position_at_distance(&self, dist_from_start_nm: f64) -> Option<Pos> {
        if self.legs.is_empty()
            || dist_from_start_nm < 0.0
            || dist_from_start_nm > self.total_distance_nm
        {
            return None;
        }

        // Find the leg pair straddling the given distance
        let len = self.legs.len();
        let mut total = 0.0;
        let mut found = None;
        for i in 0..len.saturating_sub(1) {
            total += self.legs[i + 1].distance_to_nm();
            if total > dist_from_start_nm {
                found = Some(i);
                break;
            }
        }

        let Some(mut found_index) = found else {
            // Exactly at the route end
            return Some(*self.legs[len - 1].position());
        };

        if !self.legs[found_index].is_any_procedure() {
            let leg_dist = self.legs[found_index + 1].distance_to_nm();
            if leg_dist <= f64::EPSILON {
                return Some(*self.legs[found_index].position());
            }
            let base = dist_from_start_nm - (total - leg_dist);
            let fraction = base / leg_dist;
            Some(
                self.legs[found_index]
                    .position()
                    .interpolate(self.legs[found_index + 1].position(), fraction),
            )
        } else {
            // Skip points like initial fixes or other collapsed legs and
            // interpolate along the procedure leg's full geometry
            found_index += 1;
            while found_index < len && self.legs[found_index].is_procedure_point() {
                found_index += 1;
            }
            let proc_leg = self.legs.get(found_index)?.procedure()?;
            if proc_leg.calculated_distance_nm <= f64::EPSILON {
                return Some(proc_leg.fix_pos);
            }
            let base = dist_from_start_nm - (total - proc_leg.calculated_distance_nm);
            let fraction = base / proc_leg.calculated_distance_nm;
            geo::interpolate_polyline(&proc_leg.geometry, fraction)
        }
    }

    /// Distance from the destination to the top of descent.
    pub fn top_of_descent_from_destination(&self, rule: &TodRule) -> f64 {
        let Some(last) = self.legs.last() else {
            return 0.0;
        };
        let diff_ft = self.plan.cruising_altitude_ft - last.position().alt_ft;
        diff_ft / 1000.0 * rule.dist_nm_per_1000_ft
    }

    pub fn top_of_descent_from_start(&self, rule: &TodRule) -> f64 {
        if self.legs.is_empty() {
            return 0.0;
        }
        self.total_distance_nm - self.top_of_descent_from_destination(rule)
    }

    pub fn top_of_descent(&self, rule: &TodRule) -> Option<Pos> {
        if self.legs.is_empty() {
            return None;
        }
        self.position_at_distance(self.top_of_descent_from_start(rule))
    }

    // ===== Nearest-segment queries =====

    /// Index of the geometrically nearest leg segment, considering every
    /// segment; used to seed the active leg. `None` when nothing is within
    /// capture range. Returns the index and the signed cross-track in
    /// meters.
    pub fn nearest_all_leg_index(&self, sample: &PosCourse) -> Option<(usize, f64)> {
        if !sample.is_valid() {
            return None;
        }

        let mut min_distance = f64::MAX;
        let mut cross_track = f64::MAX;
        let mut index = None;

        for i in 1..self.legs.len() {
            let result = geo::distance_to_line(
                &sample.pos,
                &self.position_at(i - 1),
                &self.position_at(i),
            );
            let distance = result.distance_m.abs();
            if result.is_valid() && distance < min_distance {
                min_distance = distance;
                cross_track = result.distance_m;
                index = Some(i);
            }
        }

        if min_distance > geo::nm_to_meter(ACTIVE_CAPTURE_MAX_DISTANCE_NM) {
            // Too far away from any segment or point
            return None;
        }
        index.map(|i| (i, cross_track))
    }

    /// Nearest leg segment skipping segments whose starting leg belongs to a
    /// procedure; used for manual nearest-leg queries.
    pub fn nearest_leg_result(&self, pos: &Pos) -> Option<(usize, LineDistance)> {
        if !pos.is_valid() {
            return None;
        }

        let mut min_result = LineDistance::INVALID;
        let mut index = None;

        for i in 1..self.legs.len() {
            if self.legs[i - 1].is_any_procedure() {
                continue;
            }
            let result = geo::distance_to_line(
                pos,
                &self.position_at(i - 1),
                &self.position_at(i),
            );
            if result.is_valid() && result.distance_m.abs() < min_result.distance_m.abs() {
                min_result = result;
                index = Some(i);
            }
        }

        index.map(|i| (i, min_result))
    }

    /// Non-procedure route navaids within `max_distance_nm` of a position,
    /// bucketed by navaid kind and sorted by distance.
    pub fn nearest_route_objects(&self, pos: &Pos, max_distance_nm: f64) -> RouteObjectsNearby {
        let mut result = RouteObjectsNearby::default();

        for (i, leg) in self.legs.iter().enumerate() {
            if leg.is_any_procedure() {
                continue;
            }
            let distance_nm = geo::meter_to_nm(leg.position().distance_meter_to(pos));
            if distance_nm > max_distance_nm {
                continue;
            }
            let hit = NearbyNavaid {
                index: i,
                ident: leg.ident().to_string(),
                position: *leg.position(),
                distance_nm,
            };
            match leg.navaid() {
                NavaidRef::Airport { .. } => result.airports.push(hit),
                NavaidRef::Vor { .. } => result.vors.push(hit),
                NavaidRef::Ndb { .. } => result.ndbs.push(hit),
                NavaidRef::Waypoint => result.waypoints.push(hit),
                NavaidRef::User | NavaidRef::None => result.user_points.push(hit),
            }
        }

        for bucket in [
            &mut result.airports,
            &mut result.vors,
            &mut result.ndbs,
            &mut result.waypoints,
            &mut result.user_points,
        ] {
            bucket.sort_by(|a, b| a.distance_nm.total_cmp(&b.distance_nm));
        }
        result
    }

    // ===== Procedure splicing =====

    pub fn set_departure_legs(&mut self, legs: ProcedureLegs) {
        self.departure_legs = legs;
    }

    pub fn set_star_legs(&mut self, legs: ProcedureLegs) {
        self.star_legs = legs;
    }

    pub fn set_arrival_legs(&mut self, legs: ProcedureLegs) {
        self.arrival_legs = legs;
    }

    /// Rebuild the procedure portion of the route from the stored sets:
    /// remove every procedure-tagged leg, re-insert departure legs after the
    /// origin, STAR then arrival legs before the destination, record the
    /// block offsets and run the full recompute.
    ///
    /// Precondition: the route has origin and destination legs whenever a
    /// non-empty set is attached; the sets' geometry is self-consistent.
    pub fn update_procedure_legs(&mut self, builder: &dyn EntryBuilder, magvar: &dyn MagvarSource) {
        debug_assert!(
            self.legs.len() >= 2
                || (self.departure_legs.is_empty()
                    && self.star_legs.is_empty()
                    && self.arrival_legs.is_empty()),
            "procedure splicing needs a route with origin and destination"
        );

        self.erase_procedure_legs(PROC_ALL);

        // Departure legs start right after the departure airport
        for i in 0..self.departure_legs.len() {
            let insert_index = 1 + i;
            let built = Leg::from_procedure_leg(
                LegKind::Departure,
                self.departure_legs.at(i),
                self.legs.get(insert_index - 1),
            );
            let entry = builder.build_entry(self.departure_legs.at(i));
            self.legs.insert(insert_index, built);
            self.plan.insert(insert_index, entry);
        }

        // STAR legs go immediately before the destination, in order
        for i in 0..self.star_legs.len() {
            let len = self.legs.len();
            let prev = if len >= 2 { self.legs.get(len - 2) } else { None };
            let built = Leg::from_procedure_leg(LegKind::Star, self.star_legs.at(i), prev);
            let entry = builder.build_entry(self.star_legs.at(i));
            self.legs.insert(len - 1, built);
            self.plan.insert(len - 1, entry);
        }

        // Arrival (transition, approach, missed) legs follow the STAR
        for i in 0..self.arrival_legs.len() {
            let len = self.legs.len();
            let proc_leg = self.arrival_legs.at(i);
            let kind = if proc_leg.is_missed {
                LegKind::Missed
            } else if proc_leg.is_transition {
                LegKind::Transition
            } else {
                LegKind::Arrival
            };
            let prev = if len >= 2 { self.legs.get(len - 2) } else { None };
            let built = Leg::from_procedure_leg(kind, proc_leg, prev);
            let entry = builder.build_entry(proc_leg);
            self.legs.insert(len - 1, built);
            self.plan.insert(len - 1, entry);
        }

        tracing::info!(
            departure = self.departure_legs.len(),
            star = self.star_legs.len(),
            arrival = self.arrival_legs.len(),
            "spliced procedure legs"
        );

        self.update_all(magvar);
    }

    pub fn clear_departure_procedure(&mut self, magvar: &dyn MagvarSource) {
        if self.has_departure_procedure() {
            self.departure_legs = ProcedureLegs::default();
            self.erase_procedure_legs(PROC_DEPARTURE);
            self.update_all(magvar);
        }
    }

    pub fn clear_star_procedure(&mut self, magvar: &dyn MagvarSource) {
        if self.has_star_procedure() {
            self.star_legs = ProcedureLegs::default();
            self.erase_procedure_legs(PROC_STAR);
            self.update_all(magvar);
        }
    }

    /// Clear the approach together with its transition and missed legs.
    pub fn clear_arrival_procedure(&mut self, magvar: &dyn MagvarSource) {
        if self.has_arrival_procedure() {
            self.arrival_legs = ProcedureLegs::default();
            self.erase_procedure_legs(PROC_ARRIVAL);
            self.update_all(magvar);
        }
    }

    pub fn clear_transition_procedure(&mut self, magvar: &dyn MagvarSource) {
        if self.has_transition_procedure() {
            self.arrival_legs.clear_transition();
            self.erase_procedure_legs(PROC_TRANSITION);
            self.update_all(magvar);
        }
    }

    pub fn clear_all_procedures(&mut self, magvar: &dyn MagvarSource) {
        self.clear_arrival_procedure(magvar);
        self.clear_transition_procedure(magvar);
        self.clear_star_procedure(magvar);
        self.clear_departure_procedure(magvar);
    }

    /// Remove legs matching the given procedure categories, deleting the
    /// flight-plan entries at the same indices.
    fn erase_procedure_legs(&mut self, types: u8) {
        let indices: Vec<usize> = (0..self.legs.len())
            .rev()
            .filter(|&i| kind_matches(self.legs[i].kind(), types))
            .collect();
        for &i in &indices {
            self.legs.remove(i);
            self.plan.remove(i);
        }
    }

    // ===== Recompute =====

    /// Full recompute after any structural change: sequence indices,
    /// procedure block offsets, magnetic variation, distances and courses,
    /// bounding region.
    pub fn update_all(&mut self, magvar: &dyn MagvarSource) {
        self.update_indices();
        self.update_procedure_offsets();
        self.update_magvar(magvar);
        self.update_distances_and_course();
        self.update_bounding_rect();
        self.clamp_active_leg();
    }

    /// Keep the active index inside the leg sequence after a structural
    /// change and re-evaluate the stored sample against the new segment.
    fn clamp_active_leg(&mut self) {
        let Some(active) = self.active_leg else {
            return;
        };
        if self.legs.is_empty() {
            self.active_leg = None;
            self.active_leg_result = LineDistance::INVALID;
            return;
        }

        let clamped = active.min(self.legs.len() - 1);
        self.active_leg = Some(clamped);
        self.active_leg_result = match &self.active_pos {
            Some(sample) if clamped > 0 => geo::distance_to_line(
                &sample.pos,
                &self.position_at(clamped - 1),
                &self.position_at(clamped),
            ),
            Some(sample) => {
                let point = self.position_at(0);
                geo::distance_to_line(&sample.pos, &point, &point)
            }
            None => LineDistance::INVALID,
        };
    }

    fn update_indices(&mut self) {
        for (i, leg) in self.legs.iter_mut().enumerate() {
            leg.set_index(i);
        }
    }

    fn update_procedure_offsets(&mut self) {
        self.departure_legs_offset = self
            .legs
            .iter()
            .position(|l| l.kind() == LegKind::Departure);
        self.star_legs_offset = self.legs.iter().position(|l| l.kind() == LegKind::Star);
        self.arrival_legs_offset = self.legs.iter().position(|l| {
            matches!(
                l.kind(),
                LegKind::Transition | LegKind::Arrival | LegKind::Missed
            )
        });
    }

    fn update_magvar(&mut self, source: &dyn MagvarSource) {
        for leg in &mut self.legs {
            leg.update_magvar(source);
        }

        // Only database/model-resolved variation counts for the mode switch
        self.uses_true_course = !self.legs.iter().any(|leg| leg.magvar().is_some());
        if self.uses_true_course {
            return;
        }

        // Fill missing values from neighbour entries
        let magvars: Vec<Option<f64>> = self.legs.iter().map(|leg| leg.magvar()).collect();
        for (i, leg) in self.legs.iter_mut().enumerate() {
            if leg.magvar().is_none() {
                if let Some(value) = Leg::interpolated_magvar(i, &magvars) {
                    leg.set_magvar_interpolated(value);
                }
            }
        }
    }

    fn update_distances_and_course(&mut self) {
        self.total_distance_nm = 0.0;
        for i in 0..self.legs.len() {
            if self.is_airport_after_arrival(i) {
                break;
            }
            let (head, tail) = self.legs.split_at_mut(i);
            let leg = &mut tail[0];
            leg.update_distance_and_course(i, head.last());
            if !leg.is_missed() {
                self.total_distance_nm += leg.distance_to_nm();
            }
        }
    }

    fn update_bounding_rect(&mut self) {
        self.bounding_rect = Rect::from_positions(self.legs.iter().map(|leg| leg.position()));
    }

    fn position_at(&self, index: usize) -> Pos {
        *self.legs[index].position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::NoMagvar;
    use crate::plan::ProcedureEntryBuilder;
    use crate::procedure::{ProcedureLeg, ProcedureLegType};
    use crate::geo::Line;

    fn entry(ident: &str, kind: EntryKind, lat: f64, lon: f64) -> FlightplanEntry {
        FlightplanEntry::new(ident, kind, Pos::new(lat, lon))
    }

    fn plain_route() -> Route {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("BBB", EntryKind::Waypoint, 0.0, 1.0),
                entry("CCC", EntryKind::Airport, 0.0, 2.0),
            ],
            10_000.0,
        );
        Route::from_flightplan(plan, &NoMagvar).unwrap()
    }

    fn proc_leg(ident: &str, from: Pos, to: Pos) -> ProcedureLeg {
        ProcedureLeg::direct(ident, from, to)
    }

    fn sample(lat: f64, lon: f64, course: f64) -> PosCourse {
        PosCourse::new(Pos::new(lat, lon), course)
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = Route::from_flightplan(Flightplan::default(), &NoMagvar);
        assert!(matches!(err, Err(RouteError::EmptyPlan)));
    }

    #[test]
    fn invalid_entry_position_is_rejected() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("BAD", EntryKind::Waypoint, 91.0, 0.0),
            ],
            10_000.0,
        );
        let err = Route::from_flightplan(plan, &NoMagvar);
        assert!(matches!(
            err,
            Err(RouteError::InvalidEntryPosition { index: 1, .. })
        ));
    }

    #[test]
    fn total_distance_sums_legs() {
        let route = plain_route();
        assert!((route.total_distance_nm() - 120.0).abs() < 0.5);
        assert_eq!(route.len(), route.flightplan().len());
    }

    #[test]
    fn update_resets_on_invalid_sample() {
        let mut route = plain_route();
        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        route.update_active_leg_and_pos(PosCourse::new(Pos::new(f64::NAN, 0.0), 90.0));
        assert_eq!(route.active_leg_index(), None);
        assert!(!route.active_leg_result().is_valid());
    }

    #[test]
    fn seeding_requires_capture_range() {
        let mut route = plain_route();
        // ~30 degrees north of the route, way beyond 100 nm
        route.update_active_leg_and_pos(sample(30.0, 1.0, 90.0));
        assert_eq!(route.active_leg_index(), None);
    }

    #[test]
    fn single_leg_route_is_a_point_check() {
        let plan = Flightplan::new(
            vec![entry("AAA", EntryKind::Airport, 0.0, 0.0)],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        route.update_active_leg_and_pos(sample(0.0, 0.1, 90.0));
        assert_eq!(route.active_leg_index(), Some(0));
        assert!(route.active_leg_result().is_valid());
    }

    #[test]
    fn set_active_leg_clamps_to_valid_range() {
        let mut route = plain_route();
        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));

        route.set_active_leg(2);
        assert_eq!(route.active_leg_index(), Some(2));

        route.set_active_leg(0);
        assert_eq!(route.active_leg_index(), Some(1));

        route.set_active_leg(99);
        assert_eq!(route.active_leg_index(), Some(1));
    }

    #[test]
    fn passed_last_leg_after_destination() {
        let mut route = plain_route();
        route.update_active_leg_and_pos(sample(0.0, 1.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(2));
        assert!(!route.is_passed_last_leg());

        route.update_active_leg_and_pos(sample(0.0, 2.5, 90.0));
        assert!(route.is_passed_last_leg());
    }

    #[test]
    fn nearest_leg_query_skips_procedure_segments() {
        let mut route = plain_route();
        route.set_arrival_legs(ProcedureLegs::new(vec![proc_leg(
            "FAF",
            Pos::new(0.0, 1.0),
            Pos::new(0.0, 1.5),
        )]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        // Sequence: AAA BBB FAF CCC; segment FAF->CCC starts at a procedure leg

        let (index, result) = route.nearest_leg_result(&Pos::new(0.0, 1.7)).unwrap();
        assert_ne!(route.legs()[index - 1].kind(), LegKind::Arrival);
        assert!(result.is_valid());

        // The all-segments variant may pick the procedure segment
        let (all_index, _) = route
            .nearest_all_leg_index(&sample(0.0, 1.7, 90.0))
            .unwrap();
        assert_eq!(all_index, 3);
    }

    #[test]
    fn splice_inserts_blocks_and_offsets() {
        let mut route = plain_route();
        route.set_departure_legs(ProcedureLegs::new(vec![proc_leg(
            "DEP1",
            Pos::new(0.0, 0.0),
            Pos::new(0.0, 0.3),
        )]));
        route.set_star_legs(ProcedureLegs::new(vec![proc_leg(
            "STR1",
            Pos::new(0.0, 1.0),
            Pos::new(0.0, 1.4),
        )]));
        let mut transition = proc_leg("TR1", Pos::new(0.0, 1.4), Pos::new(0.0, 1.6));
        transition.is_transition = true;
        route.set_arrival_legs(ProcedureLegs::new(vec![
            transition,
            proc_leg("FAF", Pos::new(0.0, 1.6), Pos::new(0.0, 1.8)),
        ]));

        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);

        let idents: Vec<&str> = route.legs().iter().map(|l| l.ident()).collect();
        assert_eq!(idents, ["AAA", "DEP1", "BBB", "STR1", "TR1", "FAF", "CCC"]);
        assert_eq!(route.departure_legs_offset(), Some(1));
        assert_eq!(route.star_legs_offset(), Some(3));
        assert_eq!(route.arrival_legs_offset(), Some(4));
        assert_eq!(route.flightplan().len(), route.len());
        assert!(route.flightplan().entries()[1].is_procedure);
        assert!(route.is_airport_after_arrival(6));
    }

    #[test]
    fn splice_then_clear_restores_route() {
        let mut route = plain_route();
        let legs_before = route.len();
        let total_before = route.total_distance_nm();

        route.set_arrival_legs(ProcedureLegs::new(vec![proc_leg(
            "FAF",
            Pos::new(0.0, 1.0),
            Pos::new(0.0, 1.5),
        )]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        assert_eq!(route.len(), legs_before + 1);

        route.clear_arrival_procedure(&NoMagvar);
        assert_eq!(route.len(), legs_before);
        assert_eq!(route.flightplan().len(), legs_before);
        assert!(route.legs().iter().all(|l| !l.is_any_procedure()));
        assert_eq!(route.arrival_legs_offset(), None);
        assert!((route.total_distance_nm() - total_before).abs() < 1e-3);

        // Clearing again is a no-op
        route.clear_arrival_procedure(&NoMagvar);
        assert_eq!(route.len(), legs_before);
    }

    #[test]
    fn distances_survive_procedure_clearing() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 0.0, 3.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        route.set_arrival_legs(ProcedureLegs::new(vec![
            proc_leg("FAF", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0)),
            proc_leg("RWY", Pos::new(0.0, 1.0), Pos::new(0.0, 2.0)),
        ]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        // Sequence: AAA FAF RWY DDD

        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        route.update_active_leg_and_pos(sample(0.0, 1.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(2));

        // Clearing shrinks the route below the stored active index
        route.clear_arrival_procedure(&NoMagvar);
        assert_eq!(route.len(), 2);
        assert_eq!(route.active_leg_index(), Some(1));
        assert!(route.active_leg_result().is_valid());

        let distances = route.route_distances().unwrap();
        assert!(
            (distances.dist_from_start_nm + distances.dist_to_dest_nm
                - route.total_distance_nm())
            .abs()
                < 0.5
        );
    }

    #[test]
    fn procedure_turn_switches_before_segment_end() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 1.0, 1.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let mut turn = proc_leg("PT", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0));
        turn.leg_type = ProcedureLegType::ProcedureTurn;
        // Next leg heads north from the turn fix
        let app = proc_leg("FAF", Pos::new(0.0, 1.0), Pos::new(1.0, 1.0));
        route.set_arrival_legs(ProcedureLegs::new(vec![turn, app]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        // Sequence: AAA PT FAF DDD

        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // On the next segment but on a diverging course: no early switch
        route.update_active_leg_and_pos(sample(0.5, 1.0, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // Same position turned onto the next leg's course: the switch
        // happens although the turn segment never reached its end
        route.update_active_leg_and_pos(sample(0.5, 1.0, 0.0));
        assert_eq!(route.active_leg_index(), Some(2));
    }

    #[test]
    fn hold_exit_skips_initial_fix_legs() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 0.0, 3.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let mut hold = proc_leg("HOLD", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0));
        hold.leg_type = ProcedureLegType::Hold;
        let mut fix = proc_leg("IF", Pos::new(0.0, 1.0), Pos::new(0.0, 1.0));
        fix.leg_type = ProcedureLegType::InitialFix;
        fix.geometry = vec![Pos::new(0.0, 1.0)];
        fix.calculated_distance_nm = 0.0;
        let app = proc_leg("FAF", Pos::new(0.0, 1.0), Pos::new(0.0, 2.0));
        route.set_arrival_legs(ProcedureLegs::new(vec![hold, fix, app]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        // Sequence: AAA HOLD IF FAF DDD

        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // Established outbound; the point-like initial fix is skipped and
        // the exit lands on the leg after it
        route.update_active_leg_and_pos(sample(0.0, 1.3, 90.0));
        assert_eq!(route.active_leg_index(), Some(3));
    }

    #[test]
    fn clear_transition_keeps_approach() {
        let mut route = plain_route();
        let mut transition = proc_leg("TR1", Pos::new(0.0, 1.0), Pos::new(0.0, 1.3));
        transition.is_transition = true;
        route.set_arrival_legs(ProcedureLegs::new(vec![
            transition,
            proc_leg("FAF", Pos::new(0.0, 1.3), Pos::new(0.0, 1.7)),
        ]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        assert!(route.has_transition_procedure());

        route.clear_transition_procedure(&NoMagvar);
        assert!(!route.has_transition_procedure());
        assert!(route.has_arrival_procedure());
        let idents: Vec<&str> = route.legs().iter().map(|l| l.ident()).collect();
        assert_eq!(idents, ["AAA", "BBB", "FAF", "CCC"]);
    }

    #[test]
    fn missed_leg_switch_is_vetoed_while_hidden() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 0.0, 3.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let mut missed = proc_leg("MA1", Pos::new(0.0, 1.0), Pos::new(0.0, 2.0));
        missed.is_missed = true;
        route.set_arrival_legs(ProcedureLegs::new(vec![
            proc_leg("FAF", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0)),
            missed,
        ]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        // Sequence: AAA FAF MA1 DDD

        route.set_shown_types(ShownTypes::ALL.without(ShownTypes::MISSED));
        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // Past the approach fix; the switch onto the hidden missed leg is vetoed
        route.update_active_leg_and_pos(sample(0.0, 1.2, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        route.set_shown_types(ShownTypes::ALL);
        route.update_active_leg_and_pos(sample(0.0, 1.2, 90.0));
        assert_eq!(route.active_leg_index(), Some(2));
        assert!(route.is_active_missed());
    }

    #[test]
    fn missed_legs_excluded_from_total_distance() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 0.0, 3.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let mut missed = proc_leg("MA1", Pos::new(0.0, 1.0), Pos::new(0.0, 2.0));
        missed.is_missed = true;
        route.set_arrival_legs(ProcedureLegs::new(vec![
            proc_leg("FAF", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0)),
            missed,
        ]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);

        // Only AAA->FAF counts: the missed leg is excluded and DDD is the
        // airport after the arrival
        assert!((route.total_distance_nm() - 60.0).abs() < 0.5);
    }

    #[test]
    fn hold_exit_with_shared_fix() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 0.0, 3.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let mut hold = proc_leg("HOLD", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0));
        hold.leg_type = ProcedureLegType::Hold;
        // Next leg starts at the hold fix
        let app = proc_leg("FAF", Pos::new(0.0, 1.0), Pos::new(0.0, 2.0));
        route.set_arrival_legs(ProcedureLegs::new(vec![hold, app]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        // Sequence: AAA HOLD FAF DDD

        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // Barely into the next segment: not far enough to exit the hold
        route.update_active_leg_and_pos(sample(0.0, 1.005, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // Established on the next segment with matching course
        route.update_active_leg_and_pos(sample(0.0, 1.3, 90.0));
        assert_eq!(route.active_leg_index(), Some(2));
    }

    #[test]
    fn hold_exit_with_helper_line() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 1.0, 2.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let mut hold = proc_leg("HOLD", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0));
        hold.leg_type = ProcedureLegType::Hold;
        hold.turn_direction = TurnDirection::Right;
        // Eastbound helper line through the hold fix
        hold.hold_line = Some(Line::new(Pos::new(0.0, 1.0), Pos::new(0.0, 1.5)));
        // Next leg does NOT start at the hold fix
        let app = proc_leg("FAF", Pos::new(0.1, 1.0), Pos::new(1.0, 2.0));
        route.set_arrival_legs(ProcedureLegs::new(vec![hold, app]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);

        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // North of the helper line (left of its eastbound course) by ~1 nm:
        // beyond the right-turn hold boundary, so the hold is exited
        route.update_active_leg_and_pos(sample(0.0167, 1.2, 45.0));
        assert_eq!(route.active_leg_index(), Some(2));
    }

    #[test]
    fn hold_entry_uses_pure_proximity() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 0.0, 3.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let mut hold = proc_leg("HOLD", Pos::new(0.0, 1.0), Pos::new(0.0, 2.0));
        hold.leg_type = ProcedureLegType::Hold;
        route.set_arrival_legs(ProcedureLegs::new(vec![
            proc_leg("IAF", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0)),
            hold,
        ]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);
        // Sequence: AAA IAF HOLD DDD

        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));
        assert_eq!(route.active_leg_index(), Some(1));

        // On the hold segment but with a wildly different course: proximity
        // alone activates the hold
        route.update_active_leg_and_pos(sample(0.0, 1.5, 270.0));
        assert_eq!(route.active_leg_index(), Some(2));
    }

    #[test]
    fn position_at_distance_uses_procedure_geometry() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                entry("DDD", EntryKind::Airport, 1.0, 1.0),
            ],
            10_000.0,
        );
        let mut route = Route::from_flightplan(plan, &NoMagvar).unwrap();

        let mut fix = proc_leg("IF", Pos::new(0.0, 0.0), Pos::new(0.0, 0.0));
        fix.leg_type = ProcedureLegType::InitialFix;
        fix.geometry = vec![Pos::new(0.0, 0.0)];
        fix.calculated_distance_nm = 0.0;

        // L-shaped leg east then north with explicit polyline geometry
        let mut curved = proc_leg("ARC", Pos::new(0.0, 0.0), Pos::new(1.0, 1.0));
        curved.geometry = vec![Pos::new(0.0, 0.0), Pos::new(0.0, 1.0), Pos::new(1.0, 1.0)];
        curved.calculated_distance_nm = 120.0;

        route.set_arrival_legs(ProcedureLegs::new(vec![fix, curved]));
        route.update_procedure_legs(&ProcedureEntryBuilder, &NoMagvar);

        // Quarter of the way: 30 nm east along the first geometry segment
        let pos = route.position_at_distance(30.0).unwrap();
        assert!(pos.lat.abs() < 0.02, "lat {}", pos.lat);
        assert!((pos.lon - 0.5).abs() < 0.02, "lon {}", pos.lon);

        // Three quarters: 30 nm north along the second geometry segment
        let pos = route.position_at_distance(90.0).unwrap();
        assert!((pos.lat - 0.5).abs() < 0.02, "lat {}", pos.lat);
        assert!((pos.lon - 1.0).abs() < 0.02, "lon {}", pos.lon);
    }

    #[test]
    fn top_of_descent_position() {
        let plan = Flightplan::new(
            vec![
                FlightplanEntry::new("AAA", EntryKind::Airport, Pos::with_alt(0.0, 0.0, 0.0)),
                FlightplanEntry::new("BBB", EntryKind::Waypoint, Pos::new(0.0, 1.0)),
                FlightplanEntry::new("CCC", EntryKind::Airport, Pos::with_alt(0.0, 2.0, 1000.0)),
            ],
            11_000.0,
        );
        let route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        let rule = TodRule::default();

        // 10000 ft to lose at 3 nm per 1000 ft
        let from_dest = route.top_of_descent_from_destination(&rule);
        assert!((from_dest - 30.0).abs() < 1e-6);
        let from_start = route.top_of_descent_from_start(&rule);
        assert!((from_start - (route.total_distance_nm() - 30.0)).abs() < 1e-6);

        let tod = route.top_of_descent(&rule).unwrap();
        assert!(tod.lat.abs() < 0.01);
        assert!((tod.lon - 1.5).abs() < 0.02);
    }

    #[test]
    fn magvar_fallback_to_true_course() {
        let route = plain_route();
        assert!(route.uses_true_course());

        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                FlightplanEntry {
                    magvar: Some(5.0),
                    ..entry("TGO", EntryKind::Vor, 0.0, 1.0)
                },
                entry("CCC", EntryKind::Airport, 0.0, 2.0),
            ],
            10_000.0,
        );
        let route = Route::from_flightplan(plan, &NoMagvar).unwrap();
        assert!(!route.uses_true_course());
        // Unresolved neighbours picked up the VOR's variation
        assert_eq!(route.legs()[0].magvar(), Some(5.0));
        assert_eq!(route.legs()[2].magvar(), Some(5.0));
        let mag = route.legs()[2].course_mag().unwrap();
        let true_crs = route.legs()[2].course_true().unwrap();
        assert!((geo::course_difference(true_crs, mag) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn nearest_route_objects_buckets_by_kind() {
        let plan = Flightplan::new(
            vec![
                entry("AAA", EntryKind::Airport, 0.0, 0.0),
                FlightplanEntry {
                    magvar: Some(1.0),
                    ..entry("TGO", EntryKind::Vor, 0.0, 1.0)
                },
                entry("WP1", EntryKind::User, 0.0, 2.0),
                entry("CCC", EntryKind::Airport, 0.0, 3.0),
            ],
            10_000.0,
        );
        let route = Route::from_flightplan(plan, &NoMagvar).unwrap();

        let nearby = route.nearest_route_objects(&Pos::new(0.0, 1.0), 90.0);
        assert_eq!(nearby.vors.len(), 1);
        assert_eq!(nearby.vors[0].ident, "TGO");
        assert_eq!(nearby.vors[0].index, 1);
        assert_eq!(nearby.airports.len(), 1, "only AAA is within 90 nm");
        assert_eq!(nearby.user_points.len(), 1);
        assert!(nearby.vors[0].distance_nm < 1.0);
    }

    #[test]
    fn route_clone_is_independent() {
        let mut route = plain_route();
        route.update_active_leg_and_pos(sample(0.0, 0.5, 90.0));

        let mut copy = route.clone();
        copy.update_active_leg_and_pos(sample(0.0, 1.5, 90.0));

        assert_eq!(route.active_leg_index(), Some(1));
        assert_eq!(copy.active_leg_index(), Some(2));
        assert_eq!(copy.len(), copy.flightplan().len());
    }
}
