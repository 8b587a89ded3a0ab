//! One item in the route: a plain waypoint or a spliced procedure leg,
//! plus the derived fields recomputed whenever the route changes.

use serde::{Deserialize, Serialize};

use crate::geo::{self, Pos};
use crate::procedure::{ProcedureLeg, ProcedureLegType};

/// Reference to the navaid a leg was built from.
///
/// VOR and NDB records carry a surveyed magnetic variation; those are the
/// "resolved" sources that decide whether the route reports magnetic or
/// true courses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavaidRef {
    Airport { elevation_ft: f64 },
    Vor { magvar: f64 },
    Ndb { magvar: f64 },
    Waypoint,
    User,
    None,
}

impl NavaidRef {
    /// Magnetic variation stored with the navaid record, if any.
    pub fn database_magvar(&self) -> Option<f64> {
        match self {
            NavaidRef::Vor { magvar } | NavaidRef::Ndb { magvar } => Some(*magvar),
            _ => None,
        }
    }

    pub fn is_airport(&self) -> bool {
        matches!(self, NavaidRef::Airport { .. })
    }
}

/// Category of a leg within the route sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegKind {
    /// Plain en-route point, not part of any procedure.
    Route,
    Departure,
    Star,
    Arrival,
    Transition,
    Missed,
}

impl LegKind {
    pub fn is_procedure(&self) -> bool {
        !matches!(self, LegKind::Route)
    }
}

/// External geomagnetic model. Returns `None` where no variation can be
/// resolved for a position.
pub trait MagvarSource {
    fn magnetic_variation(&self, pos: &Pos) -> Option<f64>;
}

impl<F> MagvarSource for F
where
    F: Fn(&Pos) -> Option<f64>,
{
    fn magnetic_variation(&self, pos: &Pos) -> Option<f64> {
        self(pos)
    }
}

/// Geomagnetic model that never resolves; routes fall back to true courses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMagvar;

impl MagvarSource for NoMagvar {
    fn magnetic_variation(&self, _pos: &Pos) -> Option<f64> {
        None
    }
}

/// One route item. Identity (ident, position, kind) is fixed at creation;
/// distance, course and magnetic variation are derived and recomputed by the
/// owning route.
///
/// Invariant: `kind == Route` legs carry no procedure detail, every other
/// kind does. Both constructors enforce this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    ident: String,
    position: Pos,
    navaid: NavaidRef,
    kind: LegKind,
    procedure: Option<ProcedureLeg>,

    // Derived, recomputed by Route::update_all
    index: usize,
    magvar: Option<f64>,
    distance_to_nm: f64,
    course_true: Option<f64>,
    course_mag: Option<f64>,
}

impl Leg {
    /// A plain en-route point.
    pub fn route_point(ident: impl Into<String>, position: Pos, navaid: NavaidRef) -> Self {
        Self {
            ident: ident.into(),
            position,
            navaid,
            kind: LegKind::Route,
            procedure: None,
            index: 0,
            magvar: None,
            distance_to_nm: 0.0,
            course_true: None,
            course_mag: None,
        }
    }

    /// A leg spliced in from a procedure set. `prev` is the preceding,
    /// already inserted leg and seeds distance/course for continuity until
    /// the next full recompute.
    pub fn from_procedure_leg(kind: LegKind, leg: &ProcedureLeg, prev: Option<&Leg>) -> Self {
        debug_assert!(kind.is_procedure(), "procedure legs need a procedure kind");
        let mut built = Self {
            ident: leg.ident.clone(),
            position: leg.fix_pos,
            navaid: NavaidRef::None,
            kind,
            procedure: Some(leg.clone()),
            index: 0,
            magvar: None,
            distance_to_nm: 0.0,
            course_true: None,
            course_mag: None,
        };
        built.update_distance_and_course(0, prev);
        built
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn position(&self) -> &Pos {
        &self.position
    }

    pub fn navaid(&self) -> &NavaidRef {
        &self.navaid
    }

    pub fn kind(&self) -> LegKind {
        self.kind
    }

    pub fn procedure(&self) -> Option<&ProcedureLeg> {
        self.procedure.as_ref()
    }

    pub fn is_any_procedure(&self) -> bool {
        self.kind.is_procedure()
    }

    pub fn is_missed(&self) -> bool {
        self.kind == LegKind::Missed
    }

    pub fn is_hold(&self) -> bool {
        self.procedure.as_ref().is_some_and(|p| p.is_hold())
    }

    pub fn procedure_leg_type(&self) -> Option<ProcedureLegType> {
        self.procedure.as_ref().map(|p| p.leg_type)
    }

    /// Procedure legs that are points rather than lines.
    pub fn is_procedure_point(&self) -> bool {
        self.procedure.as_ref().is_some_and(|p| p.is_point())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Great-circle distance from the previous leg, nautical miles.
    pub fn distance_to_nm(&self) -> f64 {
        self.distance_to_nm
    }

    /// True course from the previous leg, [0, 360). `None` for the first leg.
    pub fn course_true(&self) -> Option<f64> {
        self.course_true
    }

    /// Magnetic course from the previous leg. `None` while the variation is
    /// unresolved.
    pub fn course_mag(&self) -> Option<f64> {
        self.course_mag
    }

    pub fn magvar(&self) -> Option<f64> {
        self.magvar
    }

    /// Recompute distance and true/magnetic course from the previous leg.
    /// The first leg of a route has zero distance and undefined courses.
    pub fn update_distance_and_course(&mut self, index: usize, prev: Option<&Leg>) {
        self.index = index;
        match prev {
            Some(prev) => {
                // Procedure geometry carries its own precomputed length
                self.distance_to_nm = match &self.procedure {
                    Some(proc_leg) if proc_leg.calculated_distance_nm > 0.0 => {
                        proc_leg.calculated_distance_nm
                    }
                    _ => geo::meter_to_nm(prev.position.distance_meter_to(&self.position)),
                };
                let course = prev.position.course_deg_to(&self.position);
                self.course_true = Some(course);
                self.course_mag = self
                    .magvar
                    .map(|magvar| geo::normalize_course(course - magvar));
            }
            None => {
                self.distance_to_nm = 0.0;
                self.course_true = None;
                self.course_mag = None;
            }
        }
    }

    /// Resolve magnetic variation from the navaid record first, then the
    /// injected geomagnetic model. Leaves `None` when neither resolves.
    pub fn update_magvar(&mut self, source: &dyn MagvarSource) {
        self.magvar = self
            .navaid
            .database_magvar()
            .or_else(|| source.magnetic_variation(&self.position));
    }

    pub(crate) fn set_magvar_interpolated(&mut self, magvar: f64) {
        self.magvar = Some(magvar);
    }

    /// Fill an unresolved variation from the nearest resolved neighbor in
    /// the sequence. Returns `None` when the whole route is unresolved.
    pub fn interpolated_magvar(index: usize, magvars: &[Option<f64>]) -> Option<f64> {
        if let Some(value) = magvars.get(index).copied().flatten() {
            return Some(value);
        }
        for offset in 1..magvars.len() {
            if let Some(value) = index
                .checked_sub(offset)
                .and_then(|i| magvars.get(i).copied().flatten())
            {
                return Some(value);
            }
            if let Some(value) = magvars.get(index + offset).copied().flatten() {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(ident: &str, lat: f64, lon: f64) -> Leg {
        Leg::route_point(ident, Pos::new(lat, lon), NavaidRef::Waypoint)
    }

    #[test]
    fn first_leg_has_no_course() {
        let mut leg = wp("A", 0.0, 0.0);
        leg.update_distance_and_course(0, None);
        assert_eq!(leg.distance_to_nm(), 0.0);
        assert!(leg.course_true().is_none());
        assert!(leg.course_mag().is_none());
    }

    #[test]
    fn distance_and_course_from_previous() {
        let prev = wp("A", 0.0, 0.0);
        let mut leg = wp("B", 1.0, 0.0);
        leg.update_distance_and_course(1, Some(&prev));

        // One degree of latitude is 60 nm, course due north
        assert!((leg.distance_to_nm() - 60.0).abs() < 0.1);
        assert!(leg.course_true().unwrap().abs() < 0.1);
    }

    #[test]
    fn magnetic_course_applies_variation() {
        let prev = wp("A", 0.0, 0.0);
        let mut leg = wp("B", 0.0, 1.0);
        leg.update_magvar(&|_: &Pos| Some(10.0));
        leg.update_distance_and_course(1, Some(&prev));

        let true_crs = leg.course_true().unwrap();
        let mag_crs = leg.course_mag().unwrap();
        assert!((geo::normalize_course(true_crs - 10.0) - mag_crs).abs() < 1e-9);
    }

    #[test]
    fn navaid_magvar_wins_over_model() {
        let mut leg = Leg::route_point("VOR", Pos::new(0.0, 0.0), NavaidRef::Vor { magvar: -3.0 });
        leg.update_magvar(&|_: &Pos| Some(10.0));
        assert_eq!(leg.magvar(), Some(-3.0));
    }

    #[test]
    fn neighbor_interpolation_picks_nearest() {
        let magvars = vec![None, Some(2.0), None, None, Some(8.0)];
        assert_eq!(Leg::interpolated_magvar(0, &magvars), Some(2.0));
        assert_eq!(Leg::interpolated_magvar(2, &magvars), Some(2.0));
        assert_eq!(Leg::interpolated_magvar(3, &magvars), Some(8.0));

        let unresolved = vec![None, None];
        assert_eq!(Leg::interpolated_magvar(1, &unresolved), None);
    }

    #[test]
    fn procedure_leg_uses_calculated_distance() {
        let prev = wp("A", 0.0, 0.0);
        let mut proc_leg =
            ProcedureLeg::direct("D1", Pos::new(0.0, 0.0), Pos::new(0.0, 1.0));
        proc_leg.calculated_distance_nm = 42.0;

        let leg = Leg::from_procedure_leg(LegKind::Departure, &proc_leg, Some(&prev));
        assert!((leg.distance_to_nm() - 42.0).abs() < 1e-9);
        assert!(leg.is_any_procedure());
        assert!(leg.procedure().is_some());
    }
}
