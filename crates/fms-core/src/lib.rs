pub mod geo;
pub mod leg;
pub mod plan;
pub mod procedure;
pub mod route;

pub use geo::{
    course_difference, distance_to_line, distance_to_polyline, interpolate_polyline,
    normalize_course, CrossTrackStatus, Line, LineDistance, Pos, PosCourse, Rect,
};
pub use leg::{Leg, LegKind, MagvarSource, NavaidRef, NoMagvar};
pub use plan::{
    EntryBuilder, EntryKind, Flightplan, FlightplanEntry, ProcedureEntryBuilder, RouteError,
};
pub use procedure::{ProcedureLeg, ProcedureLegType, ProcedureLegs, TurnDirection};
pub use route::{
    NearbyNavaid, Route, RouteDistances, RouteObjectsNearby, ShownTypes, TodRule,
};
