//! Externally supplied procedure-leg sets (departure, STAR, arrival with an
//! optional attached transition). Geometry arrives fully resolved; this
//! engine consumes it and never computes it.

use serde::{Deserialize, Serialize};

use crate::geo::{Line, Pos};

/// Detailed type of a procedure leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureLegType {
    InitialFix,
    CourseToFix,
    DirectToFix,
    ArcToFix,
    ProcedureTurn,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    Left,
    Right,
    #[default]
    None,
}

/// One fully resolved procedure leg as delivered by the procedure provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureLeg {
    pub ident: String,
    pub fix_pos: Pos,
    pub leg_type: ProcedureLegType,
    /// Entry line of this leg; `line.pos1` is the leg's starting point.
    pub line: Line,
    /// Helper line used to detect hold exits when the hold fix differs from
    /// the next leg's start.
    pub hold_line: Option<Line>,
    pub turn_direction: TurnDirection,
    /// Resolved geometry; curved legs carry a multi-point polyline.
    pub geometry: Vec<Pos>,
    pub calculated_distance_nm: f64,
    #[serde(default)]
    pub is_transition: bool,
    #[serde(default)]
    pub is_missed: bool,
}

impl ProcedureLeg {
    /// Straight point-to-fix leg with a two-point geometry.
    pub fn direct(ident: impl Into<String>, from: Pos, to: Pos) -> Self {
        let distance_nm = crate::geo::meter_to_nm(from.distance_meter_to(&to));
        Self {
            ident: ident.into(),
            fix_pos: to,
            leg_type: ProcedureLegType::DirectToFix,
            line: Line::new(from, to),
            hold_line: None,
            turn_direction: TurnDirection::None,
            geometry: vec![from, to],
            calculated_distance_nm: distance_nm,
            is_transition: false,
            is_missed: false,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.leg_type == ProcedureLegType::Hold
    }

    pub fn is_initial_fix(&self) -> bool {
        self.leg_type == ProcedureLegType::InitialFix
    }

    /// Legs that are points rather than lines (initial fixes, collapsed
    /// geometry); skipped during polyline interpolation and hold-exit
    /// lookahead.
    pub fn is_point(&self) -> bool {
        self.is_initial_fix() || self.geometry.len() < 2
    }
}

/// An ordered procedure-leg sequence for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureLegs {
    legs: Vec<ProcedureLeg>,
}

impl ProcedureLegs {
    pub fn new(legs: Vec<ProcedureLeg>) -> Self {
        Self { legs }
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn at(&self, index: usize) -> &ProcedureLeg {
        &self.legs[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcedureLeg> {
        self.legs.iter()
    }

    pub fn has_transition(&self) -> bool {
        self.legs.iter().any(|leg| leg.is_transition)
    }

    /// Drop the attached transition legs, keeping the rest of the set.
    pub fn clear_transition(&mut self) {
        self.legs.retain(|leg| !leg.is_transition);
    }
}

impl From<Vec<ProcedureLeg>> for ProcedureLegs {
    fn from(legs: Vec<ProcedureLeg>) -> Self {
        Self::new(legs)
    }
}
