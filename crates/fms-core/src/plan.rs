//! Flight-plan entry list mirroring the route legs one-to-one, plus the
//! entry-builder seam used during procedure splicing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::Pos;
use crate::procedure::ProcedureLeg;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("flight plan has no entries")]
    EmptyPlan,
    #[error("flight plan entry {index} ({ident}) has an invalid position")]
    InvalidEntryPosition { index: usize, ident: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Airport,
    Vor,
    Ndb,
    Waypoint,
    User,
}

/// One flight-plan record; the plan list mirrors the route's leg sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightplanEntry {
    pub ident: String,
    pub kind: EntryKind,
    pub position: Pos,
    /// Database magnetic variation for VOR/NDB entries.
    #[serde(default)]
    pub magvar: Option<f64>,
    /// Set on entries inserted by procedure splicing.
    #[serde(default)]
    pub is_procedure: bool,
}

impl FlightplanEntry {
    pub fn new(ident: impl Into<String>, kind: EntryKind, position: Pos) -> Self {
        Self {
            ident: ident.into(),
            kind,
            position,
            magvar: None,
            is_procedure: false,
        }
    }
}

/// The ordered entry list plus plan-level data. Entries are mutated only in
/// lockstep with the owning route's leg sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flightplan {
    entries: Vec<FlightplanEntry>,
    pub cruising_altitude_ft: f64,
}

impl Flightplan {
    pub fn new(entries: Vec<FlightplanEntry>, cruising_altitude_ft: f64) -> Self {
        Self {
            entries,
            cruising_altitude_ft,
        }
    }

    pub fn entries(&self) -> &[FlightplanEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn insert(&mut self, index: usize, entry: FlightplanEntry) {
        self.entries.insert(index, entry);
    }

    pub(crate) fn remove(&mut self, index: usize) {
        self.entries.remove(index);
    }

    pub(crate) fn push(&mut self, entry: FlightplanEntry) {
        self.entries.push(entry);
    }

    /// Next free ordinal for user waypoints named `WPnn`.
    pub fn next_user_waypoint_number(&self) -> u32 {
        let mut next = 0;
        for entry in &self.entries {
            if entry.kind != EntryKind::User {
                continue;
            }
            if let Some(num) = entry
                .ident
                .strip_prefix("WP")
                .and_then(|suffix| suffix.parse::<u32>().ok())
            {
                next = next.max(num);
            }
        }
        next + 1
    }
}

/// Builds the flight-plan entry inserted in lockstep with each spliced
/// procedure leg.
pub trait EntryBuilder {
    fn build_entry(&self, leg: &ProcedureLeg) -> FlightplanEntry;
}

/// Default builder: procedure legs become procedure-tagged waypoint entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcedureEntryBuilder;

impl EntryBuilder for ProcedureEntryBuilder {
    fn build_entry(&self, leg: &ProcedureLeg) -> FlightplanEntry {
        FlightplanEntry {
            ident: leg.ident.clone(),
            kind: EntryKind::Waypoint,
            position: leg.fix_pos,
            magvar: None,
            is_procedure: true,
        }
    }
}
