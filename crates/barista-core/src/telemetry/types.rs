//! Machine snapshot and event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which boiler a status update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoilerKind {
    Coffee,
    Steam,
}

/// Last-known state of one boiler.
///
/// `ready_at` is always an absolute GMT instant at which the boiler will
/// reach temperature, never an elapsed duration; the remaining countdown is
/// `ready_at - now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoilerView {
    /// Vendor status string ("Off", "StandBy", "HeatingUp", "Ready",
    /// "NoWater", ...). Kept open-ended; the vendor adds values freely.
    pub status: String,
    pub ready_at: Option<DateTime<Utc>>,
    /// Display target: temperature ("93°C") for the coffee boiler, level
    /// ("L2") for the steam boiler.
    pub target: Option<String>,
}

impl Default for BoilerView {
    fn default() -> Self {
        Self {
            status: "Off".to_string(),
            ready_at: None,
            target: None,
        }
    }
}

/// Brewing activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BrewingView {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Derived view of the machine, built up from partial dashboard updates.
///
/// Not authoritative: the machine is. Mutated only by applying decoder
/// output inside the poll loop; collaborators on other threads receive
/// by-value copies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub power_on: bool,
    pub steam_on: bool,
    pub coffee_boiler: BoilerView,
    pub steam_boiler: BoilerView,
    pub brewing: BrewingView,
    pub water_alarm: bool,
}

/// Change events emitted to display/alarm collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    PowerChanged(bool),
    SteamChanged(bool),
    BoilerStatus {
        kind: BoilerKind,
        status: String,
        ready_at: Option<DateTime<Utc>>,
        target: Option<String>,
    },
    BrewingChanged {
        active: bool,
        started_at: Option<DateTime<Utc>>,
    },
    WaterAlarmChanged(bool),
}

/// Partial decode of one dashboard payload.
///
/// `None` fields mean "widget absent from this payload": the prior
/// snapshot value stays untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardUpdate {
    pub machine: Option<MachineStatusUpdate>,
    pub coffee_boiler: Option<BoilerUpdate>,
    pub steam_boiler: Option<BoilerUpdate>,
    /// The dedicated `CMNoWater` alarm widget, when present.
    pub no_water: Option<bool>,
}

/// Decoded `CMMachineStatus` widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineStatusUpdate {
    pub status: String,
    pub mode: Option<String>,
    /// Brewing start instant, present only while `status == "Brewing"`.
    pub brewing_started_at: Option<DateTime<Utc>>,
}

/// Decoded boiler widget (`CMCoffeeBoiler` / `CMSteamBoilerLevel`).
///
/// Within a present widget, `status`/`target` are merged field-wise when
/// present, while `ready_at` is recomputed from the widget every time --
/// a boiler that stops reporting a ready time has reached temperature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoilerUpdate {
    pub status: Option<String>,
    pub ready_at: Option<DateTime<Utc>>,
    pub target: Option<String>,
}
