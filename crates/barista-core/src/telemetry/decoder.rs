//! Dashboard payload decoder.
//!
//! Implements the tolerant reader pattern: unknown widgets are ignored,
//! missing fields leave the prior snapshot value unchanged, and a
//! malformed payload is dropped without touching the snapshot.

use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, trace};

use super::types::{
    BoilerKind, BoilerUpdate, DashboardUpdate, MachineEvent, MachineSnapshot, MachineStatusUpdate,
};
use crate::error::Result;

/// Boiler status string both boilers use to report an empty tank.
const STATUS_NO_WATER: &str = "NoWater";

/// Decode one dashboard JSON payload into a partial update.
pub fn decode_dashboard(json: &str) -> Result<DashboardUpdate> {
    let raw: Value = serde_json::from_str(json)?;
    let mut update = DashboardUpdate::default();

    if let Some(widgets) = raw.get("widgets").and_then(Value::as_array) {
        for widget in widgets {
            let Some(code) = widget.get("code").and_then(Value::as_str) else {
                continue;
            };
            let output = widget.get("output");

            match code {
                "CMMachineStatus" => update.machine = decode_machine_status(output),
                "CMCoffeeBoiler" => {
                    update.coffee_boiler = Some(decode_boiler(output, BoilerKind::Coffee));
                }
                "CMSteamBoilerLevel" => {
                    update.steam_boiler = Some(decode_boiler(output, BoilerKind::Steam));
                }
                "CMNoWater" => {
                    update.no_water = output
                        .and_then(|o| o.get("allarm"))
                        .and_then(Value::as_bool);
                }
                other => trace!(widget = other, "Ignoring unknown widget"),
            }
        }
    }

    // Command acknowledgements ride along on the same payload.
    if let Some(commands) = raw.get("commands").and_then(Value::as_array) {
        for cmd in commands {
            if let (Some(id), Some(status)) = (
                cmd.get("id").and_then(Value::as_str),
                cmd.get("status").and_then(Value::as_str),
            ) {
                debug!(command = id, status, "Command acknowledged");
            }
        }
    }

    Ok(update)
}

fn decode_machine_status(output: Option<&Value>) -> Option<MachineStatusUpdate> {
    let output = output?;
    let status = output.get("status").and_then(Value::as_str)?.to_string();

    let brewing_started_at = if status == "Brewing" {
        output
            .get("brewingStartTime")
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis)
    } else {
        None
    };

    Some(MachineStatusUpdate {
        mode: output
            .get("mode")
            .and_then(Value::as_str)
            .map(String::from),
        brewing_started_at,
        status,
    })
}

fn decode_boiler(output: Option<&Value>, kind: BoilerKind) -> BoilerUpdate {
    let Some(output) = output else {
        return BoilerUpdate::default();
    };

    let target = match kind {
        BoilerKind::Coffee => output
            .get("targetTemperature")
            .and_then(Value::as_f64)
            .filter(|t| *t > 0.0)
            .map(|t| format!("{t:.0}°C")),
        BoilerKind::Steam => output
            .get("targetLevel")
            .and_then(Value::as_str)
            .map(format_steam_level),
    };

    BoilerUpdate {
        status: output
            .get("status")
            .and_then(Value::as_str)
            .map(String::from),
        ready_at: output
            .get("readyStartTime")
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis),
        target,
    }
}

/// Vendor reports `"Level2"`; displays want `"L2"`.
fn format_steam_level(level: &str) -> String {
    level
        .strip_prefix("Level")
        .map_or_else(|| level.to_string(), |n| format!("L{n}"))
}

/// Apply a partial update to the snapshot, returning change events.
///
/// Power, brewing, steam, and the water alarm are recomputed whenever
/// their source widget is present in the payload; boiler views are merged
/// field-wise. Anything whose widget is absent keeps its prior value.
pub fn apply_update(snapshot: &mut MachineSnapshot, update: &DashboardUpdate) -> Vec<MachineEvent> {
    let mut events = Vec::new();

    if let Some(machine) = &update.machine {
        let power_on = machine.status == "PoweredOn";
        if power_on != snapshot.power_on {
            snapshot.power_on = power_on;
            events.push(MachineEvent::PowerChanged(power_on));
        }

        let active = machine.status == "Brewing";
        let started_at = machine.brewing_started_at.filter(|_| active);
        if active != snapshot.brewing.active || started_at != snapshot.brewing.started_at {
            snapshot.brewing.active = active;
            snapshot.brewing.started_at = started_at;
            events.push(MachineEvent::BrewingChanged { active, started_at });
        }
    }

    if let Some(boiler) = &update.coffee_boiler {
        apply_boiler(snapshot, BoilerKind::Coffee, boiler, &mut events);
    }
    if let Some(boiler) = &update.steam_boiler {
        apply_boiler(snapshot, BoilerKind::Steam, boiler, &mut events);

        // Steam power tracks the boiler status: anything other than
        // Off/StandBy counts as on.
        if let Some(status) = &boiler.status {
            let steam_on = status != "Off" && status != "StandBy";
            if steam_on != snapshot.steam_on {
                snapshot.steam_on = steam_on;
                events.push(MachineEvent::SteamChanged(steam_on));
            }
        }
    }

    apply_water_alarm(snapshot, update, &mut events);

    events
}

fn apply_boiler(
    snapshot: &mut MachineSnapshot,
    kind: BoilerKind,
    boiler: &BoilerUpdate,
    events: &mut Vec<MachineEvent>,
) {
    let view = match kind {
        BoilerKind::Coffee => &mut snapshot.coffee_boiler,
        BoilerKind::Steam => &mut snapshot.steam_boiler,
    };

    let before = view.clone();
    if let Some(status) = &boiler.status {
        view.status = status.clone();
    }
    // ready_at is recomputed from the widget: absent means "already ready".
    view.ready_at = boiler.ready_at;
    if let Some(target) = &boiler.target {
        view.target = Some(target.clone());
    }

    if *view != before {
        events.push(MachineEvent::BoilerStatus {
            kind,
            status: view.status.clone(),
            ready_at: view.ready_at,
            target: view.target.clone(),
        });
    }
}

/// The alarm has two independent sources: the dedicated `CMNoWater` widget
/// and either boiler reporting `NoWater`. It is recomputed whenever any of
/// those widgets is present, from exactly the widgets present.
fn apply_water_alarm(
    snapshot: &mut MachineSnapshot,
    update: &DashboardUpdate,
    events: &mut Vec<MachineEvent>,
) {
    let mut source_present = false;
    let mut alarm = false;

    if let Some(flag) = update.no_water {
        source_present = true;
        alarm |= flag;
    }
    for boiler in [&update.coffee_boiler, &update.steam_boiler]
        .into_iter()
        .flatten()
    {
        if let Some(status) = &boiler.status {
            source_present = true;
            alarm |= status == STATUS_NO_WATER;
        }
    }

    if source_present && alarm != snapshot.water_alarm {
        snapshot.water_alarm = alarm;
        events.push(MachineEvent::WaterAlarmChanged(alarm));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::telemetry::types::BoilerView;

    fn widget_payload(widgets: &str) -> String {
        format!(r#"{{"widgets":[{widgets}]}}"#)
    }

    fn decode_and_apply(snapshot: &mut MachineSnapshot, json: &str) -> Vec<MachineEvent> {
        let update = decode_dashboard(json).unwrap();
        apply_update(snapshot, &update)
    }

    #[test]
    fn power_only_payload_leaves_boilers_untouched() {
        let mut snapshot = MachineSnapshot {
            coffee_boiler: BoilerView {
                status: "HeatingUp".into(),
                ready_at: None,
                target: Some("93°C".into()),
            },
            ..Default::default()
        };
        let before_boiler = snapshot.coffee_boiler.clone();

        let events = decode_and_apply(
            &mut snapshot,
            &widget_payload(r#"{"code":"CMMachineStatus","output":{"status":"PoweredOn"}}"#),
        );

        assert!(snapshot.power_on);
        assert_eq!(snapshot.coffee_boiler, before_boiler);
        assert_eq!(events, vec![MachineEvent::PowerChanged(true)]);
    }

    #[test]
    fn ready_time_is_an_absolute_instant() {
        let ready_ms = Utc::now().timestamp_millis() + 65_000;
        let mut snapshot = MachineSnapshot::default();

        decode_and_apply(
            &mut snapshot,
            &widget_payload(&format!(
                r#"{{"code":"CMCoffeeBoiler","output":{{"status":"HeatingUp","readyStartTime":{ready_ms},"targetTemperature":93.5}}}}"#
            )),
        );

        let ready_at = snapshot.coffee_boiler.ready_at.unwrap();
        assert_eq!(ready_at.timestamp_millis(), ready_ms);
        assert_eq!(snapshot.coffee_boiler.target.as_deref(), Some("94°C"));
    }

    #[test]
    fn steam_boiler_no_water_status_raises_alarm() {
        let mut snapshot = MachineSnapshot::default();

        let events = decode_and_apply(
            &mut snapshot,
            &widget_payload(r#"{"code":"CMSteamBoilerLevel","output":{"status":"NoWater"}}"#),
        );

        assert!(snapshot.water_alarm);
        assert!(events.contains(&MachineEvent::WaterAlarmChanged(true)));
    }

    #[test]
    fn dedicated_no_water_widget_raises_and_clears_alarm() {
        let mut snapshot = MachineSnapshot::default();

        decode_and_apply(
            &mut snapshot,
            &widget_payload(r#"{"code":"CMNoWater","output":{"allarm":true}}"#),
        );
        assert!(snapshot.water_alarm);

        let events = decode_and_apply(
            &mut snapshot,
            &widget_payload(r#"{"code":"CMNoWater","output":{"allarm":false}}"#),
        );
        assert!(!snapshot.water_alarm);
        assert_eq!(events, vec![MachineEvent::WaterAlarmChanged(false)]);
    }

    #[test]
    fn alarm_unchanged_when_no_alarm_widget_present() {
        let mut snapshot = MachineSnapshot {
            water_alarm: true,
            ..Default::default()
        };

        let events = decode_and_apply(
            &mut snapshot,
            &widget_payload(r#"{"code":"CMMachineStatus","output":{"status":"StandBy"}}"#),
        );

        assert!(snapshot.water_alarm);
        assert!(!events
            .iter()
            .any(|e| matches!(e, MachineEvent::WaterAlarmChanged(_))));
    }

    #[test]
    fn brewing_status_carries_start_time() {
        let start_ms = 1_700_000_000_000i64;
        let mut snapshot = MachineSnapshot::default();

        let events = decode_and_apply(
            &mut snapshot,
            &widget_payload(&format!(
                r#"{{"code":"CMMachineStatus","output":{{"status":"Brewing","brewingStartTime":{start_ms}}}}}"#
            )),
        );

        assert!(snapshot.brewing.active);
        assert_eq!(
            snapshot.brewing.started_at.unwrap().timestamp_millis(),
            start_ms
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, MachineEvent::BrewingChanged { active: true, .. })));

        // Brewing ends: PoweredOn status clears the flag and the instant.
        decode_and_apply(
            &mut snapshot,
            &widget_payload(r#"{"code":"CMMachineStatus","output":{"status":"PoweredOn"}}"#),
        );
        assert!(!snapshot.brewing.active);
        assert!(snapshot.brewing.started_at.is_none());
    }

    #[test]
    fn steam_level_is_abbreviated() {
        let mut snapshot = MachineSnapshot::default();
        decode_and_apply(
            &mut snapshot,
            &widget_payload(
                r#"{"code":"CMSteamBoilerLevel","output":{"status":"HeatingUp","targetLevel":"Level2"}}"#,
            ),
        );
        assert_eq!(snapshot.steam_boiler.target.as_deref(), Some("L2"));
        assert!(snapshot.steam_on);
    }

    #[test]
    fn steam_off_and_standby_count_as_off() {
        let mut snapshot = MachineSnapshot::default();
        for status in ["Off", "StandBy"] {
            decode_and_apply(
                &mut snapshot,
                &widget_payload(&format!(
                    r#"{{"code":"CMSteamBoilerLevel","output":{{"status":"{status}"}}}}"#
                )),
            );
            assert!(!snapshot.steam_on, "status {status} should read as off");
        }
    }

    #[test]
    fn unknown_widgets_are_ignored() {
        let mut snapshot = MachineSnapshot::default();
        let events = decode_and_apply(
            &mut snapshot,
            &widget_payload(r#"{"code":"CMFutureWidget","output":{"x":1}}"#),
        );
        assert!(events.is_empty());
        assert_eq!(snapshot, MachineSnapshot::default());
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(decode_dashboard("{not json").is_err());
        assert!(decode_dashboard("").is_err());
    }

    #[test]
    fn repeated_payload_emits_no_duplicate_events() {
        let payload = widget_payload(
            r#"{"code":"CMMachineStatus","output":{"status":"PoweredOn"}},
               {"code":"CMCoffeeBoiler","output":{"status":"Ready","targetTemperature":93}}"#,
        );
        let mut snapshot = MachineSnapshot::default();

        let first = decode_and_apply(&mut snapshot, &payload);
        assert!(!first.is_empty());

        let second = decode_and_apply(&mut snapshot, &payload);
        assert!(second.is_empty());
    }
}
