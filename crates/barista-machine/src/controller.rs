//! Machine controller: commands, telemetry state, reconnect policy.
//!
//! One controller per appliance. The caller drives it with periodic
//! `tick` calls; the controller pumps the transport, folds telemetry
//! into the snapshot and reopens the WebSocket when it drops, at most
//! once per reconnect interval.

use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use barista_core::config::Config;
use barista_core::error::Result;
use barista_core::telemetry::{apply_update, decode_dashboard};
use barista_core::{MachineEvent, MachineSnapshot};
use barista_crypto::InstallationKey;

use crate::session::SessionManager;
use crate::transport::{StompTransport, TransportState};

/// Capacity of the event channel. A slow consumer loses events rather
/// than stalling the telemetry loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Rate limiter for repeatable actions (reconnects, stats refreshes).
///
/// `allow` records every permitted attempt, so a failed attempt still
/// starts a full interval.
#[derive(Debug)]
struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// High-level appliance handle over the REST session and the telemetry
/// transport.
pub struct MachineController {
    session: SessionManager,
    transport: StompTransport,
    serial_number: String,
    snapshot: MachineSnapshot,
    events: mpsc::Sender<MachineEvent>,
    reconnect: Throttle,
    stats: Throttle,
}

impl MachineController {
    /// Build a controller plus the receiving end of its event stream.
    pub fn new(
        config: &Config,
        identity: InstallationKey,
    ) -> (Self, mpsc::Receiver<MachineEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let controller = Self {
            session: SessionManager::new(&config.cloud, identity),
            transport: StompTransport::new(config.cloud.host.clone()),
            serial_number: config.machine.serial_number.clone(),
            snapshot: MachineSnapshot::default(),
            events: tx,
            reconnect: Throttle::new(Duration::from_secs(config.cloud.reconnect_interval_secs)),
            stats: Throttle::new(Duration::from_secs(config.cloud.stats_min_interval_secs)),
        };
        (controller, rx)
    }

    /// Current machine state as last decoded from telemetry.
    pub fn snapshot(&self) -> MachineSnapshot {
        self.snapshot.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Switch the machine between brewing mode and standby.
    pub async fn set_power(&mut self, on: bool) -> Result<()> {
        let endpoint = format!(
            "/things/{}/command/CoffeeMachineChangeMode",
            self.serial_number
        );
        self.session
            .api_call(Method::POST, &endpoint, Some(&power_command(on)))
            .await?;
        // Telemetry confirms later; update optimistically so immediate
        // reads and toggles see the commanded state.
        if self.snapshot.power_on != on {
            self.snapshot.power_on = on;
            self.emit(MachineEvent::PowerChanged(on));
        }
        Ok(())
    }

    /// Enable or disable the steam boiler.
    pub async fn set_steam(&mut self, on: bool) -> Result<()> {
        let endpoint = format!(
            "/things/{}/command/CoffeeMachineSettingSteamBoilerEnabled",
            self.serial_number
        );
        self.session
            .api_call(Method::POST, &endpoint, Some(&steam_command(on)))
            .await?;
        if self.snapshot.steam_on != on {
            self.snapshot.steam_on = on;
            self.emit(MachineEvent::SteamChanged(on));
        }
        Ok(())
    }

    pub async fn toggle_power(&mut self) -> Result<()> {
        let target = !self.snapshot.power_on;
        self.set_power(target).await
    }

    pub async fn toggle_steam(&mut self) -> Result<()> {
        let target = !self.snapshot.steam_on;
        self.set_steam(target).await
    }

    /// Ask the cloud for usage statistics, at most once per interval.
    /// A throttled call is a cheap no-op.
    pub async fn request_stats_refresh(&mut self) -> Result<()> {
        if !self.stats.allow(Instant::now()) {
            return Ok(());
        }
        let endpoint = format!("/things/{}/stats", self.serial_number);
        let stats = self.session.api_call(Method::GET, &endpoint, None).await?;
        debug!(%stats, "Statistics refreshed");
        Ok(())
    }

    /// Open the telemetry channel with a fresh token and signed headers.
    pub async fn connect_websocket(&mut self) -> Result<()> {
        let token = self.session.get_access_token().await?;
        let headers = self.session.signed_headers()?;
        self.transport
            .connect(&self.serial_number, &token, &headers)
            .await
    }

    pub async fn disconnect_websocket(&mut self) {
        self.transport.disconnect().await;
    }

    /// One scheduler step: pump the socket, fold queued telemetry into
    /// the snapshot, and reconnect if the transport dropped.
    pub async fn tick(&mut self) {
        self.transport.poll().await;

        while let Some(payload) = self.transport.pop_message() {
            match decode_dashboard(&payload) {
                Ok(update) => {
                    for event in apply_update(&mut self.snapshot, &update) {
                        self.emit(event);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dropping malformed telemetry payload");
                }
            }
        }

        if self.transport.state() == TransportState::Disconnected
            && self.reconnect.allow(Instant::now())
        {
            if let Err(e) = self.connect_websocket().await {
                warn!(error = %e, "WebSocket reconnect failed");
            }
        }
    }

    fn emit(&mut self, event: MachineEvent) {
        if self.events.try_send(event).is_err() {
            warn!("Event channel full, dropping machine event");
        }
    }
}

fn power_command(on: bool) -> Value {
    json!({ "mode": if on { "BrewingMode" } else { "StandBy" } })
}

fn steam_command(on: bool) -> Value {
    json!({ "boilerIndex": 1, "enabled": on })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn power_command_maps_to_vendor_modes() {
        assert_eq!(power_command(true), json!({ "mode": "BrewingMode" }));
        assert_eq!(power_command(false), json!({ "mode": "StandBy" }));
    }

    #[test]
    fn steam_command_targets_boiler_one() {
        assert_eq!(
            steam_command(true),
            json!({ "boilerIndex": 1, "enabled": true })
        );
        assert_eq!(
            steam_command(false),
            json!({ "boilerIndex": 1, "enabled": false })
        );
    }

    #[test]
    fn throttle_allows_first_attempt_immediately() {
        let mut throttle = Throttle::new(Duration::from_secs(30));
        assert!(throttle.allow(Instant::now()));
    }

    #[test]
    fn throttle_enforces_minimum_interval() {
        let mut throttle = Throttle::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(throttle.allow(t0));
        assert!(!throttle.allow(t0 + Duration::from_secs(29)));
        assert!(throttle.allow(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn throttle_interval_restarts_on_each_allowed_attempt() {
        let mut throttle = Throttle::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(throttle.allow(t0));
        assert!(throttle.allow(t0 + Duration::from_secs(31)));
        // 31s + 29s is only 29s after the second attempt.
        assert!(!throttle.allow(t0 + Duration::from_secs(60)));
    }
}
