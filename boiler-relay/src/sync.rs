//! Boiler state synchronization.
//!
//! ```text
//!  boiler ── boiler_init/boiler_update ──► Registry ──► first subscribed app
//!  app    ── command ──────────────────► Registry ──► boiler (echo)
//! ```
//!
//! Every operation either fully applies or leaves the registry untouched.
//! Failures come back as [`RelayError`] for the caller to log; nothing is
//! ever reported to the client over the wire.

use std::time::SystemTime;

use crate::connection::ConnectionHandle;
use crate::protocol::{
    temperature_in_range, Action, BoilerInit, BoilerReport, Command, OutboundMessage,
};
use crate::registry::{BoilerConnection, Registry};

/// Reasons a boiler operation was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    #[error("Boiler not found: {0}")]
    UnknownBoiler(String),

    #[error("Boiler not connected: {0}")]
    BoilerNotConnected(String),

    #[error("Missing temperature for set_temperature on boiler {0}")]
    MissingTemperature(String),

    #[error("Temperature {temperature} out of range for boiler {boiler_id}")]
    TemperatureOutOfRange { boiler_id: String, temperature: f64 },
}

/// What a `boiler_init` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new entry was created
    Registered,
    /// The id was known; the init was applied as an update
    Refreshed { notified: Option<String> },
}

/// Register a boiler, or treat the init as an update if the id is known.
///
/// A new entry starts with `connected = false`; the boiler is only
/// considered connected once it reports an update. Nothing is broadcast
/// for a fresh registration.
pub fn init_boiler(
    registry: &mut Registry,
    init: BoilerInit,
    transport: &ConnectionHandle,
) -> Result<Registration, RelayError> {
    if registry.boiler(&init.boiler_id).is_some() {
        let report = BoilerReport {
            boiler_id: init.boiler_id,
            temperature: init.temperature,
            is_on: init.is_on,
        };
        let notified = update_boiler(registry, report, transport)?;
        return Ok(Registration::Refreshed { notified });
    }

    log::info!(
        "Boiler {} registered by app {} ({}°, on={})",
        init.boiler_id,
        init.owner_app_id,
        init.temperature,
        init.is_on
    );
    let boiler = BoilerConnection::new(
        init.owner_app_id,
        init.temperature,
        init.is_on,
        transport.clone(),
    );
    registry.insert_boiler(init.boiler_id, boiler);
    Ok(Registration::Registered)
}

/// Apply a boiler's reported state and broadcast it.
///
/// Returns the id of the app that was sent the update, if any.
pub fn update_boiler(
    registry: &mut Registry,
    report: BoilerReport,
    transport: &ConnectionHandle,
) -> Result<Option<String>, RelayError> {
    let BoilerReport {
        boiler_id,
        temperature,
        is_on,
    } = report;

    let Some(boiler) = registry.boiler_mut(&boiler_id) else {
        return Err(RelayError::UnknownBoiler(boiler_id));
    };
    boiler.temperature = temperature;
    boiler.is_on = is_on;
    boiler.last_seen = SystemTime::now();
    boiler.connected = true;
    registry.replace_boiler_transport(&boiler_id, transport.clone());

    let update = OutboundMessage::boiler_update(&boiler_id, temperature, is_on);
    let notified = broadcast(registry, &boiler_id, &update);

    log::info!("Boiler {boiler_id} updated ({temperature}°, on={is_on})");
    Ok(notified)
}

/// Apply an app's command to a connected boiler and echo the new state
/// back to the boiler.
pub fn apply_command(registry: &mut Registry, command: Command) -> Result<(), RelayError> {
    let Command {
        app_id,
        boiler_id,
        action,
        temperature,
    } = command;

    let Some(boiler) = registry.boiler_mut(&boiler_id) else {
        return Err(RelayError::UnknownBoiler(boiler_id));
    };
    if !boiler.connected {
        return Err(RelayError::BoilerNotConnected(boiler_id));
    }

    match action {
        Action::TurnOn => boiler.is_on = true,
        Action::TurnOff => boiler.is_on = false,
        Action::SetTemperature => {
            let requested =
                temperature.ok_or_else(|| RelayError::MissingTemperature(boiler_id.clone()))?;
            if !temperature_in_range(requested) {
                return Err(RelayError::TemperatureOutOfRange {
                    boiler_id,
                    temperature: requested,
                });
            }
            boiler.temperature = requested;
        }
    }

    match boiler.state_update(&boiler_id).encode() {
        Ok(frame) => {
            boiler.transport().send(frame);
        }
        Err(e) => log::error!("Failed to encode echo for boiler {boiler_id}: {e}"),
    }

    log::info!("Command {action} from app {app_id} applied to boiler {boiler_id}");
    Ok(())
}

/// Send `message` to the first app subscribed to `boiler_id`.
///
/// Only one app is ever notified, even when several follow the boiler.
/// Returns that app's id.
pub fn broadcast(registry: &Registry, boiler_id: &str, message: &OutboundMessage) -> Option<String> {
    let (app_id, app) = registry.first_subscriber(boiler_id)?;
    match message.encode() {
        Ok(frame) => {
            app.transport().send(frame);
            Some(app_id.to_owned())
        }
        Err(e) => {
            log::error!("Failed to encode update for boiler {boiler_id}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionReceiver;
    use crate::protocol::{BoilerUpdate, MAX_TEMPERATURE, MIN_TEMPERATURE};
    use crate::registry::AppConnection;

    fn connection() -> (ConnectionHandle, ConnectionReceiver) {
        ConnectionHandle::channel(32)
    }

    fn drain(rx: &mut ConnectionReceiver) -> Vec<BoilerUpdate> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.outbound.try_recv() {
            match OutboundMessage::decode(&frame).unwrap() {
                OutboundMessage::BoilerUpdate(update) => out.push(update),
            }
        }
        out
    }

    fn init(boiler_id: &str, temperature: f64, is_on: bool) -> BoilerInit {
        BoilerInit {
            boiler_id: boiler_id.into(),
            owner_app_id: "owner".into(),
            temperature,
            is_on,
        }
    }

    fn report(boiler_id: &str, temperature: f64, is_on: bool) -> BoilerReport {
        BoilerReport {
            boiler_id: boiler_id.into(),
            temperature,
            is_on,
        }
    }

    fn command(boiler_id: &str, action: Action, temperature: Option<f64>) -> Command {
        Command {
            app_id: "a1".into(),
            boiler_id: boiler_id.into(),
            action,
            temperature,
        }
    }

    fn subscribe(registry: &mut Registry, app_id: &str, boiler_ids: &[&str]) -> ConnectionReceiver {
        let (conn, rx) = connection();
        let ids = boiler_ids.iter().map(|s| s.to_string());
        registry.insert_app(app_id, AppConnection::new(conn, ids));
        rx
    }

    /// Registry with boiler `b1` registered and connected at `temperature`.
    fn connected_boiler(temperature: f64) -> (Registry, ConnectionReceiver) {
        let mut registry = Registry::new();
        let (conn, mut rx) = connection();
        init_boiler(&mut registry, init("b1", temperature, true), &conn).unwrap();
        update_boiler(&mut registry, report("b1", temperature, true), &conn).unwrap();
        drain(&mut rx);
        (registry, rx)
    }

    #[test]
    fn test_init_registers_disconnected() {
        let mut registry = Registry::new();
        let mut app_rx = subscribe(&mut registry, "a1", &["b1"]);
        let (conn, _rx) = connection();

        let outcome = init_boiler(&mut registry, init("b1", 30.0, true), &conn).unwrap();
        assert_eq!(outcome, Registration::Registered);

        let boiler = registry.boiler("b1").unwrap();
        assert!(!boiler.connected);
        assert_eq!(boiler.owner_app_id, "owner");
        assert_eq!(boiler.temperature, 30.0);
        assert!(drain(&mut app_rx).is_empty(), "Registration broadcasts nothing");
    }

    #[test]
    fn test_reinit_behaves_like_update() {
        let (first, _rx1) = connection();
        let (second, _rx2) = connection();

        let mut via_init = Registry::new();
        let mut init_app = subscribe(&mut via_init, "a1", &["b1"]);
        init_boiler(&mut via_init, init("b1", 30.0, true), &first).unwrap();
        let outcome = init_boiler(
            &mut via_init,
            BoilerInit {
                owner_app_id: "someone-else".into(),
                ..init("b1", 35.0, false)
            },
            &second,
        )
        .unwrap();

        let mut via_update = Registry::new();
        let mut update_app = subscribe(&mut via_update, "a1", &["b1"]);
        init_boiler(&mut via_update, init("b1", 30.0, true), &first).unwrap();
        update_boiler(&mut via_update, report("b1", 35.0, false), &second).unwrap();

        assert_eq!(
            outcome,
            Registration::Refreshed {
                notified: Some("a1".into())
            }
        );
        assert_eq!(via_init.boiler_count(), 1);

        let a = via_init.boiler("b1").unwrap();
        let b = via_update.boiler("b1").unwrap();
        assert_eq!(a.temperature, b.temperature);
        assert_eq!(a.is_on, b.is_on);
        assert_eq!(a.connected, b.connected);
        assert_eq!(a.owner_app_id, "owner");
        assert_eq!(a.transport(), &second);
        assert_eq!(drain(&mut init_app), drain(&mut update_app));
    }

    fn pause() {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    #[test]
    fn test_update_refreshes_last_seen() {
        let mut registry = Registry::new();
        let (conn, _rx) = connection();
        init_boiler(&mut registry, init("b1", 30.0, true), &conn).unwrap();
        let registered_at = registry.boiler("b1").unwrap().last_seen;

        pause();
        update_boiler(&mut registry, report("b1", 31.0, true), &conn).unwrap();
        let first_update = registry.boiler("b1").unwrap().last_seen;
        assert!(first_update > registered_at);

        pause();
        update_boiler(&mut registry, report("b1", 31.0, true), &conn).unwrap();
        assert!(registry.boiler("b1").unwrap().last_seen > first_update);
    }

    #[test]
    fn test_reinit_refreshes_last_seen() {
        let mut registry = Registry::new();
        let (conn, _rx) = connection();
        init_boiler(&mut registry, init("b1", 30.0, true), &conn).unwrap();
        let registered_at = registry.boiler("b1").unwrap().last_seen;

        pause();
        init_boiler(&mut registry, init("b1", 30.0, true), &conn).unwrap();
        assert!(registry.boiler("b1").unwrap().last_seen > registered_at);
    }

    #[test]
    fn test_update_unknown_boiler() {
        let mut registry = Registry::new();
        let (conn, _rx) = connection();
        let err = update_boiler(&mut registry, report("ghost", 30.0, true), &conn).unwrap_err();
        assert_eq!(err, RelayError::UnknownBoiler("ghost".into()));
        assert_eq!(registry.boiler_count(), 0);
    }

    #[test]
    fn test_update_marks_connected_and_notifies_subscriber() {
        let mut registry = Registry::new();
        let mut app_rx = subscribe(&mut registry, "A", &["b1", "b2"]);
        let (conn, _rx) = connection();
        init_boiler(&mut registry, init("b1", 25.0, false), &conn).unwrap();
        init_boiler(&mut registry, init("b2", 25.0, false), &conn).unwrap();

        let notified = update_boiler(&mut registry, report("b1", 30.0, true), &conn).unwrap();
        assert_eq!(notified.as_deref(), Some("A"));
        assert!(registry.boiler("b1").unwrap().connected);

        let received = drain(&mut app_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].boiler_id, "b1");
        assert_eq!(received[0].temperature, 30.0);
        assert!(received[0].is_on);
        assert_eq!(received[0].is_connected, None);
    }

    #[test]
    fn test_broadcast_reaches_only_first_subscriber() {
        let mut registry = Registry::new();
        let mut first = subscribe(&mut registry, "a1", &["b1"]);
        let mut second = subscribe(&mut registry, "a2", &["b1"]);
        let (conn, _rx) = connection();
        init_boiler(&mut registry, init("b1", 30.0, true), &conn).unwrap();

        update_boiler(&mut registry, report("b1", 31.0, true), &conn).unwrap();

        assert_eq!(drain(&mut first).len(), 1);
        assert!(drain(&mut second).is_empty());
    }

    #[test]
    fn test_update_without_subscribers() {
        let mut registry = Registry::new();
        let (conn, _rx) = connection();
        init_boiler(&mut registry, init("b1", 30.0, true), &conn).unwrap();
        let notified = update_boiler(&mut registry, report("b1", 32.0, true), &conn).unwrap();
        assert_eq!(notified, None);
        assert_eq!(registry.boiler("b1").unwrap().temperature, 32.0);
    }

    #[test]
    fn test_turn_on_and_off_echo_to_boiler() {
        let (mut registry, mut boiler_rx) = connected_boiler(30.0);
        let mut app_rx = subscribe(&mut registry, "a1", &["b1"]);

        apply_command(&mut registry, command("b1", Action::TurnOff, None)).unwrap();
        assert!(!registry.boiler("b1").unwrap().is_on);
        let echo = drain(&mut boiler_rx);
        assert_eq!(echo.len(), 1);
        assert!(!echo[0].is_on);
        assert_eq!(echo[0].temperature, 30.0);

        apply_command(&mut registry, command("b1", Action::TurnOn, None)).unwrap();
        assert!(registry.boiler("b1").unwrap().is_on);
        assert!(drain(&mut boiler_rx)[0].is_on);

        assert!(drain(&mut app_rx).is_empty(), "Commands are not broadcast to apps");
    }

    #[test]
    fn test_set_temperature_in_range() {
        let (mut registry, mut boiler_rx) = connected_boiler(28.0);

        apply_command(&mut registry, command("b1", Action::SetTemperature, Some(40.0))).unwrap();
        assert_eq!(registry.boiler("b1").unwrap().temperature, 40.0);
        assert_eq!(drain(&mut boiler_rx)[0].temperature, 40.0);
    }

    #[test]
    fn test_set_temperature_boundaries_accepted() {
        for boundary in [MIN_TEMPERATURE, MAX_TEMPERATURE] {
            let (mut registry, mut boiler_rx) = connected_boiler(30.0);
            apply_command(&mut registry, command("b1", Action::SetTemperature, Some(boundary)))
                .unwrap();
            assert_eq!(registry.boiler("b1").unwrap().temperature, boundary);
            assert_eq!(drain(&mut boiler_rx).len(), 1);
        }
    }

    #[test]
    fn test_set_temperature_out_of_range_never_mutates() {
        let rejected = [
            f64::MIN,
            -1000.0,
            0.0,
            24.0,
            24.999,
            45.001,
            46.0,
            50.0,
            1000.0,
            f64::MAX,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for temperature in rejected {
            let (mut registry, mut boiler_rx) = connected_boiler(28.0);
            let err =
                apply_command(&mut registry, command("b1", Action::SetTemperature, Some(temperature)))
                    .unwrap_err();
            assert!(matches!(err, RelayError::TemperatureOutOfRange { .. }));
            assert_eq!(registry.boiler("b1").unwrap().temperature, 28.0);
            assert!(drain(&mut boiler_rx).is_empty(), "No echo for {temperature}");
        }
    }

    #[test]
    fn test_set_temperature_sweep() {
        let mut t = 0.0;
        while t <= 70.0 {
            let (mut registry, _rx) = connected_boiler(30.0);
            let result = apply_command(&mut registry, command("b1", Action::SetTemperature, Some(t)));
            let stored = registry.boiler("b1").unwrap().temperature;
            if (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t) {
                assert!(result.is_ok());
                assert_eq!(stored, t);
            } else {
                assert!(result.is_err());
                assert_eq!(stored, 30.0);
            }
            t += 0.5;
        }
    }

    #[test]
    fn test_set_temperature_missing_value() {
        let (mut registry, mut boiler_rx) = connected_boiler(28.0);
        let err = apply_command(&mut registry, command("b1", Action::SetTemperature, None)).unwrap_err();
        assert_eq!(err, RelayError::MissingTemperature("b1".into()));
        assert_eq!(registry.boiler("b1").unwrap().temperature, 28.0);
        assert!(drain(&mut boiler_rx).is_empty());
    }

    #[test]
    fn test_command_on_disconnected_boiler_rejected() {
        let mut registry = Registry::new();
        let (conn, mut boiler_rx) = connection();
        init_boiler(&mut registry, init("b1", 30.0, true), &conn).unwrap();

        let err = apply_command(&mut registry, command("b1", Action::TurnOff, None)).unwrap_err();
        assert_eq!(err, RelayError::BoilerNotConnected("b1".into()));
        assert!(registry.boiler("b1").unwrap().is_on);
        assert!(drain(&mut boiler_rx).is_empty());
    }

    #[test]
    fn test_command_on_unknown_boiler() {
        let mut registry = Registry::new();
        let err = apply_command(&mut registry, command("ghost", Action::TurnOn, None)).unwrap_err();
        assert_eq!(err, RelayError::UnknownBoiler("ghost".into()));
    }

    #[test]
    fn test_command_from_unregistered_app_is_applied() {
        let (mut registry, mut boiler_rx) = connected_boiler(30.0);
        assert_eq!(registry.app_count(), 0);
        apply_command(&mut registry, command("b1", Action::TurnOff, None)).unwrap();
        assert_eq!(drain(&mut boiler_rx).len(), 1);
    }
}
