//! Disconnection reconciliation.
//!
//! When a socket goes away, the registry entry holding it is reconciled:
//! - a boiler keeps its entry and last state, is marked disconnected, and
//!   its first subscriber is told so;
//! - otherwise an app holding the socket is evicted.
//!
//! Boilers are always checked first. A socket that owns a boiler never also
//! evicts an app.

use std::time::SystemTime;

use crate::connection::ConnectionId;
use crate::protocol::OutboundMessage;
use crate::registry::Registry;
use crate::sync::broadcast;

/// What a disconnect did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnection {
    /// A boiler was marked disconnected; `notified` is the app told about it
    Boiler {
        boiler_id: String,
        notified: Option<String>,
    },
    /// An app was removed
    App(String),
    /// The socket was not registered
    Unknown,
}

/// Reconcile the registry after `connection` closed or failed.
pub fn on_disconnect(registry: &mut Registry, connection: ConnectionId) -> Disconnection {
    if let Some(boiler_id) = registry.boiler_on(connection).map(str::to_owned) {
        if let Some(boiler) = registry.boiler_mut(&boiler_id) {
            boiler.connected = false;
            boiler.transport().terminate();
            boiler.last_seen = SystemTime::now();

            let notice =
                OutboundMessage::boiler_disconnected(&boiler_id, boiler.temperature, boiler.is_on);
            let notified = broadcast(registry, &boiler_id, &notice);

            log::info!("Boiler {boiler_id} disconnected (connection {connection})");
            return Disconnection::Boiler {
                boiler_id,
                notified,
            };
        }
    }

    if let Some(app_id) = registry.app_on(connection).map(str::to_owned) {
        if let Some(app) = registry.remove_app(&app_id) {
            app.transport().terminate();
            log::info!("App {app_id} disconnected (connection {connection})");
            return Disconnection::App(app_id);
        }
    }

    log::debug!("Connection {connection} closed with no registered boiler or app");
    Disconnection::Unknown
}
