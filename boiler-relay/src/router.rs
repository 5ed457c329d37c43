//! Message routing.
//!
//! A text frame is parsed into an [`InboundMessage`] and dispatched on its
//! kind. Frames that fail validation are logged and dropped before anything
//! touches the registry; frames of an unknown kind are ignored.

use crate::connection::ConnectionHandle;
use crate::protocol::{AppInit, InboundMessage};
use crate::registry::{AppConnection, Registry};
use crate::sync::{apply_command, init_boiler, update_boiler};

/// How a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The message was applied to the registry
    Applied,
    /// Unknown or missing `type`; nothing happened
    Ignored,
    /// Invalid frame or refused operation; nothing changed
    Rejected,
}

/// Parse `text` and route it.
pub fn handle_frame(
    registry: &mut Registry,
    text: &str,
    connection: &ConnectionHandle,
) -> RouteOutcome {
    match InboundMessage::parse(text) {
        Ok(Some(message)) => route(registry, message, connection),
        Ok(None) => {
            log::debug!("Ignoring frame of unknown type from {}", connection.id());
            RouteOutcome::Ignored
        }
        Err(e) => {
            log::warn!("Dropping frame from {}: {e}", connection.id());
            RouteOutcome::Rejected
        }
    }
}

/// Dispatch a validated message to its handler.
pub fn route(
    registry: &mut Registry,
    message: InboundMessage,
    connection: &ConnectionHandle,
) -> RouteOutcome {
    let kind = message.kind();
    let result = match message {
        InboundMessage::BoilerInit(init) => init_boiler(registry, init, connection).map(|_| ()),
        InboundMessage::BoilerUpdate(report) => {
            update_boiler(registry, report, connection).map(|_| ())
        }
        InboundMessage::AppInit(init) => {
            register_app(registry, init, connection);
            Ok(())
        }
        InboundMessage::Command(command) => apply_command(registry, command),
    };

    match result {
        Ok(()) => RouteOutcome::Applied,
        Err(e) => {
            log::warn!("Rejected {kind} from {}: {e}", connection.id());
            RouteOutcome::Rejected
        }
    }
}

fn register_app(registry: &mut Registry, init: AppInit, connection: &ConnectionHandle) {
    let AppInit { app_id, boiler_ids } = init;
    log::info!(
        "App {app_id} registered for boilers [{}]",
        boiler_ids.join(", ")
    );
    if registry
        .insert_app(app_id.clone(), AppConnection::new(connection.clone(), boiler_ids))
        .is_some()
    {
        log::debug!("App {app_id} replaced its previous registration");
    }
}
