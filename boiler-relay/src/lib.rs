//! # boiler-relay — WebSocket relay between boilers and controlling apps
//!
//! Boilers report their state; apps subscribe to boilers and send commands.
//! The relay keeps the last known state of every boiler, forwards updates to
//! a subscribed app and echoes accepted commands back to the boiler.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐     RelayEvent     ┌─────────────┐
//! │ Boiler      │ ◄────────────────► │ socket task  │ ─────────────────► │ Relay       │
//! │ (device)    │     JSON frames    │ (per socket) │                    │ (one task)  │
//! └─────────────┘                    └──────▲───────┘                    └──────┬──────┘
//! ┌─────────────┐                           │ outbound queue                    │
//! │ App         │ ◄─────────────────────────┘                            ┌──────┴──────┐
//! │ (client)    │                                                        │ Registry    │
//! └─────────────┘                                                        │ boilers/apps│
//!                                                                        └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages and validation
//! - [`connection`] — Per-socket handle: outbound queue and terminate signal
//! - [`registry`] — Boiler and app connection tables
//! - [`sync`] — Boiler init/update, commands and broadcast
//! - [`reconcile`] — Registry cleanup when a socket goes away
//! - [`router`] — Frame parsing and dispatch
//! - [`relay`] — Single task that owns the registry
//! - [`server`] — WebSocket listener, configuration and stats

pub mod protocol;
pub mod connection;
pub mod registry;
pub mod sync;
pub mod reconcile;
pub mod router;
pub mod relay;
pub mod server;

// Re-exports for convenience
pub use protocol::{
    Action, AppInit, BoilerInit, BoilerReport, BoilerUpdate, Command, InboundMessage,
    OutboundMessage, ProtocolError, MAX_TEMPERATURE, MIN_TEMPERATURE,
};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionReceiver};
pub use registry::{
    AppConnection, AppSnapshot, BoilerConnection, BoilerSnapshot, Registry, RegistrySnapshot,
};
pub use sync::{Registration, RelayError};
pub use reconcile::{on_disconnect, Disconnection};
pub use router::{handle_frame, RouteOutcome};
pub use relay::{Relay, RelayClosed, RelayEvent, RelayHandle, RelayStats};
pub use server::{ConfigError, RelayServer, ServerConfig, ServerError, ServerStats};
