//! Connection registry: the relay's only mutable state.
//!
//! ```text
//!  boilers ── boiler_id ──► BoilerConnection { owner, temperature, is_on, connected, last_seen, transport }
//!  apps    ── app_id    ──► AppConnection    { transport, subscribed_boiler_ids }
//!  owners  ── ConnectionId ──► { boiler ids, app ids }   (reverse index)
//! ```
//!
//! Both primary maps keep insertion order; subscriber and disconnect
//! lookups resolve to the first match in that order. Transports are only
//! swapped through the registry so the reverse index always mirrors the
//! handles stored in the entries.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::protocol::OutboundMessage;

/// Last known state of a boiler plus its transport.
#[derive(Debug)]
pub struct BoilerConnection {
    /// App that registered the boiler
    pub owner_app_id: String,
    pub temperature: f64,
    pub is_on: bool,
    /// True while the boiler's transport is live
    pub connected: bool,
    /// Last boiler-originated message or disconnection
    pub last_seen: SystemTime,
    transport: ConnectionHandle,
}

impl BoilerConnection {
    /// A freshly registered boiler. It is not marked connected until it
    /// reports its first update.
    pub fn new(
        owner_app_id: impl Into<String>,
        temperature: f64,
        is_on: bool,
        transport: ConnectionHandle,
    ) -> Self {
        Self {
            owner_app_id: owner_app_id.into(),
            temperature,
            is_on,
            connected: false,
            last_seen: SystemTime::now(),
            transport,
        }
    }

    pub fn transport(&self) -> &ConnectionHandle {
        &self.transport
    }

    /// Current state as a `boiler_update` message.
    pub fn state_update(&self, boiler_id: &str) -> OutboundMessage {
        OutboundMessage::boiler_update(boiler_id, self.temperature, self.is_on)
    }
}

/// A connected app and the boilers it follows.
#[derive(Debug)]
pub struct AppConnection {
    pub subscribed_boiler_ids: HashSet<String>,
    transport: ConnectionHandle,
}

impl AppConnection {
    pub fn new(transport: ConnectionHandle, boiler_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            subscribed_boiler_ids: boiler_ids.into_iter().collect(),
            transport,
        }
    }

    pub fn transport(&self) -> &ConnectionHandle {
        &self.transport
    }

    pub fn is_subscribed(&self, boiler_id: &str) -> bool {
        self.subscribed_boiler_ids.contains(boiler_id)
    }
}

/// Ids whose entries currently hold a given transport.
#[derive(Debug, Default)]
struct Owners {
    boilers: HashSet<String>,
    apps: HashSet<String>,
}

impl Owners {
    fn is_empty(&self) -> bool {
        self.boilers.is_empty() && self.apps.is_empty()
    }
}

/// Boiler and app registries with a transport reverse index.
#[derive(Debug, Default)]
pub struct Registry {
    boilers: IndexMap<String, BoilerConnection>,
    apps: IndexMap<String, AppConnection>,
    owners: HashMap<ConnectionId, Owners>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boiler(&self, boiler_id: &str) -> Option<&BoilerConnection> {
        self.boilers.get(boiler_id)
    }

    /// Mutable access to a boiler's state. The transport is swapped with
    /// [`Registry::replace_boiler_transport`].
    pub fn boiler_mut(&mut self, boiler_id: &str) -> Option<&mut BoilerConnection> {
        self.boilers.get_mut(boiler_id)
    }

    pub fn app(&self, app_id: &str) -> Option<&AppConnection> {
        self.apps.get(app_id)
    }

    pub fn boiler_count(&self) -> usize {
        self.boilers.len()
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    /// Boilers in registration order.
    pub fn boilers(&self) -> impl Iterator<Item = (&str, &BoilerConnection)> {
        self.boilers.iter().map(|(id, b)| (id.as_str(), b))
    }

    /// Apps in registration order.
    pub fn apps(&self) -> impl Iterator<Item = (&str, &AppConnection)> {
        self.apps.iter().map(|(id, a)| (id.as_str(), a))
    }

    /// Add a boiler that is not yet registered.
    ///
    /// Returns `false` without touching the registry if the id is taken.
    pub fn insert_boiler(&mut self, boiler_id: impl Into<String>, boiler: BoilerConnection) -> bool {
        let boiler_id = boiler_id.into();
        if self.boilers.contains_key(&boiler_id) {
            return false;
        }
        self.index_boiler(boiler.transport.id(), &boiler_id);
        self.boilers.insert(boiler_id, boiler);
        true
    }

    /// Hand a boiler's entry a new transport. The old handle is dropped.
    pub fn replace_boiler_transport(&mut self, boiler_id: &str, transport: ConnectionHandle) -> bool {
        let Some(boiler) = self.boilers.get_mut(boiler_id) else {
            return false;
        };
        let previous = std::mem::replace(&mut boiler.transport, transport).id();
        let current = boiler.transport.id();
        if previous != current {
            self.unindex_boiler(previous, boiler_id);
            self.index_boiler(current, boiler_id);
        }
        true
    }

    /// Register an app, replacing any entry with the same id.
    ///
    /// A replaced app keeps its place in iteration order.
    pub fn insert_app(&mut self, app_id: impl Into<String>, app: AppConnection) -> Option<AppConnection> {
        let app_id = app_id.into();
        let current = app.transport.id();
        let previous = self.apps.insert(app_id.clone(), app);
        if let Some(prev) = &previous {
            self.unindex_app(prev.transport.id(), &app_id);
        }
        self.index_app(current, &app_id);
        previous
    }

    /// Remove an app entirely.
    pub fn remove_app(&mut self, app_id: &str) -> Option<AppConnection> {
        let app = self.apps.shift_remove(app_id)?;
        self.unindex_app(app.transport.id(), app_id);
        Some(app)
    }

    /// First boiler, in registration order, whose transport is `connection`.
    pub fn boiler_on(&self, connection: ConnectionId) -> Option<&str> {
        let owners = self.owners.get(&connection)?;
        owners
            .boilers
            .iter()
            .filter_map(|id| self.boilers.get_full(id.as_str()))
            .min_by_key(|(index, _, _)| *index)
            .map(|(_, id, _)| id.as_str())
    }

    /// First app, in registration order, whose transport is `connection`.
    pub fn app_on(&self, connection: ConnectionId) -> Option<&str> {
        let owners = self.owners.get(&connection)?;
        owners
            .apps
            .iter()
            .filter_map(|id| self.apps.get_full(id.as_str()))
            .min_by_key(|(index, _, _)| *index)
            .map(|(_, id, _)| id.as_str())
    }

    /// First app, in registration order, subscribed to `boiler_id`.
    pub fn first_subscriber(&self, boiler_id: &str) -> Option<(&str, &AppConnection)> {
        self.apps
            .iter()
            .find(|(_, app)| app.is_subscribed(boiler_id))
            .map(|(id, app)| (id.as_str(), app))
    }

    /// Read-only copy of the registry in registration order.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let boilers = self
            .boilers
            .iter()
            .map(|(id, b)| BoilerSnapshot {
                boiler_id: id.clone(),
                owner_app_id: b.owner_app_id.clone(),
                temperature: b.temperature,
                is_on: b.is_on,
                connected: b.connected,
                last_seen: b.last_seen,
                connection: b.transport.id(),
            })
            .collect();
        let apps = self
            .apps
            .iter()
            .map(|(id, a)| {
                let mut subscribed: Vec<String> = a.subscribed_boiler_ids.iter().cloned().collect();
                subscribed.sort();
                AppSnapshot {
                    app_id: id.clone(),
                    subscribed_boiler_ids: subscribed,
                    connection: a.transport.id(),
                }
            })
            .collect();
        RegistrySnapshot { boilers, apps }
    }

    fn index_boiler(&mut self, connection: ConnectionId, boiler_id: &str) {
        self.owners
            .entry(connection)
            .or_default()
            .boilers
            .insert(boiler_id.to_owned());
    }

    fn unindex_boiler(&mut self, connection: ConnectionId, boiler_id: &str) {
        if let Some(owners) = self.owners.get_mut(&connection) {
            owners.boilers.remove(boiler_id);
            if owners.is_empty() {
                self.owners.remove(&connection);
            }
        }
    }

    fn index_app(&mut self, connection: ConnectionId, app_id: &str) {
        self.owners
            .entry(connection)
            .or_default()
            .apps
            .insert(app_id.to_owned());
    }

    fn unindex_app(&mut self, connection: ConnectionId, app_id: &str) {
        if let Some(owners) = self.owners.get_mut(&connection) {
            owners.apps.remove(app_id);
            if owners.is_empty() {
                self.owners.remove(&connection);
            }
        }
    }
}

/// Point-in-time copy of one boiler entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoilerSnapshot {
    pub boiler_id: String,
    pub owner_app_id: String,
    pub temperature: f64,
    pub is_on: bool,
    pub connected: bool,
    pub last_seen: SystemTime,
    pub connection: ConnectionId,
}

/// Point-in-time copy of one app entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSnapshot {
    pub app_id: String,
    /// Sorted for stable comparison
    pub subscribed_boiler_ids: Vec<String>,
    pub connection: ConnectionId,
}

/// Point-in-time copy of the whole registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub boilers: Vec<BoilerSnapshot>,
    pub apps: Vec<AppSnapshot>,
}

impl RegistrySnapshot {
    pub fn boiler(&self, boiler_id: &str) -> Option<&BoilerSnapshot> {
        self.boilers.iter().find(|b| b.boiler_id == boiler_id)
    }

    pub fn app(&self, app_id: &str) -> Option<&AppSnapshot> {
        self.apps.iter().find(|a| a.app_id == app_id)
    }
}
