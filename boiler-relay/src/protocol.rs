//! JSON wire protocol between boilers, apps and the relay.
//!
//! Every frame is a UTF-8 JSON object discriminated by its `type` field:
//! ```text
//! boiler ──► {"type":"boiler_init",   "boilerId", "appId", "temperature", "isOn"}
//! boiler ──► {"type":"boiler_update", "boilerId", "temperature", "isOn"}
//! app    ──► {"type":"app_init",      "appId", "boilerIds": [..]}
//! app    ──► {"type":"command",       "appId", "boilerId", "action", "temperature"?}
//!
//! relay  ──► {"type":"boiler_update", "boilerId", "temperature", "isOn", "isConnected"?}
//! ```
//!
//! Inbound frames are parsed and validated once, here. Everything past this
//! module works on typed [`InboundMessage`] values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Lowest temperature an app may request.
pub const MIN_TEMPERATURE: f64 = 25.0;
/// Highest temperature an app may request.
pub const MAX_TEMPERATURE: f64 = 45.0;

const BOILER_INIT: &str = "boiler_init";
const BOILER_UPDATE: &str = "boiler_update";
const APP_INIT: &str = "app_init";
const COMMAND: &str = "command";

/// Whether `temperature` lies in `[MIN_TEMPERATURE, MAX_TEMPERATURE]`.
pub fn temperature_in_range(temperature: f64) -> bool {
    (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature)
}

/// A boiler announcing itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "BoilerInitFrame")]
pub struct BoilerInit {
    pub boiler_id: String,
    /// The app that registered this boiler, sent as `appId` or `ownerAppId`.
    pub owner_app_id: String,
    pub temperature: f64,
    pub is_on: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoilerInitFrame {
    boiler_id: String,
    app_id: Option<String>,
    owner_app_id: Option<String>,
    temperature: f64,
    is_on: bool,
}

impl TryFrom<BoilerInitFrame> for BoilerInit {
    type Error = String;

    // `appId` wins when both keys are present.
    fn try_from(frame: BoilerInitFrame) -> Result<Self, Self::Error> {
        let owner_app_id = frame
            .app_id
            .or(frame.owner_app_id)
            .ok_or_else(|| "missing field `appId`".to_string())?;
        Ok(Self {
            boiler_id: frame.boiler_id,
            owner_app_id,
            temperature: frame.temperature,
            is_on: frame.is_on,
        })
    }
}

/// A boiler reporting its current state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoilerReport {
    pub boiler_id: String,
    pub temperature: f64,
    pub is_on: bool,
}

/// An app announcing itself and the boilers it follows.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInit {
    pub app_id: String,
    pub boiler_ids: Vec<String>,
}

/// Command actions an app can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    TurnOn,
    TurnOff,
    SetTemperature,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::SetTemperature => "set_temperature",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An app asking the relay to act on a boiler.
///
/// `temperature` is only meaningful for [`Action::SetTemperature`]; whether
/// it is present is checked when the command is applied.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub app_id: String,
    pub boiler_id: String,
    pub action: Action,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// A validated inbound message, one variant per `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    BoilerInit(BoilerInit),
    BoilerUpdate(BoilerReport),
    AppInit(AppInit),
    Command(Command),
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// Returns `Ok(None)` when the frame has no `type` or an unknown one;
    /// such frames are ignored rather than rejected.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ProtocolError::Malformed("frame is not a JSON object".to_string()));
        }

        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_owned(),
            None => return Ok(None),
        };

        let message = match kind.as_str() {
            BOILER_INIT => Self::BoilerInit(decode(BOILER_INIT, value)?),
            BOILER_UPDATE => Self::BoilerUpdate(decode(BOILER_UPDATE, value)?),
            APP_INIT => Self::AppInit(decode(APP_INIT, value)?),
            COMMAND => Self::Command(decode(COMMAND, value)?),
            _ => return Ok(None),
        };
        message.validate()?;
        Ok(Some(message))
    }

    /// Wire name of this message's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BoilerInit(_) => BOILER_INIT,
            Self::BoilerUpdate(_) => BOILER_UPDATE,
            Self::AppInit(_) => APP_INIT,
            Self::Command(_) => COMMAND,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let kind = self.kind();
        let non_empty = |field: &str, value: &str| {
            if value.is_empty() {
                Err(ProtocolError::Invalid {
                    kind,
                    reason: format!("`{field}` must not be empty"),
                })
            } else {
                Ok(())
            }
        };

        match self {
            Self::BoilerInit(m) => {
                non_empty("boilerId", &m.boiler_id)?;
                non_empty("appId", &m.owner_app_id)
            }
            Self::BoilerUpdate(m) => non_empty("boilerId", &m.boiler_id),
            Self::AppInit(m) => {
                non_empty("appId", &m.app_id)?;
                if m.boiler_ids.is_empty() {
                    return Err(ProtocolError::Invalid {
                        kind,
                        reason: "`boilerIds` must not be empty".to_string(),
                    });
                }
                Ok(())
            }
            Self::Command(m) => {
                non_empty("appId", &m.app_id)?;
                non_empty("boilerId", &m.boiler_id)
            }
        }
    }
}

fn decode<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::Invalid {
        kind,
        reason: e.to_string(),
    })
}

/// Canonical boiler state as sent to apps and echoed to boilers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoilerUpdate {
    pub boiler_id: String,
    #[serde(serialize_with = "serialize_temperature")]
    pub temperature: f64,
    pub is_on: bool,
    /// Only set (to `false`) when the boiler's transport was lost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
}

/// Whole temperatures go out as JSON integers (`30`, not `30.0`).
fn serialize_temperature<S: Serializer>(temperature: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if temperature.fract() == 0.0 && temperature.abs() < 1e15 {
        serializer.serialize_i64(*temperature as i64)
    } else {
        serializer.serialize_f64(*temperature)
    }
}

/// Messages the relay sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    BoilerUpdate(BoilerUpdate),
}

impl OutboundMessage {
    /// State update for a live boiler.
    pub fn boiler_update(boiler_id: impl Into<String>, temperature: f64, is_on: bool) -> Self {
        Self::BoilerUpdate(BoilerUpdate {
            boiler_id: boiler_id.into(),
            temperature,
            is_on,
            is_connected: None,
        })
    }

    /// Last known state of a boiler whose transport just dropped.
    pub fn boiler_disconnected(
        boiler_id: impl Into<String>,
        temperature: f64,
        is_on: bool,
    ) -> Self {
        Self::BoilerUpdate(BoilerUpdate {
            boiler_id: boiler_id.into(),
            temperature,
            is_on,
            is_connected: Some(false),
        })
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Invalid {kind} message: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}
