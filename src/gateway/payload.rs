// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command and state payloads.
//!
//! Lights speak the Home Assistant JSON schema, switches and binary
//! sensors plain `ON` / `OFF`. Commands in either form are accepted on any
//! command topic.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::Action;
use crate::error::{Error, ParseError, ValueError};
use crate::state::DeviceState;
use crate::types::{DeviceKind, Level};

/// Longest transition accepted from a command. Longer ones are shortened.
pub const MAX_TRANSITION: Duration = Duration::from_secs(24 * 60 * 60);

/// JSON command as sent by Home Assistant.
#[derive(Debug, Clone, Deserialize)]
struct CommandPayload {
    state: String,
    #[serde(default)]
    brightness: Option<i64>,
    #[serde(default)]
    transition: Option<f64>,
}

impl CommandPayload {
    fn plain(state: &str) -> Self {
        Self {
            state: state.to_string(),
            brightness: None,
            transition: None,
        }
    }
}

/// JSON light state.
#[derive(Debug, Clone, Serialize)]
struct LightState {
    state: &'static str,
    brightness: u8,
    transition: u64,
    color_mode: &'static str,
    cbus_certainty: &'static str,
    cbus_source_addr: Option<u8>,
}

/// Parses a command payload into an action for a device of `kind`.
///
/// Brightness is clamped to 0-255. Negative transitions count as none and
/// transitions are capped at [`MAX_TRANSITION`].
/// Non-dimmable lights and switches only switch fully on or off, and never
/// ramp.
///
/// # Errors
///
/// Returns a [`ParseError`] if the payload is neither JSON nor plain
/// `ON`/`OFF`, and [`ValueError::InvalidSwitchState`] for an unknown
/// `state`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cbus_bridge::command::Action;
/// use cbus_bridge::gateway::parse_command;
/// use cbus_bridge::types::{DeviceKind, Level};
///
/// let action = parse_command(br#"{"state":"ON","brightness":128,"transition":4}"#, DeviceKind::Light)
///     .unwrap();
/// assert_eq!(
///     action,
///     Action::Ramp { level: Level::new(128), duration: Duration::from_secs(4) }
/// );
///
/// assert_eq!(parse_command(b"OFF", DeviceKind::Switch).unwrap(), Action::Off);
/// ```
pub fn parse_command(payload: &[u8], kind: DeviceKind) -> Result<Action, Error> {
    let command = match serde_json::from_slice::<CommandPayload>(payload) {
        Ok(command) => command,
        Err(json_error) => {
            let text = std::str::from_utf8(payload)
                .map_err(|_| ParseError::Json(json_error))?
                .trim()
                .trim_matches(|c| c == '"' || c == '\'');
            CommandPayload::plain(text)
        }
    };

    let on = match command.state.trim().to_ascii_uppercase().as_str() {
        "ON" => true,
        "OFF" => false,
        _ => return Err(ValueError::InvalidSwitchState(command.state).into()),
    };

    if !kind.is_dimmable() {
        return Ok(if on { Action::On } else { Action::Off });
    }

    let brightness = command.brightness.map_or(Level::FULL, Level::clamped);
    let transition = match command.transition {
        Some(secs) if secs > 0.0 => {
            Duration::try_from_secs_f64(secs.min(MAX_TRANSITION.as_secs_f64())).map_err(|e| {
                ParseError::InvalidValue {
                    field: "transition".to_string(),
                    message: e.to_string(),
                }
            })?
        }
        _ => Duration::ZERO,
    };

    let action = match (on, transition.is_zero()) {
        (true, true) if brightness == Level::FULL => Action::On,
        (true, _) => Action::Ramp {
            level: brightness,
            duration: transition,
        },
        (false, false) => Action::Ramp {
            level: Level::OFF,
            duration: transition,
        },
        (false, true) => Action::Off,
    };
    Ok(action)
}

/// Renders the state payload for a device of `kind`.
///
/// Lights get a JSON document, switches and binary sensors plain `ON` or
/// `OFF`. Ignored addresses have no state topic and yield `None`.
#[must_use]
pub fn state_payload(state: &DeviceState, kind: DeviceKind) -> Option<String> {
    let on_off = if state.is_on() { "ON" } else { "OFF" };

    match kind {
        DeviceKind::Ignore => None,
        DeviceKind::Switch | DeviceKind::BinarySensor => Some(on_off.to_string()),
        DeviceKind::Light | DeviceKind::LightNonDimmable => {
            let body = LightState {
                state: on_off,
                brightness: state.best_level().value(),
                transition: state.transition().as_secs(),
                color_mode: if kind.is_dimmable() {
                    "brightness"
                } else {
                    "onoff"
                },
                cbus_certainty: state.certainty().as_str(),
                cbus_source_addr: state.source(),
            };
            serde_json::to_string(&body).ok()
        }
    }
}
