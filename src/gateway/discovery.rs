// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Home Assistant MQTT discovery documents.

use serde_json::{Value, json};

use crate::config::DeviceKinds;
use crate::types::{DeviceKind, GroupAddress};

use super::topics::{BRIDGE_TOPIC, Component};

const BRIDGE_ID: &str = "cbus_bridge";
const MANUFACTURER: &str = "Clipsal";
const MODEL: &str = "cbus-bridge";
const SW_VERSION: &str = concat!("cbus-bridge ", env!("CARGO_PKG_VERSION"));

/// One retained discovery message.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    /// Config topic.
    pub topic: String,
    /// Config document.
    pub payload: Value,
}

/// Builds every discovery message for `kinds`: the bridge entity first,
/// then one per exposed address.
#[must_use]
pub fn discovery_messages(kinds: &DeviceKinds) -> Vec<DiscoveryMessage> {
    std::iter::once(bridge_config())
        .chain(
            kinds
                .exposed()
                .filter_map(|(address, kind)| entity_config(address, kind)),
        )
        .collect()
}

/// Discovery message for the bridge itself.
///
/// The entity is a connectivity sensor reporting whether the bus link is up.
#[must_use]
pub fn bridge_config() -> DiscoveryMessage {
    DiscoveryMessage {
        topic: format!("{BRIDGE_TOPIC}/config"),
        payload: json!({
            "~": BRIDGE_TOPIC,
            "name": "C-Bus bridge",
            "unique_id": BRIDGE_ID,
            "stat_t": "~/state",
            "device_class": "connectivity",
            "device": {
                "identifiers": [BRIDGE_ID],
                "sw_version": SW_VERSION,
                "name": "C-Bus bridge",
                "manufacturer": MANUFACTURER,
                "model": MODEL,
            },
        }),
    }
}

/// Discovery message for one address, or `None` if it is ignored.
#[must_use]
pub fn entity_config(address: GroupAddress, kind: DeviceKind) -> Option<DiscoveryMessage> {
    let component = Component::for_kind(kind)?;
    let unique_id = format!("cbus_{}_{address}", component.as_str());
    let name = format!("C-Bus {} {:03}", kind.title(), address.value());

    let mut payload = json!({
        "name": name,
        "unique_id": unique_id,
        "stat_t": component.state_topic(address),
        "device": {
            "identifiers": [unique_id],
            "connections": [["cbus_group_address", address.to_string()]],
            "sw_version": SW_VERSION,
            "name": name,
            "manufacturer": MANUFACTURER,
            "model": MODEL,
            "via_device": BRIDGE_ID,
        },
    });

    if let Some(config) = payload.as_object_mut() {
        match kind {
            DeviceKind::Light | DeviceKind::LightNonDimmable => {
                let dimmable = kind.is_dimmable();
                config.insert("cmd_t".into(), component.set_topic(address).into());
                config.insert("schema".into(), "json".into());
                config.insert("brightness".into(), dimmable.into());
                config.insert(
                    "supported_color_modes".into(),
                    json!([if dimmable { "brightness" } else { "onoff" }]),
                );
            }
            DeviceKind::Switch => {
                config.insert("cmd_t".into(), component.set_topic(address).into());
            }
            DeviceKind::BinarySensor | DeviceKind::Ignore => {}
        }
    }

    Some(DiscoveryMessage {
        topic: component.config_topic(address),
        payload,
    })
}
