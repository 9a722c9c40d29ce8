// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire framing between the command queue and the bus interface.
//!
//! The command queue never looks at bytes. It asks a [`FrameCodec`] to
//! encode each attempt and to decode whatever the link delivers, and it
//! matches confirmations through the [`MatchKey`] the codec derived for the
//! attempt.
//!
//! # Codecs
//!
//! - [`PciCodec`]: C-Bus PC Interface / CNI serial protocol

mod pci;

pub use pci::PciCodec;

use std::time::Duration;

use crate::command::{ActionClass, LogicalCommand};
use crate::error::ParseError;
use crate::types::{GroupAddress, Level};

/// Key a confirmation must carry to resolve one send attempt.
///
/// Derived from the command's address and action class plus a per-attempt
/// token, so two attempts of the same command never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey {
    address: GroupAddress,
    class: ActionClass,
    token: u8,
}

impl MatchKey {
    /// Creates a match key.
    #[must_use]
    pub const fn new(address: GroupAddress, class: ActionClass, token: u8) -> Self {
        Self {
            address,
            class,
            token,
        }
    }

    /// Returns the address the attempt was sent to.
    #[must_use]
    pub const fn address(&self) -> GroupAddress {
        self.address
    }

    /// Returns the action class of the attempt.
    #[must_use]
    pub const fn class(&self) -> ActionClass {
        self.class
    }

    /// Returns the per-attempt token.
    #[must_use]
    pub const fn token(&self) -> u8 {
        self.token
    }

    /// Returns `true` if `confirmation` resolves the attempt holding this key.
    ///
    /// The token must agree. Address and class must agree when the wire
    /// protocol reports them.
    #[must_use]
    pub fn matches(&self, confirmation: &Confirmation) -> bool {
        confirmation.token == self.token
            && confirmation.address.is_none_or(|a| a == self.address)
            && confirmation.class.is_none_or(|c| c == self.class)
    }
}

/// A confirmation frame sent back by the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Token echoed by the interface.
    pub token: u8,
    /// Address, if the protocol echoes it.
    pub address: Option<GroupAddress>,
    /// Action class, if the protocol echoes it.
    pub class: Option<ActionClass>,
    /// Whether the interface accepted the command.
    pub accepted: bool,
}

impl Confirmation {
    /// Creates a confirmation carrying only a token.
    #[must_use]
    pub const fn token_only(token: u8, accepted: bool) -> Self {
        Self {
            token,
            address: None,
            class: None,
            accepted,
        }
    }
}

/// Level reported by the bus for a group, not caused by a local command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// The group that changed.
    pub address: GroupAddress,
    /// The level it is going to.
    pub level: Level,
    /// How long it takes to get there.
    pub transition: Duration,
    /// Bus unit that caused the change, if known.
    pub source: Option<u8>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Confirmation of a previously sent command.
    Confirmation(Confirmation),
    /// One or more unsolicited status reports.
    Status(Vec<StatusReport>),
    /// A well-formed frame the bridge has no use for.
    Unrecognized,
}

/// Translates logical commands to wire frames and inbound bytes to events.
pub trait FrameCodec: Send + 'static {
    /// Encodes one send attempt of `command`.
    ///
    /// `nonce` increases by one for every attempt on the link.
    fn encode(&self, command: &LogicalCommand, nonce: u64) -> Vec<u8>;

    /// Returns the key a confirmation of this attempt will carry.
    fn match_key(&self, command: &LogicalCommand, nonce: u64) -> MatchKey;

    /// Splits the next complete frame off the front of `buffer`.
    ///
    /// Returns `None` when `buffer` holds no complete frame yet.
    fn next_frame(&self, buffer: &mut Vec<u8>) -> Option<Vec<u8>>;

    /// Decodes one frame produced by [`next_frame`](Self::next_frame).
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the frame is malformed.
    fn decode(&self, frame: &[u8]) -> Result<Decoded, ParseError>;

    /// Returns `true` if a ramp over `duration` has a native instruction.
    fn supports_native_ramp(&self, duration: Duration) -> bool;

    /// Frames to send every time the link (re)connects.
    fn handshake(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }
}
