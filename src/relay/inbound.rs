//-
// Copyright (c) 2026, The Relaymap Developers
//
// This file is part of Relaymap.
//
// Relaymap is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Relaymap is distributed in the hope that  it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Relaymap. If not, see <http://www.gnu.org/licenses/>.

//! Decoding of broker message bodies.
//!
//! Two JSON formats travel over the broker: the mail-delivery events the
//! relay daemon consumes, and the already-resolved relay events a server
//! process turns into local new-mail notifications. A body that fails to
//! parse or lacks a required key is dropped with a warning; malformed
//! input is never fatal.

use log::warn;
use serde::Deserialize;

use crate::notify::Notification;

/// An inbound mail-delivery event from the MDA side.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct NewMailDelivery {
    pub user: String,
    pub folder: String,
    pub uid: u32,
}

/// The resolved relay format published to per-user exchanges.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct RelayedNewMail {
    fid: u64,
    mid: u64,
}

/// Decode one mail-delivery body, or drop it.
pub fn decode_delivery(body: &[u8]) -> Option<NewMailDelivery> {
    match serde_json::from_slice(body) {
        Ok(delivery) => Some(delivery),
        Err(e) => {
            warn!("Dropping malformed delivery event: {}", e);
            None
        },
    }
}

/// Decode one relayed event into the local new-mail notification it
/// represents, or drop it.
pub fn decode_relayed(body: &[u8]) -> Option<Notification> {
    match serde_json::from_slice::<RelayedNewMail>(body) {
        Ok(relayed) => Some(Notification::new_mail(relayed.fid, relayed.mid)),
        Err(e) => {
            warn!("Dropping malformed relayed event: {}", e);
            None
        },
    }
}
