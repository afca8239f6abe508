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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A record with the requested fmid already exists, active or
    /// soft-deleted.
    #[error("Identifier record already exists")]
    AlreadyExists,
    #[error("Record not found")]
    NotFound,
    #[error("Too many wildcards in pattern (1 maximum)")]
    TooManyWildcards,
    #[error("Directory lookup failed: {0}")]
    DirectoryLookup(String),
    #[error("No such storage backend: {0}")]
    NoSuchBackend(String),

    #[error("Broker is not connected")]
    BrokerNotConnected,
    #[error("All broker channels are in use")]
    ChannelsExhausted,
    /// The server closed the whole connection. The transport has already
    /// been torn down when this is returned.
    #[error("server connection error {code}, message: {message}")]
    ConnectionClosed { code: u16, message: String },
    /// The server closed one channel. The transport has already been torn
    /// down when this is returned.
    #[error("server channel error {code}, message: {message}")]
    ChannelClosed { code: u16, message: String },
    #[error("missing broker reply")]
    MissingBrokerReply,
    #[error("Broker protocol violation: {0}")]
    BrokerProtocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error invalidates the broker connection as a whole.
    ///
    /// Data errors leave the transport usable; anything transport- or
    /// protocol-level requires a full reconnect before the next operation.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::BrokerNotConnected
            | Error::ConnectionClosed { .. }
            | Error::ChannelClosed { .. }
            | Error::MissingBrokerReply
            | Error::BrokerProtocol(..)
            | Error::Io(..) => true,
            _ => false,
        }
    }
}
