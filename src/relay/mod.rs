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

//! Cross-process notification relay.
//!
//! Mail delivery agents publish `{user, folder, uid}` events to the broker;
//! the relay daemon consumes them, registers the delivered message in the
//! owner's identifier index, and republishes a `{user, mid, fid, uri}`
//! event on the user's dedicated fanout exchange for server processes to
//! pick up.

pub mod env;
pub mod inbound;
pub mod register;

pub use env::{default_backends, IndexMetadata, TemplateDirectory};
pub use inbound::{decode_delivery, decode_relayed, NewMailDelivery};
pub use register::{
    publish_registered, Backend, BackendRegistry, Directory,
    MetadataRegistry, MetadataStore, Registered, Registrar,
};
