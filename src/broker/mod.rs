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

//! The message-broker transport.
//!
//! `wire` implements the subset of the AMQP 0-9-1 framing and method set
//! that the notification pipeline uses; `transport` drives it through the
//! connect/declare/consume/publish lifecycle with full-teardown error
//! recovery.

pub mod transport;
pub mod wire;

pub use transport::{BrokerTransport, Consumed, Delivery, State};
