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

//! Subscription matching and notification encoding.
//!
//! A storage backend raises `Notification`s; client sessions register
//! `Subscription`s. Each processing pass drains the notification queue,
//! finds the subscriptions each notification matches, and encodes one
//! protocol reply per match into the outgoing batch.

pub mod dispatch;
pub mod matcher;
pub mod model;
pub mod registry;
pub mod reply;

pub use dispatch::{process_notifications, ReplyBatch};
pub use matcher::matches;
pub use model::{
    EventKind, EventMask, Notification, NotificationParams, ObjectParams,
    ObjectType, Subscription, SubscriptionScope, TableParams, TableType,
};
pub use registry::{NotificationQueue, SubscriptionRegistry};
pub use reply::{
    ContentsRowKey, NotificationTable, PropValue, Reply, ReplyData,
    SessionView, TableEvent,
};
