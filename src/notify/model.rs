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

//! The subscription/notification data model.

use bitflags::bitflags;

bitflags! {
    /// Event category bits, as carried in the protocol's notification-type
    /// field and in each subscription's requested-event mask.
    pub struct EventMask: u16 {
        const CRITICAL_ERROR = 0x0001;
        const NEW_MAIL = 0x0002;
        const OBJECT_CREATED = 0x0004;
        const OBJECT_DELETED = 0x0008;
        const OBJECT_MODIFIED = 0x0010;
        const OBJECT_MOVED = 0x0020;
        const OBJECT_COPIED = 0x0040;
        const SEARCH_COMPLETE = 0x0080;
        const TABLE_MODIFIED = 0x0100;
        const EXTENDED = 0x0400;
        /// Total/unread-count qualifier on folder events.
        const T = 0x1000;
        const U = 0x2000;
        /// Search-folder qualifier.
        const S = 0x4000;
        /// Message qualifier.
        const M = 0x8000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectType {
    Folder,
    Message,
    Table,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    NewMail,
    Created,
    Modified,
    Deleted,
    Moved,
    Copied,
}

impl EventKind {
    /// The mask bit a subscription must request to receive this event.
    pub fn mask(self) -> EventMask {
        match self {
            EventKind::NewMail => EventMask::NEW_MAIL,
            EventKind::Created => EventMask::OBJECT_CREATED,
            EventKind::Modified => EventMask::OBJECT_MODIFIED,
            EventKind::Deleted => EventMask::OBJECT_DELETED,
            EventKind::Moved => EventMask::OBJECT_MOVED,
            EventKind::Copied => EventMask::OBJECT_COPIED,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableType {
    Folder,
    Contents,
    Search,
}

/// Parameters of a folder/message event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectParams {
    pub folder_id: u64,
    pub object_id: u64,
    /// Source ids for move/copy events.
    pub old_folder_id: u64,
    pub old_object_id: u64,
    /// Property tags touched by a create/modify, if the backend knows them.
    pub tags: Option<Vec<u32>>,
    /// Total message count of the containing folder; required for folder
    /// events.
    pub message_count: Option<u32>,
}

/// Parameters of a live-table event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableParams {
    /// Session handle of the table the event originated from.
    pub handle: u32,
    pub table_type: TableType,
    pub folder_id: u64,
    pub object_id: u64,
    pub row_id: u32,
    pub instance_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationParams {
    Object(ObjectParams),
    Table(TableParams),
}

/// An ephemeral store-side change event, consumed once by the matching pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub object_type: ObjectType,
    pub event: EventKind,
    pub params: NotificationParams,
}

impl Notification {
    pub fn new_mail(folder_id: u64, object_id: u64) -> Self {
        Notification {
            object_type: ObjectType::Message,
            event: EventKind::NewMail,
            params: NotificationParams::Object(ObjectParams {
                folder_id,
                object_id,
                ..ObjectParams::default()
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionScope {
    Object {
        folder_id: u64,
        /// Zero is a wildcard matching any message in the folder.
        object_id: u64,
        /// Match any change anywhere in the principal's store.
        whole_store: bool,
    },
    Table {
        folder_id: u64,
        table_type: TableType,
    },
}

/// A registered client interest, attached to its owning session handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub handle: u32,
    pub events: EventMask,
    pub scope: SubscriptionScope,
}
