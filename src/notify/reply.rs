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

//! Protocol encoding of one matched notification.
//!
//! The encoding is two-phase: `Reply::size` computes the exact byte length
//! of the serialised reply, and `Reply::encode` fills it. The size phase is
//! the authoritative contract for upstream buffer allocation, so the two
//! must never disagree; `size` is also what the dispatch pass accumulates
//! into the running response-size counter after each fill.
//!
//! Everything on the wire is little-endian. An event that cannot be
//! rendered (unknown handle, folder event without a message count) is
//! substituted with the critical-error reply rather than dropped, so the
//! downstream serialiser always has a defined value.

use log::warn;

use super::model::{
    EventKind, EventMask, Notification, NotificationParams, ObjectType,
    Subscription, TableType,
};

/// Rop id of the notify reply.
const ROP_NOTIFY: u8 = 0x2a;
/// Fixed reply header: rop id, notification handle, logon id, type.
const BASE_SIZE: u16 = 1 + 4 + 1 + 2;

const MSGFLAG_UNMODIFIED: u32 = 0x0000_0002;
const DEFAULT_MESSAGE_CLASS: &str = "IPM.Note";

/// Property tags used for previous-row projections.
pub const PR_FID: u32 = 0x6748_0014;
pub const PR_MID: u32 = 0x674a_0014;
pub const PR_INSTANCE_NUM: u32 = 0x674e_0003;

const TABLE_CHANGED: u16 = 0x0001;
const TABLE_ROW_ADDED: u16 = 0x0003;
const TABLE_ROW_DELETED: u16 = 0x0004;
const TABLE_ROW_MODIFIED: u16 = 0x0005;

/// A single projected column value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropValue {
    Id(u64),
    Long(u32),
}

impl PropValue {
    fn as_id(self) -> u64 {
        match self {
            PropValue::Id(v) => v,
            PropValue::Long(v) => v.into(),
        }
    }

    fn as_long(self) -> u32 {
        match self {
            PropValue::Id(v) => v as u32,
            PropValue::Long(v) => v,
        }
    }
}

/// Row access to a live query result set.
///
/// `row` takes the wanted columns as an explicit per-call projection so a
/// side lookup (the previous row's key fields) never disturbs the table's
/// own column set, which is shared with live query execution.
pub trait NotificationTable {
    /// Fetch `projection` of row `row_id`, or `None` if the row is gone.
    fn row(&self, row_id: u32, projection: &[u32]) -> Option<Vec<PropValue>>;

    /// Serialise row `row_id` under the table's own column set.
    fn row_blob(&self, row_id: u32) -> Option<Vec<u8>>;
}

/// The session-side view the encoder needs: resolution of a subscription
/// handle to the live table it watches.
pub trait SessionView {
    fn table(&self, handle: u32) -> Option<&dyn NotificationTable>;
}

/// Key fields identifying one contents-table row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentsRowKey {
    pub folder_id: u64,
    pub object_id: u64,
    pub instance: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableEvent {
    Changed,
    FolderRowAdded {
        folder_id: u64,
        insert_after: u64,
        columns: Vec<u8>,
    },
    FolderRowDeleted {
        folder_id: u64,
    },
    FolderRowModified {
        folder_id: u64,
        insert_after: u64,
        columns: Vec<u8>,
    },
    ContentsRowAdded {
        row: ContentsRowKey,
        insert_after: ContentsRowKey,
        columns: Vec<u8>,
    },
    ContentsRowDeleted {
        row: ContentsRowKey,
    },
    ContentsRowModified {
        row: ContentsRowKey,
        insert_after: ContentsRowKey,
        columns: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyData {
    CriticalError,
    NewMail {
        folder_id: u64,
        object_id: u64,
        message_flags: u32,
        unicode: bool,
        message_class: String,
    },
    MessageCreated {
        folder_id: u64,
        object_id: u64,
        tags: Option<Vec<u32>>,
    },
    MessageModified {
        folder_id: u64,
        object_id: u64,
        tags: Option<Vec<u32>>,
    },
    MessageDeleted {
        folder_id: u64,
        object_id: u64,
    },
    /// Shared by move and copy; the type field carries the distinction.
    ObjectMoveOrCopy {
        folder_id: u64,
        object_id: u64,
        old_folder_id: u64,
        old_object_id: u64,
    },
    FolderCreated {
        parent_id: u64,
        folder_id: u64,
        tags: Option<Vec<u32>>,
    },
    FolderDeleted {
        parent_id: u64,
        folder_id: u64,
    },
    FolderModified {
        folder_id: u64,
        tags: Option<Vec<u32>>,
        total_count: u32,
    },
    TableChange(TableEvent),
}

/// One encoded-notification reply destined for a specific session handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub handle: u32,
    pub notification_type: u16,
    pub data: ReplyData,
}

impl Reply {
    fn critical_error(handle: u32) -> Self {
        Reply {
            handle,
            notification_type: EventMask::CRITICAL_ERROR.bits(),
            data: ReplyData::CriticalError,
        }
    }

    /// Exact byte length `encode` will produce for this reply.
    pub fn size(&self) -> u16 {
        BASE_SIZE
            + match &self.data {
                ReplyData::CriticalError => 0,
                ReplyData::NewMail {
                    unicode,
                    message_class,
                    ..
                } => {
                    8 + 8
                        + 4
                        + 1
                        + if *unicode {
                            message_class.encode_utf16().count() as u16 * 2
                                + 2
                        } else {
                            message_class.len() as u16 + 1
                        }
                },
                ReplyData::MessageCreated { tags, .. }
                | ReplyData::MessageModified { tags, .. }
                | ReplyData::FolderCreated { tags, .. } => {
                    8 + 8 + tag_block_size(tags)
                },
                ReplyData::MessageDeleted { .. }
                | ReplyData::FolderDeleted { .. } => 8 + 8,
                ReplyData::ObjectMoveOrCopy { .. } => 8 * 4,
                ReplyData::FolderModified { tags, .. } => {
                    8 + tag_block_size(tags) + 4
                },
                ReplyData::TableChange(event) => {
                    2 + match event {
                        TableEvent::Changed => 0,
                        TableEvent::FolderRowAdded { columns, .. }
                        | TableEvent::FolderRowModified { columns, .. } => {
                            8 + 8 + 2 + columns.len() as u16
                        },
                        TableEvent::FolderRowDeleted { .. } => 8,
                        TableEvent::ContentsRowAdded { columns, .. }
                        | TableEvent::ContentsRowModified {
                            columns, ..
                        } => 2 * (8 + 8 + 4) + 2 + columns.len() as u16,
                        TableEvent::ContentsRowDeleted { .. } => 8 + 8 + 4,
                    }
                },
            }
    }

    /// Serialise the reply, appending exactly `size()` bytes to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(ROP_NOTIFY);
        put_u32(out, self.handle);
        // Logon id, always zero in practice
        out.push(0);
        put_u16(out, self.notification_type);

        match &self.data {
            ReplyData::CriticalError => (),

            ReplyData::NewMail {
                folder_id,
                object_id,
                message_flags,
                unicode,
                message_class,
            } => {
                put_u64(out, *folder_id);
                put_u64(out, *object_id);
                put_u32(out, *message_flags);
                out.push(*unicode as u8);
                if *unicode {
                    for unit in message_class.encode_utf16() {
                        put_u16(out, unit);
                    }
                    put_u16(out, 0);
                } else {
                    out.extend_from_slice(message_class.as_bytes());
                    out.push(0);
                }
            },

            ReplyData::MessageCreated {
                folder_id,
                object_id,
                tags,
            }
            | ReplyData::MessageModified {
                folder_id,
                object_id,
                tags,
            } => {
                put_u64(out, *folder_id);
                put_u64(out, *object_id);
                put_tag_block(out, tags);
            },

            ReplyData::MessageDeleted {
                folder_id,
                object_id,
            } => {
                put_u64(out, *folder_id);
                put_u64(out, *object_id);
            },

            ReplyData::ObjectMoveOrCopy {
                folder_id,
                object_id,
                old_folder_id,
                old_object_id,
            } => {
                put_u64(out, *folder_id);
                put_u64(out, *object_id);
                put_u64(out, *old_folder_id);
                put_u64(out, *old_object_id);
            },

            ReplyData::FolderCreated {
                parent_id,
                folder_id,
                tags,
            } => {
                put_u64(out, *parent_id);
                put_u64(out, *folder_id);
                put_tag_block(out, tags);
            },

            ReplyData::FolderDeleted {
                parent_id,
                folder_id,
            } => {
                put_u64(out, *parent_id);
                put_u64(out, *folder_id);
            },

            ReplyData::FolderModified {
                folder_id,
                tags,
                total_count,
            } => {
                put_u64(out, *folder_id);
                put_tag_block(out, tags);
                put_u32(out, *total_count);
            },

            ReplyData::TableChange(event) => match event {
                TableEvent::Changed => put_u16(out, TABLE_CHANGED),
                TableEvent::FolderRowAdded {
                    folder_id,
                    insert_after,
                    columns,
                } => {
                    put_u16(out, TABLE_ROW_ADDED);
                    put_u64(out, *folder_id);
                    put_u64(out, *insert_after);
                    put_u16(out, columns.len() as u16);
                    out.extend_from_slice(columns);
                },
                TableEvent::FolderRowModified {
                    folder_id,
                    insert_after,
                    columns,
                } => {
                    put_u16(out, TABLE_ROW_MODIFIED);
                    put_u64(out, *folder_id);
                    put_u64(out, *insert_after);
                    put_u16(out, columns.len() as u16);
                    out.extend_from_slice(columns);
                },
                TableEvent::FolderRowDeleted { folder_id } => {
                    put_u16(out, TABLE_ROW_DELETED);
                    put_u64(out, *folder_id);
                },
                TableEvent::ContentsRowAdded {
                    row,
                    insert_after,
                    columns,
                } => {
                    put_u16(out, TABLE_ROW_ADDED);
                    put_contents_key(out, row);
                    put_contents_key(out, insert_after);
                    put_u16(out, columns.len() as u16);
                    out.extend_from_slice(columns);
                },
                TableEvent::ContentsRowModified {
                    row,
                    insert_after,
                    columns,
                } => {
                    put_u16(out, TABLE_ROW_MODIFIED);
                    put_contents_key(out, row);
                    put_contents_key(out, insert_after);
                    put_u16(out, columns.len() as u16);
                    out.extend_from_slice(columns);
                },
                TableEvent::ContentsRowDeleted { row } => {
                    put_u16(out, TABLE_ROW_DELETED);
                    put_contents_key(out, row);
                },
            },
        }
    }
}

/// Render `notification` into the reply delivered to `subscription`.
///
/// Unrenderable events never fail outward; they substitute the
/// critical-error reply (or a bare table-changed event) and log.
pub fn build(
    notification: &Notification,
    subscription: &Subscription,
    session: &dyn SessionView,
) -> Reply {
    let handle = subscription.handle;

    match (notification.object_type, &notification.params) {
        (ObjectType::Table, NotificationParams::Table(params)) => {
            let table = match session.table(handle) {
                Some(table) => table,
                None => {
                    warn!("No table found for notification handle {}", handle);
                    return Reply::critical_error(handle);
                },
            };

            let mut notification_type = EventMask::TABLE_MODIFIED;
            if TableType::Folder != params.table_type {
                notification_type |= EventMask::M | EventMask::S;
            }

            let event = if TableType::Folder == params.table_type {
                build_folder_table_event(notification.event, params, table)
            } else {
                build_contents_table_event(notification.event, params, table)
            };

            Reply {
                handle,
                notification_type: notification_type.bits(),
                data: ReplyData::TableChange(event),
            }
        },

        (ObjectType::Folder, NotificationParams::Object(params)) => {
            let total_count = match params.message_count {
                Some(count) => count,
                None => {
                    warn!(
                        "Folder notification without a message count \
                         cannot be rendered"
                    );
                    return Reply::critical_error(handle);
                },
            };
            let notification_type =
                (EventMask::T | notification.event.mask()).bits();
            let data = match notification.event {
                EventKind::NewMail => new_mail_data(params),
                EventKind::Created => ReplyData::FolderCreated {
                    parent_id: params.folder_id,
                    folder_id: params.object_id,
                    tags: params.tags.clone(),
                },
                EventKind::Modified => ReplyData::FolderModified {
                    folder_id: params.object_id,
                    tags: params.tags.clone(),
                    total_count,
                },
                EventKind::Deleted => ReplyData::FolderDeleted {
                    parent_id: params.folder_id,
                    folder_id: params.object_id,
                },
                EventKind::Moved | EventKind::Copied => move_or_copy(params),
            };
            Reply {
                handle,
                notification_type,
                data,
            }
        },

        (ObjectType::Message, NotificationParams::Object(params)) => {
            let notification_type =
                (EventMask::M | notification.event.mask()).bits();
            let data = match notification.event {
                EventKind::NewMail => new_mail_data(params),
                EventKind::Created => ReplyData::MessageCreated {
                    folder_id: params.folder_id,
                    object_id: params.object_id,
                    tags: params.tags.clone(),
                },
                EventKind::Modified => ReplyData::MessageModified {
                    folder_id: params.folder_id,
                    object_id: params.object_id,
                    tags: params.tags.clone(),
                },
                EventKind::Deleted => ReplyData::MessageDeleted {
                    folder_id: params.folder_id,
                    object_id: params.object_id,
                },
                EventKind::Moved | EventKind::Copied => move_or_copy(params),
            };
            Reply {
                handle,
                notification_type,
                data,
            }
        },

        (object_type, _) => {
            warn!(
                "Notification parameters do not fit object type {:?}",
                object_type
            );
            Reply::critical_error(handle)
        },
    }
}

fn new_mail_data(params: &super::model::ObjectParams) -> ReplyData {
    ReplyData::NewMail {
        folder_id: params.folder_id,
        object_id: params.object_id,
        message_flags: MSGFLAG_UNMODIFIED,
        unicode: false,
        message_class: DEFAULT_MESSAGE_CLASS.to_owned(),
    }
}

fn move_or_copy(params: &super::model::ObjectParams) -> ReplyData {
    ReplyData::ObjectMoveOrCopy {
        folder_id: params.folder_id,
        object_id: params.object_id,
        old_folder_id: params.old_folder_id,
        old_object_id: params.old_object_id,
    }
}

fn build_folder_table_event(
    event: EventKind,
    params: &super::model::TableParams,
    table: &dyn NotificationTable,
) -> TableEvent {
    let added = match event {
        EventKind::Created => true,
        EventKind::Modified => false,
        EventKind::Deleted => {
            return TableEvent::FolderRowDeleted {
                folder_id: params.object_id,
            }
        },
        _ => return TableEvent::Changed,
    };

    // The previous row's folder id populates the insert-after linkage
    let insert_after = if params.row_id > 0 {
        match table.row(params.row_id - 1, &[PR_FID]) {
            Some(values) if !values.is_empty() => values[0].as_id(),
            _ => u64::MAX,
        }
    } else {
        0
    };

    let columns = match table.row_blob(params.row_id) {
        Some(columns) => columns,
        None => {
            warn!("No data returned for table row {}", params.row_id);
            return TableEvent::Changed;
        },
    };

    if added {
        TableEvent::FolderRowAdded {
            folder_id: params.object_id,
            insert_after,
            columns,
        }
    } else {
        TableEvent::FolderRowModified {
            folder_id: params.object_id,
            insert_after,
            columns,
        }
    }
}

fn build_contents_table_event(
    event: EventKind,
    params: &super::model::TableParams,
    table: &dyn NotificationTable,
) -> TableEvent {
    let row = ContentsRowKey {
        folder_id: params.folder_id,
        object_id: params.object_id,
        instance: params.instance_id,
    };

    let added = match event {
        EventKind::Created => true,
        EventKind::Modified => false,
        EventKind::Deleted => return TableEvent::ContentsRowDeleted { row },
        _ => return TableEvent::Changed,
    };

    let insert_after = if params.row_id > 0 {
        match table.row(params.row_id - 1, &[PR_FID, PR_MID, PR_INSTANCE_NUM])
        {
            Some(values) if values.len() >= 3 => ContentsRowKey {
                folder_id: values[0].as_id(),
                object_id: values[1].as_id(),
                instance: values[2].as_long(),
            },
            _ => ContentsRowKey {
                folder_id: u64::MAX,
                object_id: u64::MAX,
                instance: u32::MAX,
            },
        }
    } else {
        ContentsRowKey::default()
    };

    let columns = match table.row_blob(params.row_id) {
        Some(columns) => columns,
        None => {
            warn!("No data returned for table row {}", params.row_id);
            return TableEvent::Changed;
        },
    };

    if added {
        TableEvent::ContentsRowAdded {
            row,
            insert_after,
            columns,
        }
    } else {
        TableEvent::ContentsRowModified {
            row,
            insert_after,
            columns,
        }
    }
}

fn tag_block_size(tags: &Option<Vec<u32>>) -> u16 {
    match tags {
        // 0xffff count sentinel, no payload
        None => 2,
        Some(tags) => 2 + 4 * tags.len() as u16,
    }
}

fn put_tag_block(out: &mut Vec<u8>, tags: &Option<Vec<u32>>) {
    match tags {
        None => put_u16(out, 0xffff),
        Some(tags) => {
            put_u16(out, tags.len() as u16);
            for tag in tags {
                put_u32(out, *tag);
            }
        },
    }
}

fn put_contents_key(out: &mut Vec<u8>, key: &ContentsRowKey) {
    put_u64(out, key.folder_id);
    put_u64(out, key.object_id);
    put_u32(out, key.instance);
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
