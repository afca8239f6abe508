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

use super::model::{
    EventMask, Notification, NotificationParams, ObjectType, Subscription,
    SubscriptionScope,
};

/// Decide whether `notification` should be delivered to `subscription`.
///
/// Table events and object events are mutually exclusive categories. A
/// table event matches only a table subscription on the same live table
/// handle with equal table type and folder; table identity is the handle,
/// not the content, since table events describe table state.
///
/// An object event matches when the subscription requests its event kind
/// and the scope covers it: whole-store covers everything; a folder event
/// matches when its object is the subscribed folder; a message event
/// matches when it happens in the subscribed folder and the subscription's
/// object id is either the zero wildcard or the event's object.
pub fn matches(
    notification: &Notification,
    subscription: &Subscription,
) -> bool {
    match notification.params {
        NotificationParams::Table(ref n) => {
            if !subscription.events.contains(EventMask::TABLE_MODIFIED) {
                return false;
            }
            if subscription.handle != n.handle {
                return false;
            }
            match subscription.scope {
                SubscriptionScope::Table {
                    folder_id,
                    table_type,
                } => {
                    table_type == n.table_type && folder_id == n.folder_id
                },
                SubscriptionScope::Object { .. } => false,
            }
        },

        NotificationParams::Object(ref n) => {
            if !subscription
                .events
                .contains(notification.event.mask())
            {
                return false;
            }
            match subscription.scope {
                SubscriptionScope::Object { whole_store: true, .. } => true,
                SubscriptionScope::Object {
                    folder_id,
                    object_id,
                    whole_store: false,
                } => match notification.object_type {
                    ObjectType::Folder => n.object_id == folder_id,
                    ObjectType::Message => {
                        n.folder_id == folder_id
                            && (0 == object_id || n.object_id == object_id)
                    },
                    ObjectType::Table => false,
                },
                SubscriptionScope::Table { .. } => false,
            }
        },
    }
}

#[cfg(test)]
mod test {
    use super::super::model::*;
    use super::*;

    fn message_created(folder_id: u64, object_id: u64) -> Notification {
        Notification {
            object_type: ObjectType::Message,
            event: EventKind::Created,
            params: NotificationParams::Object(ObjectParams {
                folder_id,
                object_id,
                ..ObjectParams::default()
            }),
        }
    }

    fn folder_sub(folder_id: u64) -> Subscription {
        Subscription {
            handle: 7,
            events: EventMask::OBJECT_CREATED | EventMask::OBJECT_MODIFIED,
            scope: SubscriptionScope::Object {
                folder_id,
                object_id: 0,
                whole_store: false,
            },
        }
    }

    #[test]
    fn message_event_matches_its_folder_only() {
        let sub = folder_sub(42);
        assert!(matches(&message_created(42, 99), &sub));
        assert!(!matches(&message_created(43, 99), &sub));
    }

    #[test]
    fn event_mask_gates_delivery() {
        let sub = folder_sub(42);
        let mut deleted = message_created(42, 99);
        deleted.event = EventKind::Deleted;
        assert!(!matches(&deleted, &sub));
    }

    #[test]
    fn whole_store_matches_any_folder() {
        let sub = Subscription {
            handle: 7,
            events: EventMask::NEW_MAIL,
            scope: SubscriptionScope::Object {
                folder_id: 1,
                object_id: 0,
                whole_store: true,
            },
        };
        assert!(matches(&Notification::new_mail(9999, 5), &sub));
    }

    #[test]
    fn folder_event_keys_off_object_id() {
        let sub = folder_sub(42);
        let n = Notification {
            object_type: ObjectType::Folder,
            event: EventKind::Modified,
            params: NotificationParams::Object(ObjectParams {
                folder_id: 2,
                object_id: 42,
                message_count: Some(17),
                ..ObjectParams::default()
            }),
        };
        assert!(matches(&n, &sub));
    }

    #[test]
    fn specific_message_subscription_excludes_other_messages() {
        let sub = Subscription {
            handle: 7,
            events: EventMask::OBJECT_MODIFIED,
            scope: SubscriptionScope::Object {
                folder_id: 42,
                object_id: 99,
                whole_store: false,
            },
        };
        let mut n = message_created(42, 99);
        n.event = EventKind::Modified;
        assert!(matches(&n, &sub));

        let mut other = message_created(42, 100);
        other.event = EventKind::Modified;
        assert!(!matches(&other, &sub));
    }

    #[test]
    fn table_event_requires_same_handle_type_and_folder() {
        let n = Notification {
            object_type: ObjectType::Table,
            event: EventKind::Created,
            params: NotificationParams::Table(TableParams {
                handle: 7,
                table_type: TableType::Contents,
                folder_id: 42,
                object_id: 99,
                row_id: 1,
                instance_id: 0,
            }),
        };
        let sub = Subscription {
            handle: 7,
            events: EventMask::TABLE_MODIFIED,
            scope: SubscriptionScope::Table {
                folder_id: 42,
                table_type: TableType::Contents,
            },
        };
        assert!(matches(&n, &sub));

        let mut wrong_handle = sub.clone();
        wrong_handle.handle = 8;
        assert!(!matches(&n, &wrong_handle));

        let mut wrong_type = sub.clone();
        wrong_type.scope = SubscriptionScope::Table {
            folder_id: 42,
            table_type: TableType::Folder,
        };
        assert!(!matches(&n, &wrong_type));

        let mut object_scope = sub;
        object_scope.scope = SubscriptionScope::Object {
            folder_id: 42,
            object_id: 0,
            whole_store: true,
        };
        assert!(!matches(&n, &object_scope));
    }

    #[test]
    fn table_event_never_matches_without_table_mask() {
        let n = Notification {
            object_type: ObjectType::Table,
            event: EventKind::Created,
            params: NotificationParams::Table(TableParams {
                handle: 7,
                table_type: TableType::Folder,
                folder_id: 42,
                object_id: 99,
                row_id: 0,
                instance_id: 0,
            }),
        };
        let sub = Subscription {
            handle: 7,
            events: EventMask::OBJECT_CREATED,
            scope: SubscriptionScope::Table {
                folder_id: 42,
                table_type: TableType::Folder,
            },
        };
        assert!(!matches(&n, &sub));
    }
}
