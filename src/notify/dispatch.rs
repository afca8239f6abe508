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

use log::debug;

use super::matcher;
use super::registry::{NotificationQueue, SubscriptionRegistry};
use super::reply::{self, SessionView};

/// The encoded replies produced by one processing pass.
#[derive(Debug, Default)]
pub struct ReplyBatch {
    /// One serialised reply per (notification, matching subscription) pair,
    /// in queue then registration order.
    pub replies: Vec<Vec<u8>>,
    /// Running total of the reply sizes, as accumulated from the size
    /// phase of each encoding. Wider than one reply's size field; the
    /// transport layer applies its own cap when the batch is shipped.
    pub total_size: u32,
}

impl ReplyBatch {
    pub fn new() -> Self {
        ReplyBatch::default()
    }
}

/// Drain the notification queue and append one encoded reply per matching
/// subscription to `batch`.
///
/// Notifications are processed in queue order and, within one
/// notification, subscriptions in registration order. The queue is empty
/// when this returns; nothing is retained for a later pass.
pub fn process_notifications(
    queue: &mut NotificationQueue,
    registry: &SubscriptionRegistry,
    session: &dyn SessionView,
    batch: &mut ReplyBatch,
) {
    for notification in queue.drain() {
        debug!("Processing pending notification {:?}", notification.event);
        for subscription in registry.iter() {
            if !matcher::matches(&notification, subscription) {
                continue;
            }
            debug!(
                "Subscription on handle {} matches",
                subscription.handle
            );
            let reply = reply::build(&notification, subscription, session);
            let mut encoded = Vec::with_capacity(reply.size() as usize);
            reply.encode(&mut encoded);
            batch.total_size += u32::from(reply.size());
            batch.replies.push(encoded);
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::model::*;
    use super::super::reply::NotificationTable;
    use super::*;

    struct NoTables;

    impl SessionView for NoTables {
        fn table(&self, _handle: u32) -> Option<&dyn NotificationTable> {
            None
        }
    }

    fn new_mail_sub(handle: u32, whole_store: bool) -> Subscription {
        Subscription {
            handle,
            events: EventMask::NEW_MAIL,
            scope: SubscriptionScope::Object {
                folder_id: 42,
                object_id: 0,
                whole_store,
            },
        }
    }

    #[test]
    fn pass_produces_one_reply_per_match_and_clears_queue() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(new_mail_sub(1, true));
        registry.add(new_mail_sub(2, false));

        let mut queue = NotificationQueue::new();
        queue.push(Notification::new_mail(42, 100));
        queue.push(Notification::new_mail(7, 101));

        let mut batch = ReplyBatch::new();
        process_notifications(&mut queue, &registry, &NoTables, &mut batch);

        // First notification matches both, second only the whole-store one
        assert_eq!(3, batch.replies.len());
        assert!(queue.is_empty());

        let encoded_total: usize =
            batch.replies.iter().map(Vec::len).sum();
        assert_eq!(encoded_total, batch.total_size as usize);
    }

    #[test]
    fn batch_size_can_exceed_one_reply_size_range() {
        let mut registry = SubscriptionRegistry::new();
        for handle in 0..2000 {
            registry.add(new_mail_sub(handle, true));
        }

        let mut queue = NotificationQueue::new();
        queue.push(Notification::new_mail(42, 100));

        let mut batch = ReplyBatch::new();
        process_notifications(&mut queue, &registry, &NoTables, &mut batch);

        let encoded_total: usize =
            batch.replies.iter().map(Vec::len).sum();
        assert!(encoded_total > usize::from(u16::MAX));
        assert_eq!(encoded_total, batch.total_size as usize);
    }

    #[test]
    fn no_subscriptions_still_drains_queue() {
        let registry = SubscriptionRegistry::new();
        let mut queue = NotificationQueue::new();
        queue.push(Notification::new_mail(1, 2));

        let mut batch = ReplyBatch::new();
        process_notifications(&mut queue, &registry, &NoTables, &mut batch);

        assert!(batch.replies.is_empty());
        assert_eq!(0, batch.total_size);
        assert!(queue.is_empty());
    }
}
