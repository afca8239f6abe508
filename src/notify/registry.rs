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

use std::collections::VecDeque;

use super::model::{Notification, Subscription};

/// The set of active subscriptions for one store, in registration order.
///
/// Matching is a linear pass over the whole registry per notification;
/// registries are small and session-scoped, so no index is kept.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        SubscriptionRegistry::default()
    }

    pub fn add(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Drop every subscription owned by `handle`, on session release.
    pub fn remove_handle(&mut self, handle: u32) {
        self.subscriptions.retain(|s| handle != s.handle);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Pending notifications awaiting the next processing pass.
///
/// Drained in FIFO order; nothing persists across a pass.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    pending: VecDeque<Notification>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        NotificationQueue::default()
    }

    pub fn push(&mut self, notification: Notification) {
        self.pending.push_back(notification);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Notification> + '_ {
        self.pending.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod test {
    use super::super::model::*;
    use super::*;

    fn sub(handle: u32) -> Subscription {
        Subscription {
            handle,
            events: EventMask::NEW_MAIL,
            scope: SubscriptionScope::Object {
                folder_id: 1,
                object_id: 0,
                whole_store: true,
            },
        }
    }

    #[test]
    fn registration_order_preserved() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sub(3));
        registry.add(sub(1));
        registry.add(sub(2));

        let handles: Vec<u32> =
            registry.iter().map(|s| s.handle).collect();
        assert_eq!(vec![3, 1, 2], handles);
    }

    #[test]
    fn remove_handle_drops_all_for_that_handle() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sub(1));
        registry.add(sub(2));
        registry.add(sub(1));

        registry.remove_handle(1);
        let handles: Vec<u32> =
            registry.iter().map(|s| s.handle).collect();
        assert_eq!(vec![2], handles);
    }

    #[test]
    fn queue_drains_fifo_and_empties() {
        let mut queue = NotificationQueue::new();
        queue.push(Notification::new_mail(1, 10));
        queue.push(Notification::new_mail(2, 20));

        let drained: Vec<Notification> = queue.drain().collect();
        assert_eq!(2, drained.len());
        assert_eq!(Notification::new_mail(1, 10), drained[0]);
        assert!(queue.is_empty());
    }
}
