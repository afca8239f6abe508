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

//! Message registration and cross-process publication.
//!
//! Registration is a strictly sequential pipeline; a failure at any stage
//! aborts the whole registration with no partial side effect beyond log
//! output. A message whose URI is already indexed counts as registered and
//! is reported as a benign no-op.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use serde::Serialize;

use crate::broker::BrokerTransport;
use crate::index::IndexStore;
use crate::support::error::Error;

/// Narrow view of the directory service: mailbox and folder resolution.
pub trait Directory {
    /// Resolve the distinguished name of `username`'s mailbox.
    fn mailbox_dn(&self, username: &str) -> Result<String, Error>;

    /// Resolve the storage URI of `folder` (by display name) within the
    /// mailbox at `mailbox_dn`.
    fn folder_uri(&self, mailbox_dn: &str, folder: &str)
        -> Result<String, Error>;
}

/// Narrow view of the relational metadata store.
pub trait MetadataStore {
    /// Numeric folder id recorded for `uri`, if the store knows it.
    fn folder_id_by_uri(&self, uri: &str) -> Result<u64, Error>;

    /// Allocate a fresh globally-unique message id.
    fn new_message_id(&self) -> Result<u64, Error>;
}

/// A storage backend's URI scheme.
pub trait Backend {
    fn name(&self) -> &str;

    /// Compose the URI of message `message_id` inside `folder_uri`.
    fn generate_uri(
        &self,
        folder_uri: &str,
        message_id: &str,
    ) -> Result<String, Error>;
}

/// Static table of available backends, populated once at process start.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry::default()
    }

    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn Backend, Error> {
        self.backends
            .iter()
            .map(|b| b.as_ref())
            .find(|b| name == b.name())
            .ok_or_else(|| Error::NoSuchBackend(name.to_owned()))
    }
}

/// Pool of metadata-store connections keyed by connection string.
///
/// Each connection is opened once on first use and kept for the life of
/// the process; there is no teardown. The pool is an explicit object
/// passed by reference, created at startup.
pub struct MetadataRegistry {
    opener: Box<dyn Fn(&str) -> Result<Box<dyn MetadataStore>, Error>>,
    stores: HashMap<String, Box<dyn MetadataStore>>,
}

impl MetadataRegistry {
    pub fn new(
        opener: Box<dyn Fn(&str) -> Result<Box<dyn MetadataStore>, Error>>,
    ) -> Self {
        MetadataRegistry {
            opener,
            stores: HashMap::new(),
        }
    }

    /// Connection for `conn_string`, opening it on first use.
    pub fn open(
        &mut self,
        conn_string: &str,
    ) -> Result<&dyn MetadataStore, Error> {
        let store = match self.stores.entry(conn_string.to_owned()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => v.insert((self.opener)(conn_string)?),
        };
        Ok(&**store)
    }

    /// Drop all pooled connections so a test can start from a clean slate.
    #[cfg(test)]
    pub fn reset(&mut self) {
        self.stores.clear();
    }
}

/// The outcome of a successful registration, ready for publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registered {
    pub user: String,
    pub mid: u64,
    pub fid: u64,
    pub uri: String,
}

pub struct Registrar<'a> {
    directory: &'a dyn Directory,
    metadata: &'a dyn MetadataStore,
    backend: &'a dyn Backend,
    mapping_root: &'a Path,
}

impl<'a> Registrar<'a> {
    pub fn new(
        directory: &'a dyn Directory,
        metadata: &'a dyn MetadataStore,
        backend: &'a dyn Backend,
        mapping_root: &'a Path,
    ) -> Self {
        Registrar {
            directory,
            metadata,
            backend,
            mapping_root,
        }
    }

    /// Resolve and index one delivered message.
    ///
    /// `Ok(None)` means the message URI was already indexed; nothing is
    /// changed and nothing should be published.
    pub fn register_message(
        &self,
        username: &str,
        folder: &str,
        uid: u32,
    ) -> Result<Option<Registered>, Error> {
        let mailbox_dn = self.directory.mailbox_dn(username)?;
        debug!("Got mailbox DN '{}'", mailbox_dn);

        let folder_uri = self.directory.folder_uri(&mailbox_dn, folder)?;
        debug!("Got folder URI '{}'", folder_uri);

        let message_uri = self
            .backend
            .generate_uri(&folder_uri, &uid.to_string())?;
        debug!("Generated message URI '{}'", message_uri);

        let mut index = IndexStore::open(self.mapping_root, username)?;
        match index.get_fmid(&message_uri, false) {
            Ok((mid, _)) => {
                info!(
                    "Message already registered (user={}, mid={:#x}, \
                     uri={})",
                    username, mid, message_uri
                );
                return Ok(None);
            },
            Err(Error::NotFound) => (),
            Err(e) => return Err(e),
        }

        let mid = self.metadata.new_message_id()?;
        index.add(mid, &message_uri)?;

        let fid = self.folder_fid(&index, &folder_uri)?;
        debug!(
            "Message registered for user {} (mid={:#018x}, fid={:#018x}, \
             uri={})",
            username, mid, fid, message_uri
        );

        Ok(Some(Registered {
            user: username.to_owned(),
            mid,
            fid,
            uri: message_uri,
        }))
    }

    /// Numeric id of the containing folder: the metadata store is
    /// authoritative, with the identifier index's reverse lookup as the
    /// fallback for folders it does not know.
    fn folder_fid(
        &self,
        index: &IndexStore,
        folder_uri: &str,
    ) -> Result<u64, Error> {
        match self.metadata.folder_id_by_uri(folder_uri) {
            Ok(fid) => Ok(fid),
            Err(Error::NotFound) => {
                let (fid, soft_deleted) =
                    index.get_fmid(folder_uri, false)?;
                if soft_deleted {
                    Err(Error::NotFound)
                } else {
                    Ok(fid)
                }
            },
            Err(e) => Err(e),
        }
    }
}

#[derive(Serialize)]
struct RegisteredEvent<'a> {
    user: &'a str,
    mid: u64,
    fid: u64,
    uri: &'a str,
}

/// Publish one registration on the user's dedicated fanout exchange.
///
/// Every user has an exchange named `<user>_notification`; it is declared
/// idempotently before each publish since consumers may not exist yet.
pub fn publish_registered(
    transport: &mut BrokerTransport,
    channel: u16,
    registered: &Registered,
) -> Result<(), Error> {
    let exchange = format!("{}_notification", registered.user);
    transport.declare_exchange(channel, &exchange, "fanout")?;

    let body = serde_json::to_vec(&RegisteredEvent {
        user: &registered.user,
        mid: registered.mid,
        fid: registered.fid,
        uri: &registered.uri,
    })?;
    debug!("Publishing notification to exchange '{}'", exchange);
    transport.publish(channel, &exchange, "", &body)
}
