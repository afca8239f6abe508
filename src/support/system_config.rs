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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Path used for the configuration when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/relaymap/relaymap.toml";

/// The system-wide configuration for Relaymap.
///
/// This is stored in a TOML file, `/etc/relaymap/relaymap.toml` by default.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Connection parameters for the message broker.
    pub broker: BrokerConfig,

    /// Filesystem locations used by the identifier index.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Resolution of mailbox folders to storage URIs.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Host name or address of the broker.
    pub host: String,
    /// TCP port of the broker.
    pub port: u16,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Virtual host to open on login.
    pub vhost: String,
    /// Name of the direct exchange carrying inbound mail-delivery events.
    pub exchange: String,
    /// Name of the queue the relay daemon consumes new-mail events from.
    pub new_mail_queue: String,
    /// Routing key binding `new_mail_queue` to `exchange`.
    pub new_mail_routing_key: String,
    /// Name of the storage backend used to compose message URIs.
    pub backend: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            exchange: "relaymap-notifications".to_owned(),
            new_mail_queue: "new-mail-queue".to_owned(),
            new_mail_routing_key: "new-mail".to_owned(),
            backend: "mstoredb".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one identifier index file per principal.
    pub mapping_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            mapping_root: PathBuf::from("/var/lib/relaymap/mapping"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Template composing the storage URI of a folder from `{user}` and
    /// `{folder}` placeholders, used when no external directory service is
    /// wired in.
    pub folder_uri_template: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            folder_uri_template: "sogo://{user}@mail/folder{folder}/"
                .to_owned(),
        }
    }
}
