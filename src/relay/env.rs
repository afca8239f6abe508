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

//! Built-in implementations of the resolution seams.
//!
//! Deployments with a real directory service or relational metadata store
//! plug their own `Directory`/`MetadataStore` in; these stand-ins cover
//! installations where folder URIs follow a fixed scheme and ids come from
//! the index layer's own allocator.

use std::path::PathBuf;

use super::register::{Backend, BackendRegistry, Directory, MetadataStore};
use crate::index::IndexStore;
use crate::support::error::Error;

/// Reserved principal whose index file holds the id-allocation sequence.
const SEQUENCE_PRINCIPAL: &str = "_sequence";

/// Folder resolution by URI template.
///
/// There is no distinguished-name concept here; `mailbox_dn` resolves to
/// the username itself and `folder_uri` substitutes it into the template's
/// `{user}` and `{folder}` placeholders.
pub struct TemplateDirectory {
    template: String,
}

impl TemplateDirectory {
    pub fn new(template: &str) -> Self {
        TemplateDirectory {
            template: template.to_owned(),
        }
    }
}

impl Directory for TemplateDirectory {
    fn mailbox_dn(&self, username: &str) -> Result<String, Error> {
        Ok(username.to_owned())
    }

    fn folder_uri(
        &self,
        mailbox_dn: &str,
        folder: &str,
    ) -> Result<String, Error> {
        Ok(self
            .template
            .replace("{user}", mailbox_dn)
            .replace("{folder}", folder))
    }
}

/// Metadata store backed by the identifier index itself.
///
/// Message ids come from the persisted allocation sequence of a reserved
/// principal; folder-id lookups always defer to the caller's per-user
/// reverse lookup.
pub struct IndexMetadata {
    mapping_root: PathBuf,
}

impl IndexMetadata {
    pub fn new(mapping_root: impl Into<PathBuf>) -> Self {
        IndexMetadata {
            mapping_root: mapping_root.into(),
        }
    }
}

impl MetadataStore for IndexMetadata {
    fn folder_id_by_uri(&self, _uri: &str) -> Result<u64, Error> {
        Err(Error::NotFound)
    }

    fn new_message_id(&self) -> Result<u64, Error> {
        let mut sequence =
            IndexStore::open(&self.mapping_root, SEQUENCE_PRINCIPAL)?;
        sequence.allocate_fmid()
    }
}

/// The default maildir-style message URI scheme.
pub struct MstoreBackend;

impl Backend for MstoreBackend {
    fn name(&self) -> &str {
        "mstoredb"
    }

    fn generate_uri(
        &self,
        folder_uri: &str,
        message_id: &str,
    ) -> Result<String, Error> {
        if folder_uri.ends_with('/') {
            Ok(format!("{}{}.eml", folder_uri, message_id))
        } else {
            Ok(format!("{}/{}.eml", folder_uri, message_id))
        }
    }
}

/// The backends compiled into this build, registered at startup.
pub fn default_backends() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(Box::new(MstoreBackend));
    registry
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn template_substitution() {
        let directory =
            TemplateDirectory::new("sogo://{user}@mail/folder{folder}/");
        let dn = directory.mailbox_dn("jdoe").unwrap();
        assert_eq!(
            "sogo://jdoe@mail/folderINBOX/",
            directory.folder_uri(&dn, "INBOX").unwrap()
        );
    }

    #[test]
    fn message_ids_are_unique_across_reopen() {
        let root = TempDir::new().unwrap();
        let meta = IndexMetadata::new(root.path());
        let first = meta.new_message_id().unwrap();
        let second = meta.new_message_id().unwrap();
        assert_ne!(first, second);

        let meta = IndexMetadata::new(root.path());
        let third = meta.new_message_id().unwrap();
        assert_ne!(first, third);
        assert_ne!(second, third);
    }

    #[test]
    fn uri_composition_handles_trailing_separator() {
        let backend = MstoreBackend;
        assert_eq!(
            "sogo://u@mail/folderINBOX/7.eml",
            backend
                .generate_uri("sogo://u@mail/folderINBOX/", "7")
                .unwrap()
        );
        assert_eq!(
            "sogo://u@mail/folderINBOX/7.eml",
            backend
                .generate_uri("sogo://u@mail/folderINBOX", "7")
                .unwrap()
        );
    }

    #[test]
    fn default_backend_table_contains_mstoredb() {
        assert!(default_backends().lookup("mstoredb").is_ok());
    }
}
