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

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use log::debug;

use crate::support::error::Error;
use crate::support::file_ops;

/// Key prefix marking a record as soft-deleted.
///
/// Active keys never start with this tag, so the two namespaces are disjoint
/// and uniqueness holds within each.
pub const SOFT_DELETED_TAG: &str = "SOFT_DELETED:";

/// Reserved key holding the fmid allocation sequence.
///
/// Not an fmid key (does not start with `0x`), so scans skip it.
const ALLOC_SEQ_KEY: &str = "fmid_allocation_seq";

const INDEX_FILE_MODE: u32 = 0o600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Move the record into the soft-deleted namespace, keeping its value.
    Soft,
    /// Remove the record entirely, from whichever namespace holds it.
    Permanent,
}

/// The identifier index of a single principal.
///
/// Callers must guarantee a single writer per principal; the store itself
/// provides no inter-process locking.
pub struct IndexStore {
    path: PathBuf,
    tmp: PathBuf,
    principal: String,
    records: BTreeMap<String, String>,
}

impl IndexStore {
    /// Open (or create) the index of `principal` under `mapping_root`.
    pub fn open(
        mapping_root: impl Into<PathBuf>,
        principal: &str,
    ) -> Result<Self, Error> {
        let mapping_root = mapping_root.into();
        fs::create_dir_all(&mapping_root)?;

        let path = mapping_root.join(format!("{}.indexing", principal));
        let records = match fs::File::open(&path) {
            Ok(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                serde_cbor::from_slice(&data)?
            },
            Err(e) if io::ErrorKind::NotFound == e.kind() => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(IndexStore {
            path,
            tmp: mapping_root,
            principal: principal.to_owned(),
            records,
        })
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Register `uri` under `fmid`.
    ///
    /// Fails with `AlreadyExists` if any record for `fmid` exists, active or
    /// soft-deleted.
    pub fn add(&mut self, fmid: u64, uri: &str) -> Result<(), Error> {
        if self.search_existing(fmid).is_some() {
            return Err(Error::AlreadyExists);
        }

        self.records.insert(active_key(fmid), uri.to_owned());
        self.commit()
    }

    /// Replace the URI of the existing active record for `fmid`.
    pub fn update(&mut self, fmid: u64, uri: &str) -> Result<(), Error> {
        let key = active_key(fmid);
        if !self.records.contains_key(&key) {
            return Err(Error::NotFound);
        }

        self.records.insert(key, uri.to_owned());
        self.commit()
    }

    /// Look the URI of `fmid` up.
    ///
    /// The active namespace is checked first, then the soft-deleted one; the
    /// returned flag tells which one matched.
    pub fn get_uri(&self, fmid: u64) -> Result<(String, bool), Error> {
        if let Some(uri) = self.records.get(&active_key(fmid)) {
            return Ok((uri.clone(), false));
        }
        if let Some(uri) = self.records.get(&soft_deleted_key(fmid)) {
            return Ok((uri.clone(), true));
        }

        Err(Error::NotFound)
    }

    /// Reverse lookup: find the fmid whose URI matches `pattern`.
    ///
    /// In exact mode (`partial` false) the whole store is scanned comparing
    /// normalised URIs (trailing `/` stripped on both sides). In partial
    /// mode the pattern may contain at most one `*`, splitting it into a
    /// prefix and a suffix which must both be contained at the respective
    /// ends of the candidate URI; more than one wildcard is an error, zero
    /// wildcards degrade to an exact comparison.
    pub fn get_fmid(
        &self,
        pattern: &str,
        partial: bool,
    ) -> Result<(u64, bool), Error> {
        let pattern = normalise(pattern);

        let (prefix, suffix) = if partial {
            match pattern.matches('*').count() {
                0 => (None, None),
                1 => {
                    let star = pattern.find('*').unwrap();
                    (
                        Some(&pattern[..star]),
                        Some(&pattern[star + 1..]),
                    )
                },
                _ => return Err(Error::TooManyWildcards),
            }
        } else {
            (None, None)
        };

        for (key, value) in &self.records {
            let (fmid, soft_deleted) = match parse_key(key) {
                Some(parsed) => parsed,
                None => continue,
            };

            let value = normalise(value);
            let hit = match (prefix, suffix) {
                (Some(prefix), Some(suffix)) => {
                    value.len() >= prefix.len() + suffix.len()
                        && value.starts_with(prefix)
                        && value.ends_with(suffix)
                },
                _ => value == pattern,
            };

            if hit {
                return Ok((fmid, soft_deleted));
            }
        }

        Err(Error::NotFound)
    }

    /// Delete the record for `fmid`.
    ///
    /// Soft deletion moves an active record into the soft-deleted namespace
    /// and is a no-op success if the record is already soft-deleted.
    /// Permanent deletion removes the record from whichever namespace
    /// currently holds it. Deleting an fmid with no record at all is
    /// reported as success.
    pub fn del(&mut self, fmid: u64, mode: DeleteMode) -> Result<(), Error> {
        let soft_deleted = match self.search_existing(fmid) {
            Some(soft_deleted) => soft_deleted,
            None => return Ok(()),
        };

        match mode {
            DeleteMode::Soft => {
                if soft_deleted {
                    return Ok(());
                }

                let value = self.records.remove(&active_key(fmid)).unwrap();
                self.records.insert(soft_deleted_key(fmid), value);
            },
            DeleteMode::Permanent => {
                let key = if soft_deleted {
                    soft_deleted_key(fmid)
                } else {
                    active_key(fmid)
                };
                self.records.remove(&key);
            },
        }

        self.commit()
    }

    /// Return a fresh fmid not currently in use for this principal.
    ///
    /// The allocation sequence is persisted, so consecutive calls return
    /// distinct values even with no intervening insert and across reopen.
    pub fn allocate_fmid(&mut self) -> Result<u64, Error> {
        let mut next = self
            .records
            .get(ALLOC_SEQ_KEY)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        while self.search_existing(next).is_some() {
            next += 1;
        }

        self.records
            .insert(ALLOC_SEQ_KEY.to_owned(), (next + 1).to_string());
        self.commit()?;

        debug!(
            "{}: allocated fmid 0x{:016x}",
            self.principal, next
        );
        Ok(next)
    }

    /// Return `Some(soft_deleted)` if any record for `fmid` exists.
    fn search_existing(&self, fmid: u64) -> Option<bool> {
        if self.records.contains_key(&active_key(fmid)) {
            Some(false)
        } else if self.records.contains_key(&soft_deleted_key(fmid)) {
            Some(true)
        } else {
            None
        }
    }

    fn commit(&self) -> Result<(), Error> {
        let data = serde_cbor::to_vec(&self.records)?;
        file_ops::spit(&self.tmp, &self.path, true, INDEX_FILE_MODE, &data)?;
        Ok(())
    }
}

fn active_key(fmid: u64) -> String {
    format!("0x{:016x}", fmid)
}

fn soft_deleted_key(fmid: u64) -> String {
    format!("{}0x{:016x}", SOFT_DELETED_TAG, fmid)
}

/// Parse a storage key back into `(fmid, soft_deleted)`.
///
/// Returns `None` for reserved keys such as the allocation sequence.
fn parse_key(key: &str) -> Option<(u64, bool)> {
    let (hex, soft_deleted) = if key.starts_with(SOFT_DELETED_TAG) {
        (&key[SOFT_DELETED_TAG.len()..], true)
    } else {
        (key, false)
    };

    if !hex.starts_with("0x") {
        return None;
    }

    u64::from_str_radix(&hex[2..], 16)
        .ok()
        .map(|fmid| (fmid, soft_deleted))
}

fn normalise(uri: &str) -> &str {
    if uri.ends_with('/') {
        &uri[..uri.len() - 1]
    } else {
        uri
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    const PRINCIPAL: &str = "testuser";

    fn open(root: &TempDir) -> IndexStore {
        IndexStore::open(root.path(), PRINCIPAL).unwrap()
    }

    #[test]
    fn add_then_get_uri() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        assert_eq!(
            ("random://url".to_owned(), false),
            store.get_uri(0x11).unwrap()
        );
    }

    #[test]
    fn repeated_add_fails() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        assert_matches!(
            Err(Error::AlreadyExists),
            store.add(0x11, "random://other")
        );
    }

    #[test]
    fn add_over_soft_deleted_fails() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        store.del(0x11, DeleteMode::Soft).unwrap();
        assert_matches!(
            Err(Error::AlreadyExists),
            store.add(0x11, "random://other")
        );
    }

    #[test]
    fn update_preserves_identity() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        store.update(0x11, "random://url2").unwrap();

        assert_eq!(
            ("random://url2".to_owned(), false),
            store.get_uri(0x11).unwrap()
        );
        assert_eq!((0x11, false), store.get_fmid("random://url2", false).unwrap());
    }

    #[test]
    fn update_missing_record_fails() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        assert_matches!(Err(Error::NotFound), store.update(0x11, "random://url"));
    }

    #[test]
    fn del_unknown_fmid_is_success() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.del(0x11, DeleteMode::Soft).unwrap();
        store.del(0x11, DeleteMode::Permanent).unwrap();
    }

    #[test]
    fn soft_delete_round_trip() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        store.del(0x11, DeleteMode::Soft).unwrap();
        assert_eq!(
            ("random://url".to_owned(), true),
            store.get_uri(0x11).unwrap()
        );

        store.del(0x11, DeleteMode::Permanent).unwrap();
        assert_matches!(Err(Error::NotFound), store.get_uri(0x11));
    }

    #[test]
    fn soft_delete_is_idempotent() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        store.del(0x11, DeleteMode::Soft).unwrap();
        store.del(0x11, DeleteMode::Soft).unwrap();
        assert_eq!(
            ("random://url".to_owned(), true),
            store.get_uri(0x11).unwrap()
        );
    }

    #[test]
    fn permanent_delete_of_active_record() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        store.del(0x11, DeleteMode::Permanent).unwrap();
        assert_matches!(Err(Error::NotFound), store.get_uri(0x11));
    }

    #[test]
    fn get_fmid_exact() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        assert_eq!((0x11, false), store.get_fmid("random://url", false).unwrap());
        assert_matches!(
            Err(Error::NotFound),
            store.get_fmid("random://other", false)
        );
    }

    #[test]
    fn get_fmid_ignores_trailing_separator() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url/").unwrap();
        assert_eq!((0x11, false), store.get_fmid("random://url", false).unwrap());
        assert_eq!(
            (0x11, false),
            store.get_fmid("random://url/", false).unwrap()
        );
    }

    #[test]
    fn get_fmid_reports_soft_deleted() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x11, "random://url").unwrap();
        store.del(0x11, DeleteMode::Soft).unwrap();
        assert_eq!((0x11, true), store.get_fmid("random://url", false).unwrap());
    }

    #[test]
    fn wildcard_lookup() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x42, "ns://a/b/c").unwrap();
        assert_eq!((0x42, false), store.get_fmid("ns://a/*c", true).unwrap());
        assert_matches!(
            Err(Error::TooManyWildcards),
            store.get_fmid("ns://a/*b*c", true)
        );
    }

    #[test]
    fn partial_without_wildcard_is_exact() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x42, "ns://a/b/c").unwrap();
        assert_eq!((0x42, false), store.get_fmid("ns://a/b/c", true).unwrap());
        assert_matches!(Err(Error::NotFound), store.get_fmid("ns://a/b", true));
    }

    #[test]
    fn wildcard_does_not_overlap_prefix_and_suffix() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        store.add(0x42, "ns://ab").unwrap();
        assert_matches!(
            Err(Error::NotFound),
            store.get_fmid("ns://a*ab", true)
        );
    }

    #[test]
    fn allocation_returns_distinct_values() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        let first = store.allocate_fmid().unwrap();
        let second = store.allocate_fmid().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn allocation_skips_used_ids() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);

        let first = store.allocate_fmid().unwrap();
        store.add(first + 1, "random://url").unwrap();
        let second = store.allocate_fmid().unwrap();
        assert_ne!(first + 1, second);

        assert_matches!(Ok(_), store.add(second, "random://url2"));
    }

    #[test]
    fn state_survives_reopen() {
        let root = TempDir::new().unwrap();
        let first_alloc;
        {
            let mut store = open(&root);
            store.add(0x11, "random://url").unwrap();
            store.add(0x12, "random://url2").unwrap();
            store.del(0x12, DeleteMode::Soft).unwrap();
            first_alloc = store.allocate_fmid().unwrap();
        }

        let mut store = open(&root);
        assert_eq!(
            ("random://url".to_owned(), false),
            store.get_uri(0x11).unwrap()
        );
        assert_eq!(
            ("random://url2".to_owned(), true),
            store.get_uri(0x12).unwrap()
        );
        assert_ne!(first_alloc, store.allocate_fmid().unwrap());
    }

    #[test]
    fn principals_do_not_share_records() {
        let root = TempDir::new().unwrap();
        let mut store = open(&root);
        store.add(0x11, "random://url").unwrap();

        let other = IndexStore::open(root.path(), "otheruser").unwrap();
        assert_matches!(Err(Error::NotFound), other.get_uri(0x11));
    }
}
