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

//! The persistent identifier index.
//!
//! Each principal owns one key-value file under the mapping root which maps
//! opaque 64-bit folder/message identifiers ("fmids") to backend storage
//! URIs. Keys are the literal ASCII string `0x` followed by 16 lowercase hex
//! digits; a record which has been soft-deleted keeps its value but its key
//! is moved into a disjoint namespace by prefixing the `SOFT_DELETED:` tag.
//! At most one record (active or soft-deleted) exists per fmid.
//!
//! The file itself is a CBOR-serialised string map rewritten atomically on
//! every mutation. Reverse lookup is a linear scan over the map; this is a
//! deliberate simplicity tradeoff, acceptable because each principal's store
//! is small.

mod store;

pub use store::{DeleteMode, IndexStore, SOFT_DELETED_TAG};
