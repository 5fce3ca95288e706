// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenPlanet.

// OpenPlanet is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenPlanet is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenPlanet.  If not, see <http://www.gnu.org/licenses/>.

//! Chain view identifier.

use rand::{thread_rng, RngCore};
use rustc_hex::ToHex;
use std::fmt;

/// Opaque 128-bit identifier of one chain view inside a store.
///
/// Several views may share block and transaction storage while keeping
/// distinct indices; a fresh id is allocated for every fork.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainId([u8; 16]);

impl ChainId {
    /// Wrap raw id bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        ChainId(bytes)
    }

    /// Allocate a random id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        thread_rng().fill_bytes(&mut bytes);
        ChainId(bytes)
    }

    /// The raw id bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hex: String = self.0.to_hex();
        write!(f, "{hex}")
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ChainId({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(ChainId::random(), ChainId::random());
    }

    #[test]
    fn displays_as_lowercase_hex() {
        let id = ChainId::new([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
    }
}
