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

//! Peer synchronization primitives.
//!
//! The engine never opens a socket; a pluggable peer protocol calls the
//! handlers on `BlockChain` and exchanges [`BlockLocator`]s to find how
//! far two replicas have diverged.

use ethereum_types::H256;
use planet_types::BlockNumber;

/// How many hashes `find_next_hashes` yields when the caller does not
/// say otherwise.
pub const DEFAULT_FIND_NEXT_HASHES_COUNT: usize = 500;

/// A sparse, tip-first sample of a chain's hashes.
///
/// Offsets from the tip double as the sample descends (tip, tip-1,
/// tip-3, tip-7, …), ending at genesis, so two peers can locate their
/// common prefix in logarithmically few hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocator(Vec<H256>);

impl BlockLocator {
    /// Wrap already-sampled hashes, newest first.
    pub fn new(hashes: Vec<H256>) -> Self {
        BlockLocator(hashes)
    }

    /// The sampled hashes, newest first.
    pub fn hashes(&self) -> &[H256] {
        &self.0
    }
}

/// The index sample a locator takes of a chain whose tip is at
/// `tip_index`.
pub(crate) fn locator_indexes(tip_index: BlockNumber) -> Vec<BlockNumber> {
    let mut indexes = Vec::new();
    let mut offset: BlockNumber = 0;
    loop {
        if offset >= tip_index {
            indexes.push(0);
            return indexes;
        }
        indexes.push(tip_index - offset);
        offset = offset * 2 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_gaps_double() {
        assert_eq!(locator_indexes(0), vec![0]);
        assert_eq!(locator_indexes(1), vec![1, 0]);
        assert_eq!(locator_indexes(7), vec![7, 6, 4, 0]);
        assert_eq!(locator_indexes(100), vec![100, 99, 97, 93, 85, 69, 37, 0]);
    }

    #[test]
    fn sample_always_ends_at_genesis() {
        for tip in 0..200u64 {
            let indexes = locator_indexes(tip);
            assert_eq!(indexes.first(), Some(&tip));
            assert_eq!(indexes.last(), Some(&0));
            // Strictly descending.
            for pair in indexes.windows(2) {
                assert!(pair[0] > pair[1]);
            }
        }
    }
}
