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

//! Proof-of-work nonce search.
//!
//! Only the nonce varies between attempts, so the header encoding is
//! split once into the bytes before and after the nonce atom; each
//! attempt re-serializes nothing but the nonce itself.

use ethereum_types::H256;
use parity_bytes::Bytes;
use planetkey::sha256;
use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicBool, Ordering};

/// A header encoding split around its nonce atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    prefix: Bytes,
    suffix: Bytes,
}

impl Stamp {
    /// Recover the split from two encodings of the same header that
    /// differ only in the nonce: one with an empty nonce, one with a
    /// single-byte nonce. The first differing byte is the first byte of
    /// the nonce's length prefix.
    pub fn from_encodings(empty_nonce: &[u8], one_byte_nonce: &[u8]) -> Stamp {
        let split = empty_nonce
            .iter()
            .zip(one_byte_nonce)
            .take_while(|(a, b)| a == b)
            .count();
        Stamp {
            prefix: empty_nonce[..split].to_vec(),
            // The empty nonce encodes as the two bytes `0:`.
            suffix: empty_nonce[split + 2..].to_vec(),
        }
    }

    /// The header digest for `nonce`.
    pub fn digest(&self, nonce: &[u8]) -> H256 {
        let mut stamped =
            Vec::with_capacity(self.prefix.len() + nonce.len() + self.suffix.len() + 4);
        stamped.extend_from_slice(&self.prefix);
        stamped.extend_from_slice(nonce.len().to_string().as_bytes());
        stamped.push(b':');
        stamped.extend_from_slice(nonce);
        stamped.extend_from_slice(&self.suffix);
        sha256(&stamped)
    }
}

/// Whether `hash`, read MSB-first, carries at least `difficulty` leading
/// zero bits.
pub fn check_nonce(hash: &H256, difficulty: u64) -> bool {
    if difficulty == 0 {
        return true;
    }
    if difficulty > 256 {
        return false;
    }
    leading_zero_bits(hash) >= difficulty
}

fn leading_zero_bits(hash: &H256) -> u64 {
    let mut bits = 0u64;
    for byte in hash.as_bytes() {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += u64::from(byte.leading_zeros());
            break;
        }
    }
    bits
}

/// Search a nonce whose stamped digest satisfies `difficulty`.
///
/// `cancel` is observed between attempts; a cancelled search returns
/// `None` and leaves no other trace.
pub fn answer(stamp: &Stamp, difficulty: u64, cancel: &AtomicBool) -> Option<(Bytes, H256)> {
    let mut counter: u64 = thread_rng().gen();
    loop {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let nonce = counter.to_le_bytes();
        let digest = stamp.digest(&nonce);
        if check_nonce(&digest, difficulty) {
            return Some((nonce.to_vec(), digest));
        }
        counter = counter.wrapping_add(1);
    }
}
