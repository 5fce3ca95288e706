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

//! Common record types of the chain core: blocks, transactions, actions,
//! chain identifiers, and the validation errors they raise.
//!
//! Everything here is canonically encodable; hashing and signing operate
//! on those encodings, never on in-memory layout.

use chrono::{DateTime, TimeZone, Utc};
use ethereum_types::Address;
use std::str::FromStr;

pub mod action;
pub mod block;
pub mod chain_id;
pub mod hashcash;
pub mod transaction;
pub mod unexpected;

/// Type for block heights.
pub type BlockNumber = u64;

/// Canonical timestamp rendering, `yyyy-MM-ddTHH:mm:ss.ffffffZ`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Render a timestamp in the canonical format.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a canonical timestamp.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Utc.datetime_from_str(text, TIMESTAMP_FORMAT)
}

/// The current time, truncated to the microsecond precision the
/// canonical format can carry.
pub fn now() -> DateTime<Utc> {
    use chrono::Timelike;

    let now = Utc::now();
    let micros = now.nanosecond() / 1_000 * 1_000;
    now.with_nanosecond(micros)
        .expect("truncation keeps nanoseconds in range")
}

/// The state key an address owns: its 40-char lowercase hex form.
pub fn address_state_key(address: &Address) -> String {
    format!("{address:x}")
}

/// The address owning `key`, when `key` is an address key.
pub fn state_key_address(key: &str) -> Option<Address> {
    if key.len() != 40 || !key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    Address::from_str(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips() {
        let stamp = now();
        let text = format_timestamp(&stamp);
        assert_eq!(parse_timestamp(&text).unwrap(), stamp);
    }

    #[test]
    fn timestamp_format_is_canonical() {
        let stamp = Utc.ymd(2021, 3, 2).and_hms_micro(1, 2, 3, 40_506);
        assert_eq!(format_timestamp(&stamp), "2021-03-02T01:02:03.040506Z");
    }

    #[test]
    fn address_keys_round_trip() {
        let address = Address::from_low_u64_be(0xdeadbeef);
        let key = address_state_key(&address);
        assert_eq!(key.len(), 40);
        assert_eq!(state_key_address(&key), Some(address));
    }

    #[test]
    fn non_address_keys_are_recognized() {
        assert_eq!(state_key_address("scoreboard"), None);
        // Uppercase hex is not an address key; keys are case-sensitive.
        let upper = "AB".repeat(20);
        assert_eq!(state_key_address(&upper), None);
    }
}
