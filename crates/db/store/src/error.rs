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

use planet_types::{chain_id::ChainId, BlockNumber};
use std::{error, fmt, result};

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The referenced chain was never created in this store.
    ChainIdNotFound(ChainId),
    /// An inverted index range was requested.
    Range {
        /// Requested lower bound.
        lowest: BlockNumber,
        /// Requested upper bound.
        highest: BlockNumber,
    },
    /// Bulk copy into a store that already holds a chain.
    NonEmptyDestination,
    /// The backing medium failed.
    Fault(String),
}

/// Store result.
pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ChainIdNotFound(id) => write!(f, "chain {id} was never created"),
            Error::Range { lowest, highest } => {
                write!(f, "inverted range: lowest {lowest} > highest {highest}")
            }
            Error::NonEmptyDestination => {
                write!(f, "refusing to copy into a store that already holds a chain")
            }
            Error::Fault(message) => write!(f, "storage fault: {message}"),
        }
    }
}

impl error::Error for Error {}
