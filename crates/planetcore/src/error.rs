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

//! General error types for the chain engine.

use ethereum_types::H256;
use planet_types::{block::BlockError, transaction::TransactionError};
use std::{error, fmt, result};

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Block-level validation failure.
    Block(BlockError),
    /// Transaction-level validation failure.
    Transaction(TransactionError),
    /// The store failed or refused an operation.
    Store(planet_store::Error),
    /// Two chains share no common ancestor.
    OrphanChain {
        /// Tip of the canonical chain.
        tip: H256,
        /// Tip of the unrelated branch.
        candidate: H256,
    },
    /// A referenced block is not in the store.
    UnknownBlock(H256),
    /// The store's chain starts from a different genesis block.
    GenesisMismatch {
        /// Genesis hash recorded in the store.
        stored: H256,
        /// Genesis hash the engine was constructed with.
        given: H256,
    },
    /// A delayed renderer was configured without a confirmation depth.
    InvalidConfirmations,
}

/// Engine result.
pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Block(err) => write!(f, "{err}"),
            Error::Transaction(err) => write!(f, "{err}"),
            Error::Store(err) => write!(f, "{err}"),
            Error::OrphanChain { tip, candidate } => write!(
                f,
                "no common ancestor between tip {tip} and candidate {candidate}"
            ),
            Error::UnknownBlock(hash) => write!(f, "block {hash} is not in the store"),
            Error::GenesisMismatch { stored, given } => write!(
                f,
                "store already starts from genesis {stored}, not {given}"
            ),
            Error::InvalidConfirmations => {
                write!(f, "confirmation depth must be greater than zero")
            }
        }
    }
}

impl error::Error for Error {}

impl From<BlockError> for Error {
    fn from(err: BlockError) -> Self {
        Error::Block(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<planet_store::Error> for Error {
    fn from(err: planet_store::Error) -> Self {
        Error::Store(err)
    }
}
