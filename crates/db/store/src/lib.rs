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

//! Chain storage.
//!
//! The store is a pure data substrate: blocks, transactions, per-chain
//! indices, per-key state references, staged transactions, and signer
//! nonce tallies. It knows nothing of consensus or actions; the engine
//! is written entirely against the [`Store`] trait, and backends only
//! have to honor its contract. An in-memory implementation ships here;
//! durable backends live with the embedding application.

mod error;
mod memory;
mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use store::Store;
