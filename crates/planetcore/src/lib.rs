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

//! OpenPlanet chain engine.
//!
//! A permissionless proof-of-work chain core for applications that
//! replicate a deterministic, keyed world state among untrusted peers.
//! Blocks carry signed transactions; transactions carry ordered,
//! application-defined actions; the heaviest chain wins, reorganizing
//! when it must. The engine sits between a pluggable [`Store`]
//! (`planet-store`) below and the host's [`render::Renderer`]s above,
//! with peer transport kept entirely outside.

pub mod chain;
pub mod error;
pub mod evaluation;
pub mod policy;
pub mod render;
pub mod sync;

pub use chain::BlockChain;
pub use error::{Error, Result};
pub use planet_store::{MemoryStore, Store};

#[cfg(test)]
pub(crate) mod test_helpers;
