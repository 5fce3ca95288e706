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

//! Consensus policy seam.
//!
//! Difficulty scheduling and any extra acceptance rules live outside the
//! engine; the engine only asks the policy what the next block must look
//! like. The [`NullPolicy`] keeps a constant difficulty and is what
//! tests and single-host embedders start from.

use crate::error::Result;
use planet_types::{action::Action, block::Block, BlockNumber};

/// A read-only window onto one chain, as handed to policies.
pub trait ChainView<A: Action> {
    /// Number of blocks in the chain.
    fn count(&self) -> u64;

    /// The block at `index`, if present.
    fn block(&self, index: BlockNumber) -> Option<Block<A>>;

    /// The newest block, if any.
    fn tip(&self) -> Option<Block<A>> {
        self.count().checked_sub(1).and_then(|index| self.block(index))
    }
}

/// External consensus rules the engine consults before accepting a
/// block.
pub trait BlockPolicy<A: Action>: Send + Sync {
    /// The difficulty required of the block that would extend `chain`.
    fn get_next_difficulty(&self, chain: &dyn ChainView<A>) -> u64;

    /// Additional acceptance rules for `block` as the next block of
    /// `chain`; the engine's structural validation has already passed.
    fn validate_next_block(&self, chain: &dyn ChainView<A>, block: &Block<A>) -> Result<()>;

    /// An action the engine runs once per block after all transactions,
    /// with the miner as signer. Used for miner rewards and the like.
    fn block_action(&self) -> Option<A> {
        None
    }
}

/// A policy with a constant difficulty, no extra rules, and optionally a
/// block action.
pub struct NullPolicy<A> {
    difficulty: u64,
    block_action: Option<A>,
}

impl<A> NullPolicy<A> {
    /// A policy requiring `difficulty` of every non-genesis block.
    pub fn new(difficulty: u64) -> Self {
        NullPolicy {
            difficulty,
            block_action: None,
        }
    }

    /// Attach a per-block action.
    pub fn with_block_action(mut self, action: A) -> Self {
        self.block_action = Some(action);
        self
    }
}

impl<A: Action> BlockPolicy<A> for NullPolicy<A> {
    fn get_next_difficulty(&self, chain: &dyn ChainView<A>) -> u64 {
        if chain.count() == 0 {
            0
        } else {
            self.difficulty
        }
    }

    fn validate_next_block(&self, _chain: &dyn ChainView<A>, _block: &Block<A>) -> Result<()> {
        Ok(())
    }

    fn block_action(&self) -> Option<A> {
        self.block_action.clone()
    }
}
