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

//! Application-defined actions and their evaluation context.

use crate::BlockNumber;
use ethereum_types::{Address, H256};
use planet_bencodex::Value;
use std::{collections::BTreeMap, error, fmt, sync::Arc};

/// A key into the world state: the lowercase hex of an address, or any
/// named slot.
pub type StateKey = String;

/// The keyed values one evaluation step wrote.
pub type StateDelta = BTreeMap<StateKey, Value>;

/// Lazy read access to the world state as of the parent of the block
/// being evaluated, overlaid with the deltas of earlier actions in the
/// same block.
pub trait StateReader: Send + Sync {
    /// The value under `key`, if anything has written it.
    fn read(&self, key: &str) -> Option<Value>;
}

/// Everything an action may observe. All inputs are derived from chain
/// data, so evaluation is deterministic across replicas and replays.
#[derive(Clone)]
pub struct ActionContext {
    /// Signer of the carrying transaction; the block's miner for a
    /// block-level action.
    pub signer: Address,
    /// Beneficiary of the block being evaluated.
    pub miner: Option<Address>,
    /// Height of the block being evaluated.
    pub block_index: BlockNumber,
    /// Hash of the block being evaluated.
    pub block_hash: H256,
    /// Per-action deterministic seed.
    pub random_seed: i32,
    previous_states: Arc<dyn StateReader>,
}

impl ActionContext {
    /// Assemble a context around a state reader.
    pub fn new(
        signer: Address,
        miner: Option<Address>,
        block_index: BlockNumber,
        block_hash: H256,
        random_seed: i32,
        previous_states: Arc<dyn StateReader>,
    ) -> Self {
        ActionContext {
            signer,
            miner,
            block_index,
            block_hash,
            random_seed,
            previous_states,
        }
    }

    /// Look up pre-action state. The lookup is lazy; untouched keys cost
    /// nothing.
    pub fn previous_state(&self, key: &str) -> Option<Value> {
        self.previous_states.read(key)
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("signer", &self.signer)
            .field("miner", &self.miner)
            .field("block_index", &self.block_index)
            .field("block_hash", &self.block_hash)
            .field("random_seed", &self.random_seed)
            .finish()
    }
}

/// A deterministic state transition carried by transactions.
///
/// Implementations must be pure over the context: equal contexts and
/// equal actions must produce equal deltas on every replica.
pub trait Action: Clone + fmt::Debug + Send + Sync + 'static {
    /// The canonical plain-value form embedded in transaction encodings.
    fn plain_value(&self) -> Value;

    /// Rebuild an action from its plain-value form.
    fn load_plain_value(value: &Value) -> Result<Self, ActionLoadError>
    where
        Self: Sized;

    /// Apply the action, returning every key it writes with the written
    /// value.
    fn execute(&self, context: &ActionContext) -> Result<StateDelta, ActionError>;
}

/// A failure raised by an action body.
///
/// Failures are recorded against the action and surfaced through the
/// renderer pipeline; they do not invalidate the containing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError(String);

impl ActionError {
    /// Wrap a failure message.
    pub fn new<T: Into<String>>(message: T) -> Self {
        ActionError(message.into())
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "action failed: {}", self.0)
    }
}

impl error::Error for ActionError {}

/// A plain value that does not describe a valid action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLoadError(String);

impl ActionLoadError {
    /// Wrap a load failure message.
    pub fn new<T: Into<String>>(message: T) -> Self {
        ActionLoadError(message.into())
    }
}

impl fmt::Display for ActionLoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "malformed action value: {}", self.0)
    }
}

impl error::Error for ActionLoadError {}
