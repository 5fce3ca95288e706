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

//! Shared fixtures for the engine tests: a small game-flavoured action,
//! a renderer that records everything it sees, and chain constructors.

use crate::{
    chain::BlockChain,
    policy::NullPolicy,
    render::Renderer,
};
use ethereum_types::{Address, H256};
use parking_lot::Mutex;
use planet_bencodex::{Key, Value};
use planet_store::MemoryStore;
use planet_types::{
    action::{Action, ActionContext, ActionError, ActionLoadError, StateDelta},
    address_state_key,
    block::Block,
    BlockNumber,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{atomic::AtomicBool, Arc},
};

/// A toy combat action: attacking records the weapon used and the
/// target hit under the target address's state. `Explode` always
/// fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestAction {
    Attack {
        weapon: String,
        target: String,
        target_address: Address,
    },
    Explode,
}

pub fn attack(weapon: &str, target: &str, target_address: Address) -> TestAction {
    TestAction::Attack {
        weapon: weapon.into(),
        target: target.into(),
        target_address,
    }
}

fn string_set(state: Option<&Value>, field: &str) -> BTreeSet<String> {
    state
        .and_then(|value| value.get(field))
        .and_then(Value::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_text)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(set: &BTreeSet<String>) -> Value {
    Value::List(set.iter().map(|item| Value::Text(item.clone())).collect())
}

impl Action for TestAction {
    fn plain_value(&self) -> Value {
        let mut map = BTreeMap::new();
        match self {
            TestAction::Attack {
                weapon,
                target,
                target_address,
            } => {
                map.insert(Key::from("type"), Value::from("attack"));
                map.insert(Key::from("weapon"), Value::Text(weapon.clone()));
                map.insert(Key::from("target"), Value::Text(target.clone()));
                map.insert(
                    Key::from("target_address"),
                    Value::Binary(target_address.as_bytes().to_vec()),
                );
            }
            TestAction::Explode => {
                map.insert(Key::from("type"), Value::from("explode"));
            }
        }
        Value::Dictionary(map)
    }

    fn load_plain_value(value: &Value) -> Result<Self, ActionLoadError> {
        match value.get("type").and_then(Value::as_text) {
            Some("attack") => {
                let weapon = value
                    .get("weapon")
                    .and_then(Value::as_text)
                    .ok_or_else(|| ActionLoadError::new("attack lacks a weapon"))?;
                let target = value
                    .get("target")
                    .and_then(Value::as_text)
                    .ok_or_else(|| ActionLoadError::new("attack lacks a target"))?;
                let target_address = value
                    .get("target_address")
                    .and_then(Value::as_binary)
                    .filter(|bytes| bytes.len() == 20)
                    .map(Address::from_slice)
                    .ok_or_else(|| ActionLoadError::new("attack lacks a target address"))?;
                Ok(TestAction::Attack {
                    weapon: weapon.into(),
                    target: target.into(),
                    target_address,
                })
            }
            Some("explode") => Ok(TestAction::Explode),
            _ => Err(ActionLoadError::new("unknown action type")),
        }
    }

    fn execute(&self, context: &ActionContext) -> Result<StateDelta, ActionError> {
        match self {
            TestAction::Attack {
                weapon,
                target,
                target_address,
            } => {
                let key = address_state_key(target_address);
                let previous = context.previous_state(&key);
                let mut used_weapons = string_set(previous.as_ref(), "used_weapons");
                let mut targets = string_set(previous.as_ref(), "targets");
                used_weapons.insert(weapon.clone());
                targets.insert(target.clone());

                let mut state = BTreeMap::new();
                state.insert(Key::from("used_weapons"), string_list(&used_weapons));
                state.insert(Key::from("targets"), string_list(&targets));

                let mut delta = StateDelta::new();
                delta.insert(key, Value::Dictionary(state));
                Ok(delta)
            }
            TestAction::Explode => Err(ActionError::new("exploded")),
        }
    }
}

/// Everything a renderer can observe, flattened for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderLog {
    Block { old: Option<H256>, new: H256 },
    BlockEnd { old: Option<H256>, new: H256 },
    Reorg { old: H256, new: H256, branchpoint: H256 },
    ReorgEnd { old: H256, new: H256, branchpoint: H256 },
    Action { block: H256, index: BlockNumber, what: String },
    ActionError { block: H256, index: BlockNumber, what: String },
    Unrender { block: H256, index: BlockNumber, what: String },
    UnrenderError { block: H256, index: BlockNumber, what: String },
}

fn describe(action: &TestAction) -> String {
    match action {
        TestAction::Attack { weapon, target, .. } => format!("attack:{weapon}:{target}"),
        TestAction::Explode => "explode".into(),
    }
}

/// Records every event in arrival order.
#[derive(Default)]
pub struct RecordingRenderer {
    logs: Mutex<Vec<RenderLog>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingRenderer::default())
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<RenderLog> {
        std::mem::take(&mut *self.logs.lock())
    }

    /// Peek without draining.
    pub fn snapshot(&self) -> Vec<RenderLog> {
        self.logs.lock().clone()
    }

    fn push(&self, log: RenderLog) {
        self.logs.lock().push(log);
    }
}

impl Renderer<TestAction> for RecordingRenderer {
    fn render_block(&self, old_tip: Option<&Block<TestAction>>, new_tip: &Block<TestAction>) {
        self.push(RenderLog::Block {
            old: old_tip.map(Block::hash),
            new: new_tip.hash(),
        });
    }

    fn render_block_end(&self, old_tip: Option<&Block<TestAction>>, new_tip: &Block<TestAction>) {
        self.push(RenderLog::BlockEnd {
            old: old_tip.map(Block::hash),
            new: new_tip.hash(),
        });
    }

    fn render_reorg(
        &self,
        old_tip: &Block<TestAction>,
        new_tip: &Block<TestAction>,
        branchpoint: &Block<TestAction>,
    ) {
        self.push(RenderLog::Reorg {
            old: old_tip.hash(),
            new: new_tip.hash(),
            branchpoint: branchpoint.hash(),
        });
    }

    fn render_reorg_end(
        &self,
        old_tip: &Block<TestAction>,
        new_tip: &Block<TestAction>,
        branchpoint: &Block<TestAction>,
    ) {
        self.push(RenderLog::ReorgEnd {
            old: old_tip.hash(),
            new: new_tip.hash(),
            branchpoint: branchpoint.hash(),
        });
    }

    fn render_action(
        &self,
        action: &TestAction,
        context: &ActionContext,
        _next_states: &StateDelta,
    ) {
        self.push(RenderLog::Action {
            block: context.block_hash,
            index: context.block_index,
            what: describe(action),
        });
    }

    fn render_action_error(
        &self,
        action: &TestAction,
        context: &ActionContext,
        _error: &ActionError,
    ) {
        self.push(RenderLog::ActionError {
            block: context.block_hash,
            index: context.block_index,
            what: describe(action),
        });
    }

    fn unrender_action(
        &self,
        action: &TestAction,
        context: &ActionContext,
        _next_states: &StateDelta,
    ) {
        self.push(RenderLog::Unrender {
            block: context.block_hash,
            index: context.block_index,
            what: describe(action),
        });
    }

    fn unrender_action_error(
        &self,
        action: &TestAction,
        context: &ActionContext,
        _error: &ActionError,
    ) {
        self.push(RenderLog::UnrenderError {
            block: context.block_hash,
            index: context.block_index,
            what: describe(action),
        });
    }
}

pub fn not_cancelled() -> AtomicBool {
    AtomicBool::new(false)
}

/// A fresh genesis block, optionally credited to a miner.
pub fn genesis(miner: Option<Address>) -> Block<TestAction> {
    Block::mine(0, 0, miner, None, planet_types::now(), vec![], &not_cancelled())
        .expect("genesis mining cannot be cancelled")
}

/// A fresh single-chain engine over a new in-memory store.
pub fn new_chain(
    difficulty: u64,
    genesis_block: Block<TestAction>,
    renderers: Vec<Arc<dyn Renderer<TestAction>>>,
) -> (Arc<MemoryStore<TestAction>>, BlockChain<TestAction>) {
    let _ = env_logger::try_init();
    let store = Arc::new(MemoryStore::new());
    let chain = BlockChain::new(
        Arc::new(NullPolicy::new(difficulty)),
        store.clone() as Arc<dyn crate::Store<TestAction>>,
        genesis_block,
        renderers,
    )
    .expect("fresh store accepts a genesis");
    (store, chain)
}
