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

//! Confirmation-delayed rendering.

use crate::{
    error::{Error, Result},
    render::{emit, Renderer},
};
use ethereum_types::{H256, U256};
use log::{debug, warn};
use parking_lot::Mutex;
use planet_store::Store;
use planet_types::{
    action::{Action, ActionContext, ActionError, StateDelta},
    block::Block,
};
use std::{
    collections::HashMap,
    sync::Arc,
    thread::{self, ThreadId},
};

/// A renderer decorator that withholds a block's events until the block
/// has a configured number of descendants.
///
/// Events stream in as the engine renders; the decorator buffers them
/// per block and keeps a *recognized tip* that trails the real tip by
/// the confirmation depth. Whenever confirmations move the recognized
/// tip, the buffered events along the tip path flush to the inner
/// renderer: as a plain block bracket when the path only ascends, or as
/// a full reorg bracket (unrendering what the abandoned branch had
/// already flushed) when the recognized tip jumps branches. Event order
/// within a block is never disturbed; only whole-block delivery is
/// delayed.
///
/// Mining and peer-receive flows may interleave on different threads,
/// so in-flight events live in per-thread flow buffers and reach the
/// shared per-block map only on `render_block_end` / `render_reorg_end`.
pub struct DelayedRenderer<A: Action> {
    inner: Arc<dyn Renderer<A>>,
    store: Arc<dyn Store<A>>,
    confirmations: u64,
    state: Mutex<DelayedState<A>>,
    flows: Mutex<HashMap<ThreadId, Vec<BufferedEvent<A>>>>,
    total_difficulties: Mutex<HashMap<H256, U256>>,
}

struct DelayedState<A> {
    /// Descendant tallies per block hash.
    confirmed: HashMap<H256, u64>,
    /// Events awaiting their block's confirmation.
    buffered: HashMap<H256, Vec<BufferedEvent<A>>>,
    /// Events already flushed, retained so a later branch jump can
    /// unrender them.
    delivered: HashMap<H256, Vec<BufferedEvent<A>>>,
    recognized: Option<Block<A>>,
}

enum BufferedEvent<A> {
    Action {
        action: A,
        context: ActionContext,
        next_states: StateDelta,
    },
    ActionError {
        action: A,
        context: ActionContext,
        error: ActionError,
    },
}

impl<A> BufferedEvent<A> {
    fn block_hash(&self) -> H256 {
        match self {
            BufferedEvent::Action { context, .. } => context.block_hash,
            BufferedEvent::ActionError { context, .. } => context.block_hash,
        }
    }
}

impl<A: Action> DelayedRenderer<A> {
    /// Wrap `inner`, delaying every block by `confirmations`
    /// descendants. A zero depth is meaningless and rejected.
    pub fn new(
        inner: Arc<dyn Renderer<A>>,
        store: Arc<dyn Store<A>>,
        confirmations: u64,
    ) -> Result<Self> {
        if confirmations == 0 {
            return Err(Error::InvalidConfirmations);
        }
        Ok(DelayedRenderer {
            inner,
            store,
            confirmations,
            state: Mutex::new(DelayedState {
                confirmed: HashMap::new(),
                buffered: HashMap::new(),
                delivered: HashMap::new(),
                recognized: None,
            }),
            flows: Mutex::new(HashMap::new()),
            total_difficulties: Mutex::new(HashMap::new()),
        })
    }

    /// The block the inner renderer currently believes is the tip.
    pub fn recognized_tip(&self) -> Option<Block<A>> {
        self.state.lock().recognized.clone()
    }

    fn buffer(&self, event: BufferedEvent<A>) {
        self.flows
            .lock()
            .entry(thread::current().id())
            .or_insert_with(Vec::new)
            .push(event);
    }

    /// Move this flow's events into the shared per-block map.
    fn merge_flow(&self) {
        let drained = self
            .flows
            .lock()
            .remove(&thread::current().id())
            .unwrap_or_default();
        if drained.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for event in drained {
            state
                .buffered
                .entry(event.block_hash())
                .or_insert_with(Vec::new)
                .push(event);
        }
    }

    fn parent_of(&self, block: &Block<A>) -> Option<Block<A>> {
        let hash = block.previous_hash()?;
        match self.store.get_block(hash) {
            Ok(parent) => parent,
            Err(err) => {
                warn!(target: "render", "store failed while walking ancestors: {err}");
                None
            }
        }
    }

    /// Cumulative difficulty from genesis to `block`, memoized.
    fn total_difficulty(&self, block: &Block<A>) -> U256 {
        let mut above = Vec::new();
        let mut cursor = block.clone();
        let mut base = U256::zero();
        loop {
            if let Some(cached) = self.total_difficulties.lock().get(&cursor.hash()) {
                base = *cached;
                break;
            }
            above.push(cursor.clone());
            match self.parent_of(&cursor) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        let mut cache = self.total_difficulties.lock();
        for block in above.into_iter().rev() {
            base = base + U256::from(block.difficulty());
            cache.insert(block.hash(), base);
        }
        base
    }

    /// Bump ancestor tallies for a freshly rendered block and promote
    /// the recognized tip if a block just became confirmed.
    fn confirm(&self, rendered: &Block<A>) {
        let mut state = self.state.lock();

        let mut cursor = self.lookup(rendered.previous_hash());
        for _ in 0..self.confirmations {
            let ancestor = match cursor {
                Some(block) => block,
                None => break,
            };
            *state.confirmed.entry(ancestor.hash()).or_insert(0) += 1;
            cursor = self.lookup(ancestor.previous_hash());
        }

        let recognized_difficulty = state
            .recognized
            .as_ref()
            .map(|block| self.total_difficulty(block));
        let promoted = state
            .confirmed
            .iter()
            .filter(|(_, tally)| **tally >= self.confirmations)
            .filter_map(|(hash, _)| self.lookup(Some(*hash)))
            .map(|block| (self.total_difficulty(&block), block))
            .filter(|(difficulty, _)| match recognized_difficulty {
                Some(current) => *difficulty > current,
                None => true,
            })
            .max_by_key(|(difficulty, block)| (*difficulty, block.index()))
            .map(|(_, block)| block);

        if let Some(promoted) = promoted {
            self.flush(&mut state, promoted);
        }
    }

    fn lookup(&self, hash: Option<H256>) -> Option<Block<A>> {
        self.store.get_block(hash?).ok().flatten()
    }

    /// Deliver everything between the old and new recognized tips.
    fn flush(&self, state: &mut DelayedState<A>, promoted: Block<A>) {
        let old = state.recognized.clone();
        let old_hash = old.as_ref().map(Block::hash);

        // Ascend from the promoted tip towards the old recognized tip.
        let mut ascending = Vec::new();
        let mut cursor = Some(promoted.clone());
        let mut met_old = false;
        while let Some(block) = cursor {
            if Some(block.hash()) == old_hash {
                met_old = true;
                break;
            }
            cursor = self.parent_of(&block);
            ascending.push(block);
        }
        ascending.reverse();

        if met_old || old.is_none() {
            debug!(
                target: "render",
                "recognized tip advances to #{} {:?} ({} blocks flushed)",
                promoted.index(),
                promoted.hash(),
                ascending.len(),
            );
            let old_ref = old.as_ref();
            emit("render_block", || self.inner.render_block(old_ref, &promoted));
            for block in &ascending {
                self.deliver(state, block);
            }
            emit("render_block_end", || {
                self.inner.render_block_end(old_ref, &promoted)
            });
        } else {
            // The recognized tip jumps branches: unrender what the
            // abandoned side had flushed, then render the new side.
            let old_tip = old.expect("branch jump implies an old recognized tip");
            let on_new_side: std::collections::HashSet<H256> =
                ascending.iter().map(Block::hash).collect();
            let mut abandoned = Vec::new();
            let mut cursor = Some(old_tip.clone());
            let mut branchpoint = None;
            while let Some(block) = cursor {
                if on_new_side.contains(&block.hash()) {
                    branchpoint = Some(block);
                    break;
                }
                cursor = self.parent_of(&block);
                abandoned.push(block);
            }
            let branchpoint = match branchpoint {
                Some(block) => block,
                None => {
                    warn!(target: "render", "no common ancestor while moving the recognized tip; events were lost");
                    state.recognized = Some(promoted);
                    return;
                }
            };
            let keep: Vec<Block<A>> = ascending
                .into_iter()
                .skip_while(|block| block.index() <= branchpoint.index())
                .collect();

            debug!(
                target: "render",
                "recognized tip reorganizes from #{} to #{} via #{}",
                old_tip.index(),
                promoted.index(),
                branchpoint.index(),
            );
            emit("render_reorg", || {
                self.inner.render_reorg(&old_tip, &promoted, &branchpoint)
            });
            emit("render_block", || {
                self.inner.render_block(Some(&old_tip), &promoted)
            });
            for block in &abandoned {
                self.unrender(state, block);
            }
            for block in &keep {
                self.deliver(state, block);
            }
            emit("render_block_end", || {
                self.inner.render_block_end(Some(&old_tip), &promoted)
            });
            emit("render_reorg_end", || {
                self.inner.render_reorg_end(&old_tip, &promoted, &branchpoint)
            });
        }

        state.recognized = Some(promoted);
    }

    /// Forward a block's buffered events and retain them as delivered.
    fn deliver(&self, state: &mut DelayedState<A>, block: &Block<A>) {
        let events = state.buffered.remove(&block.hash()).unwrap_or_default();
        for event in &events {
            match event {
                BufferedEvent::Action {
                    action,
                    context,
                    next_states,
                } => emit("render_action", || {
                    self.inner.render_action(action, context, next_states)
                }),
                BufferedEvent::ActionError {
                    action,
                    context,
                    error,
                } => emit("render_action_error", || {
                    self.inner.render_action_error(action, context, error)
                }),
            }
        }
        state.delivered.insert(block.hash(), events);
    }

    /// Replay a delivered block's events backwards as unrenders.
    fn unrender(&self, state: &mut DelayedState<A>, block: &Block<A>) {
        let events = state.delivered.remove(&block.hash()).unwrap_or_default();
        for event in events.iter().rev() {
            match event {
                BufferedEvent::Action {
                    action,
                    context,
                    next_states,
                } => emit("unrender_action", || {
                    self.inner.unrender_action(action, context, next_states)
                }),
                BufferedEvent::ActionError {
                    action,
                    context,
                    error,
                } => emit("unrender_action_error", || {
                    self.inner.unrender_action_error(action, context, error)
                }),
            }
        }
    }
}

impl<A: Action> Renderer<A> for DelayedRenderer<A> {
    fn render_block(&self, _old_tip: Option<&Block<A>>, _new_tip: &Block<A>) {}

    fn render_block_end(&self, _old_tip: Option<&Block<A>>, new_tip: &Block<A>) {
        self.merge_flow();
        self.confirm(new_tip);
    }

    fn render_reorg(&self, _old_tip: &Block<A>, _new_tip: &Block<A>, _branchpoint: &Block<A>) {}

    fn render_reorg_end(&self, _old_tip: &Block<A>, _new_tip: &Block<A>, _branchpoint: &Block<A>) {
        self.merge_flow();
    }

    fn render_action(&self, action: &A, context: &ActionContext, next_states: &StateDelta) {
        self.buffer(BufferedEvent::Action {
            action: action.clone(),
            context: context.clone(),
            next_states: next_states.clone(),
        });
    }

    fn render_action_error(&self, action: &A, context: &ActionContext, error: &ActionError) {
        self.buffer(BufferedEvent::ActionError {
            action: action.clone(),
            context: context.clone(),
            error: error.clone(),
        });
    }

    // Engine-level unrenders concern blocks still inside the
    // confirmation window; their buffered events simply never flush.
    fn unrender_action(&self, _action: &A, _context: &ActionContext, _next_states: &StateDelta) {}

    fn unrender_action_error(&self, _action: &A, _context: &ActionContext, _error: &ActionError) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::BlockChain,
        policy::NullPolicy,
        test_helpers::{attack, genesis, not_cancelled, RecordingRenderer, RenderLog, TestAction},
    };
    use planet_bencodex::Value;
    use planet_store::MemoryStore;
    use planet_types::action::StateReader;
    use planetkey::{Generator, Random};
    use std::collections::BTreeSet;

    struct NoState;

    impl StateReader for NoState {
        fn read(&self, _key: &str) -> Option<Value> {
            None
        }
    }

    fn context(block: &Block<TestAction>) -> ActionContext {
        ActionContext::new(
            ethereum_types::Address::zero(),
            block.miner(),
            block.index(),
            block.hash(),
            0,
            Arc::new(NoState),
        )
    }

    fn mined(
        index: u64,
        parent: Option<&Block<TestAction>>,
        miner: u64,
    ) -> Block<TestAction> {
        let difficulty = if index == 0 { 0 } else { 1 };
        Block::mine(
            index,
            difficulty,
            Some(ethereum_types::Address::from_low_u64_be(miner)),
            parent.map(Block::hash),
            planet_types::now(),
            vec![],
            &not_cancelled(),
        )
        .unwrap()
    }

    #[test]
    fn zero_confirmations_are_rejected() {
        let store: Arc<dyn Store<TestAction>> = Arc::new(MemoryStore::new());
        match DelayedRenderer::new(RecordingRenderer::new(), store, 0) {
            Err(Error::InvalidConfirmations) => {}
            other => panic!("expected rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn events_flush_only_after_enough_confirmations() {
        let player = Random.generate();
        let recipient = player.address();
        let updated: BTreeSet<ethereum_types::Address> =
            Some(recipient).into_iter().collect();

        let recorder = RecordingRenderer::new();
        let store = Arc::new(MemoryStore::<TestAction>::new());
        let delayed = Arc::new(
            DelayedRenderer::new(
                recorder.clone(),
                store.clone() as Arc<dyn Store<TestAction>>,
                3,
            )
            .unwrap(),
        );
        let genesis_block = genesis(None);
        let chain = BlockChain::new(
            Arc::new(NullPolicy::new(1)),
            store as Arc<dyn Store<TestAction>>,
            genesis_block.clone(),
            vec![delayed.clone()],
        )
        .unwrap();

        // Genesis rendered into the delay buffer; nothing reaches the
        // inner renderer yet.
        assert!(recorder.snapshot().is_empty());

        chain
            .make_transaction(&player, updated, vec![attack("sword", "goblin", recipient)])
            .unwrap();
        let second = chain.mine_block(recipient, &not_cancelled()).unwrap();
        chain.mine_block(recipient, &not_cancelled()).unwrap();
        assert!(recorder.snapshot().is_empty());
        assert_eq!(delayed.recognized_tip(), None);

        // The third descendant confirms genesis, which becomes the
        // recognized tip.
        chain.mine_block(recipient, &not_cancelled()).unwrap();
        assert_eq!(
            recorder.take(),
            vec![
                RenderLog::Block {
                    old: None,
                    new: genesis_block.hash(),
                },
                RenderLog::BlockEnd {
                    old: None,
                    new: genesis_block.hash(),
                },
            ]
        );
        assert_eq!(delayed.recognized_tip(), Some(genesis_block.clone()));

        // The next block confirms the second one, flushing its action.
        chain.mine_block(recipient, &not_cancelled()).unwrap();
        assert_eq!(
            recorder.take(),
            vec![
                RenderLog::Block {
                    old: Some(genesis_block.hash()),
                    new: second.hash(),
                },
                RenderLog::Action {
                    block: second.hash(),
                    index: 1,
                    what: "attack:sword:goblin".into(),
                },
                RenderLog::BlockEnd {
                    old: Some(genesis_block.hash()),
                    new: second.hash(),
                },
            ]
        );
        assert_eq!(delayed.recognized_tip(), Some(second));
    }

    #[test]
    fn recognized_tip_jumps_branches_with_a_reorg_bracket() {
        let recorder = RecordingRenderer::new();
        let store = Arc::new(MemoryStore::<TestAction>::new());

        let genesis_block = mined(0, None, 0);
        let a1 = mined(1, Some(&genesis_block), 1);
        let a2 = mined(2, Some(&a1), 1);
        let b1 = mined(1, Some(&genesis_block), 2);
        let b2 = mined(2, Some(&b1), 2);
        let b3 = mined(3, Some(&b2), 2);
        for block in [&genesis_block, &a1, &a2, &b1, &b2, &b3].iter() {
            store.put_block(block).unwrap();
        }

        let delayed = DelayedRenderer::new(
            recorder.clone(),
            store as Arc<dyn Store<TestAction>>,
            1,
        )
        .unwrap();

        let feed = |block: &Block<TestAction>,
                    old: Option<&Block<TestAction>>,
                    action: Option<TestAction>| {
            delayed.render_block(old, block);
            if let Some(action) = action {
                delayed.render_action(&action, &context(block), &StateDelta::new());
            }
            delayed.render_block_end(old, block);
        };

        let target = ethereum_types::Address::from_low_u64_be(5);
        feed(&genesis_block, None, None);
        feed(&a1, Some(&genesis_block), Some(attack("sword", "goblin", target)));
        feed(&a2, Some(&a1), None);
        recorder.take(); // genesis and a1 flushes

        assert_eq!(delayed.recognized_tip(), Some(a1.clone()));

        // The rival branch needs to reach one confirmation past a1's
        // total difficulty before the recognized tip jumps.
        feed(&b1, Some(&a2), Some(attack("bow", "orc", target)));
        feed(&b2, Some(&b1), Some(attack("staff", "orc", target)));
        assert_eq!(delayed.recognized_tip(), Some(a1.clone()));
        assert!(recorder.snapshot().is_empty());

        feed(&b3, Some(&b2), None);
        assert_eq!(delayed.recognized_tip(), Some(b2.clone()));
        assert_eq!(
            recorder.take(),
            vec![
                RenderLog::Reorg {
                    old: a1.hash(),
                    new: b2.hash(),
                    branchpoint: genesis_block.hash(),
                },
                RenderLog::Block {
                    old: Some(a1.hash()),
                    new: b2.hash(),
                },
                RenderLog::Unrender {
                    block: a1.hash(),
                    index: 1,
                    what: "attack:sword:goblin".into(),
                },
                RenderLog::Action {
                    block: b1.hash(),
                    index: 1,
                    what: "attack:bow:orc".into(),
                },
                RenderLog::Action {
                    block: b2.hash(),
                    index: 2,
                    what: "attack:staff:orc".into(),
                },
                RenderLog::BlockEnd {
                    old: Some(a1.hash()),
                    new: b2.hash(),
                },
                RenderLog::ReorgEnd {
                    old: a1.hash(),
                    new: b2.hash(),
                    branchpoint: genesis_block.hash(),
                },
            ]
        );
    }
}
