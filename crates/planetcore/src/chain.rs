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

//! The chain engine.
//!
//! `BlockChain` owns the canonical view over a store: it validates and
//! appends blocks, mines over staged transactions, derives world state
//! through the state-reference index, reorganizes onto heavier branches,
//! and fans side effects out to the installed renderers. At most one
//! append runs at a time per engine; state reads only take the
//! canonical-id read lock and never wait on appends.

use crate::{
    error::{Error, Result},
    evaluation::{self, ActionEvaluation},
    policy::{BlockPolicy, ChainView},
    render::{emit, Renderer},
    sync::{locator_indexes, BlockLocator, DEFAULT_FIND_NEXT_HASHES_COUNT},
};
use chrono::Duration;
use ethereum_types::{Address, H256, U256};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use planet_bencodex::Value;
use planet_store::Store;
use planet_types::{
    action::{Action, StateDelta, StateKey},
    block::{Block, BlockError},
    chain_id::ChainId,
    transaction::{Transaction, TransactionError, TxId},
    unexpected::{Mismatch, OutOfBounds},
    BlockNumber,
};
use planetkey::{CryptoBackend, KeyPair};
use std::{
    cmp,
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{atomic::AtomicBool, Arc},
};

/// A proof-of-work chain bound to one store.
pub struct BlockChain<A: Action> {
    store: Arc<dyn Store<A>>,
    policy: Arc<dyn BlockPolicy<A>>,
    renderers: Vec<Arc<dyn Renderer<A>>>,
    backend: Arc<dyn CryptoBackend>,
    id: RwLock<ChainId>,
    append_lock: Mutex<()>,
}

/// Read-only window handed to the policy.
struct StoreChainView<A: Action> {
    store: Arc<dyn Store<A>>,
    chain: ChainId,
}

impl<A: Action> ChainView<A> for StoreChainView<A> {
    fn count(&self) -> u64 {
        self.store.count_index(self.chain).unwrap_or(0)
    }

    fn block(&self, index: BlockNumber) -> Option<Block<A>> {
        self.store
            .index_block_hash(self.chain, index as i64)
            .ok()
            .flatten()
            .and_then(|hash| self.store.get_block(hash).ok().flatten())
    }
}

impl<A: Action> BlockChain<A> {
    /// Open the chain recorded in `store`, or start one from `genesis`
    /// when the store is empty. Uses the process-wide crypto backend.
    pub fn new(
        policy: Arc<dyn BlockPolicy<A>>,
        store: Arc<dyn Store<A>>,
        genesis: Block<A>,
        renderers: Vec<Arc<dyn Renderer<A>>>,
    ) -> Result<Self> {
        Self::with_backend(policy, store, genesis, renderers, planetkey::default_backend())
    }

    /// Like [`new`](BlockChain::new) with an explicit crypto backend.
    pub fn with_backend(
        policy: Arc<dyn BlockPolicy<A>>,
        store: Arc<dyn Store<A>>,
        genesis: Block<A>,
        renderers: Vec<Arc<dyn Renderer<A>>>,
        backend: Arc<dyn CryptoBackend>,
    ) -> Result<Self> {
        let existing = match store.get_canonical_chain_id()? {
            Some(id) if store.count_index(id)? > 0 => Some(id),
            _ => None,
        };
        let chain = BlockChain {
            store,
            policy,
            renderers,
            backend,
            id: RwLock::new(existing.unwrap_or_else(ChainId::random)),
            append_lock: Mutex::new(()),
        };

        match existing {
            Some(id) => {
                let stored = chain
                    .store
                    .index_block_hash(id, 0)?
                    .expect("non-empty index has a genesis entry");
                if stored != genesis.hash() {
                    return Err(Error::GenesisMismatch {
                        stored,
                        given: genesis.hash(),
                    });
                }
                debug!(target: "chain", "opened existing chain {id} at height {}", chain.count()?);
            }
            None => {
                let id = chain.id();
                chain.store.set_canonical_chain_id(id)?;
                chain.append(genesis)?;
                debug!(target: "chain", "started new chain {id}");
            }
        }
        Ok(chain)
    }

    /// The canonical chain id.
    pub fn id(&self) -> ChainId {
        *self.id.read()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn Store<A>> {
        &self.store
    }

    /// The consensus policy.
    pub fn policy(&self) -> &Arc<dyn BlockPolicy<A>> {
        &self.policy
    }

    /// Chain length.
    pub fn count(&self) -> Result<u64> {
        Ok(self.store.count_index(self.id())?)
    }

    /// The newest block, if the chain is non-empty.
    pub fn tip(&self) -> Result<Option<Block<A>>> {
        self.block_at_offset(-1)
    }

    /// The genesis block, if the chain is non-empty.
    pub fn genesis(&self) -> Result<Option<Block<A>>> {
        self.block_at_offset(0)
    }

    /// The block at `index` on the canonical chain.
    pub fn block_at(&self, index: BlockNumber) -> Result<Option<Block<A>>> {
        self.block_at_offset(index as i64)
    }

    fn block_at_offset(&self, offset: i64) -> Result<Option<Block<A>>> {
        let id = self.id();
        match self.store.index_block_hash(id, offset)? {
            Some(hash) => Ok(Some(
                self.store
                    .get_block(hash)?
                    .ok_or(Error::UnknownBlock(hash))?,
            )),
            None => Ok(None),
        }
    }

    /// Validate and append `block` to the canonical chain, evaluating
    /// its actions and rendering the results.
    ///
    /// Rejection is atomic: a failing block leaves no store write
    /// behind.
    pub fn append(&self, block: Block<A>) -> Result<()> {
        let _guard = self.append_lock.lock();
        let id = self.id();
        self.append_to(id, block, true)
    }

    /// Append to an arbitrary chain view. Rendering is skipped while a
    /// forked chain catches up; the reorg itself renders later.
    fn append_to(&self, chain: ChainId, block: Block<A>, render: bool) -> Result<()> {
        block.validate(planet_types::now(), &*self.backend)?;

        let count = self.store.count_index(chain)?;
        if block.index() != count {
            return Err(Error::Block(BlockError::InvalidIndex(Mismatch {
                expected: count,
                found: block.index(),
            })));
        }

        let old_tip = match self.store.index_block_hash(chain, -1)? {
            Some(hash) => Some(
                self.store
                    .get_block(hash)?
                    .ok_or(Error::UnknownBlock(hash))?,
            ),
            None => None,
        };
        if let Some(parent) = &old_tip {
            if block.previous_hash() != Some(parent.hash()) {
                return Err(Error::Block(BlockError::InvalidPreviousHash {
                    expected: Some(parent.hash()),
                    found: block.previous_hash(),
                }));
            }
            if block.timestamp() <= parent.timestamp() {
                return Err(Error::Block(BlockError::InvalidTimestamp(OutOfBounds {
                    min: Some(*parent.timestamp()),
                    max: None,
                    found: *block.timestamp(),
                })));
            }
            let view = self.view_of(chain);
            let required = self.policy.get_next_difficulty(&view);
            if block.difficulty() < required {
                return Err(Error::Block(BlockError::InvalidDifficulty(OutOfBounds {
                    min: Some(required),
                    max: None,
                    found: block.difficulty(),
                })));
            }
            self.policy.validate_next_block(&view, &block)?;
        }

        // Nonces must be consecutive per signer across the whole chain,
        // counting earlier transactions of the same signer in this very
        // block.
        let mut in_block: HashMap<Address, u64> = HashMap::new();
        for tx in block.transactions() {
            let prior = in_block.entry(tx.signer()).or_insert(0);
            let expected = self.store.get_tx_nonce(chain, tx.signer())? + *prior;
            if tx.nonce() != expected {
                return Err(Error::Transaction(TransactionError::InvalidNonce {
                    signer: tx.signer(),
                    nonce: Mismatch {
                        expected,
                        found: tx.nonce(),
                    },
                    block_index: Some(block.index()),
                }));
            }
            *prior += 1;
        }

        let (evaluations, delta) =
            evaluation::evaluate_block(&self.store, chain, &block, self.policy.block_action())?;

        // All validation passed; now write, so failures above leave the
        // store untouched.
        self.store.put_block(&block)?;
        for tx in block.transactions() {
            self.store.put_tx(tx)?;
        }
        self.store.append_index(chain, block.hash())?;
        self.store.set_block_states(block.hash(), &delta)?;
        if !delta.is_empty() {
            let touched: BTreeSet<StateKey> = delta.keys().cloned().collect();
            self.store
                .store_state_reference(chain, &touched, block.hash(), block.index())?;
        }
        for tx in block.transactions() {
            self.store.increase_tx_nonce(chain, tx.signer(), 1)?;
        }
        let included: BTreeSet<TxId> = block.transactions().iter().map(Transaction::id).collect();
        if !included.is_empty() {
            self.store.unstage_tx_ids(&included)?;
        }

        debug!(
            target: "chain",
            "appended block #{} {:?} with {} txs to {chain}",
            block.index(),
            block.hash(),
            block.transactions().len(),
        );

        if render {
            self.render_append(old_tip.as_ref(), &block, &evaluations);
        }
        Ok(())
    }

    fn view_of(&self, chain: ChainId) -> StoreChainView<A> {
        StoreChainView {
            store: self.store.clone(),
            chain,
        }
    }

    fn render_append(
        &self,
        old_tip: Option<&Block<A>>,
        block: &Block<A>,
        evaluations: &[ActionEvaluation<A>],
    ) {
        for renderer in &self.renderers {
            emit("render_block", || renderer.render_block(old_tip, block));
        }
        self.render_evaluations(evaluations, false);
        for renderer in &self.renderers {
            emit("render_block_end", || {
                renderer.render_block_end(old_tip, block)
            });
        }
    }

    fn render_evaluations(&self, evaluations: &[ActionEvaluation<A>], unrender: bool) {
        let ordered: Vec<&ActionEvaluation<A>> = if unrender {
            evaluations.iter().rev().collect()
        } else {
            evaluations.iter().collect()
        };
        for evaluation in ordered {
            for renderer in &self.renderers {
                match (&evaluation.error, unrender) {
                    (None, false) => emit("render_action", || {
                        renderer.render_action(
                            &evaluation.action,
                            &evaluation.context,
                            &evaluation.output_delta,
                        )
                    }),
                    (Some(error), false) => emit("render_action_error", || {
                        renderer.render_action_error(&evaluation.action, &evaluation.context, error)
                    }),
                    (None, true) => emit("unrender_action", || {
                        renderer.unrender_action(
                            &evaluation.action,
                            &evaluation.context,
                            &evaluation.output_delta,
                        )
                    }),
                    (Some(error), true) => emit("unrender_action_error", || {
                        renderer.unrender_action_error(
                            &evaluation.action,
                            &evaluation.context,
                            error,
                        )
                    }),
                }
            }
        }
    }

    /// Stage signed transactions for inclusion in a future block; the
    /// flag marks them broadcastable.
    pub fn stage_transactions(&self, transactions: &[(Transaction<A>, bool)]) -> Result<()> {
        let mut staged = BTreeMap::new();
        for (tx, broadcastable) in transactions {
            self.store.put_tx(tx)?;
            staged.insert(tx.id(), *broadcastable);
        }
        self.store.stage_tx_ids(&staged)?;
        Ok(())
    }

    /// Withdraw transactions from staging.
    pub fn unstage_transactions(&self, ids: &BTreeSet<TxId>) -> Result<()> {
        Ok(self.store.unstage_tx_ids(ids)?)
    }

    /// The nonce `signer`'s next transaction should carry, counting
    /// both the chain tally and consecutively staged transactions.
    pub fn get_next_tx_nonce(&self, signer: Address) -> Result<u64> {
        let id = self.id();
        let mut next = self.store.get_tx_nonce(id, signer)?;
        let mut staged_nonces = BTreeSet::new();
        for tx_id in self.store.iterate_staged_tx_ids(false)? {
            if let Some(tx) = self.store.get_tx(tx_id)? {
                if tx.signer() == signer {
                    staged_nonces.insert(tx.nonce());
                }
            }
        }
        while staged_nonces.contains(&next) {
            next += 1;
        }
        Ok(next)
    }

    /// Sign a transaction with the engine's backend, using the next
    /// free nonce, and stage it broadcastable.
    pub fn make_transaction(
        &self,
        keypair: &KeyPair,
        updated_addresses: BTreeSet<Address>,
        actions: Vec<A>,
    ) -> Result<Transaction<A>> {
        let nonce = self.get_next_tx_nonce(keypair.address())?;
        let tx = Transaction::new(
            nonce,
            keypair,
            updated_addresses,
            actions,
            planet_types::now(),
            &*self.backend,
        )?;
        self.stage_transactions(&[(tx.clone(), true)])?;
        Ok(tx)
    }

    /// Mine the next block over the staged transactions and append it.
    ///
    /// `cancel` is observed between proof-of-work attempts; on
    /// cancellation nothing is appended and no renderer fires.
    pub fn mine_block(&self, miner: Address, cancel: &AtomicBool) -> Result<Block<A>> {
        let id = self.id();
        let index = self.store.count_index(id)?;
        let parent = self.block_at_offset(-1)?;
        let difficulty = if index == 0 {
            0
        } else {
            self.policy.get_next_difficulty(&self.view_of(id))
        };
        let timestamp = match &parent {
            Some(parent) => cmp::max(
                planet_types::now(),
                *parent.timestamp() + Duration::microseconds(1),
            ),
            None => planet_types::now(),
        };

        // Staged transactions enter in per-signer nonce order; gaps and
        // stale nonces stay behind.
        let mut by_signer: BTreeMap<Address, Vec<Transaction<A>>> = BTreeMap::new();
        for tx_id in self.store.iterate_staged_tx_ids(false)? {
            if let Some(tx) = self.store.get_tx(tx_id)? {
                by_signer.entry(tx.signer()).or_insert_with(Vec::new).push(tx);
            }
        }
        let mut transactions = Vec::new();
        for (signer, mut staged) in by_signer {
            staged.sort_by_key(Transaction::nonce);
            let mut expected = self.store.get_tx_nonce(id, signer)?;
            for tx in staged {
                if tx.nonce() == expected {
                    transactions.push(tx);
                    expected += 1;
                } else if tx.nonce() > expected {
                    break;
                }
            }
        }

        trace!(
            target: "miner",
            "mining block #{index} over {} staged txs at difficulty {difficulty}",
            transactions.len(),
        );
        let block = Block::mine(
            index,
            difficulty,
            Some(miner),
            parent.as_ref().map(Block::hash),
            timestamp,
            transactions,
            cancel,
        )?;
        info!(
            target: "miner",
            "mined block #{} {:?} with {} txs",
            block.index(),
            block.hash(),
            block.transactions().len(),
        );
        self.append(block.clone())?;
        Ok(block)
    }

    /// The world-state value under `key`, as of `at` (a canonical block
    /// hash) or the tip.
    pub fn get_state(&self, key: &str, at: Option<H256>) -> Result<Option<Value>> {
        let mut states = self.get_states(&[key.to_string()], at)?;
        Ok(states.remove(key))
    }

    /// Batched state lookup.
    pub fn get_states(&self, keys: &[StateKey], at: Option<H256>) -> Result<StateDelta> {
        let id = self.id();
        let at_block = match at {
            Some(hash) => self
                .store
                .get_block(hash)?
                .ok_or(Error::UnknownBlock(hash))?,
            None => match self.tip()? {
                Some(tip) => tip,
                None => return Ok(StateDelta::new()),
            },
        };

        let mut states = StateDelta::new();
        for key in keys {
            let reference = self.store.lookup_state_reference(id, key, &at_block)?;
            if let Some((hash, _)) = reference {
                if let Some(value) = self
                    .store
                    .get_block_states(hash)?
                    .and_then(|block_states| block_states.get(key).cloned())
                {
                    states.insert(key.clone(), value);
                }
            }
        }
        Ok(states)
    }

    /// The deepest common ancestor of two blocks reachable through the
    /// store.
    pub fn find_branchpoint(&self, left: &Block<A>, right: &Block<A>) -> Result<Block<A>> {
        let orphan = Error::OrphanChain {
            tip: left.hash(),
            candidate: right.hash(),
        };
        let mut left_cursor = left.clone();
        let mut right_cursor = right.clone();
        while left_cursor.index() > right_cursor.index() {
            left_cursor = self.parent_of(&left_cursor)?.ok_or_else(|| orphan.clone())?;
        }
        while right_cursor.index() > left_cursor.index() {
            right_cursor = self.parent_of(&right_cursor)?.ok_or_else(|| orphan.clone())?;
        }
        while left_cursor.hash() != right_cursor.hash() {
            match (
                self.parent_of(&left_cursor)?,
                self.parent_of(&right_cursor)?,
            ) {
                (Some(left_parent), Some(right_parent)) => {
                    left_cursor = left_parent;
                    right_cursor = right_parent;
                }
                _ => return Err(orphan),
            }
        }
        Ok(left_cursor)
    }

    fn parent_of(&self, block: &Block<A>) -> Result<Option<Block<A>>> {
        match block.previous_hash() {
            Some(hash) => Ok(Some(
                self.store
                    .get_block(hash)?
                    .ok_or(Error::UnknownBlock(hash))?,
            )),
            None => Ok(None),
        }
    }

    /// Cumulative proof-of-work from genesis to `block`.
    pub fn total_difficulty(&self, block: &Block<A>) -> Result<U256> {
        let mut sum = U256::from(block.difficulty());
        let mut cursor = block.clone();
        while let Some(parent) = self.parent_of(&cursor)? {
            sum = sum + U256::from(parent.difficulty());
            cursor = parent;
        }
        Ok(sum)
    }

    /// Fork a new chain view sharing everything up to and including
    /// `branchpoint`. The new chain inherits the index prefix, the
    /// state references at or below the branchpoint, and the nonce
    /// tallies the prefix implies.
    pub fn fork(&self, branchpoint: H256) -> Result<ChainId> {
        let id = self.id();
        let branchpoint = self
            .store
            .get_block(branchpoint)?
            .ok_or(Error::UnknownBlock(branchpoint))?;
        if self.store.index_block_hash(id, branchpoint.index() as i64)? != Some(branchpoint.hash())
        {
            return Err(Error::UnknownBlock(branchpoint.hash()));
        }

        let destination = ChainId::random();
        let prefix = self
            .store
            .iterate_indexes(id, 0, Some(branchpoint.index() as usize + 1))?;
        for hash in &prefix {
            self.store.append_index(destination, *hash)?;
        }
        self.store
            .fork_state_references(id, destination, &branchpoint)?;
        for hash in &prefix {
            let block = self
                .store
                .get_block(*hash)?
                .ok_or(Error::UnknownBlock(*hash))?;
            for tx in block.transactions() {
                self.store.increase_tx_nonce(destination, tx.signer(), 1)?;
            }
        }

        debug!(
            target: "chain",
            "forked {id} at #{} into {destination}",
            branchpoint.index(),
        );
        Ok(destination)
    }

    /// Make `destination` canonical, rendering the reorganization from
    /// the old tip when `render` is set, and drop the old chain id.
    pub fn swap(&self, destination: ChainId, render: bool) -> Result<()> {
        let _guard = self.append_lock.lock();
        self.swap_locked(destination, render)
    }

    fn swap_locked(&self, destination: ChainId, render: bool) -> Result<()> {
        let old_id = self.id();
        if old_id == destination {
            return Ok(());
        }
        let old_tip = self.tip()?;
        let new_tip = match self.store.index_block_hash(destination, -1)? {
            Some(hash) => self.store.get_block(hash)?,
            None => None,
        };

        *self.id.write() = destination;
        self.store.set_canonical_chain_id(destination)?;
        info!(target: "chain", "swapped canonical chain {old_id} for {destination}");

        if render {
            if let (Some(old_tip), Some(new_tip)) = (&old_tip, &new_tip) {
                if old_tip.hash() != new_tip.hash() {
                    let branchpoint = self.find_branchpoint(old_tip, new_tip)?;
                    self.render_reorg(old_id, destination, old_tip, new_tip, &branchpoint);
                }
            }
        }

        self.store.delete_chain_id(old_id)?;
        Ok(())
    }

    /// Emit the reorg bracket: unrender the abandoned side newest
    /// first, then render the adopted side oldest first.
    fn render_reorg(
        &self,
        old_id: ChainId,
        new_id: ChainId,
        old_tip: &Block<A>,
        new_tip: &Block<A>,
        branchpoint: &Block<A>,
    ) {
        for renderer in &self.renderers {
            emit("render_reorg", || {
                renderer.render_reorg(old_tip, new_tip, branchpoint)
            });
        }
        for renderer in &self.renderers {
            emit("render_block", || {
                renderer.render_block(Some(old_tip), new_tip)
            });
        }

        let mut index = old_tip.index();
        while index > branchpoint.index() {
            match self.evaluations_at(old_id, index) {
                Ok(evaluations) => self.render_evaluations(&evaluations, true),
                Err(err) => {
                    warn!(target: "render", "cannot unrender block #{index}: {err}; events were lost")
                }
            }
            index -= 1;
        }
        for index in branchpoint.index() + 1..=new_tip.index() {
            match self.evaluations_at(new_id, index) {
                Ok(evaluations) => self.render_evaluations(&evaluations, false),
                Err(err) => {
                    warn!(target: "render", "cannot render block #{index}: {err}; events were lost")
                }
            }
        }

        for renderer in &self.renderers {
            emit("render_block_end", || {
                renderer.render_block_end(Some(old_tip), new_tip)
            });
        }
        for renderer in &self.renderers {
            emit("render_reorg_end", || {
                renderer.render_reorg_end(old_tip, new_tip, branchpoint)
            });
        }
    }

    /// Re-derive the evaluations of the block at `index` on `chain`.
    /// Evaluation is deterministic, so this reproduces exactly what the
    /// original append observed.
    fn evaluations_at(
        &self,
        chain: ChainId,
        index: BlockNumber,
    ) -> Result<Vec<ActionEvaluation<A>>> {
        let hash = self
            .store
            .index_block_hash(chain, index as i64)?
            .ok_or(Error::Store(planet_store::Error::ChainIdNotFound(chain)))?;
        let block = self
            .store
            .get_block(hash)?
            .ok_or(Error::UnknownBlock(hash))?;
        let (evaluations, _) =
            evaluation::evaluate_block(&self.store, chain, &block, self.policy.block_action())?;
        Ok(evaluations)
    }

    /// Entry point for blocks arriving from the peer protocol.
    ///
    /// A block extending the tip appends directly. A block on a side
    /// branch is retained; once its branch outweighs the canonical
    /// chain the engine forks at the common ancestor, replays the
    /// branch, and swaps, rendering the reorganization. A branch whose
    /// ancestry cannot be traced fails with [`Error::OrphanChain`] for
    /// an unrelated history, or [`Error::UnknownBlock`] for a gap the
    /// peer protocol still has to fetch; retry once the gap closes.
    pub fn handle_received_block(&self, block: Block<A>) -> Result<()> {
        block.validate(planet_types::now(), &*self.backend)?;

        let _guard = self.append_lock.lock();
        let id = self.id();
        let tip = match self.tip()? {
            Some(tip) => tip,
            None => return self.append_to(id, block, true),
        };

        // Already on the canonical chain?
        if self.store.index_block_hash(id, block.index() as i64)? == Some(block.hash()) {
            trace!(target: "chain", "ignoring known block {:?}", block.hash());
            return Ok(());
        }
        if block.previous_hash() == Some(tip.hash()) {
            return self.append_to(id, block, true);
        }

        // Side branch: keep the block and weigh its branch.
        self.store.put_block(&block)?;
        let branchpoint = self.find_branchpoint(&tip, &block)?;
        let current = self.total_difficulty(&tip)?;
        let candidate = self.total_difficulty(&block)?;
        if candidate <= current {
            debug!(
                target: "chain",
                "branch at {:?} does not outweigh the tip ({candidate} <= {current})",
                block.hash(),
            );
            return Ok(());
        }

        info!(
            target: "chain",
            "reorganizing to heavier branch {:?} via #{}",
            block.hash(),
            branchpoint.index(),
        );
        let destination = self.fork(branchpoint.hash())?;
        let mut branch = Vec::new();
        let mut cursor = block;
        while cursor.hash() != branchpoint.hash() {
            let parent = self.parent_of(&cursor)?.ok_or(Error::OrphanChain {
                tip: tip.hash(),
                candidate: cursor.hash(),
            })?;
            branch.push(cursor);
            cursor = parent;
        }
        branch.reverse();
        for side_block in branch {
            self.append_to(destination, side_block, false)?;
        }
        self.swap_locked(destination, true)
    }

    /// Entry point for transactions arriving from the peer protocol.
    /// Valid transactions are stored and staged quarantined (the peer
    /// that sent them already broadcast them).
    pub fn handle_received_tx(&self, tx: Transaction<A>) -> Result<()> {
        tx.validate(&*self.backend)?;
        self.stage_transactions(&[(tx, false)])?;
        Ok(())
    }

    /// A tip-first sparse sample of the canonical chain for peer sync.
    pub fn get_locator(&self) -> Result<BlockLocator> {
        let id = self.id();
        let count = self.store.count_index(id)?;
        if count == 0 {
            return Ok(BlockLocator::new(Vec::new()));
        }
        let mut hashes = Vec::new();
        for index in locator_indexes(count - 1) {
            if let Some(hash) = self.store.index_block_hash(id, index as i64)? {
                hashes.push(hash);
            }
        }
        Ok(BlockLocator::new(hashes))
    }

    /// The canonical hashes a peer holding `locator` is missing: up to
    /// `count` hashes after the first locator entry found on the
    /// canonical chain, cut at `stop` inclusively.
    pub fn find_next_hashes(
        &self,
        locator: &BlockLocator,
        stop: Option<H256>,
        count: Option<usize>,
    ) -> Result<Vec<H256>> {
        let id = self.id();
        let mut start = 0usize;
        for hash in locator.hashes() {
            if let Some(index) = self.store.get_block_index(*hash)? {
                if self.store.index_block_hash(id, index as i64)? == Some(*hash) {
                    start = index as usize + 1;
                    break;
                }
            }
        }

        let limit = count.unwrap_or(DEFAULT_FIND_NEXT_HASHES_COUNT);
        let mut hashes = Vec::new();
        for hash in self.store.iterate_indexes(id, start, Some(limit))? {
            hashes.push(hash);
            if Some(hash) == stop {
                break;
            }
        }
        trace!(
            target: "sync",
            "supplying {} hashes from #{start}",
            hashes.len(),
        );
        Ok(hashes)
    }

    /// Materialize stored blocks for a peer; unknown hashes are
    /// skipped.
    pub fn get_blocks_by_hashes(&self, hashes: &[H256]) -> Result<Vec<Block<A>>> {
        let mut blocks = Vec::new();
        for hash in hashes {
            if let Some(block) = self.store.get_block(*hash)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }
}
