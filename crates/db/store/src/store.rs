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

//! The storage contract.

use crate::{Error, Result};
use ethereum_types::{Address, H256};
use planet_types::{
    action::{Action, StateDelta, StateKey},
    block::Block,
    chain_id::ChainId,
    transaction::{Transaction, TxId},
    BlockNumber,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The persistence contract the chain engine is written against.
///
/// Every operation must be atomic under concurrent callers; `put_tx`
/// and `put_block` in particular must be safe under unbounded
/// parallelism. Blocks and transactions are content-addressed and
/// shared between chains; indices, state references, and nonce tallies
/// are per-chain and die with [`delete_chain_id`](Store::delete_chain_id).
pub trait Store<A: Action>: Send + Sync {
    /// Every chain id this store has recorded.
    fn list_chain_ids(&self) -> Result<Vec<ChainId>>;

    /// The chain currently marked canonical, if any.
    fn get_canonical_chain_id(&self) -> Result<Option<ChainId>>;

    /// Mark `id` canonical.
    fn set_canonical_chain_id(&self, id: ChainId) -> Result<()>;

    /// Drop `id`'s index, state references, and nonce tally. Blocks and
    /// transactions survive. Idempotent.
    fn delete_chain_id(&self, id: ChainId) -> Result<()>;

    /// Append `hash` to `chain`'s index and return its 0-based
    /// position, which is strictly one past the previous length.
    fn append_index(&self, chain: ChainId, hash: H256) -> Result<BlockNumber>;

    /// Length of `chain`'s index.
    fn count_index(&self, chain: ChainId) -> Result<u64>;

    /// The hash at `offset`; negative offsets count from the tail.
    fn index_block_hash(&self, chain: ChainId, offset: i64) -> Result<Option<H256>>;

    /// Index hashes genesis-first, starting at `offset`, at most
    /// `limit` of them.
    fn iterate_indexes(
        &self,
        chain: ChainId,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<H256>>;

    /// Record a block under its hash.
    fn put_block(&self, block: &Block<A>) -> Result<()>;

    /// Fetch a block by hash.
    fn get_block(&self, hash: H256) -> Result<Option<Block<A>>>;

    /// Remove a block; `false` when it was absent.
    fn delete_block(&self, hash: H256) -> Result<bool>;

    /// Whether a block is present.
    fn contains_block(&self, hash: H256) -> Result<bool>;

    /// A stored block's height, without materializing it.
    fn get_block_index(&self, hash: H256) -> Result<Option<BlockNumber>>;

    /// Every stored block hash, in no particular order.
    fn iterate_block_hashes(&self) -> Result<Vec<H256>>;

    /// Number of stored blocks.
    fn count_blocks(&self) -> Result<u64>;

    /// Record a transaction under its id.
    fn put_tx(&self, tx: &Transaction<A>) -> Result<()>;

    /// Fetch a transaction by id.
    fn get_tx(&self, id: TxId) -> Result<Option<Transaction<A>>>;

    /// Remove a transaction; `false` when it was absent.
    fn delete_tx(&self, id: TxId) -> Result<bool>;

    /// Whether a transaction is present.
    fn contains_tx(&self, id: TxId) -> Result<bool>;

    /// Every stored transaction id, in no particular order.
    fn iterate_tx_ids(&self) -> Result<Vec<TxId>>;

    /// Number of stored transactions.
    fn count_txs(&self) -> Result<u64>;

    /// Stage transaction ids; the flag marks them broadcastable or
    /// quarantined.
    fn stage_tx_ids(&self, ids: &BTreeMap<TxId, bool>) -> Result<()>;

    /// Remove ids from the staged set.
    fn unstage_tx_ids(&self, ids: &BTreeSet<TxId>) -> Result<()>;

    /// Staged ids; with `broadcastable_only`, quarantined ids are
    /// skipped.
    fn iterate_staged_tx_ids(&self, broadcastable_only: bool) -> Result<Vec<TxId>>;

    /// Record the post-state of every key a block touched.
    fn set_block_states(&self, hash: H256, states: &StateDelta) -> Result<()>;

    /// The touched-key post-states of a block.
    fn get_block_states(&self, hash: H256) -> Result<Option<StateDelta>>;

    /// Record that `block_hash` (at `block_index`) wrote each key in
    /// `keys` on `chain`. Idempotent per `(chain, key, hash)`.
    fn store_state_reference(
        &self,
        chain: ChainId,
        keys: &BTreeSet<StateKey>,
        block_hash: H256,
        block_index: BlockNumber,
    ) -> Result<()>;

    /// The newest reference to `key` at or below `at_block`'s height.
    fn lookup_state_reference(
        &self,
        chain: ChainId,
        key: &str,
        at_block: &Block<A>,
    ) -> Result<Option<(H256, BlockNumber)>>;

    /// References to `key` within the inclusive height bounds,
    /// descending by height, at most `limit` of them. Fails with
    /// [`Error::Range`] when the bounds are inverted.
    fn iterate_state_references(
        &self,
        chain: ChainId,
        key: &str,
        lowest_index: Option<BlockNumber>,
        highest_index: Option<BlockNumber>,
        limit: Option<usize>,
    ) -> Result<Vec<(H256, BlockNumber)>>;

    /// Every key with at least one reference on `chain`.
    fn list_state_keys(&self, chain: ChainId) -> Result<Vec<StateKey>>;

    /// All references within the inclusive height bounds, per key,
    /// ascending by height.
    fn list_all_state_references(
        &self,
        chain: ChainId,
        lowest_index: Option<BlockNumber>,
        highest_index: Option<BlockNumber>,
    ) -> Result<HashMap<StateKey, Vec<H256>>>;

    /// Replay `source`'s references at or below the branchpoint's
    /// height into `destination`; later references are dropped.
    ///
    /// Fails with [`Error::ChainIdNotFound`] only when `source` has no
    /// recorded identity; a source that exists but holds no references
    /// succeeds. The caller creates `destination`'s index separately.
    fn fork_state_references(
        &self,
        source: ChainId,
        destination: ChainId,
        branchpoint: &Block<A>,
    ) -> Result<()>;

    /// The number of `signer`'s transactions `chain` has absorbed;
    /// 0 for unseen signers.
    fn get_tx_nonce(&self, chain: ChainId, signer: Address) -> Result<u64>;

    /// Advance `signer`'s tally by `delta`.
    fn increase_tx_nonce(&self, chain: ChainId, signer: Address, delta: u64) -> Result<()>;

    /// Every signer tally on `chain`.
    fn list_tx_nonces(&self, chain: ChainId) -> Result<HashMap<Address, u64>>;

    /// Bulk-copy everything into `target`, which must not hold any
    /// chain yet.
    ///
    /// Written against the contract alone, so any two backends can
    /// exchange contents.
    fn copy_to(&self, target: &dyn Store<A>) -> Result<()> {
        if !target.list_chain_ids()?.is_empty() {
            return Err(Error::NonEmptyDestination);
        }

        for hash in self.iterate_block_hashes()? {
            if let Some(block) = self.get_block(hash)? {
                target.put_block(&block)?;
            }
            if let Some(states) = self.get_block_states(hash)? {
                target.set_block_states(hash, &states)?;
            }
        }
        for id in self.iterate_tx_ids()? {
            if let Some(tx) = self.get_tx(id)? {
                target.put_tx(&tx)?;
            }
        }

        for chain in self.list_chain_ids()? {
            for hash in self.iterate_indexes(chain, 0, None)? {
                target.append_index(chain, hash)?;
            }
            for key in self.list_state_keys(chain)? {
                let mut references =
                    self.iterate_state_references(chain, &key, None, None, None)?;
                references.reverse();
                let keys: BTreeSet<StateKey> = Some(key).into_iter().collect();
                for (hash, index) in references {
                    target.store_state_reference(chain, &keys, hash, index)?;
                }
            }
            for (signer, nonce) in self.list_tx_nonces(chain)? {
                target.increase_tx_nonce(chain, signer, nonce)?;
            }
        }

        let broadcastable: BTreeSet<TxId> =
            self.iterate_staged_tx_ids(true)?.into_iter().collect();
        let staged: BTreeMap<TxId, bool> = self
            .iterate_staged_tx_ids(false)?
            .into_iter()
            .map(|id| (id, broadcastable.contains(&id)))
            .collect();
        if !staged.is_empty() {
            target.stage_tx_ids(&staged)?;
        }

        if let Some(canonical) = self.get_canonical_chain_id()? {
            target.set_canonical_chain_id(canonical)?;
        }
        Ok(())
    }
}
