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

//! In-memory store.

use crate::{Error, Result, Store};
use ethereum_types::{Address, H256};
use log::trace;
use parking_lot::RwLock;
use planet_types::{
    action::{Action, StateDelta, StateKey},
    block::Block,
    chain_id::ChainId,
    transaction::{Transaction, TxId},
    BlockNumber,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A [`Store`] kept entirely in memory, for tests and embedders that do
/// not need durability.
///
/// One lock guards all tables, so every contract operation is a single
/// critical section and therefore atomic under concurrent callers.
pub struct MemoryStore<A> {
    inner: RwLock<Inner<A>>,
}

struct Inner<A> {
    canonical: Option<ChainId>,
    chains: HashMap<ChainId, ChainRecords>,
    blocks: HashMap<H256, Block<A>>,
    txs: HashMap<TxId, Transaction<A>>,
    staged: BTreeMap<TxId, bool>,
    block_states: HashMap<H256, StateDelta>,
}

/// Per-chain records; existence of the entry is the chain's identity.
#[derive(Default)]
struct ChainRecords {
    index: Vec<H256>,
    // Ascending by block index per key.
    state_references: HashMap<StateKey, Vec<(H256, BlockNumber)>>,
    nonces: HashMap<Address, u64>,
}

impl<A> MemoryStore<A> {
    /// An empty store.
    pub fn new() -> Self {
        MemoryStore {
            inner: RwLock::new(Inner {
                canonical: None,
                chains: HashMap::new(),
                blocks: HashMap::new(),
                txs: HashMap::new(),
                staged: BTreeMap::new(),
                block_states: HashMap::new(),
            }),
        }
    }
}

impl<A> Default for MemoryStore<A> {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl<A> Inner<A> {
    fn chain_mut(&mut self, id: ChainId) -> &mut ChainRecords {
        self.chains.entry(id).or_insert_with(ChainRecords::default)
    }
}

impl<A: Action> Store<A> for MemoryStore<A> {
    fn list_chain_ids(&self) -> Result<Vec<ChainId>> {
        Ok(self.inner.read().chains.keys().copied().collect())
    }

    fn get_canonical_chain_id(&self) -> Result<Option<ChainId>> {
        Ok(self.inner.read().canonical)
    }

    fn set_canonical_chain_id(&self, id: ChainId) -> Result<()> {
        let mut inner = self.inner.write();
        inner.chain_mut(id);
        inner.canonical = Some(id);
        Ok(())
    }

    fn delete_chain_id(&self, id: ChainId) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.chains.remove(&id).is_some() {
            trace!(target: "store", "deleted chain {id}");
        }
        if inner.canonical == Some(id) {
            inner.canonical = None;
        }
        Ok(())
    }

    fn append_index(&self, chain: ChainId, hash: H256) -> Result<BlockNumber> {
        let mut inner = self.inner.write();
        let records = inner.chain_mut(chain);
        records.index.push(hash);
        Ok(records.index.len() as BlockNumber - 1)
    }

    fn count_index(&self, chain: ChainId) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .chains
            .get(&chain)
            .map_or(0, |records| records.index.len() as u64))
    }

    fn index_block_hash(&self, chain: ChainId, offset: i64) -> Result<Option<H256>> {
        let inner = self.inner.read();
        let index = match inner.chains.get(&chain) {
            Some(records) => &records.index,
            None => return Ok(None),
        };
        let position = if offset < 0 {
            index.len() as i64 + offset
        } else {
            offset
        };
        if position < 0 {
            return Ok(None);
        }
        Ok(index.get(position as usize).copied())
    }

    fn iterate_indexes(
        &self,
        chain: ChainId,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<H256>> {
        let inner = self.inner.read();
        let index = match inner.chains.get(&chain) {
            Some(records) => &records.index,
            None => return Ok(Vec::new()),
        };
        Ok(index
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::max_value()))
            .copied()
            .collect())
    }

    fn put_block(&self, block: &Block<A>) -> Result<()> {
        self.inner.write().blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn get_block(&self, hash: H256) -> Result<Option<Block<A>>> {
        Ok(self.inner.read().blocks.get(&hash).cloned())
    }

    fn delete_block(&self, hash: H256) -> Result<bool> {
        Ok(self.inner.write().blocks.remove(&hash).is_some())
    }

    fn contains_block(&self, hash: H256) -> Result<bool> {
        Ok(self.inner.read().blocks.contains_key(&hash))
    }

    fn get_block_index(&self, hash: H256) -> Result<Option<BlockNumber>> {
        Ok(self.inner.read().blocks.get(&hash).map(Block::index))
    }

    fn iterate_block_hashes(&self) -> Result<Vec<H256>> {
        Ok(self.inner.read().blocks.keys().copied().collect())
    }

    fn count_blocks(&self) -> Result<u64> {
        Ok(self.inner.read().blocks.len() as u64)
    }

    fn put_tx(&self, tx: &Transaction<A>) -> Result<()> {
        self.inner.write().txs.insert(tx.id(), tx.clone());
        Ok(())
    }

    fn get_tx(&self, id: TxId) -> Result<Option<Transaction<A>>> {
        Ok(self.inner.read().txs.get(&id).cloned())
    }

    fn delete_tx(&self, id: TxId) -> Result<bool> {
        Ok(self.inner.write().txs.remove(&id).is_some())
    }

    fn contains_tx(&self, id: TxId) -> Result<bool> {
        Ok(self.inner.read().txs.contains_key(&id))
    }

    fn iterate_tx_ids(&self) -> Result<Vec<TxId>> {
        Ok(self.inner.read().txs.keys().copied().collect())
    }

    fn count_txs(&self) -> Result<u64> {
        Ok(self.inner.read().txs.len() as u64)
    }

    fn stage_tx_ids(&self, ids: &BTreeMap<TxId, bool>) -> Result<()> {
        let mut inner = self.inner.write();
        for (id, broadcastable) in ids {
            inner.staged.insert(*id, *broadcastable);
        }
        Ok(())
    }

    fn unstage_tx_ids(&self, ids: &BTreeSet<TxId>) -> Result<()> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.staged.remove(id);
        }
        Ok(())
    }

    fn iterate_staged_tx_ids(&self, broadcastable_only: bool) -> Result<Vec<TxId>> {
        Ok(self
            .inner
            .read()
            .staged
            .iter()
            .filter(|(_, broadcastable)| !broadcastable_only || **broadcastable)
            .map(|(id, _)| *id)
            .collect())
    }

    fn set_block_states(&self, hash: H256, states: &StateDelta) -> Result<()> {
        self.inner.write().block_states.insert(hash, states.clone());
        Ok(())
    }

    fn get_block_states(&self, hash: H256) -> Result<Option<StateDelta>> {
        Ok(self.inner.read().block_states.get(&hash).cloned())
    }

    fn store_state_reference(
        &self,
        chain: ChainId,
        keys: &BTreeSet<StateKey>,
        block_hash: H256,
        block_index: BlockNumber,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let records = inner.chain_mut(chain);
        for key in keys {
            let references = records
                .state_references
                .entry(key.clone())
                .or_insert_with(Vec::new);
            if references.iter().any(|(hash, _)| *hash == block_hash) {
                continue;
            }
            let position = references
                .iter()
                .position(|(_, index)| *index > block_index)
                .unwrap_or(references.len());
            references.insert(position, (block_hash, block_index));
        }
        Ok(())
    }

    fn lookup_state_reference(
        &self,
        chain: ChainId,
        key: &str,
        at_block: &Block<A>,
    ) -> Result<Option<(H256, BlockNumber)>> {
        let inner = self.inner.read();
        Ok(inner
            .chains
            .get(&chain)
            .and_then(|records| records.state_references.get(key))
            .and_then(|references| {
                references
                    .iter()
                    .rev()
                    .find(|(_, index)| *index <= at_block.index())
                    .copied()
            }))
    }

    fn iterate_state_references(
        &self,
        chain: ChainId,
        key: &str,
        lowest_index: Option<BlockNumber>,
        highest_index: Option<BlockNumber>,
        limit: Option<usize>,
    ) -> Result<Vec<(H256, BlockNumber)>> {
        let lowest = lowest_index.unwrap_or(0);
        if let Some(highest) = highest_index {
            if lowest > highest {
                return Err(Error::Range { lowest, highest });
            }
        }
        let highest = highest_index.unwrap_or(u64::max_value());

        let inner = self.inner.read();
        Ok(inner
            .chains
            .get(&chain)
            .and_then(|records| records.state_references.get(key))
            .map(|references| {
                references
                    .iter()
                    .rev()
                    .filter(|(_, index)| *index >= lowest && *index <= highest)
                    .take(limit.unwrap_or(usize::max_value()))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_state_keys(&self, chain: ChainId) -> Result<Vec<StateKey>> {
        Ok(self
            .inner
            .read()
            .chains
            .get(&chain)
            .map(|records| records.state_references.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list_all_state_references(
        &self,
        chain: ChainId,
        lowest_index: Option<BlockNumber>,
        highest_index: Option<BlockNumber>,
    ) -> Result<HashMap<StateKey, Vec<H256>>> {
        let lowest = lowest_index.unwrap_or(0);
        let highest = highest_index.unwrap_or(u64::max_value());

        let inner = self.inner.read();
        let records = match inner.chains.get(&chain) {
            Some(records) => records,
            None => return Ok(HashMap::new()),
        };
        Ok(records
            .state_references
            .iter()
            .filter_map(|(key, references)| {
                let hashes: Vec<H256> = references
                    .iter()
                    .filter(|(_, index)| *index >= lowest && *index <= highest)
                    .map(|(hash, _)| *hash)
                    .collect();
                if hashes.is_empty() {
                    None
                } else {
                    Some((key.clone(), hashes))
                }
            })
            .collect())
    }

    fn fork_state_references(
        &self,
        source: ChainId,
        destination: ChainId,
        branchpoint: &Block<A>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.chains.contains_key(&source) {
            return Err(Error::ChainIdNotFound(source));
        }

        let surviving: Vec<(StateKey, Vec<(H256, BlockNumber)>)> = inner
            .chains
            .get(&source)
            .map(|records| {
                records
                    .state_references
                    .iter()
                    .filter_map(|(key, references)| {
                        let kept: Vec<_> = references
                            .iter()
                            .filter(|(_, index)| *index <= branchpoint.index())
                            .copied()
                            .collect();
                        if kept.is_empty() {
                            None
                        } else {
                            Some((key.clone(), kept))
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        trace!(
            target: "store",
            "forking {} state-referenced keys from {source} to {destination} at #{}",
            surviving.len(),
            branchpoint.index(),
        );

        let records = inner.chain_mut(destination);
        for (key, mut kept) in surviving {
            let references = records
                .state_references
                .entry(key)
                .or_insert_with(Vec::new);
            references.retain(|(hash, _)| !kept.iter().any(|(kept_hash, _)| kept_hash == hash));
            references.append(&mut kept);
            references.sort_by_key(|(_, index)| *index);
        }
        Ok(())
    }

    fn get_tx_nonce(&self, chain: ChainId, signer: Address) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .chains
            .get(&chain)
            .and_then(|records| records.nonces.get(&signer))
            .copied()
            .unwrap_or(0))
    }

    fn increase_tx_nonce(&self, chain: ChainId, signer: Address, delta: u64) -> Result<()> {
        let mut inner = self.inner.write();
        *inner.chain_mut(chain).nonces.entry(signer).or_insert(0) += delta;
        Ok(())
    }

    fn list_tx_nonces(&self, chain: ChainId) -> Result<HashMap<Address, u64>> {
        Ok(self
            .inner
            .read()
            .chains
            .get(&chain)
            .map(|records| records.nonces.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planet_bencodex::Value;
    use planet_types::action::{ActionContext, ActionError, ActionLoadError};
    use planetkey::{Generator, KeyPair, Random, Secp256k1};
    use std::sync::{atomic::AtomicBool, Arc};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Payload(i128);

    impl Action for Payload {
        fn plain_value(&self) -> Value {
            Value::Integer(self.0)
        }

        fn load_plain_value(value: &Value) -> std::result::Result<Self, ActionLoadError> {
            value
                .as_integer()
                .map(Payload)
                .ok_or_else(|| ActionLoadError::new("payload must be an integer"))
        }

        fn execute(&self, _context: &ActionContext) -> std::result::Result<StateDelta, ActionError> {
            Ok(StateDelta::new())
        }
    }

    fn block(index: BlockNumber, previous_hash: Option<H256>) -> Block<Payload> {
        Block::mine(
            index,
            0,
            None,
            previous_hash,
            planet_types::now(),
            vec![],
            &AtomicBool::new(false),
        )
        .unwrap()
    }

    fn tx(keypair: &KeyPair, nonce: u64, payload: i128) -> Transaction<Payload> {
        Transaction::new(
            nonce,
            keypair,
            BTreeSet::new(),
            vec![Payload(payload)],
            planet_types::now(),
            &Secp256k1,
        )
        .unwrap()
    }

    fn keys(names: &[&str]) -> BTreeSet<StateKey> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn index_positions_are_sequential() {
        let store = MemoryStore::<Payload>::new();
        let chain = ChainId::random();
        let b0 = block(0, None);
        let b1 = block(1, Some(b0.hash()));

        assert_eq!(store.append_index(chain, b0.hash()).unwrap(), 0);
        assert_eq!(store.append_index(chain, b1.hash()).unwrap(), 1);
        assert_eq!(store.count_index(chain).unwrap(), 2);
        assert_eq!(store.index_block_hash(chain, 0).unwrap(), Some(b0.hash()));
        assert_eq!(store.index_block_hash(chain, 1).unwrap(), Some(b1.hash()));
        assert_eq!(store.index_block_hash(chain, 2).unwrap(), None);
        assert_eq!(store.index_block_hash(chain, -1).unwrap(), Some(b1.hash()));
        assert_eq!(store.index_block_hash(chain, -2).unwrap(), Some(b0.hash()));
        assert_eq!(store.index_block_hash(chain, -3).unwrap(), None);
        assert_eq!(
            store.iterate_indexes(chain, 0, None).unwrap(),
            vec![b0.hash(), b1.hash()]
        );
        assert_eq!(
            store.iterate_indexes(chain, 1, Some(5)).unwrap(),
            vec![b1.hash()]
        );
    }

    #[test]
    fn blocks_are_content_addressed() {
        let store = MemoryStore::<Payload>::new();
        let b0 = block(0, None);

        assert!(!store.contains_block(b0.hash()).unwrap());
        store.put_block(&b0).unwrap();
        assert!(store.contains_block(b0.hash()).unwrap());
        assert_eq!(store.get_block(b0.hash()).unwrap(), Some(b0.clone()));
        assert_eq!(store.get_block_index(b0.hash()).unwrap(), Some(0));
        assert_eq!(store.count_blocks().unwrap(), 1);
        assert_eq!(store.iterate_block_hashes().unwrap(), vec![b0.hash()]);

        assert!(store.delete_block(b0.hash()).unwrap());
        assert!(!store.delete_block(b0.hash()).unwrap());
        assert_eq!(store.count_blocks().unwrap(), 0);
    }

    #[test]
    fn staged_transactions_carry_broadcast_flags() {
        let store = MemoryStore::<Payload>::new();
        let keypair = Random.generate();
        let loud = tx(&keypair, 0, 1);
        let quiet = tx(&keypair, 1, 2);
        store.put_tx(&loud).unwrap();
        store.put_tx(&quiet).unwrap();

        let mut staged = BTreeMap::new();
        staged.insert(loud.id(), true);
        staged.insert(quiet.id(), false);
        store.stage_tx_ids(&staged).unwrap();

        let mut all = store.iterate_staged_tx_ids(false).unwrap();
        all.sort();
        let mut expected = vec![loud.id(), quiet.id()];
        expected.sort();
        assert_eq!(all, expected);
        assert_eq!(store.iterate_staged_tx_ids(true).unwrap(), vec![loud.id()]);

        store
            .unstage_tx_ids(&Some(loud.id()).into_iter().collect())
            .unwrap();
        assert_eq!(store.iterate_staged_tx_ids(false).unwrap(), vec![quiet.id()]);
    }

    #[test]
    fn state_references_resolve_by_height() {
        let store = MemoryStore::<Payload>::new();
        let chain = ChainId::random();
        let b0 = block(0, None);
        let b1 = block(1, Some(b0.hash()));
        let b2 = block(2, Some(b1.hash()));

        store
            .store_state_reference(chain, &keys(&["k1"]), b0.hash(), 0)
            .unwrap();
        store
            .store_state_reference(chain, &keys(&["k1", "k2"]), b2.hash(), 2)
            .unwrap();

        assert_eq!(
            store.lookup_state_reference(chain, "k1", &b0).unwrap(),
            Some((b0.hash(), 0))
        );
        assert_eq!(
            store.lookup_state_reference(chain, "k1", &b1).unwrap(),
            Some((b0.hash(), 0))
        );
        assert_eq!(
            store.lookup_state_reference(chain, "k1", &b2).unwrap(),
            Some((b2.hash(), 2))
        );
        assert_eq!(store.lookup_state_reference(chain, "k2", &b1).unwrap(), None);
        assert_eq!(
            store.lookup_state_reference(chain, "missing", &b2).unwrap(),
            None
        );

        // Descending enumeration with bounds and limits.
        assert_eq!(
            store
                .iterate_state_references(chain, "k1", None, None, None)
                .unwrap(),
            vec![(b2.hash(), 2), (b0.hash(), 0)]
        );
        assert_eq!(
            store
                .iterate_state_references(chain, "k1", Some(1), Some(2), None)
                .unwrap(),
            vec![(b2.hash(), 2)]
        );
        assert_eq!(
            store
                .iterate_state_references(chain, "k1", None, None, Some(1))
                .unwrap(),
            vec![(b2.hash(), 2)]
        );

        let mut state_keys = store.list_state_keys(chain).unwrap();
        state_keys.sort();
        assert_eq!(state_keys, vec!["k1".to_string(), "k2".to_string()]);

        let all = store.list_all_state_references(chain, None, None).unwrap();
        assert_eq!(all["k1"], vec![b0.hash(), b2.hash()]);
        assert_eq!(all["k2"], vec![b2.hash()]);
    }

    #[test]
    fn state_reference_storage_is_idempotent() {
        let store = MemoryStore::<Payload>::new();
        let chain = ChainId::random();
        let b1 = block(1, Some(H256::zero()));

        for _ in 0..2 {
            store
                .store_state_reference(chain, &keys(&["k"]), b1.hash(), 1)
                .unwrap();
        }
        assert_eq!(
            store
                .iterate_state_references(chain, "k", None, None, None)
                .unwrap(),
            vec![(b1.hash(), 1)]
        );
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let store = MemoryStore::<Payload>::new();
        let chain = ChainId::random();
        match store.iterate_state_references(chain, "k", Some(5), Some(2), None) {
            Err(Error::Range { lowest: 5, highest: 2 }) => {}
            other => panic!("expected range error, got {other:?}"),
        }
    }

    #[test]
    fn forked_references_stop_at_the_branchpoint() {
        // k1 written at heights 1, 2, 3; k2 at height 4.
        let store = MemoryStore::<Payload>::new();
        let source = ChainId::random();
        let mut blocks = vec![block(0, None)];
        for index in 1..=4 {
            let parent = blocks[index - 1].hash();
            blocks.push(block(index as BlockNumber, Some(parent)));
        }
        for index in 1..=3u64 {
            store
                .store_state_reference(
                    source,
                    &keys(&["k1"]),
                    blocks[index as usize].hash(),
                    index,
                )
                .unwrap();
        }
        store
            .store_state_reference(source, &keys(&["k2"]), blocks[4].hash(), 4)
            .unwrap();

        for branch_index in 0..=2usize {
            let destination = ChainId::random();
            store
                .fork_state_references(source, destination, &blocks[branch_index])
                .unwrap();

            let mut surviving = 0;
            for key in &["k1", "k2"] {
                surviving += store
                    .iterate_state_references(destination, key, None, None, None)
                    .unwrap()
                    .len();
            }
            assert_eq!(surviving, branch_index);
            // Nothing past the branchpoint leaks through.
            for key in &["k1", "k2"] {
                for (_, index) in store
                    .iterate_state_references(destination, key, None, None, None)
                    .unwrap()
                {
                    assert!(index <= branch_index as u64);
                }
            }
        }
    }

    #[test]
    fn forking_an_empty_chain_succeeds_if_it_exists() {
        let store = MemoryStore::<Payload>::new();
        let source = ChainId::random();
        let b0 = block(0, None);

        // Identity comes from the index append, not from references.
        store.append_index(source, b0.hash()).unwrap();
        store
            .fork_state_references(source, ChainId::random(), &b0)
            .unwrap();
    }

    #[test]
    fn forking_an_unknown_chain_fails() {
        let store = MemoryStore::<Payload>::new();
        let ghost = ChainId::random();
        match store.fork_state_references(ghost, ChainId::random(), &block(0, None)) {
            Err(Error::ChainIdNotFound(id)) => assert_eq!(id, ghost),
            other => panic!("expected missing chain, got {other:?}"),
        }
    }

    #[test]
    fn nonce_tallies_default_to_zero_and_accumulate() {
        let store = MemoryStore::<Payload>::new();
        let chain = ChainId::random();
        let signer = Address::from_low_u64_be(7);

        assert_eq!(store.get_tx_nonce(chain, signer).unwrap(), 0);
        store.increase_tx_nonce(chain, signer, 1).unwrap();
        store.increase_tx_nonce(chain, signer, 2).unwrap();
        assert_eq!(store.get_tx_nonce(chain, signer).unwrap(), 3);

        let nonces = store.list_tx_nonces(chain).unwrap();
        assert_eq!(nonces.len(), 1);
        assert_eq!(nonces[&signer], 3);
    }

    #[test]
    fn deleting_a_chain_keeps_shared_records() {
        let store = MemoryStore::<Payload>::new();
        let chain = ChainId::random();
        let b0 = block(0, None);
        let keypair = Random.generate();
        let transaction = tx(&keypair, 0, 5);

        store.put_block(&b0).unwrap();
        store.put_tx(&transaction).unwrap();
        store.append_index(chain, b0.hash()).unwrap();
        store
            .store_state_reference(chain, &keys(&["k"]), b0.hash(), 0)
            .unwrap();
        store.increase_tx_nonce(chain, keypair.address(), 1).unwrap();
        store.set_canonical_chain_id(chain).unwrap();

        store.delete_chain_id(chain).unwrap();
        store.delete_chain_id(chain).unwrap(); // idempotent

        assert_eq!(store.count_index(chain).unwrap(), 0);
        assert!(store.list_state_keys(chain).unwrap().is_empty());
        assert_eq!(store.get_tx_nonce(chain, keypair.address()).unwrap(), 0);
        assert_eq!(store.get_canonical_chain_id().unwrap(), None);
        // Blocks and transactions are chain-independent.
        assert!(store.contains_block(b0.hash()).unwrap());
        assert!(store.contains_tx(transaction.id()).unwrap());
    }

    #[test]
    fn copy_reproduces_every_table() {
        let store = MemoryStore::<Payload>::new();
        let chain = ChainId::random();
        let keypair = Random.generate();
        let b0 = block(0, None);
        let transaction = tx(&keypair, 0, 1);

        store.put_block(&b0).unwrap();
        store.put_tx(&transaction).unwrap();
        store.append_index(chain, b0.hash()).unwrap();
        let mut states = StateDelta::new();
        states.insert("k".into(), Value::Integer(9));
        store.set_block_states(b0.hash(), &states).unwrap();
        store
            .store_state_reference(chain, &keys(&["k"]), b0.hash(), 0)
            .unwrap();
        store.increase_tx_nonce(chain, keypair.address(), 1).unwrap();
        let mut staged = BTreeMap::new();
        staged.insert(transaction.id(), true);
        store.stage_tx_ids(&staged).unwrap();
        store.set_canonical_chain_id(chain).unwrap();

        let target = MemoryStore::<Payload>::new();
        store.copy_to(&target).unwrap();

        assert_eq!(target.get_canonical_chain_id().unwrap(), Some(chain));
        assert_eq!(
            target.iterate_indexes(chain, 0, None).unwrap(),
            vec![b0.hash()]
        );
        assert_eq!(target.get_block(b0.hash()).unwrap(), Some(b0.clone()));
        assert_eq!(target.get_block_states(b0.hash()).unwrap(), Some(states));
        assert_eq!(
            target
                .iterate_state_references(chain, "k", None, None, None)
                .unwrap(),
            vec![(b0.hash(), 0)]
        );
        assert_eq!(target.get_tx_nonce(chain, keypair.address()).unwrap(), 1);
        assert_eq!(
            target.iterate_staged_tx_ids(true).unwrap(),
            vec![transaction.id()]
        );

        // A destination already holding a chain is refused.
        match store.copy_to(&target) {
            Err(Error::NonEmptyDestination) => {}
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_puts_do_not_lose_transactions() {
        const TASKS: usize = 5;
        const TXS_PER_TASK: u64 = 30;
        const SHARED_REPEATS: usize = 50;

        let store = Arc::new(MemoryStore::<Payload>::new());
        let shared_keypair = Random.generate();
        let shared = Arc::new(tx(&shared_keypair, 0, -1));

        let workers: Vec<_> = (0..TASKS)
            .map(|task| {
                let store = store.clone();
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let keypair = Random.generate();
                    for nonce in 0..TXS_PER_TASK {
                        store.put_tx(&tx(&keypair, nonce, task as i128)).unwrap();
                    }
                    for _ in 0..SHARED_REPEATS {
                        store.put_tx(&shared).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(
            store.count_txs().unwrap(),
            1 + (TASKS as u64) * TXS_PER_TASK
        );
        for id in store.iterate_tx_ids().unwrap() {
            let stored = store.get_tx(id).unwrap().unwrap();
            assert_eq!(stored.id(), id);
            stored.validate(&Secp256k1).unwrap();
        }
    }
}
