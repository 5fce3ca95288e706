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

//! Deterministic action evaluation.
//!
//! Evaluating a block replays every transaction's actions, in the
//! block-hash-derived order, against the state its parent left behind.
//! The result is one delta per block covering every touched key; action
//! failures are recorded, not fatal. The same block always evaluates to
//! the same deltas, which is what makes unrendering on reorg possible by
//! plain re-evaluation.

use crate::error::{Error, Result};
use ethereum_types::{Address, H256};
use log::trace;
use planet_bencodex::Value;
use planet_store::Store;
use planet_types::{
    action::{Action, ActionContext, ActionError, StateDelta, StateKey, StateReader},
    block::Block,
    chain_id::ChainId,
    state_key_address,
    transaction::TransactionError,
};
use std::sync::Arc;

/// One evaluated action: its context, the accumulated delta right after
/// it ran, and its failure if it raised one.
#[derive(Debug, Clone)]
pub struct ActionEvaluation<A> {
    /// The evaluated action.
    pub action: A,
    /// The context it ran under.
    pub context: ActionContext,
    /// The block's accumulated delta after this action. Unchanged from
    /// the previous step when the action failed.
    pub output_delta: StateDelta,
    /// The failure, if the action raised one.
    pub error: Option<ActionError>,
}

/// Reads previous states through the store: earlier in-block writes
/// first, then the newest state reference at or below the parent.
struct ChainStateReader<A: Action> {
    store: Arc<dyn Store<A>>,
    chain: ChainId,
    parent: Option<Block<A>>,
    overlay: StateDelta,
}

impl<A: Action> StateReader for ChainStateReader<A> {
    fn read(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.overlay.get(key) {
            return Some(value.clone());
        }
        let parent = self.parent.as_ref()?;
        let (reference, _) = self
            .store
            .lookup_state_reference(self.chain, key, parent)
            .ok()??;
        self.store
            .get_block_states(reference)
            .ok()?
            .and_then(|states| states.get(key).cloned())
    }
}

/// Evaluate every action of `block` against `chain`'s state as of the
/// block's parent.
///
/// Returns the per-action evaluations in order plus the folded delta of
/// the whole block. Fails when a transaction writes an address outside
/// its declared update set.
pub fn evaluate_block<A: Action>(
    store: &Arc<dyn Store<A>>,
    chain: ChainId,
    block: &Block<A>,
    block_action: Option<A>,
) -> Result<(Vec<ActionEvaluation<A>>, StateDelta)> {
    let parent = match block.previous_hash() {
        Some(hash) => Some(
            store
                .get_block(hash)?
                .ok_or(Error::UnknownBlock(hash))?,
        ),
        None => None,
    };

    let mut evaluations = Vec::new();
    let mut delta = StateDelta::new();

    for tx in block.transactions_in_evaluation_order() {
        for (action_index, action) in tx.actions().iter().enumerate() {
            let (evaluation, written) = evaluate_action(
                store,
                chain,
                block,
                &parent,
                action,
                tx.signer(),
                random_seed(&block.hash(), tx.signature(), action_index),
                &delta,
            );
            if evaluation.error.is_none() {
                // Only the keys this very action wrote count against its
                // transaction's declared update set.
                for key in &written {
                    if let Some(address) = state_key_address(key) {
                        if !tx.updated_addresses().contains(&address) {
                            return Err(Error::Transaction(
                                TransactionError::InvalidUpdatedAddresses {
                                    id: tx.id(),
                                    address,
                                },
                            ));
                        }
                    }
                }
                delta = evaluation.output_delta.clone();
            }
            evaluations.push(evaluation);
        }
    }

    if let Some(action) = block_action {
        let signer = block.miner().unwrap_or_default();
        let (evaluation, _) = evaluate_action(
            store,
            chain,
            block,
            &parent,
            &action,
            signer,
            random_seed(&block.hash(), &[], 0),
            &delta,
        );
        if evaluation.error.is_none() {
            delta = evaluation.output_delta.clone();
        }
        evaluations.push(evaluation);
    }

    trace!(
        target: "chain",
        "evaluated block #{} {:?}: {} actions, {} touched keys",
        block.index(),
        block.hash(),
        evaluations.len(),
        delta.len(),
    );
    Ok((evaluations, delta))
}

#[allow(clippy::too_many_arguments)]
fn evaluate_action<A: Action>(
    store: &Arc<dyn Store<A>>,
    chain: ChainId,
    block: &Block<A>,
    parent: &Option<Block<A>>,
    action: &A,
    signer: Address,
    random_seed: i32,
    delta: &StateDelta,
) -> (ActionEvaluation<A>, Vec<StateKey>) {
    let reader = Arc::new(ChainStateReader {
        store: store.clone(),
        chain,
        parent: parent.clone(),
        overlay: delta.clone(),
    });
    let context = ActionContext::new(
        signer,
        block.miner(),
        block.index(),
        block.hash(),
        random_seed,
        reader,
    );

    match action.execute(&context) {
        Ok(written) => {
            let written_keys = written.keys().cloned().collect();
            let mut output_delta = delta.clone();
            output_delta.extend(written);
            (
                ActionEvaluation {
                    action: action.clone(),
                    context,
                    output_delta,
                    error: None,
                },
                written_keys,
            )
        }
        Err(error) => (
            ActionEvaluation {
                action: action.clone(),
                context,
                output_delta: delta.clone(),
                error: Some(error),
            },
            Vec::new(),
        ),
    }
}

/// `block_hash ^ signature ^ action_index`, over the leading four bytes
/// of each digest read little-endian.
fn random_seed(block_hash: &H256, signature: &[u8], action_index: usize) -> i32 {
    leading_i32(block_hash.as_bytes()) ^ leading_i32(signature) ^ action_index as i32
}

fn leading_i32(bytes: &[u8]) -> i32 {
    if bytes.len() < 4 {
        return 0;
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    i32::from_le_bytes(raw)
}
