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

//! Proof-of-work blocks.

use crate::{
    action::Action,
    format_timestamp, hashcash,
    hashcash::Stamp,
    parse_timestamp,
    transaction::{Transaction, TransactionError},
    unexpected::{Mismatch, OutOfBounds},
    BlockNumber,
};
use chrono::{DateTime, Duration, Utc};
use ethereum_types::{Address, H256};
use parity_bytes::Bytes;
use planet_bencodex::{DecoderError, Key, Value};
use planetkey::{sha256, CryptoBackend};
use std::{
    collections::BTreeMap,
    error, fmt,
    hash::{Hash, Hasher},
    sync::atomic::AtomicBool,
};

/// Blocks whose timestamp is more than this far ahead of the local
/// clock are rejected.
pub const MAX_TIMESTAMP_SKEW_SECONDS: i64 = 900;

/// A mined block.
///
/// Content-addressed by the digest of its header encoding; the header
/// covers every field except the transaction list, which it pins through
/// the transaction fingerprint.
#[derive(Debug, Clone)]
pub struct Block<A> {
    index: BlockNumber,
    difficulty: u64,
    previous_hash: Option<H256>,
    timestamp: DateTime<Utc>,
    miner: Option<Address>,
    nonce: Bytes,
    tx_hash: Option<H256>,
    transactions: Vec<Transaction<A>>,
    hash: H256,
}

impl<A: Action> Block<A> {
    /// Mine a block over `transactions`.
    ///
    /// Transactions are stored sorted by `(signer, nonce)` so the
    /// fingerprint is fixed before the nonce search begins. `cancel` is
    /// observed between proof-of-work attempts; a cancelled search
    /// produces no block.
    pub fn mine(
        index: BlockNumber,
        difficulty: u64,
        miner: Option<Address>,
        previous_hash: Option<H256>,
        timestamp: DateTime<Utc>,
        mut transactions: Vec<Transaction<A>>,
        cancel: &AtomicBool,
    ) -> Result<Self, BlockError> {
        transactions.sort_by(|a, b| {
            (a.signer(), a.nonce(), a.id()).cmp(&(b.signer(), b.nonce(), b.id()))
        });
        let tx_hash = transaction_fingerprint(&transactions);

        let empty = header_value(
            index,
            difficulty,
            &miner,
            &previous_hash,
            &timestamp,
            &tx_hash,
            b"",
        )
        .encode();
        let one = header_value(
            index,
            difficulty,
            &miner,
            &previous_hash,
            &timestamp,
            &tx_hash,
            &[0],
        )
        .encode();
        let stamp = Stamp::from_encodings(&empty, &one);

        let (nonce, hash) =
            hashcash::answer(&stamp, difficulty, cancel).ok_or(BlockError::MiningCancelled)?;
        Ok(Block {
            index,
            difficulty,
            previous_hash,
            timestamp,
            miner,
            nonce,
            tx_hash,
            transactions,
            hash,
        })
    }

    /// Height, 0-based.
    pub fn index(&self) -> BlockNumber {
        self.index
    }

    /// Required leading zero bits of the hash.
    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    /// Parent hash; absent only on genesis.
    pub fn previous_hash(&self) -> Option<H256> {
        self.previous_hash
    }

    /// Mining time.
    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    /// Reward beneficiary.
    pub fn miner(&self) -> Option<Address> {
        self.miner
    }

    /// The proof-of-work nonce.
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Fingerprint of the stored transaction list; absent when empty.
    pub fn tx_hash(&self) -> Option<H256> {
        self.tx_hash
    }

    /// Transactions in stored order.
    pub fn transactions(&self) -> &[Transaction<A>] {
        &self.transactions
    }

    /// The header digest.
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Transactions in evaluation order.
    ///
    /// Signers are grouped and ordered by the XOR of their transaction
    /// ids mixed with the block hash, so the order is fixed by the chain
    /// yet unpredictable before mining; within a signer, nonces ascend.
    pub fn transactions_in_evaluation_order(&self) -> Vec<&Transaction<A>> {
        let mut groups: BTreeMap<Address, Vec<&Transaction<A>>> = BTreeMap::new();
        for tx in &self.transactions {
            groups.entry(tx.signer()).or_insert_with(Vec::new).push(tx);
        }

        let mut keyed: Vec<([u8; 32], Vec<&Transaction<A>>)> = groups
            .into_iter()
            .map(|(_, mut txs)| {
                txs.sort_by_key(|tx| tx.nonce());
                let mut key = [0u8; 32];
                for tx in &txs {
                    for (mixed, byte) in key.iter_mut().zip(tx.id().as_bytes()) {
                        *mixed ^= byte;
                    }
                }
                for (mixed, byte) in key.iter_mut().zip(self.hash.as_bytes()) {
                    *mixed ^= byte;
                }
                (key, txs)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().flat_map(|(_, txs)| txs).collect()
    }

    /// The header dictionary (everything but the transaction list).
    pub fn header_bencodex(&self) -> Value {
        header_value(
            self.index,
            self.difficulty,
            &self.miner,
            &self.previous_hash,
            &self.timestamp,
            &self.tx_hash,
            &self.nonce,
        )
    }

    /// The full dictionary form: header plus the transaction list.
    pub fn to_bencodex(&self) -> Value {
        let mut value = self.header_bencodex();
        if let Value::Dictionary(map) = &mut value {
            map.insert(
                Key::from("transactions"),
                Value::List(
                    self.transactions
                        .iter()
                        .map(|tx| Value::Binary(tx.encode()))
                        .collect(),
                ),
            );
        }
        value
    }

    /// The canonical encoding of the full dictionary form.
    pub fn encode(&self) -> Bytes {
        self.to_bencodex().encode()
    }

    /// Rebuild a block from its canonical encoding. The hash is
    /// recomputed from the header, never trusted from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecoderError> {
        Self::from_bencodex(&Value::decode(bytes)?)
    }

    /// Rebuild a block from its dictionary form.
    pub fn from_bencodex(value: &Value) -> Result<Self, DecoderError> {
        let index = value
            .get("index")
            .and_then(Value::as_integer)
            .filter(|index| *index >= 0 && *index <= i128::from(u64::max_value()))
            .ok_or(DecoderError::Custom("block index must be a non-negative integer"))?
            as BlockNumber;
        let difficulty = value
            .get("difficulty")
            .and_then(Value::as_integer)
            .filter(|difficulty| *difficulty >= 0 && *difficulty <= i128::from(u64::max_value()))
            .ok_or(DecoderError::Custom("block difficulty must be a non-negative integer"))?
            as u64;
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_text)
            .and_then(|text| parse_timestamp(text).ok())
            .ok_or(DecoderError::Custom("malformed block timestamp"))?;
        let nonce = value
            .get("nonce")
            .and_then(Value::as_binary)
            .ok_or(DecoderError::Custom("block nonce must be bytes"))?
            .to_vec();
        let miner = match value.get("reward_beneficiary") {
            None => None,
            Some(field) => Some(
                field
                    .as_binary()
                    .filter(|bytes| bytes.len() == 20)
                    .map(Address::from_slice)
                    .ok_or(DecoderError::Custom("reward beneficiary must be 20 bytes"))?,
            ),
        };
        let previous_hash = match value.get("previous_hash") {
            None => None,
            Some(field) => Some(
                field
                    .as_binary()
                    .filter(|bytes| bytes.len() == 32)
                    .map(H256::from_slice)
                    .ok_or(DecoderError::Custom("previous hash must be 32 bytes"))?,
            ),
        };
        let tx_hash = match value.get("transaction_fingerprint") {
            None => None,
            Some(field) => Some(
                field
                    .as_binary()
                    .filter(|bytes| bytes.len() == 32)
                    .map(H256::from_slice)
                    .ok_or(DecoderError::Custom("transaction fingerprint must be 32 bytes"))?,
            ),
        };
        let transactions = match value.get("transactions") {
            None => Vec::new(),
            Some(field) => field
                .as_list()
                .ok_or(DecoderError::Custom("transactions must be a list"))?
                .iter()
                .map(|item| {
                    item.as_binary()
                        .ok_or(DecoderError::Custom("encoded transaction must be bytes"))
                        .and_then(Transaction::decode)
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let hash = sha256(
            &header_value(
                index,
                difficulty,
                &miner,
                &previous_hash,
                &timestamp,
                &tx_hash,
                &nonce,
            )
            .encode(),
        );
        Ok(Block {
            index,
            difficulty,
            previous_hash,
            timestamp,
            miner,
            nonce,
            tx_hash,
            transactions,
            hash,
        })
    }

    /// Standalone integrity check, independent of any chain position.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        backend: &dyn CryptoBackend,
    ) -> Result<(), BlockError> {
        let limit = now + Duration::seconds(MAX_TIMESTAMP_SKEW_SECONDS);
        if self.timestamp > limit {
            return Err(BlockError::InvalidTimestamp(OutOfBounds {
                min: None,
                max: Some(limit),
                found: self.timestamp,
            }));
        }

        if self.index == 0 {
            if self.difficulty != 0 {
                return Err(BlockError::InvalidDifficulty(OutOfBounds {
                    min: None,
                    max: Some(0),
                    found: self.difficulty,
                }));
            }
            if self.previous_hash.is_some() {
                return Err(BlockError::InvalidPreviousHash {
                    expected: None,
                    found: self.previous_hash,
                });
            }
        } else {
            if self.difficulty < 1 {
                return Err(BlockError::InvalidDifficulty(OutOfBounds {
                    min: Some(1),
                    max: None,
                    found: self.difficulty,
                }));
            }
            if self.previous_hash.is_none() {
                return Err(BlockError::MissingPreviousHash { index: self.index });
            }
        }

        if self.tx_hash != transaction_fingerprint(&self.transactions) {
            return Err(BlockError::InvalidTransactionFingerprint {
                expected: transaction_fingerprint(&self.transactions),
                found: self.tx_hash,
            });
        }

        if !hashcash::check_nonce(&self.hash, self.difficulty) {
            return Err(BlockError::InvalidNonce {
                hash: self.hash,
                difficulty: self.difficulty,
            });
        }

        for tx in &self.transactions {
            tx.validate(backend).map_err(BlockError::Transaction)?;
        }
        Ok(())
    }
}

fn transaction_fingerprint<A: Action>(transactions: &[Transaction<A>]) -> Option<H256> {
    if transactions.is_empty() {
        return None;
    }
    let listed = Value::List(
        transactions
            .iter()
            .map(|tx| Value::Binary(tx.encode()))
            .collect(),
    );
    Some(sha256(&listed.encode()))
}

fn header_value(
    index: BlockNumber,
    difficulty: u64,
    miner: &Option<Address>,
    previous_hash: &Option<H256>,
    timestamp: &DateTime<Utc>,
    tx_hash: &Option<H256>,
    nonce: &[u8],
) -> Value {
    let mut map = BTreeMap::new();
    map.insert(Key::from("index"), Value::from(index));
    map.insert(Key::from("difficulty"), Value::from(difficulty));
    map.insert(Key::from("timestamp"), Value::Text(format_timestamp(timestamp)));
    map.insert(Key::from("nonce"), Value::Binary(nonce.to_vec()));
    if let Some(miner) = miner {
        map.insert(
            Key::from("reward_beneficiary"),
            Value::Binary(miner.as_bytes().to_vec()),
        );
    }
    if let Some(previous_hash) = previous_hash {
        map.insert(
            Key::from("previous_hash"),
            Value::Binary(previous_hash.as_bytes().to_vec()),
        );
    }
    if let Some(tx_hash) = tx_hash {
        map.insert(
            Key::from("transaction_fingerprint"),
            Value::Binary(tx_hash.as_bytes().to_vec()),
        );
    }
    Value::Dictionary(map)
}

// Content-addressed identity.
impl<A> PartialEq for Block<A> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl<A> Eq for Block<A> {}

impl<A> Hash for Block<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// Block-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// Timestamp outside the allowed window.
    InvalidTimestamp(OutOfBounds<DateTime<Utc>>),
    /// Height does not match the chain position.
    InvalidIndex(Mismatch<BlockNumber>),
    /// Difficulty outside the allowed range for the position.
    InvalidDifficulty(OutOfBounds<u64>),
    /// Parent hash does not match the actual parent.
    InvalidPreviousHash {
        /// Hash required at this position.
        expected: Option<H256>,
        /// Hash carried by the block.
        found: Option<H256>,
    },
    /// A non-genesis block without a parent hash.
    MissingPreviousHash {
        /// Height of the offending block.
        index: BlockNumber,
    },
    /// The stored transaction list does not match the fingerprint.
    InvalidTransactionFingerprint {
        /// Fingerprint of the stored list.
        expected: Option<H256>,
        /// Fingerprint carried by the header.
        found: Option<H256>,
    },
    /// The hash does not satisfy the difficulty.
    InvalidNonce {
        /// The unsatisfying hash.
        hash: H256,
        /// Required leading zero bits.
        difficulty: u64,
    },
    /// The nonce search was cancelled before completion.
    MiningCancelled,
    /// A contained transaction failed validation.
    Transaction(TransactionError),
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockError::InvalidTimestamp(oob) => write!(f, "invalid block timestamp: {oob}"),
            BlockError::InvalidIndex(mismatch) => write!(f, "invalid block index. {mismatch}"),
            BlockError::InvalidDifficulty(oob) => write!(f, "invalid block difficulty: {oob}"),
            BlockError::InvalidPreviousHash { expected, found } => write!(
                f,
                "invalid previous hash. Expected {expected:?}, found {found:?}"
            ),
            BlockError::MissingPreviousHash { index } => {
                write!(f, "block #{index} lacks a previous hash")
            }
            BlockError::InvalidTransactionFingerprint { expected, found } => write!(
                f,
                "transaction fingerprint mismatch. Expected {expected:?}, found {found:?}"
            ),
            BlockError::InvalidNonce { hash, difficulty } => write!(
                f,
                "hash {hash} does not carry {difficulty} leading zero bits"
            ),
            BlockError::MiningCancelled => write!(f, "nonce search was cancelled"),
            BlockError::Transaction(err) => write!(f, "invalid transaction: {err}"),
        }
    }
}

impl error::Error for BlockError {}

impl From<TransactionError> for BlockError {
    fn from(err: TransactionError) -> Self {
        BlockError::Transaction(err)
    }
}
