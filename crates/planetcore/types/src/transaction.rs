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

//! Signed transactions.

use crate::{
    action::Action, format_timestamp, parse_timestamp, unexpected::Mismatch, BlockNumber,
};
use chrono::{DateTime, Utc};
use ethereum_types::{Address, H256};
use parity_bytes::Bytes;
use planet_bencodex::{DecoderError, Key, Value};
use planetkey::{public_to_address, sha256, CryptoBackend, KeyPair, Public};
use std::{
    collections::{BTreeMap, BTreeSet},
    error, fmt,
    hash::{Hash, Hasher},
};

/// Content-addressed transaction identifier.
pub type TxId = H256;

/// A signed bundle of actions.
///
/// Immutable once signed: every field participates in the canonical
/// encoding whose digest is [`id`](Transaction::id), so mutation would
/// change identity. `updated_addresses` declares the address keys the
/// carried actions are permitted to write; it may over-approximate.
#[derive(Debug, Clone)]
pub struct Transaction<A> {
    signer: Address,
    public_key: Public,
    nonce: u64,
    updated_addresses: BTreeSet<Address>,
    timestamp: DateTime<Utc>,
    actions: Vec<A>,
    signature: Bytes,
    id: TxId,
}

impl<A: Action> Transaction<A> {
    /// Create and sign a transaction.
    pub fn new(
        nonce: u64,
        keypair: &KeyPair,
        updated_addresses: BTreeSet<Address>,
        actions: Vec<A>,
        timestamp: DateTime<Utc>,
        backend: &dyn CryptoBackend,
    ) -> Result<Self, TransactionError> {
        let mut tx = Transaction {
            signer: keypair.address(),
            public_key: *keypair.public(),
            nonce,
            updated_addresses,
            timestamp,
            actions,
            signature: Vec::new(),
            id: TxId::zero(),
        };
        let unsigned = tx.to_bencodex(false).encode();
        tx.signature = backend.sign(keypair.secret(), &unsigned)?;
        tx.id = sha256(&tx.encode());
        Ok(tx)
    }

    /// Signer address.
    pub fn signer(&self) -> Address {
        self.signer
    }

    /// Signer's public key.
    pub fn public_key(&self) -> &Public {
        &self.public_key
    }

    /// Per-signer sequence number.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Declared set of addresses the actions may write.
    pub fn updated_addresses(&self) -> &BTreeSet<Address> {
        &self.updated_addresses
    }

    /// Creation time.
    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    /// The carried actions, in application order.
    pub fn actions(&self) -> &[A] {
        &self.actions
    }

    /// The ECDSA signature over the unsigned encoding.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Content-addressed identifier: the digest of the signed encoding.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// The canonical dictionary form, with or without the signature.
    pub fn to_bencodex(&self, include_signature: bool) -> Value {
        let mut map = BTreeMap::new();
        map.insert(
            Key::from("signer"),
            Value::Binary(self.signer.as_bytes().to_vec()),
        );
        map.insert(
            Key::from("public_key"),
            Value::Binary(self.public_key.as_bytes().to_vec()),
        );
        map.insert(
            Key::from("updated_addresses"),
            Value::List(
                self.updated_addresses
                    .iter()
                    .map(|address| Value::Binary(address.as_bytes().to_vec()))
                    .collect(),
            ),
        );
        map.insert(Key::from("nonce"), Value::from(self.nonce));
        map.insert(
            Key::from("timestamp"),
            Value::Text(format_timestamp(&self.timestamp)),
        );
        map.insert(
            Key::from("actions"),
            Value::List(self.actions.iter().map(Action::plain_value).collect()),
        );
        if include_signature {
            map.insert(
                Key::from("signature"),
                Value::Binary(self.signature.clone()),
            );
        }
        Value::Dictionary(map)
    }

    /// The canonical signed encoding.
    pub fn encode(&self) -> Bytes {
        self.to_bencodex(true).encode()
    }

    /// Rebuild a transaction from its canonical signed encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecoderError> {
        Self::from_bencodex(&Value::decode(bytes)?)
    }

    /// Rebuild a transaction from its dictionary form.
    pub fn from_bencodex(value: &Value) -> Result<Self, DecoderError> {
        let signer = field(value, "signer")?
            .as_binary()
            .filter(|bytes| bytes.len() == 20)
            .map(Address::from_slice)
            .ok_or(DecoderError::Custom("transaction signer must be 20 bytes"))?;
        let public_key = field(value, "public_key")?
            .as_binary()
            .filter(|bytes| bytes.len() == 64)
            .map(Public::from_slice)
            .ok_or(DecoderError::Custom("transaction public key must be 64 bytes"))?;
        let updated_addresses = field(value, "updated_addresses")?
            .as_list()
            .ok_or(DecoderError::Custom("updated addresses must be a list"))?
            .iter()
            .map(|item| {
                item.as_binary()
                    .filter(|bytes| bytes.len() == 20)
                    .map(Address::from_slice)
                    .ok_or(DecoderError::Custom("updated address must be 20 bytes"))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        let nonce = field(value, "nonce")?
            .as_integer()
            .filter(|nonce| *nonce >= 0 && *nonce <= i128::from(u64::max_value()))
            .ok_or(DecoderError::Custom("transaction nonce must be a non-negative integer"))?
            as u64;
        let timestamp = field(value, "timestamp")?
            .as_text()
            .and_then(|text| parse_timestamp(text).ok())
            .ok_or(DecoderError::Custom("malformed transaction timestamp"))?;
        let actions = field(value, "actions")?
            .as_list()
            .ok_or(DecoderError::Custom("transaction actions must be a list"))?
            .iter()
            .map(|item| {
                A::load_plain_value(item)
                    .map_err(|_| DecoderError::Custom("malformed action plain value"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let signature = field(value, "signature")?
            .as_binary()
            .ok_or(DecoderError::Custom("transaction signature must be bytes"))?
            .to_vec();

        let mut tx = Transaction {
            signer,
            public_key,
            nonce,
            updated_addresses,
            timestamp,
            actions,
            signature,
            id: TxId::zero(),
        };
        tx.id = sha256(&tx.encode());
        Ok(tx)
    }

    /// Integrity check: the signature verifies over the unsigned
    /// encoding, and the signer is the address of the public key.
    pub fn validate(&self, backend: &dyn CryptoBackend) -> Result<(), TransactionError> {
        let unsigned = self.to_bencodex(false).encode();
        if !backend.verify(&self.public_key, &unsigned, &self.signature) {
            return Err(TransactionError::InvalidSignature { id: self.id });
        }
        let derived = public_to_address(&self.public_key);
        if derived != self.signer {
            return Err(TransactionError::InvalidPublicKey(Mismatch {
                expected: self.signer,
                found: derived,
            }));
        }
        Ok(())
    }
}

fn field<'a>(value: &'a Value, name: &'static str) -> Result<&'a Value, DecoderError> {
    value
        .get(name)
        .ok_or(DecoderError::Custom("missing transaction field"))
}

// Identity is content-addressed; two transactions with equal ids are the
// same record.
impl<A> PartialEq for Transaction<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A> Eq for Transaction<A> {}

impl<A> Hash for Transaction<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Transaction-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The signature does not verify over the unsigned encoding.
    InvalidSignature {
        /// Offending transaction.
        id: TxId,
    },
    /// The declared signer is not the address of the public key.
    InvalidPublicKey(Mismatch<Address>),
    /// An action wrote an address outside the declared update set.
    InvalidUpdatedAddresses {
        /// Offending transaction.
        id: TxId,
        /// The address written without declaration.
        address: Address,
    },
    /// The nonce is not the strict successor of the signer's tally.
    InvalidNonce {
        /// Signer whose tally was violated.
        signer: Address,
        /// Expected and found nonces.
        nonce: Mismatch<u64>,
        /// Block in which the violation was observed, if any.
        block_index: Option<BlockNumber>,
    },
    /// Signing failed in the crypto backend.
    Crypto(String),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransactionError::InvalidSignature { id } => {
                write!(f, "signature of transaction {id} does not verify")
            }
            TransactionError::InvalidPublicKey(mismatch) => {
                write!(f, "signer does not own the public key. {mismatch}")
            }
            TransactionError::InvalidUpdatedAddresses { id, address } => write!(
                f,
                "transaction {id} updated undeclared address {address:?}"
            ),
            TransactionError::InvalidNonce {
                signer,
                nonce,
                block_index,
            } => match block_index {
                Some(index) => write!(
                    f,
                    "bad nonce for signer {signer:?} in block #{index}. {nonce}"
                ),
                None => write!(f, "bad nonce for signer {signer:?}. {nonce}"),
            },
            TransactionError::Crypto(message) => write!(f, "signing failed: {message}"),
        }
    }
}

impl error::Error for TransactionError {}

impl From<planetkey::Error> for TransactionError {
    fn from(err: planetkey::Error) -> Self {
        TransactionError::Crypto(err.to_string())
    }
}
