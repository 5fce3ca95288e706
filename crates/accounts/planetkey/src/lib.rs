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

//! Signing keys and the process-wide crypto backend slot.
//!
//! The chain core never touches curve arithmetic directly; it signs and
//! verifies through the [`CryptoBackend`] trait. The default backend is
//! ECDSA over secp256k1 with messages pre-hashed by SHA-256 and
//! addresses derived keccak-style from the public key. Embedders may
//! install a replacement backend, but only before the first use.

use std::{error, fmt, sync::Arc};

use lazy_static::lazy_static;
use parity_crypto as crypto;
use parking_lot::RwLock;

use crypto::publickey::{sign, verify_public, Message, Signature};

pub use crypto::publickey::{
    public_to_address, Address, Error as PublicKeyError, Generator, KeyPair, Public, Random,
    Secret,
};
pub use ethereum_types::H256;

/// Signing primitives consumed by the chain core.
///
/// `message` is always the raw canonical encoding; hashing it down to a
/// signable digest is the backend's business.
pub trait CryptoBackend: Send + Sync {
    /// Sign `message` with `secret`.
    fn sign(&self, secret: &Secret, message: &[u8]) -> Result<Vec<u8>, Error>;

    /// Check `signature` over `message` against `public`.
    ///
    /// Malformed signatures verify as `false`, never as an error.
    fn verify(&self, public: &Public, message: &[u8], signature: &[u8]) -> bool;

    /// Derive the public key belonging to `secret`.
    fn public_from_secret(&self, secret: &Secret) -> Result<Public, Error>;
}

/// The built-in secp256k1 backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1;

impl CryptoBackend for Secp256k1 {
    fn sign(&self, secret: &Secret, message: &[u8]) -> Result<Vec<u8>, Error> {
        let signature = sign(secret, &digest(message))?;
        Ok(signature.to_vec())
    }

    fn verify(&self, public: &Public, message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != 65 {
            return false;
        }
        let mut raw = [0u8; 65];
        raw.copy_from_slice(signature);
        verify_public(public, &Signature::from(raw), &digest(message)).unwrap_or(false)
    }

    fn public_from_secret(&self, secret: &Secret) -> Result<Public, Error> {
        Ok(*KeyPair::from_secret(secret.clone())?.public())
    }
}

/// SHA-256 of `data` as a 32-byte hash.
pub fn sha256(data: &[u8]) -> H256 {
    H256::from_slice(&*crypto::digest::sha256(data))
}

fn digest(message: &[u8]) -> Message {
    Message::from_slice(&*crypto::digest::sha256(message))
}

lazy_static! {
    static ref DEFAULT_BACKEND: RwLock<Option<Arc<dyn CryptoBackend>>> = RwLock::new(None);
}

/// Install the process-wide backend.
///
/// The slot is write-once: installation fails once any backend has been
/// observed through `default_backend`, including the built-in default.
pub fn set_default_backend(backend: Arc<dyn CryptoBackend>) -> Result<(), Error> {
    let mut slot = DEFAULT_BACKEND.write();
    if slot.is_some() {
        return Err(Error::BackendAlreadyInstalled);
    }
    *slot = Some(backend);
    Ok(())
}

/// The process-wide backend, installing [`Secp256k1`] on first use.
pub fn default_backend() -> Arc<dyn CryptoBackend> {
    if let Some(backend) = DEFAULT_BACKEND.read().as_ref() {
        return backend.clone();
    }
    let mut slot = DEFAULT_BACKEND.write();
    slot.get_or_insert_with(|| Arc::new(Secp256k1)).clone()
}

/// Key and backend errors.
#[derive(Debug)]
pub enum Error {
    /// `crypto::publickey` error.
    PublicKey(PublicKeyError),
    /// The backend slot was already initialized.
    BackendAlreadyInstalled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::PublicKey(err) => write!(f, "{err}"),
            Error::BackendAlreadyInstalled => {
                write!(f, "crypto backend slot is already initialized")
            }
        }
    }
}

impl error::Error for Error {}

impl From<PublicKeyError> for Error {
    fn from(err: PublicKeyError) -> Self {
        Error::PublicKey(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let keypair = Random.generate();
        let message = b"planetary message";

        let signature = Secp256k1.sign(keypair.secret(), message).unwrap();
        assert_eq!(signature.len(), 65);
        assert!(Secp256k1.verify(keypair.public(), message, &signature));
    }

    #[test]
    fn verify_rejects_tampering() {
        let keypair = Random.generate();
        let signature = Secp256k1.sign(keypair.secret(), b"original").unwrap();

        assert!(!Secp256k1.verify(keypair.public(), b"tampered", &signature));

        let other = Random.generate();
        assert!(!Secp256k1.verify(other.public(), b"original", &signature));
    }

    #[test]
    fn verify_rejects_malformed_signatures() {
        let keypair = Random.generate();
        assert!(!Secp256k1.verify(keypair.public(), b"msg", &[]));
        assert!(!Secp256k1.verify(keypair.public(), b"msg", &[0u8; 64]));
    }

    #[test]
    fn public_derivation_matches_keypair() {
        let keypair = Random.generate();
        let public = Secp256k1.public_from_secret(keypair.secret()).unwrap();
        assert_eq!(&public, keypair.public());
        assert_eq!(public_to_address(&public), keypair.address());
    }

    #[test]
    fn sha256_is_stable() {
        use rustc_hex::FromHex;

        let expected: Vec<u8> = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
            .from_hex()
            .unwrap();
        assert_eq!(sha256(b"hello"), H256::from_slice(&expected));
    }

    #[test]
    fn backend_slot_is_write_once() {
        // First observation installs the default; later installs must fail.
        let backend = default_backend();
        assert!(backend.verify(
            Random.generate().public(),
            b"",
            &[0u8; 65]
        ) == false);
        match set_default_backend(Arc::new(Secp256k1)) {
            Err(Error::BackendAlreadyInstalled) => {}
            other => panic!("expected occupied slot, got {other:?}"),
        }
    }
}
