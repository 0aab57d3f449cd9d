//! Signing and encryption of metric payloads.
//!
//! The agent signs every outgoing body with an HMAC-SHA256 over a shared secret ([`Signer`]) and
//! optionally encrypts it with the collector's RSA public key ([`Encryptor`]). The collector
//! performs the inverse with [`Signer::verify`] and [`Decryptor`].
#![warn(missing_docs)]

mod crypto;
mod signature;

pub use crate::crypto::*;
pub use crate::signature::*;
