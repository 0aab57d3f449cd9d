use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Size of the SHA-256 digest used for OAEP padding.
const HASH_LEN: usize = 32;

/// Size of the frame header: ciphertext chunk size and chunk count, both big endian `u32`.
const HEADER_LEN: usize = 8;

/// The default modulus size of generated keys.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Raised when a key cannot be loaded.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The key file could not be read.
    #[error("could not read key file {}", .0.display())]
    Io(PathBuf, #[source] io::Error),
    /// The PEM data is neither PKCS#1 nor PKCS#8.
    #[error("bad key encoding")]
    BadEncoding,
    /// Key generation or export failed.
    #[error("could not generate key pair")]
    Generate(#[source] rsa::Error),
    /// PEM export failed.
    #[error("could not encode key")]
    Encode,
}

/// Raised by [`Encryptor::encrypt`].
#[derive(Debug, thiserror::Error)]
#[error("could not encrypt payload")]
pub struct EncryptError(#[source] rsa::Error);

/// Raised by [`Decryptor::decrypt`].
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    /// The payload is shorter than the frame header.
    #[error("encrypted payload is truncated")]
    Truncated,
    /// The frame header announces chunks that do not match the private key.
    #[error("chunk size {found} does not match key size {expected}")]
    KeySizeMismatch {
        /// The size of the private key in bytes.
        expected: usize,
        /// The chunk size announced by the header.
        found: usize,
    },
    /// The body length does not match the header.
    #[error("expected {expected} bytes of ciphertext, got {found}")]
    LengthMismatch {
        /// Chunk size times chunk count.
        expected: usize,
        /// Bytes following the header.
        found: usize,
    },
    /// A chunk failed OAEP decryption.
    #[error("could not decrypt chunk {index}")]
    Chunk {
        /// Zero based position of the chunk.
        index: usize,
        /// The underlying error.
        #[source]
        source: rsa::Error,
    },
}

/// Returns the maximum plaintext length per chunk for a key of `key_size` bytes.
pub fn chunk_size(key_size: usize) -> usize {
    key_size.saturating_sub(2 * HASH_LEN + 2)
}

fn read_pem(path: &Path) -> Result<String, KeyError> {
    fs::read_to_string(path).map_err(|e| KeyError::Io(path.to_owned(), e))
}

/// Parses a public key from PKCS#8 (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, KeyError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| KeyError::BadEncoding)
}

/// Parses a private key from PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) PEM.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, KeyError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| KeyError::BadEncoding)
}

/// A generated RSA key pair, PEM encoded.
pub struct KeyPair {
    /// PKCS#8 private key, to be deployed on the collector.
    pub private_pem: String,
    /// PKCS#8 public key, to be deployed on agents.
    pub public_pem: String,
}

/// Generates a new RSA key pair with a modulus of `bits` bits.
pub fn generate_key_pair(bits: usize) -> Result<KeyPair, KeyError> {
    let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(KeyError::Generate)?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|_| KeyError::Encode)?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|_| KeyError::Encode)?;

    Ok(KeyPair {
        private_pem: private_pem.as_str().to_owned(),
        public_pem,
    })
}

/// Encrypts payloads with an RSA public key.
///
/// The plaintext is split into chunks of [`chunk_size`] bytes, each encrypted with RSA-OAEP
/// (SHA-256). The output is framed as:
///
/// ```text
/// [u32 BE ciphertext chunk size][u32 BE chunk count][chunk 0][chunk 1]...
/// ```
///
/// An empty plaintext encrypts to an empty output.
#[derive(Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    /// Creates an encryptor for the given public key.
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Loads the public key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        parse_public_key(&read_pem(path.as_ref())?).map(Self::new)
    }

    /// Size of the key and of every ciphertext chunk in bytes.
    pub fn key_size(&self) -> usize {
        self.key.size()
    }

    /// Encrypts `plaintext` into a framed ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptError> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }

        let key_size = self.key_size();
        let chunks = plaintext.chunks(chunk_size(key_size).max(1));
        let count = chunks.len();

        let mut output = Vec::with_capacity(HEADER_LEN + count * key_size);
        output.extend_from_slice(&(key_size as u32).to_be_bytes());
        output.extend_from_slice(&(count as u32).to_be_bytes());

        let mut rng = OsRng;
        for chunk in chunks {
            let encrypted = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                .map_err(EncryptError)?;
            output.extend_from_slice(&encrypted);
        }

        Ok(output)
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("key_size", &self.key_size())
            .finish()
    }
}

/// Decrypts payloads produced by an [`Encryptor`] with the matching private key.
#[derive(Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    /// Creates a decryptor for the given private key.
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Loads the private key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        parse_private_key(&read_pem(path.as_ref())?).map(Self::new)
    }

    /// Returns an encryptor for the public half of this key.
    pub fn encryptor(&self) -> Encryptor {
        Encryptor::new(self.key.to_public_key())
    }

    /// Size of the key in bytes.
    pub fn key_size(&self) -> usize {
        self.key.size()
    }

    /// Validates the frame and decrypts it chunk by chunk.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, DecryptError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let (header, body) = data
            .split_first_chunk::<HEADER_LEN>()
            .ok_or(DecryptError::Truncated)?;

        let (size, count) = header.split_at(4);
        let size = u32::from_be_bytes([size[0], size[1], size[2], size[3]]) as usize;
        let count = u32::from_be_bytes([count[0], count[1], count[2], count[3]]) as usize;

        let key_size = self.key_size();
        if size != key_size {
            return Err(DecryptError::KeySizeMismatch {
                expected: key_size,
                found: size,
            });
        }

        let expected = size.saturating_mul(count);
        if body.len() != expected {
            return Err(DecryptError::LengthMismatch {
                expected,
                found: body.len(),
            });
        }

        let mut output = Vec::with_capacity(count * chunk_size(key_size));
        for (index, chunk) in body.chunks(size).enumerate() {
            let plain = self
                .key
                .decrypt(Oaep::new::<Sha256>(), chunk)
                .map_err(|source| DecryptError::Chunk { index, source })?;
            output.extend_from_slice(&plain);
        }

        Ok(output)
    }
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("key_size", &self.key_size())
            .finish_non_exhaustive()
    }
}
