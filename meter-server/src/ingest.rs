//! Unwrapping and validation of incoming payloads.
//!
//! Every payload passes the same stages in order: the signature is verified over the raw bytes,
//! the body is decrypted if a private key is configured, the content encoding is removed and
//! finally the metrics are parsed and validated as a whole.

use std::error::Error;
use std::io;
use std::sync::Arc;

use axum::http::header::{CONTENT_ENCODING, HeaderMap, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use meter_auth::{DecryptError, Decryptor, Signer};
use meter_common::{ContentEncoding, UnsupportedEncoding};
use meter_metrics::{MetricExchange, Record, ValidationError};
use meter_storage::StorageError;

use crate::utils::ApiErrorResponse;

/// Header carrying the HMAC of a request or response body.
pub static SIGNATURE: HeaderName = HeaderName::from_static("hashsha256");

/// Error raised while ingesting or querying metrics.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The signature does not match the payload.
    #[error("payload signature does not match")]
    BadSignature,

    /// The payload could not be decrypted.
    #[error("failed to decrypt payload")]
    Decrypt(#[from] DecryptError),

    /// An encrypted payload arrived but no private key is configured.
    #[error("encrypted payload received but no private key is configured")]
    NoPrivateKey,

    /// A plaintext batch arrived while encryption is required.
    #[error("plaintext batches are rejected, use the encrypted call")]
    PlaintextRejected,

    /// The content encoding is not supported.
    #[error(transparent)]
    UnsupportedEncoding(#[from] UnsupportedEncoding),

    /// The payload announced gzip but could not be decompressed.
    #[error("failed to decompress payload")]
    Decompress(#[source] io::Error),

    /// The payload is not valid JSON.
    #[error("invalid JSON payload")]
    InvalidJson(#[from] serde_json::Error),

    /// The decrypted payload is not a valid protobuf message.
    #[error("invalid protobuf payload")]
    InvalidProtobuf(#[from] prost::DecodeError),

    /// A metric failed validation.
    #[error("invalid metric")]
    Invalid(#[from] ValidationError),

    /// The batch contains no metrics.
    #[error("empty metric batch")]
    EmptyBatch,

    /// The storage failed or the metric is unknown.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadSignature
            | Self::Decrypt(_)
            | Self::NoPrivateKey
            | Self::PlaintextRejected
            | Self::UnsupportedEncoding(_)
            | Self::InvalidJson(_)
            | Self::InvalidProtobuf(_)
            | Self::Invalid(_)
            | Self::EmptyBatch => StatusCode::BAD_REQUEST,
            Self::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Decompress(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            meter_log::error!(error = &self as &dyn Error, "failed to handle request");
        } else {
            meter_log::debug!(error = &self as &dyn Error, "rejected request");
        }

        (status, ApiErrorResponse::from_error(&self)).into_response()
    }
}

impl From<IngestError> for tonic::Status {
    fn from(error: IngestError) -> Self {
        let message = ApiErrorResponse::from_error(&error).to_string();
        match error.status() {
            StatusCode::NOT_FOUND => tonic::Status::not_found(message),
            StatusCode::BAD_REQUEST => tonic::Status::invalid_argument(message),
            _ => {
                meter_log::error!(error = &error as &dyn Error, "failed to handle call");
                tonic::Status::internal(message)
            }
        }
    }
}

/// Verifies, decrypts and decodes payloads according to the configured keys.
#[derive(Clone, Debug, Default)]
pub struct Ingest {
    signer: Option<Arc<Signer>>,
    decryptor: Option<Arc<Decryptor>>,
}

impl Ingest {
    /// Creates the pipeline from the optional shared secret and private key.
    pub fn new(signer: Option<Arc<Signer>>, decryptor: Option<Arc<Decryptor>>) -> Self {
        Self { signer, decryptor }
    }

    /// Returns `true` if incoming payloads must be encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.decryptor.is_some()
    }

    /// Checks the signature of a raw payload.
    ///
    /// Payloads without a signature are accepted, as are all payloads if no secret is configured.
    pub fn verify(&self, data: &[u8], signature: Option<&str>) -> Result<(), IngestError> {
        match (&self.signer, signature) {
            (Some(signer), Some(signature)) if !signer.verify(data, signature) => {
                Err(IngestError::BadSignature)
            }
            _ => Ok(()),
        }
    }

    /// Decrypts the payload if a private key is configured.
    pub fn decrypt(&self, data: Vec<u8>) -> Result<Vec<u8>, IngestError> {
        match self.decryptor {
            Some(ref decryptor) => Ok(decryptor.decrypt(&data)?),
            None => Ok(data),
        }
    }

    /// Decrypts a payload that is known to be encrypted.
    pub fn decrypt_required(&self, data: &[u8]) -> Result<Vec<u8>, IngestError> {
        let decryptor = self.decryptor.as_ref().ok_or(IngestError::NoPrivateKey)?;
        Ok(decryptor.decrypt(data)?)
    }

    /// Runs all stages on an HTTP request body that carries metrics.
    pub fn unwrap_body(&self, headers: &HeaderMap, body: Bytes) -> Result<Vec<u8>, IngestError> {
        self.verify(&body, signature(headers))?;
        let data = self.decrypt(body.into())?;
        decode(headers, data)
    }

    /// Runs the stages for a lookup body, which is signed and encoded but never encrypted.
    pub fn unwrap_query(&self, headers: &HeaderMap, body: Bytes) -> Result<Vec<u8>, IngestError> {
        self.verify(&body, signature(headers))?;
        decode(headers, body.into())
    }
}

/// Returns the signature header of a request, if present and readable.
pub fn signature(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&SIGNATURE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
}

/// Removes the content encoding announced in the headers.
fn decode(headers: &HeaderMap, data: Vec<u8>) -> Result<Vec<u8>, IngestError> {
    let encoding = match headers.get(CONTENT_ENCODING) {
        Some(value) => {
            let value = value.to_str().map_err(|_| {
                UnsupportedEncoding(String::from_utf8_lossy(value.as_bytes()).into_owned())
            })?;
            ContentEncoding::parse(value)?
        }
        None => ContentEncoding::Identity,
    };

    encoding.decode(data).map_err(IngestError::Decompress)
}

/// Parses and validates a single metric.
pub fn parse_record(data: &[u8]) -> Result<Record, IngestError> {
    let exchange: MetricExchange = serde_json::from_slice(data)?;
    Ok(Record::try_from(exchange)?)
}

/// Parses and validates a batch of metrics.
///
/// A single invalid metric fails the entire batch.
pub fn parse_records(data: &[u8]) -> Result<Vec<Record>, IngestError> {
    let exchanges: Vec<MetricExchange> = serde_json::from_slice(data)?;
    if exchanges.is_empty() {
        return Err(IngestError::EmptyBatch);
    }

    exchanges
        .into_iter()
        .map(|exchange| Ok(Record::try_from(exchange)?))
        .collect()
}
