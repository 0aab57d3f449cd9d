use std::sync::{Arc, LazyLock};

use axum::body::Body;
use axum::http::Response;
use meter_auth::{KeyPair, generate_key_pair};
use meter_config::Config;
use meter_storage::Storage;

use crate::service::ServiceState;

/// The shared secret used by signed tests.
pub const SECRET: &str = "0123456789abcdef";

/// A small key pair shared by all tests that need encryption.
pub static KEY_PAIR: LazyLock<KeyPair> = LazyLock::new(|| generate_key_pair(1024).unwrap());

/// Creates a state on memory storage from a JSON config.
pub fn state(config: serde_json::Value) -> ServiceState {
    let config = Config::from_json_value(config).unwrap();
    ServiceState::new(Arc::new(config), Storage::memory()).unwrap()
}

/// Creates a state whose private key is written to `dir`.
pub fn encrypted_state(dir: &tempfile::TempDir, mut config: serde_json::Value) -> ServiceState {
    let path = dir.path().join("private.pem");
    std::fs::write(&path, &KEY_PAIR.private_pem).unwrap();
    config["auth"]["crypto_key"] = serde_json::json!(path);
    state(config)
}

/// Reads a response body to completion.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
