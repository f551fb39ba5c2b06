//! Shared HTTP client construction.
//!
//! reqwest is built with `rustls-no-provider`, so a process-wide crypto provider has to be
//! installed before the first client is created. [`client`] does that on every call path,
//! including tests that never go through `main`.

use std::sync::Once;
use std::time::Duration;

use reqwest::Client;

use crate::errors::{Error, Result};

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the aws-lc-rs rustls provider once per process.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Err means another provider is already installed, which is fine
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Build a client with an overall request timeout.
pub fn client(timeout: Duration) -> Result<Client> {
    install_crypto_provider();
    Client::builder().timeout(timeout).build().map_err(|e| Error::Internal {
        operation: format!("create HTTP client: {e}"),
    })
}
