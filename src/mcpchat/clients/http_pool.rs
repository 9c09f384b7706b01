//! HTTP client pool keyed by base URL.
//!
//! Every model client talking to the same base URL shares one `reqwest::Client`,
//! so connections, DNS lookups and TLS sessions are reused across requests.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    static ref HTTP_CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> =
        Mutex::new(HashMap::new());
}

/// Get or create the shared HTTP client for `base_url`.
pub fn get_http_client(base_url: &str) -> reqwest::Client {
    let mut pool = HTTP_CLIENT_POOL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(client) = pool.get(base_url) {
        return client.clone();
    }

    let client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_else(|e| {
            log::warn!("Falling back to a default HTTP client for {}: {}", base_url, e);
            reqwest::Client::new()
        });

    pool.insert(base_url.to_string(), client.clone());
    client
}

/// Number of base URLs with a pooled client.
pub fn pooled_clients() -> usize {
    HTTP_CLIENT_POOL
        .lock()
        .map(|pool| pool.len())
        .unwrap_or_default()
}
