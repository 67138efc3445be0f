//! `reqwest` clients per transport variant.
//!
//! Proxy and TLS settings live on the `reqwest::Client`, not on individual
//! requests, so configs that change them get their own cached client. Every
//! client is safe to share across concurrent calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{ProxyConfig, RequestConfig, RequestError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TransportSettings {
    proxy: Option<ProxyConfig>,
    tls_verify: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct TransportPool {
    default: reqwest::Client,
    variants: Arc<Mutex<HashMap<TransportSettings, reqwest::Client>>>,
}

impl TransportPool {
    pub(crate) fn new(default: reqwest::Client) -> Self {
        Self {
            default,
            variants: Arc::default(),
        }
    }

    pub(crate) fn client_for(&self, config: &RequestConfig) -> Result<reqwest::Client> {
        if config.proxy.is_none() && config.tls_verify {
            return Ok(self.default.clone());
        }

        let settings = TransportSettings {
            proxy: config.proxy.clone(),
            tls_verify: config.tls_verify,
        };
        let mut variants = self.variants.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = variants.get(&settings) {
            return Ok(client.clone());
        }
        let client = build_client(&settings)?;
        variants.insert(settings, client.clone());
        Ok(client)
    }

    #[cfg(test)]
    fn variant_count(&self) -> usize {
        self.variants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn build_client(settings: &TransportSettings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(!settings.tls_verify);

    if let Some(proxy) = &settings.proxy {
        let mut upstream = reqwest::Proxy::all(proxy.url.as_str()).map_err(|err| {
            RequestError::InvalidConfig(format!("invalid proxy url '{}': {err}", proxy.url))
        })?;
        if let Some(credentials) = &proxy.credentials {
            upstream = upstream.basic_auth(&credentials.username, &credentials.password);
        }
        builder = builder.proxy(upstream);

        if let Some(pem) = &proxy.ssl_cadata {
            let certificate = reqwest::Certificate::from_pem(pem.as_bytes()).map_err(|err| {
                RequestError::InvalidConfig(format!("invalid proxy certificate: {err}"))
            })?;
            builder = builder.add_root_certificate(certificate);
        }
    }

    builder
        .build()
        .map_err(|err| RequestError::InvalidConfig(format!("could not build HTTP client: {err}")))
}

/// Whether `host` resolves to at least one address.
pub async fn is_host_reachable(host: &str) -> bool {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addresses) => addresses.next().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{is_host_reachable, TransportPool};
    use crate::{ProxyConfig, RequestConfig, RequestError};

    #[test]
    fn plain_configs_share_default_client() {
        let pool = TransportPool::new(reqwest::Client::new());
        pool.client_for(&RequestConfig::default()).expect("client");
        assert_eq!(pool.variant_count(), 0);
    }

    #[test]
    fn variants_are_cached_per_settings() {
        let pool = TransportPool::new(reqwest::Client::new());
        let insecure = RequestConfig::default().with_tls_verify(false);
        let proxied = RequestConfig::default()
            .with_proxy(ProxyConfig::new("http://127.0.0.1:3128").with_credentials("u", "p"));

        pool.client_for(&insecure).expect("client");
        pool.client_for(&insecure).expect("client");
        pool.client_for(&proxied).expect("client");
        assert_eq!(pool.variant_count(), 2);
    }

    #[test]
    fn malformed_proxy_is_config_error() {
        let pool = TransportPool::new(reqwest::Client::new());
        let config = RequestConfig::default().with_proxy(ProxyConfig::new("not a proxy url"));
        let err = pool.client_for(&config).expect_err("must fail");
        assert!(matches!(err, RequestError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn localhost_is_reachable() {
        assert!(is_host_reachable("localhost").await);
        assert!(!is_host_reachable("no-such-host.invalid").await);
    }
}
