//! Modules imported straight from `http://` / `https://` URLs.
//!
//! The first resolution of a URL downloads it on the background pool and
//! stores the body in the dependency cache under the encoded URL; every later
//! resolution is served from the cache without touching the network.

use super::{ModuleFormat, ModuleResolver, ResolvedModule};
use crate::cache::DependencyCache;
use crate::scheduler::BackgroundPool;
use futures::future::BoxFuture;
use hostjs_common::{cache_key, ResolutionError};
use std::path::Path;
use std::sync::Arc;

/// Fetches the body of a URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, ResolutionError>>;
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetcher for ReqwestFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, ResolutionError>> {
        let client = self.client.clone();
        let url = url.to_string();
        Box::pin(async move {
            let fetch_error = |e: reqwest::Error| ResolutionError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            };

            let response = client.get(&url).send().await.map_err(fetch_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(ResolutionError::HttpStatus {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            let body = response.bytes().await.map_err(fetch_error)?;
            Ok(body.to_vec())
        })
    }
}

/// Resolves absolute URLs through the dependency cache.
pub struct DownloadableModuleResolver {
    cache: DependencyCache,
    fetcher: Arc<dyn Fetcher>,
    pool: BackgroundPool,
}

impl DownloadableModuleResolver {
    pub fn new(cache: DependencyCache, fetcher: Arc<dyn Fetcher>, pool: BackgroundPool) -> Self {
        Self {
            cache,
            fetcher,
            pool,
        }
    }

    fn download(&self, url: &str, key: &str) -> Result<std::path::PathBuf, ResolutionError> {
        tracing::info!(url, "Downloading module");
        let fetch = self.fetcher.fetch(url);
        let cache = self.cache.clone();
        let (url_owned, key_owned) = (url.to_string(), key.to_string());

        let stored = self.pool.block_on(async move {
            let body = fetch.await?;
            cache
                .put(&key_owned, &body)
                .map_err(|e| ResolutionError::Cache {
                    locator: url_owned,
                    reason: e.to_string(),
                })
        });

        stored.map_err(|e| ResolutionError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?
    }
}

impl ModuleResolver for DownloadableModuleResolver {
    fn name(&self) -> &'static str {
        "downloadable"
    }

    fn is_resolvable(&self, specifier: &str) -> bool {
        specifier.starts_with("https://") || specifier.starts_with("http://")
    }

    fn resolve(
        &self,
        specifier: &str,
        _referrer: Option<&Path>,
    ) -> Result<ResolvedModule, ResolutionError> {
        let key = cache_key::encode_locator(specifier);
        let path = match self.cache.get(&key) {
            Some(path) => {
                tracing::debug!(url = specifier, "Module served from dependency cache");
                path
            }
            None => self.download(specifier, &key)?,
        };
        Ok(ResolvedModule::file(path, ModuleFormat::Auto))
    }
}
