//! Secrets loader contract — the secrets-manager adapter is external
//! collaborator detail (§1); this crate specifies the `SecretsLoader`
//! trait plus a TTL-caching wrapper any adapter can sit behind.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

pub trait SecretsLoader: Send + Sync {
    fn get(&self, id: &str) -> Result<String, String>;
}

struct CachedSecret {
    value: String,
    loaded_at: Instant,
}

/// Wraps any `SecretsLoader` with a TTL cache (default 1 hour per §9).
pub struct CachingSecretsLoader<L: SecretsLoader> {
    inner: L,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedSecret>>,
}

impl<L: SecretsLoader> CachingSecretsLoader<L> {
    pub fn new(inner: L, ttl: Duration) -> Self {
        Self { inner, ttl, cache: RwLock::new(HashMap::new()) }
    }
}

impl<L: SecretsLoader> SecretsLoader for CachingSecretsLoader<L> {
    fn get(&self, id: &str) -> Result<String, String> {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(id) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.value.clone());
                }
            }
        }
        let value = self.inner.get(id)?;
        self.cache.write().insert(id.to_string(), CachedSecret { value: value.clone(), loaded_at: Instant::now() });
        Ok(value)
    }
}

/// In-memory adapter for tests and local-dev mode.
#[derive(Default)]
pub struct StaticSecretsLoader {
    values: HashMap<String, String>,
}

impl StaticSecretsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(id.into(), value.into());
        self
    }
}

impl SecretsLoader for StaticSecretsLoader {
    fn get(&self, id: &str) -> Result<String, String> {
        self.values.get(id).cloned().ok_or_else(|| format!("no such secret: {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader(AtomicUsize);

    impl SecretsLoader for CountingLoader {
        fn get(&self, _id: &str) -> Result<String, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("secret-value".to_string())
        }
    }

    #[test]
    fn caching_loader_hits_inner_once_within_ttl() {
        let inner = CountingLoader(AtomicUsize::new(0));
        let caching = CachingSecretsLoader::new(inner, Duration::from_secs(3600));
        caching.get("mfa-secret").unwrap();
        caching.get("mfa-secret").unwrap();
        assert_eq!(caching.inner.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn static_loader_returns_configured_value() {
        let loader = StaticSecretsLoader::new().with_secret("mfa-secret", "s3cr3t");
        assert_eq!(loader.get("mfa-secret").unwrap(), "s3cr3t");
    }

    #[test]
    fn static_loader_errors_on_missing_id() {
        let loader = StaticSecretsLoader::new();
        assert!(loader.get("missing").is_err());
    }
}
