//! Policy Loader chain.
//!
//! Two compositions are supported:
//!   unsigned: `ParameterStoreLoader -> CacheLoader(ttl)`
//!   signed:   `RawParameterStoreLoader + RawSignatureLoader -> VerifyingLoader(signer, enforce) -> CacheLoader(ttl)`
//!
//! Composition over inheritance throughout: a `VerifyingLoader` holds a raw
//! loader, a raw signature loader, and a signer rather than subclassing
//! anything.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::canonical;
use super::types::Policy;

#[derive(Debug, Clone)]
pub enum PolicyError {
    NotFound(String),
    Unavailable(String),
    InvalidDocument(String),
    SignatureMissing,
    SignatureInvalid,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "policy not found: {path}"),
            Self::Unavailable(msg) => write!(f, "policy store unavailable: {msg}"),
            Self::InvalidDocument(msg) => write!(f, "invalid policy document: {msg}"),
            Self::SignatureMissing => write!(f, "policy signature missing"),
            Self::SignatureInvalid => write!(f, "policy signature invalid"),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Loads a parsed, versioned policy for a path.
pub trait PolicyLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<(Policy, String), PolicyError>;
}

/// Loads raw bytes for a path, prior to parsing — the seam `VerifyingLoader`
/// needs to check a signature before trusting the content.
pub trait RawPolicyLoader: Send + Sync {
    fn load_raw(&self, path: &str) -> Result<Vec<u8>, PolicyError>;
}

/// Loads the detached signature that accompanies a raw policy document.
pub trait RawSignatureLoader: Send + Sync {
    fn load_signature(&self, path: &str) -> Result<Option<String>, PolicyError>;
}

/// Enumerates the profile names published directly under `root` — the
/// collaborator `GET /profiles` (§6) uses for profile discovery.
pub trait ProfileLister: Send + Sync {
    fn list_profiles(&self, root: &str) -> Result<Vec<String>, PolicyError>;
}

/// Strips `prefix` plus a leading `/` from `path`, returning `None` if
/// `path` isn't directly under `prefix` (or is nested further under it).
fn immediate_child(path: &str, prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(prefix)?.trim_start_matches('/');
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest.to_string())
    }
}

pub trait Signer: Send + Sync {
    fn verify(&self, bytes: &[u8], signature_hex: &str) -> bool;
    fn sign(&self, bytes: &[u8]) -> String;
}

impl Signer for Box<dyn Signer> {
    fn verify(&self, bytes: &[u8], signature_hex: &str) -> bool {
        (**self).verify(bytes, signature_hex)
    }

    fn sign(&self, bytes: &[u8]) -> String {
        (**self).sign(bytes)
    }
}

pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl Signer for HmacSigner {
    fn verify(&self, bytes: &[u8], signature_hex: &str) -> bool {
        canonical::hmac_verify_bytes(bytes, &self.key, signature_hex).unwrap_or(false)
    }

    fn sign(&self, bytes: &[u8]) -> String {
        canonical::hmac_sign_bytes(bytes, &self.key).unwrap_or_default()
    }
}

/// No signing key configured: verification always fails, so `enforce=false`
/// is required to actually use this in `VerifyingLoader`.
pub struct UnsignedVerifier;

impl Signer for UnsignedVerifier {
    fn verify(&self, _bytes: &[u8], _signature_hex: &str) -> bool {
        false
    }

    fn sign(&self, _bytes: &[u8]) -> String {
        String::new()
    }
}

/// In-memory `RawPolicyLoader` + `RawSignatureLoader`, also usable directly
/// as a `PolicyLoader` for the unsigned chain. The production adapter
/// (`SsmPolicyLoader`, behind the `aws` feature) targets AWS SSM Parameter
/// Store and implements the same three traits.
#[derive(Default)]
pub struct StaticPolicyLoader {
    documents: HashMap<String, (Vec<u8>, String)>,
    signatures: HashMap<String, String>,
}

impl StaticPolicyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, path: impl Into<String>, policy: &Policy, version: impl Into<String>) -> Self {
        let bytes = serde_json::to_vec(policy).expect("policy serializes");
        self.documents.insert(path.into(), (bytes, version.into()));
        self
    }

    pub fn with_signature(mut self, path: impl Into<String>, signature_hex: impl Into<String>) -> Self {
        self.signatures.insert(path.into(), signature_hex.into());
        self
    }
}

impl RawPolicyLoader for StaticPolicyLoader {
    fn load_raw(&self, path: &str) -> Result<Vec<u8>, PolicyError> {
        self.documents
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| PolicyError::NotFound(path.to_string()))
    }
}

impl RawSignatureLoader for StaticPolicyLoader {
    fn load_signature(&self, path: &str) -> Result<Option<String>, PolicyError> {
        Ok(self.signatures.get(path).cloned())
    }
}

impl PolicyLoader for StaticPolicyLoader {
    fn load(&self, path: &str) -> Result<(Policy, String), PolicyError> {
        let (bytes, version) = self.documents.get(path).ok_or_else(|| PolicyError::NotFound(path.to_string()))?;
        let policy: Policy = serde_json::from_slice(bytes).map_err(|e| PolicyError::InvalidDocument(e.to_string()))?;
        Ok((policy, version.clone()))
    }
}

impl ProfileLister for StaticPolicyLoader {
    fn list_profiles(&self, root: &str) -> Result<Vec<String>, PolicyError> {
        let prefix = root.trim_end_matches('/');
        let mut names: Vec<String> = self.documents.keys().filter_map(|path| immediate_child(path, prefix)).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Fetches raw content and its detached signature, verifies via `Signer`,
/// and either rejects unsigned/invalid policies or logs a warning and
/// passes the content through, depending on `enforce`.
pub struct VerifyingLoader<R, S, Sig>
where
    R: RawPolicyLoader,
    S: RawSignatureLoader,
    Sig: Signer,
{
    raw: R,
    raw_sig: S,
    signer: Sig,
    enforce: bool,
}

impl<R, S, Sig> VerifyingLoader<R, S, Sig>
where
    R: RawPolicyLoader,
    S: RawSignatureLoader,
    Sig: Signer,
{
    pub fn new(raw: R, raw_sig: S, signer: Sig, enforce: bool) -> Self {
        Self { raw, raw_sig, signer, enforce }
    }
}

impl<R, S, Sig> PolicyLoader for VerifyingLoader<R, S, Sig>
where
    R: RawPolicyLoader,
    S: RawSignatureLoader,
    Sig: Signer,
{
    fn load(&self, path: &str) -> Result<(Policy, String), PolicyError> {
        let bytes = self.raw.load_raw(path)?;
        let signature = self.raw_sig.load_signature(path)?;

        let verified = match &signature {
            Some(sig) => self.signer.verify(&bytes, sig),
            None => false,
        };

        if !verified {
            if self.enforce {
                return Err(if signature.is_none() { PolicyError::SignatureMissing } else { PolicyError::SignatureInvalid });
            }
            tracing::warn!(%path, "policy signature not verified, enforce disabled, accepting content");
        }

        let policy: Policy = serde_json::from_slice(&bytes).map_err(|e| PolicyError::InvalidDocument(e.to_string()))?;
        let version = canonical::sha256_hex(&bytes);
        Ok((policy, version))
    }
}

struct CacheEntry {
    policy: Policy,
    version: String,
    loaded_at: Instant,
}

/// Memoizes loaded policies keyed by parameter path for `ttl`. Reads never
/// block on a write to a different key; a miss briefly locks the whole map
/// to insert, matching the reader-writer discipline required of the policy
/// cache (many readers, occasional writer).
pub struct CacheLoader<L: PolicyLoader> {
    inner: L,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl<L: PolicyLoader> CacheLoader<L> {
    pub fn new(inner: L, ttl: Duration) -> Self {
        Self { inner, ttl, cache: RwLock::new(HashMap::new()) }
    }
}

impl<L: PolicyLoader> PolicyLoader for CacheLoader<L> {
    fn load(&self, path: &str) -> Result<(Policy, String), PolicyError> {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(path) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok((entry.policy.clone(), entry.version.clone()));
                }
            }
        }

        let (policy, version) = self.inner.load(path)?;
        let mut cache = self.cache.write();
        cache.insert(
            path.to_string(),
            CacheEntry { policy: policy.clone(), version: version.clone(), loaded_at: Instant::now() },
        );
        Ok((policy, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::{Effect, Rule};

    fn sample_policy() -> Policy {
        Policy {
            version: "v1".into(),
            rules: vec![Rule { name: "allow-all".into(), effect: Effect::Allow, conditions: vec![], max_server_duration: None, reason: String::new() }],
        }
    }

    #[test]
    fn static_loader_roundtrips_policy() {
        let loader = StaticPolicyLoader::new().with_policy("/sentinel/policy", &sample_policy(), "v1");
        let (policy, version) = loader.load("/sentinel/policy").unwrap();
        assert_eq!(policy, sample_policy());
        assert_eq!(version, "v1");
    }

    #[test]
    fn missing_path_is_not_found() {
        let loader = StaticPolicyLoader::new();
        let err = loader.load("/missing").unwrap_err();
        assert!(matches!(err, PolicyError::NotFound(_)));
    }

    #[test]
    fn verifying_loader_accepts_valid_signature() {
        let key = b"0123456789abcdef0123456789abcdef".to_vec();
        let raw_bytes = serde_json::to_vec(&sample_policy()).unwrap();
        let signer = HmacSigner::new(key.clone());
        let sig = signer.sign(&raw_bytes);
        let raw_loader = StaticPolicyLoader::new().with_policy("/p", &sample_policy(), "irrelevant").with_signature("/p", sig);
        let verifying = VerifyingLoader::new(
            StaticPolicyLoader::new().with_policy("/p", &sample_policy(), "irrelevant"),
            raw_loader,
            HmacSigner::new(key),
            true,
        );
        let (policy, _) = verifying.load("/p").unwrap();
        assert_eq!(policy, sample_policy());
    }

    #[test]
    fn verifying_loader_rejects_missing_signature_when_enforced() {
        let raw = StaticPolicyLoader::new().with_policy("/p", &sample_policy(), "v1");
        let verifying = VerifyingLoader::new(
            StaticPolicyLoader::new().with_policy("/p", &sample_policy(), "v1"),
            raw,
            HmacSigner::new(b"0123456789abcdef0123456789abcdef".to_vec()),
            true,
        );
        let err = verifying.load("/p").unwrap_err();
        assert!(matches!(err, PolicyError::SignatureMissing));
    }

    #[test]
    fn verifying_loader_accepts_unsigned_when_not_enforced() {
        let raw = StaticPolicyLoader::new().with_policy("/p", &sample_policy(), "v1");
        let verifying = VerifyingLoader::new(
            StaticPolicyLoader::new().with_policy("/p", &sample_policy(), "v1"),
            raw,
            UnsignedVerifier,
            false,
        );
        let (policy, _) = verifying.load("/p").unwrap();
        assert_eq!(policy, sample_policy());
    }

    #[test]
    fn static_loader_lists_immediate_children_of_root() {
        let loader = StaticPolicyLoader::new()
            .with_policy("/sentinel/policy/prod", &sample_policy(), "v1")
            .with_policy("/sentinel/policy/dev", &sample_policy(), "v1")
            .with_policy("/sentinel/policy/dev/nested", &sample_policy(), "v1");
        let mut profiles = loader.list_profiles("/sentinel/policy").unwrap();
        profiles.sort();
        assert_eq!(profiles, vec!["dev".to_string(), "prod".to_string()]);
    }

    #[test]
    fn cache_loader_serves_cached_value_within_ttl() {
        struct CountingLoader(std::sync::atomic::AtomicUsize, Policy);
        impl PolicyLoader for CountingLoader {
            fn load(&self, _path: &str) -> Result<(Policy, String), PolicyError> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok((self.1.clone(), "v1".into()))
            }
        }
        let inner = CountingLoader(std::sync::atomic::AtomicUsize::new(0), sample_policy());
        let cache = CacheLoader::new(inner, Duration::from_secs(30));
        cache.load("/p").unwrap();
        cache.load("/p").unwrap();
        assert_eq!(cache.inner.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
