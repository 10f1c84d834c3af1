//! Policy Loader & Engine (§4.5): fetches, optionally verifies, and caches
//! a profile's policy, then evaluates it against a request.

pub mod canonical;
pub mod engine;
pub mod loader;
pub mod types;

pub use engine::evaluate;
pub use loader::{
    CacheLoader, HmacSigner, PolicyError, PolicyLoader, ProfileLister, RawPolicyLoader, RawSignatureLoader, Signer,
    StaticPolicyLoader, UnsignedVerifier, VerifyingLoader,
};
pub use types::{Condition, Decision, Effect, EvalContext, Mode, Policy, Rule};
