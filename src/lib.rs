//! Sentinel — a token vending machine: given an authenticated caller and a
//! requested cloud IAM profile, decides whether to issue short-lived
//! federated credentials, and if so, obtains them via STS AssumeRole
//! stamped with a tamper-evident source identity.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod handler;
pub mod identity;
pub mod logging;
pub mod notify;
pub mod override_resolver;
pub mod policy;
pub mod posture;
pub mod ratelimit;
pub mod secrets;
pub mod session;
pub mod web;

#[cfg(feature = "aws")]
pub mod aws_adapters;

#[cfg(feature = "mdm-http")]
pub mod mdm_http;
