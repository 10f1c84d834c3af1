//! Production adapters for the external collaborator contracts (§6),
//! gated behind the `aws` feature so the core and its in-memory test
//! adapters build without network credentials or AWS SDK crates in the
//! dependency graph.

mod cloudwatch_logger;
mod dynamo_stores;
mod ssm_loader;
mod sts_vender;

pub use cloudwatch_logger::CloudWatchLogger;
pub use dynamo_stores::{DynamoApprovalStore, DynamoBreakGlassStore, DynamoSessionStore};
pub use ssm_loader::SsmPolicyLoader;
pub use sts_vender::StsCredentialVender;
