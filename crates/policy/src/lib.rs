//! Tool governance for the Nexus core: canonical tool identity, trust
//! levels for edge devices, the allow/deny policy resolver, and the
//! human-approval workflow for edge tools.

pub mod approval;
pub mod identity;
pub mod resolver;
pub mod trust;

pub use approval::{ApprovalManager, ApprovalRequest, ApprovalStatus};
pub use identity::{ToolCatalog, ToolIdentity, ToolSource};
pub use resolver::{Decision, PolicyResolver};
pub use trust::TrustStore;
