//! Poolwarden Chain
//!
//! External-facing adapters: the chain relay client implementing
//! [`poolwarden_core::ChainGateway`] and the multisig approval registry
//! client implementing [`poolwarden_core::ApprovalSource`]. The engine
//! never talks to the chain except through these.

mod approvals;
mod gateway;

pub use approvals::RegistryApprovalSource;
pub use gateway::RelayGateway;
