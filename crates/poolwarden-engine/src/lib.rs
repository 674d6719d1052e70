//! Poolwarden Engine
//!
//! The balance-triggered liquidity provisioning loop: monitor the
//! collection account, evaluate thresholds, validate against the safety
//! limits, execute the liquidity-add, and attribute the minted LP
//! tokens to depositors.

pub mod attribution;
pub mod control;
pub mod evaluator;
pub mod governor;
pub mod monitor;
pub mod orchestrator;
pub mod provisioner;

pub use attribution::{plan_allocations, Allocation, AttributionLedger};
pub use control::{ControlServer, ControlState};
pub use evaluator::evaluate;
pub use governor::{SafetyGovernor, Verdict};
pub use monitor::BalanceMonitor;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use provisioner::{plan_provision, LiquidityProvisioner, ProvisionPlan};
