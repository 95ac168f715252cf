//! Straylight — governance spine for an autonomous agent runtime.
//!
//! Every capability invocation flows through the
//! [`Orchestrator`](orchestrator::Orchestrator): authorization, budget,
//! idempotency, circuit breaking, retries, and the execution ledger all
//! live at that single gate. Around it sit the
//! [`Economy`](economy::Economy) (budget, reputation, vitality), the
//! [`AutonomyController`](autonomy::AutonomyController)
//! (observe/plan/decide/act/reflect under trust and canon gates), and an
//! authenticated HTTP [`server`] for external callers.

pub mod adapter;
pub mod autonomy;
pub mod config;
pub mod economy;
pub mod ledger;
pub mod logging;
pub mod observer;
pub mod orchestrator;
pub mod runtime;
pub mod server;
pub mod tools;
pub mod trust;
pub mod types;
