pub mod actions;
pub mod analysis;
pub mod backend;
pub mod config;
pub mod decision;
pub mod engine;
pub mod fidelity;
pub mod ledger;
pub mod network;
pub mod orchestrator;
pub mod recorder;
pub mod snapshot;

pub use engine::ReplayEngine;
pub use reprise_common::error;
pub use reprise_common::protocol;
