//! Rocket PhaseGate: phase gating, agent telemetry and a self-improving
//! learning ledger for multi-agent development workflows.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod scoring;
pub mod similarity;

pub use error::{EngineError, Result};
