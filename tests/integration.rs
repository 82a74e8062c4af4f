//! Integration test entry point. Cargo only auto-discovers `.rs` files
//! directly under `tests/`, so this pulls in the nested scenario
//! modules explicitly.

#[path = "integration/mock_platform.rs"]
mod mock_platform;
#[path = "integration/simulation.rs"]
mod simulation;
