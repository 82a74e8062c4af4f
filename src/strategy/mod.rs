//! Strategy engine — edge detection and Kelly sizing. The orchestrator
//! wiring this into the scan → estimate → bet loop lives in
//! `engine::analysis`.

pub mod edge;
