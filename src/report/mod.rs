//! Report module - export gate, public tables, local artifacts and run summary

pub mod gate;
pub mod local;
pub mod summary;
pub mod tables;

pub use gate::{ExportGate, ExportManifest, GateConfig, PublicTable};
pub use local::LocalWriter;
pub use summary::RunSummary;
