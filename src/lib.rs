//! climalink: climate reanalysis and survey linkage
//!
//! Computes temperature anomalies against a calendar-month baseline, links
//! geocoded survey clusters to grid cells under several exposure windows, and
//! exports de-identified aggregate tables through a single export gate.

pub mod cli;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod utils;
