//! Multi-source signal fusion and risk-adjusted trade recommendations.
//!
//! Independent analysis sources (technical indicators, chart patterns,
//! sentiment, model predictions, volume) are queried concurrently under a
//! deadline, fused into one weighted score, reconciled for conflicts, turned
//! into a confidence, and sized against the caller's risk budget. Realized
//! outcomes feed back into per-source weights.

pub mod clients;
pub mod config;
pub mod constants;
pub mod core;
pub mod errors;
pub mod logging;
pub mod service;
pub mod sources;
pub mod types;
