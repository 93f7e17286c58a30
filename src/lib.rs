// ===============================
// src/lib.rs
// ===============================
//
// spread_sentry: cross-exchange spread-arbitrage decision engine.
//
// Ingests two real-time price streams (reference venue + execution venue),
// normalizes their difference into price ticks, decides entries and exits
// for a single position on the execution venue, and coordinates order
// submission under a mutual-exclusion close guard and advisory pacing.

pub mod book;
pub mod config;
pub mod domain;
pub mod engine;
pub mod executor;
pub mod feed;
pub mod metrics;
pub mod recorder;
pub mod spread;
pub mod state;
pub mod strategy;
pub mod venue;
