//! Client-side telemetry aggregator for the security dashboard.
//!
//! Polls the backend's SSH, identity-platform and intrusion-alert
//! endpoints on independent cadences, consolidates each domain into a
//! snapshot, and keeps the latest known-good view in [`store::SnapshotStore`]
//! for a presentation layer to read. Rendering is someone else's job.

pub mod config;
pub mod consolidate;
pub mod fetchers;
pub mod map_filter;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod transport;
