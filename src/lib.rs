//! EUDAMED Manufacturer Enrichment Library
//!
//! Builds a database of medical-device manufacturers from the EU device
//! registry and enriches it in stages: registry details, devices and
//! certificates, website discovery, employee estimates, firmographics and a
//! final ranking score. Every record carries a status tag naming the last
//! stage it went through, so each stage only picks up records that have not
//! reached it yet.
//!
//! # Modules
//!
//! - `registry`, `search`, `content`, `llm`, `apollo`: external source adapters.
//! - `stages`: one worker per enrichment step.
//! - `runner`: status-driven batch runner shared by all stages.
//! - `status`: stage tags and per-table transition chains.
//! - `store`, `db_storage`: storage trait and its Postgres implementation.
//! - `dedup`: get-or-create and exists-before-insert helpers.
//! - `scoring`: ranking score.
//! - `export`: CSV exports.
//! - `cli`: command-line surface.

pub mod apollo;
pub mod circuit_breaker;
pub mod cli;
pub mod config;
pub mod content;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod errors;
pub mod export;
pub mod llm;
pub mod models;
pub mod payload;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod scoring;
pub mod search;
pub mod stages;
pub mod status;
pub mod store;
