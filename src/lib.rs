//! # Codex Sync
//!
//! Ingests a hierarchical tabletop ruleset (core rules, factions,
//! detachments, stratagems, enhancements, units and their weapons,
//! abilities and keywords) from a semi-structured web source into SQLite,
//! and keeps the store consistent as the source markup drifts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Fetcher    │──▶│  Extractors  │──▶│  Reconciler  │──▶│  SQLite  │
//! │ rate+retry   │   │ rules/faction│   │ natural keys │   │          │
//! └──────┬───────┘   │ /unit        │   └──────────────┘   └────┬─────┘
//!        │           └──────────────┘                           │
//!   ┌────▼─────┐                                          ┌─────▼──────┐
//!   │  Cache   │                                          │  Snapshot  │
//!   │ (JSON)   │                                          │   + diff   │
//!   └──────────┘                                          └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! codex init                      # create database
//! codex rules                     # ingest the core rules
//! codex faction necrons           # faction page + datasheet index
//! codex units necrons --limit 20  # work through the index
//! codex snapshot save baseline
//! codex snapshot check baseline   # drift against the live store
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Extracted record types |
//! | [`slug`] | Natural-key slug derivation |
//! | [`cache`] | Content-addressed page cache |
//! | [`fetch`] | Rate-limited, retrying remote fetcher |
//! | [`extract`] | Structural extractors and text normalization |
//! | [`reconcile`] | Idempotent natural-key writer |
//! | [`index`] | Per-faction datasheet index |
//! | [`snapshot`] | Snapshots and drift diffs |
//! | [`ingest`] | Run orchestration |
//! | [`validate`] | Batched URL liveness checks |
//! | [`stats`] | Store statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod slug;
pub mod snapshot;
pub mod stats;
pub mod validate;
