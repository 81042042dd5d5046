//! # docshelf
//!
//! A document-management ingestion service.
//!
//! docshelf takes a user-selected file plus archival form metadata,
//! establishes the file's identity (SHA-256), persists the bytes to a
//! bucketed object store (local directory or S3-compatible), records the
//! document's structured metadata in SQLite, optionally links the new
//! document to a parent document, and invalidates named query caches so
//! readers converge on the new state.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────────────┐   ┌───────────┐
//! │ form +    │──▶│      Ingestion pipeline       │──▶│  SQLite    │
//! │ file      │   │ validate → hash → upload →    │   │ documents  │
//! └───────────┘   │ persist → link → cache waves  │   │ relations  │
//!                 └──────┬───────────────┬────────┘   └───────────┘
//!                        ▼               ▼
//!                 ┌────────────┐  ┌────────────┐
//!                 │ ObjectStore │  │ QueryCache │
//!                 │  fs / s3    │  │  (waves)   │
//!                 └────────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`hash`] | Content hashing with a non-fatal sentinel |
//! | [`store`] | Object-store trait, key generation, filesystem backend |
//! | [`store_s3`] | S3-compatible backend (SigV4) |
//! | [`validate`] | Pure form validation and digital-id generation |
//! | [`repo`] | Document CRUD and search |
//! | [`relations`] | Directed document relations |
//! | [`ingest`] | The ingestion orchestrator |
//! | [`cache`] | Query-cache coordination (multi-wave invalidation) |
//! | [`users`] | User accounts |
//! | [`server`] | HTTP JSON API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod hash;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod relations;
pub mod repo;
pub mod server;
pub mod store;
pub mod store_s3;
pub mod users;
pub mod validate;
