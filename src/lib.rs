//! Snapvault Sync Service
//!
//! Offline-tolerant sync core for captured photos and videos. Media is
//! stored in an S3-compatible object store; when the store is
//! unreachable or not yet configured, captured records are buffered in
//! a local durable queue and drained opportunistically once
//! connectivity returns.
//!
//! ## Features
//!
//! - **Durable Buffering**: SQLite-backed queue of not-yet-uploaded
//!   records, idempotent by key, surviving process restarts
//! - **Single-Attempt Admission**: a fresh capture gets at most one
//!   direct upload attempt; failures buffer instead of blocking on
//!   retries
//! - **Opportunistic Reconciliation**: serialized passes drain the
//!   queue on reconnect, config save, or start-up, tolerating partial
//!   failure without losing or duplicating records
//! - **Thumbnail Pairing**: video poster frames live under a derived
//!   object key, uploaded before the payload and paired again at list
//!   time
//!
//! ## Architecture
//!
//! ```text
//! Capture API                 Local SQLite              S3 Bucket
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ POST /media  │           │ pending_media│          │ photo_*.jpeg │
//! └──────┬───────┘           └──────▲───┬───┘          │ video_*.webm │
//!        │                          │   │              │ *_thumbnail  │
//!        ▼                  enqueue │   │ snapshot     └──────▲───────┘
//! ┌──────────────┐  offline/failure │   │                     │
//! │ Admission    │──────────────────┘   │                     │
//! │ Policy       │                      ▼                     │
//! └──────┬───────┘           ┌──────────────┐   upload        │
//!        │ online            │ Reconciler   │─────────────────┤
//!        ▼                   └──────▲───────┘                 │
//! ┌──────────────┐                  │ triggers                │
//! │ Upload       │──────────────────┼─────────────────────────┘
//! │ Gateway      │    connectivity / config-saved / start-up
//! └──────────────┘
//! ```

pub mod admission;
pub mod api;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod gateway;
pub mod media;
pub mod queue;
pub mod reconcile;

// Re-export main types
pub use admission::{AdmissionOutcome, AdmissionPolicy};
pub use api::AppState;
pub use config::{Config, RemoteConfig, RemoteConfigStore};
pub use connectivity::Connectivity;
pub use error::SyncError;
pub use gateway::{ObjectTransport, RemoteMedia, S3Transport, UploadGateway, UploadReport};
pub use media::{MediaKind, MediaRecord};
pub use queue::{MediaQueue, PendingMedia};
pub use reconcile::{ReconcileReport, Reconciler};
