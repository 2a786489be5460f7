//! Release synchronization pipeline
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Coordinator │────▶│   Syncer    │────▶│     Vcs     │
//! │ (gate, tx)  │     │ (diff, add) │     │ (tags, meta)│
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │   Orderer   │────▶│   Compat    │
//!                     │ (ranking)   │     │  (index)    │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`coordinator`]: gated, transactional entry points
//! - [`syncer`]: reconciles stored releases with a package's VCS tags
//! - [`orderer`]: recomputes `order` / `stable_order` for plugin releases
//! - [`compat`]: plugin-release x host-release compatibility index
//! - [`context`]: per-sync traversal state (visited set, pending queue)
//! - [`gate`]: named process-wide lock
//! - [`error`]: sync error type

pub mod compat;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod orderer;
pub mod syncer;

pub use compat::IndexMode;
pub use context::SyncContext;
pub use coordinator::{BatchReport, SyncCoordinator};
pub use error::SyncError;
pub use gate::{SyncGate, SyncPermit};
pub use syncer::{SyncOptions, SyncReport, VersionSyncer};
