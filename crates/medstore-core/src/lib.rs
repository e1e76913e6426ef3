//! # medstore-core: Pure Domain Logic for MedStore
//!
//! Entity types, integer money, input validation, and the data model of the
//! store synchronization protocol. Nothing in here touches a database, a socket
//! or the file system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MedStore Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              medstore-server (axum routes)                      │   │
//! │  │    /stores  /medicines  /purchases  /sync/*                     │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │                              │                        │
//! │  ┌──────────────▼──────────────┐  ┌────────────▼────────────────────┐  │
//! │  │ medstore-db (repositories)  │◄─│ medstore-sync (SyncManager)     │  │
//! │  └──────────────┬──────────────┘  └────────────┬────────────────────┘  │
//! │                 │                              │                        │
//! │  ┌──────────────▼──────────────────────────────▼───────────────────┐   │
//! │  │               ★ medstore-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  changes  │  │ validation│  │   │
//! │  │   │ Medicine  │  │   Money   │  │ Watermark │  │   rules   │  │   │
//! │  │   │ Purchase  │  │           │  │ ChangeSet │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities (Store, Medicine, Customer, Operator, Purchase) and inputs
//! - [`money`] - Money type with integer arithmetic
//! - [`changes`] - Change records, watermark, change sets, conflict policy, wire types
//! - [`error`] - Domain error types
//! - [`validation`] - Field rules for every input type

// =============================================================================
// Module Declarations
// =============================================================================

pub mod changes;
pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use changes::{
    AssignedId, ChangeOperation, ChangeRecord, ChangeSet, ConflictPolicy, EntityKind, NewChange,
    Resolution, Watermark,
};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Stock level below which a medicine is reported as low stock.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

/// Default look-ahead window for the expiring medicines report.
pub const EXPIRY_WINDOW_DAYS: i64 = 30;

/// Allowed difference between a claimed purchase total and the sum of its items.
pub const TOTAL_TOLERANCE_CENTS: i64 = 1;

/// Largest quantity one purchase line may ask for.
pub const MAX_LINE_QUANTITY: i64 = 1_000_000;
