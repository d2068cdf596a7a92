//! # beacon-core
//!
//! Client presence registry for the Beacon realtime engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Client lifecycle (create, update, delete), online/offline
//!   transitions and message delivery
//! - **Record** - Client records, status and application info fields
//! - **Store** - Pluggable per-client storage with per-client locking
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register  ┌─────────────┐     ┌─────────────┐
//! │  Connection │───────────▶│  Registry   │────▶│    Store    │
//! └─────────────┘            └─────────────┘     └─────────────┘
//!        ▲                          │
//!        └────────── send ──────────┘
//! ```

pub mod record;
pub mod registry;
pub mod store;

pub use record::{ClientEntry, ClientInfo, ClientRecord, ClientStatus, RESERVED_FIELDS};
pub use registry::{Registry, RegistryConfig, RegistryError, RegistryStats};
pub use store::{ClientStore, MemoryStore, Slot};
