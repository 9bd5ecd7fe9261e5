//! # Connector Framework
//!
//! Core abstractions for reading and writing identity objects on external
//! resources (directories, databases, SaaS APIs).
//!
//! ## Architecture
//!
//! The framework uses a capability-based trait system in the ConnId style:
//!
//! - [`Connector`] - Base trait all connectors implement
//! - [`CreateOp`], [`UpdateOp`], [`DeleteOp`] - Write operations
//! - [`SearchOp`] - Search and point reads
//! - [`SyncCapable`] - Incremental change detection with opaque sync tokens
//!
//! ## Crate Organization
//!
//! - [`types`] - Object classes
//! - [`error`] - Error types with transient/permanent classification
//! - [`traits`] - Connector capability traits and sync deltas
//! - [`operation`] - Operation types (Uid, `AttributeSet`, Filter)
//! - [`memory`] - In-memory connector implementing every capability
//!
//! [`Connector`]: traits::Connector
//! [`CreateOp`]: traits::CreateOp
//! [`UpdateOp`]: traits::UpdateOp
//! [`DeleteOp`]: traits::DeleteOp
//! [`SearchOp`]: traits::SearchOp
//! [`SyncCapable`]: traits::SyncCapable

pub mod error;
pub mod memory;
pub mod operation;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use idsync_connector::prelude::*;
/// ```
pub mod prelude {
    // Types and enums
    pub use crate::types::ObjectClass;

    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult};

    // Traits
    pub use crate::traits::{
        Connector, CreateOp, DeleteOp, FullConnector, SearchOp, SyncCapable, SyncChange,
        SyncChangeType, SyncResult, UpdateOp,
    };

    // Operations
    pub use crate::operation::{
        AttributeDelta, AttributeSet, AttributeValue, Filter, PageRequest, SearchResult, Uid,
    };

    // Implementations
    pub use crate::memory::{ConnectorSnapshot, InMemoryConnector};
}

pub use error::{ConnectorError, ConnectorResult};
pub use types::ObjectClass;
