//! Backend facade of the trust log.
//!
//! [`TrustLogBackend`] owns an unvetted and a vetted [`tlog_engine::Tlog`]
//! and exposes the record lifecycle on top of them:
//!
//! - `new_record` / `update_*` / `update_*_metadata` write record states
//! - `set_status` censors, publishes (graduates) or archives a record
//! - `get_unvetted` / `get_vetted` assemble records from their latest index
//! - `plugin_command` dispatches signed plugin commands
//!
//! The status [`Inventory`] is a cache over the trees, rebuilt on startup by
//! [`TrustLogBackend::rebuild_inventory`].

pub mod backend;
pub mod config;
pub mod error;
pub mod inventory;
pub mod keys;

pub use backend::{merkle_root, TlogParts, TrustLogBackend};
pub use config::{BackendConfig, PluginConfig};
pub use error::{BackendError, BackendResult};
pub use inventory::{Inventory, StatusMap};
pub use keys::{load_or_create_encryption_key, load_or_create_identity};
