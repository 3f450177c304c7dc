//! Core data model
//!
//! Entities persisted by the metadata store plus the authenticated principal
//! the services consume. All types are serde-serializable JSON documents with
//! UTC timestamps; identifiers are opaque strings minted from UUIDv4.

mod file;
mod folder;
mod session;
mod user;

pub use file::{FileRecord, FileView};
pub use folder::Folder;
pub use session::{SessionStatus, UploadSession, UploadVariant};
pub use user::{AccountStatus, Principal, Role, User};

/// Mint a fresh opaque entity id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
