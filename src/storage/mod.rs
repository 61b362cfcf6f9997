//! Storage layer
//!
//! - **blob**: abstract key-value blob namespace with etag-guarded writes
//! - **resource**: the atomic read-modify-write compute primitive
//! - **redis**: shared pending-set and lock leases

pub mod blob;
pub mod redis;
pub mod resource;

pub use blob::{
    BlobStore, CopyOutcome, EtagPrecondition, FolderPage, InMemoryBlobStore, ResourceMetadata,
};
pub use resource::ResourceService;
