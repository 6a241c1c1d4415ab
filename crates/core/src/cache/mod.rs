//! Disk-backed, content-addressed cache for combined CSS/JS.
//!
//! Two trees are maintained per host:
//!
//! - a public tree holding minified code artifacts, served over HTTP
//! - a private tree holding parts manifests, read only by the compressor
//!
//! Every write lands in a uniquely named temp file first and is renamed over
//! the final path, so concurrent writers never expose a partial file.

pub mod hash;
pub mod store;

pub use crate::Error;

pub use store::{AssetKind, CacheDirType, CacheSettings, CacheStore, CleanupReport, write_atomic};
