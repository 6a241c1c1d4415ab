//! Core types and shared functionality for htmlc.
//!
//! This crate provides:
//! - Content-addressed disk cache with atomic writes and expiry sweeps
//! - Unified error types
//! - Configuration structures
//! - Filter hooks and the benchmark sink

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod error;
pub mod hooks;

pub use benchmark::Benchmark;
pub use cache::{AssetKind, CacheStore};
pub use config::{BenchmarkMode, CompressorConfig};
pub use error::Error;
pub use hooks::{Hook, HookApi};
