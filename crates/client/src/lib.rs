//! Client code for htmlc.
//!
//! This crate provides the compression pipeline: tag extraction, URL and
//! `@import` resolution, asset fetching, part compilation and final HTML
//! compression. [`Compressor`] ties the stages together.

pub mod compressor;
pub mod context;
pub mod css;
pub mod extract;
pub mod fetch;
pub mod html;
pub mod minify;
pub mod parts;

#[cfg(test)]
pub(crate) mod testing;

pub use compressor::Compressor;
pub use context::RequestContext;
pub use extract::{ExclusionRules, FragmentKind, TagExtractor, TagFragment};
pub use fetch::{FetchConfig, Fetcher, HttpFetcher};
pub use minify::{DefaultMinifier, Minifier};
pub use parts::{AssetPart, InsertionPoint, PartCompiler};
