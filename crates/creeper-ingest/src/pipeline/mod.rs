//! Filter & publish pipeline.
//!
//! - [`PostFilter`] / [`LanguageFilter`] - Pure predicates over decoded posts
//! - [`KeywordMatcher`] - Keyword detection for auxiliary logging
//! - [`PostProcessor`] - The scheduler handler tying decode, filter and publish together
//!
//! # Architecture
//!
//! ```text
//! Event ──► decode Post ──► filters ──► keyword log ──► DerivedEvent ──► Publisher
//!               │              │
//!           DecodePolicy    reject = success, nothing published
//! ```

mod filter;
mod process;

pub use filter::{KeywordMatcher, LanguageFilter, PostFilter};
pub use process::{DecodePolicy, Outcome, PostProcessor};
