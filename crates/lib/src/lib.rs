//! kiln-lib: incremental build-graph engine
//!
//! This crate provides the core of the kiln build tool:
//! - `graph`: artifacts connected through transformers, with cycle detection
//!   and topological ordering
//! - `scanner`: implicit dependencies found in source files
//! - `tracker`: decides which transformers must re-run from fingerprints
//! - `execute`: runs dirty transformers concurrently with failure propagation
//!   and cancellation
//! - `persist`: versioned build data carried between invocations

pub mod artifact;
pub mod clean;
pub mod consts;
pub mod execute;
pub mod fingerprint;
pub mod graph;
pub mod lock;
pub mod persist;
pub mod project;
pub mod rules;
pub mod scanner;
pub mod tracker;
pub mod transformer;
pub mod util;
