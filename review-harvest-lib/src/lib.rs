#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for review-harvest
//!
//! This library holds all functionality for the review-harvest tool, which collects
//! review-activity metrics for human-reviewed pull requests from popular repositories.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface, configuration, and logging
//! - [`harvest`]: The rate-budgeted, resumable collection pipeline
//! - [`remote`]: The remote API seam and its GitHub implementation

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub type HashSet<T> = rustc_hash::FxHashSet<T>;
pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

#[cfg(any(debug_assertions, test))]
pub mod harvest;
#[cfg(not(any(debug_assertions, test)))]
mod harvest;

#[cfg(any(debug_assertions, test))]
pub mod remote;
#[cfg(not(any(debug_assertions, test)))]
mod remote;

pub use crate::commands::{Host, run};
