//! # Engine Module
//!
//! Backend-agnostic execution core.
//!
//! This module contains:
//! - the native backend seam and collaborator traits,
//! - shader and pipeline caches,
//! - per-thread resource, descriptor and command pools,
//! - the execution context, its provider and the two-phase dispatch.
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod backend;
pub mod cache;
pub mod shader;
pub mod pipeline;
pub mod resource;
pub mod descriptor;
pub mod command;
pub mod thread;
pub mod context;
pub mod provider;
pub mod dispatch;
