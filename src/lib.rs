//! Bill-of-materials tree engine.
//!
//! Builds effective-dated component trees, resolves configurable products
//! against selected features, applies component substitutions, rolls up
//! quantities and raises production requests for the manufactured positions.
//! All data is read and written through the collaborator traits in
//! [`repositories`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod models;
pub mod repositories;
pub mod services;

pub use errors::ServiceError;
pub use models::{BomNode, BomTree, NodeId};
pub use services::{BomService, ManufacturingOrderService};
