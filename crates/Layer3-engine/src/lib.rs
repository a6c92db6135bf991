//! # tether-engine
//!
//! The Tether engine: task executions and debug sessions behind one API.
//!
//! - `Engine`: runTask / awaitTask / startDebug / getStackTrace / ...
//! - `Catalog`: the named task definitions and debug configurations
//! - `Request` / `Response`: the line-oriented JSON surface

pub mod catalog;
pub mod engine;
pub mod request;

pub use catalog::{Catalog, CATALOG_FILE};
pub use engine::Engine;
pub use request::{ErrorBody, Request, Response};
