//! Storage module for Tether
//!
//! - `json`: JSON - settings and definition files

mod json;

pub use json::{JsonStore, HOME_ENV, PROJECT_DIR};
