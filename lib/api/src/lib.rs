//! # Polydex API
//!
//! REST service exposing named indexes.

pub mod rest;

pub use rest::{ApiError, RestApi};
