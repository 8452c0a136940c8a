//! # SAP Business One Service Layer toolkit
//!
//! Mirrors Service Layer entities into a local database ([`sync`]) and offers
//! an active-record style model layer with cached remote queries
//! ([`model`], [`query`], [`cache`]) on top of a session-aware HTTP client
//! ([`service_layer`]).

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod query;
pub mod service_layer;
pub mod sync;
pub mod telemetry;
pub use migration;

pub use error::{Error, Result};
