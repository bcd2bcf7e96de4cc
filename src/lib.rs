//! Lab room reservations: booking rules, admin filtering, usage statistics
//! and the data access behind the REST API.

#[macro_use]
extern crate diesel;

pub mod actions;
pub mod config;
pub mod filter;
pub mod models;
pub mod queue;
pub mod rooms;
pub mod schema;
pub mod stats;
pub mod validation;
