//! Data layer module
//!
//! Handles all data persistence:
//! - `Repository`: the persistence contract the federation core depends on
//! - `Database`: the SQLite implementation of it

mod database;
mod models;
mod repository;

pub use database::Database;
pub use models::*;
pub use repository::Repository;

#[cfg(test)]
mod database_test;
