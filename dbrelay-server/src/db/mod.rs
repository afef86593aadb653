//! Database layer - connection pool, migrations and repositories
//!
//! The request pool is shared by HTTP handlers only. The change
//! listener opens its own dedicated connection (see `crate::listener`).

pub mod migrations;
pub mod pool;
pub mod repos;

pub use pool::{create_pool, create_pool_with_options};
pub use repos::*;
