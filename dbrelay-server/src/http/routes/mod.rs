//! Route handlers organized by resource

pub mod admin;
pub mod changes;
pub mod health;
