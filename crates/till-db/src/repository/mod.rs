//! # Repositories
//!
//! One repository per table family. Each repository owns the SQL for its
//! tables; multi-table writes run inside one SQLite transaction.

pub mod cache;
pub mod cart;
pub mod history;
pub mod invoice;
pub mod pending;
pub mod sale;
pub mod session;
pub mod stock;
pub mod vendor;
