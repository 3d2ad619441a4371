//! SeaORM entity models

pub mod cache_entry;
pub mod entity;
pub mod mutation;
pub mod sync_cursor;
