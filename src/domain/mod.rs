//! Core domain types shared across the engine

pub mod entity;
pub mod mutation;

pub use entity::{Collection, Entity, EntityRef};
pub use mutation::{MutationKind, MutationRecord};
