//! Mutation queue row: one conflated sub-log per (owner, entity)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mutation_queue")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub owner_id: String,
	pub collection: String,
	pub entity_ref: String,
	/// Conflated sub-log, serialized `Vec<MutationRecord>`
	pub records: Json,
	/// Earliest surviving sequence; drain order is ascending on this
	pub first_sequence: i64,
	/// Failed replay attempts so far
	pub attempts: i32,
	/// Set once attempts exhaust; excluded from drains until manually re-armed
	pub failed: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
