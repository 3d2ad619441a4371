//! Entity row: the client's current belief about one domain record

// `Entity` would collide with the type DeriveEntityModel generates below
use crate::domain::{Collection, Entity as DomainEntity, EntityRef};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entities")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub owner_id: String,
	pub entity_id: String,
	pub collection: String,
	pub payload: Json,
	pub updated_at: DateTimeUtc,
	/// True while the row carries a client-generated placeholder id
	pub is_local: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	/// Convert database row to domain entity
	pub fn to_entity(&self) -> Option<DomainEntity> {
		Some(DomainEntity {
			id: EntityRef::new(self.entity_id.clone()),
			owner_id: self.owner_id.clone(),
			collection: Collection::from_str(&self.collection)?,
			payload: self.payload.clone(),
			updated_at: self.updated_at,
		})
	}
}
