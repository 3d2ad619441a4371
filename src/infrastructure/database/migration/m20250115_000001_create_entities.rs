//! Create entities table holding the client's current belief about each record

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Entities::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Entities::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Entities::OwnerId).text().not_null())
					.col(ColumnDef::new(Entities::EntityId).text().not_null())
					.col(ColumnDef::new(Entities::Collection).text().not_null())
					.col(ColumnDef::new(Entities::Payload).json_binary().not_null())
					.col(ColumnDef::new(Entities::UpdatedAt).timestamp().not_null())
					.col(
						ColumnDef::new(Entities::IsLocal)
							.boolean()
							.not_null()
							.default(false),
					)
					.to_owned(),
			)
			.await?;

		// One copy of an entity's current state per owner
		manager
			.create_index(
				Index::create()
					.name("idx_entities_owner_entity_unique")
					.table(Entities::Table)
					.col(Entities::OwnerId)
					.col(Entities::EntityId)
					.unique()
					.to_owned(),
			)
			.await?;

		// List reads filter by owner and collection
		manager
			.create_index(
				Index::create()
					.name("idx_entities_owner_collection")
					.table(Entities::Table)
					.col(Entities::OwnerId)
					.col(Entities::Collection)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(Entities::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum Entities {
	Table,
	Id,
	OwnerId,
	EntityId,
	Collection,
	Payload,
	UpdatedAt,
	IsLocal,
}
