//! Create the mutation queue and its per-owner sequence cursors

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(MutationQueue::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(MutationQueue::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(MutationQueue::OwnerId).text().not_null())
					.col(ColumnDef::new(MutationQueue::Collection).text().not_null())
					.col(ColumnDef::new(MutationQueue::EntityRef).text().not_null())
					.col(
						ColumnDef::new(MutationQueue::Records)
							.json_binary()
							.not_null(),
					)
					.col(
						ColumnDef::new(MutationQueue::FirstSequence)
							.big_integer()
							.not_null(),
					)
					.col(
						ColumnDef::new(MutationQueue::Attempts)
							.integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(MutationQueue::Failed)
							.boolean()
							.not_null()
							.default(false),
					)
					.to_owned(),
			)
			.await?;

		// One conflated sub-log per entity
		manager
			.create_index(
				Index::create()
					.name("idx_mutation_queue_entity_unique")
					.table(MutationQueue::Table)
					.col(MutationQueue::OwnerId)
					.col(MutationQueue::EntityRef)
					.unique()
					.to_owned(),
			)
			.await?;

		// Drain order is ascending on first_sequence
		manager
			.create_index(
				Index::create()
					.name("idx_mutation_queue_first_sequence")
					.table(MutationQueue::Table)
					.col(MutationQueue::FirstSequence)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(SyncCursors::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(SyncCursors::OwnerId)
							.text()
							.not_null()
							.primary_key(),
					)
					.col(
						ColumnDef::new(SyncCursors::NextSequence)
							.big_integer()
							.not_null()
							.default(1),
					)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(SyncCursors::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(MutationQueue::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum MutationQueue {
	Table,
	Id,
	OwnerId,
	Collection,
	EntityRef,
	Records,
	FirstSequence,
	Attempts,
	Failed,
}

#[derive(DeriveIden)]
enum SyncCursors {
	Table,
	OwnerId,
	NextSequence,
}
