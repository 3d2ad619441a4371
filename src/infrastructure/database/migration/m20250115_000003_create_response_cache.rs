//! Create the response cache used by read paths

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(ResponseCache::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(ResponseCache::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(
						ColumnDef::new(ResponseCache::RouteKey)
							.text()
							.not_null()
							.unique_key(),
					)
					.col(
						ColumnDef::new(ResponseCache::Body)
							.json_binary()
							.not_null(),
					)
					.col(
						ColumnDef::new(ResponseCache::FetchedAt)
							.timestamp()
							.not_null(),
					)
					.to_owned(),
			)
			.await
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(ResponseCache::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum ResponseCache {
	Table,
	Id,
	RouteKey,
	Body,
	FetchedAt,
}
