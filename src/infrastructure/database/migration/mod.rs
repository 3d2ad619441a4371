//! Database migrations

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![
			Box::new(m20250115_000001_create_entities::Migration),
			Box::new(m20250115_000002_create_mutation_queue::Migration),
			Box::new(m20250115_000003_create_response_cache::Migration),
		]
	}
}

mod m20250115_000001_create_entities;
mod m20250115_000002_create_mutation_queue;
mod m20250115_000003_create_response_cache;
