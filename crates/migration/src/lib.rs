pub use sea_orm_migration::prelude::*;

mod m20251019_120000_create_oauth2_tables;
mod m20251019_130000_add_token_families;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251019_120000_create_oauth2_tables::Migration),
            Box::new(m20251019_130000_add_token_families::Migration),
        ]
    }
}
