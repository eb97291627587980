use anyhow::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, EntityTrait, Schema,
};

use crate::entity::{AuditLogs, CartItems, OrderItems, Orders, PaymentEvents, Payments, Products};

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url);
    options.sqlx_logging(false);
    if database_url.starts_with("sqlite::memory:") {
        // every pooled connection would otherwise see its own empty database
        options.max_connections(1).min_connections(1);
    }
    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Bring the schema up to date.
///
/// PostgreSQL runs the versioned SQL files in `migrations/`; SQLite (tests and
/// local runs) gets its tables generated from the entity definitions.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    match conn.get_database_backend() {
        DbBackend::Postgres => {
            sqlx::migrate!("./migrations")
                .run(conn.get_postgres_connection_pool())
                .await?;
        }
        DbBackend::Sqlite => create_schema_from_entities(conn).await?,
        backend => anyhow::bail!("unsupported database backend {backend:?}"),
    }
    Ok(())
}

async fn create_schema_from_entities(conn: &DatabaseConnection) -> Result<()> {
    create_table(conn, Products).await?;
    create_table(conn, CartItems).await?;
    create_table(conn, Orders).await?;
    create_table(conn, OrderItems).await?;
    create_table(conn, Payments).await?;
    create_table(conn, PaymentEvents).await?;
    create_table(conn, AuditLogs).await?;
    Ok(())
}

async fn create_table<E: EntityTrait>(conn: &DatabaseConnection, entity: E) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}
