use sqlx::{migrate::MigrateError, postgres::PgPoolOptions, Pool, Postgres};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max_connections: u32) -> Result<Db, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

pub async fn migrate(db: &Db) -> Result<(), MigrateError> {
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(db).await
}
