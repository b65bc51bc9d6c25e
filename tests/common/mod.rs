use bookstore_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool},
    state::AppState,
};

/// Connects to the test database, applies migrations and empties every
/// table. Returns `None` (after printing a notice) when no database is
/// configured, so DB-backed tests can skip instead of failing.
pub async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let orm = create_orm_conn(&database_url).await?;

    // Clean tables between runs
    sqlx::query(
        "TRUNCATE TABLE order_items, orders, audit_logs, books, users RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await?;

    let config = AppConfig {
        database_url,
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "integration-secret".into(),
        token_ttl_hours: 1,
    };

    Ok(Some(AppState { pool, orm, config }))
}
