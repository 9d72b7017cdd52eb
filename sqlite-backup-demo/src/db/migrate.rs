use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS startup_times (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS visits (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  visited_at TEXT NOT NULL,
  user_agent TEXT
);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    tracing::info!("Database schema is up to date");
    Ok(())
}
