use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Activity {
    pub startups: i64,
    pub visits: i64,
    pub last_startup: Option<String>,
}

pub fn record_startup(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO startup_times (time) VALUES (?1)",
        params![Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn record_visit(conn: &Connection, user_agent: Option<&str>) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO visits (visited_at, user_agent) VALUES (?1, ?2)",
        params![Utc::now().to_rfc3339(), user_agent],
    )?;
    Ok(())
}

pub fn summary(conn: &Connection) -> anyhow::Result<Activity> {
    let startups = conn.query_row("SELECT COUNT(*) FROM startup_times", [], |row| row.get(0))?;
    let visits = conn.query_row("SELECT COUNT(*) FROM visits", [], |row| row.get(0))?;
    let last_startup = conn.query_row("SELECT MAX(time) FROM startup_times", [], |row| {
        row.get::<_, Option<String>>(0)
    })?;
    Ok(Activity {
        startups,
        visits,
        last_startup,
    })
}
