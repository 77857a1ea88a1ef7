use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env::{env_flag, env_opt};

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)
            .context("DATABASE_URL is not a valid postgres connection string")?;

        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to database")?;
        info!("connected to db");

        let db = Self { pool };
        // Default off: the catalog schema is usually owned by the web backend.
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            db.run_migrations().await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    /// Directory holding `NNNN_description.sql` files.
    pub fn migrations_dir() -> PathBuf {
        env_opt("MIGRATIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./migrations"))
    }

    /// Apply pending migrations in version order; returns how many ran.
    pub async fn run_migrations(&self) -> Result<usize> {
        let dir = Self::migrations_dir();
        if !dir.exists() {
            info!(dir = %dir.display(), "no migrations directory; nothing to apply");
            return Ok(0);
        }
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;

        let mut applied: HashSet<i64> = HashSet::new();
        for r in sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
            .fetch_all(&self.pool)
            .await?
        {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut ran = 0usize;
        for (version, desc, path) in migration_files(&dir)? {
            if applied.contains(&version) {
                continue;
            }
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("reading migration {}", path.display()))?;
            info!(version, file = ?path, "applying migration");

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(&sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO _sqlx_migrations(version, description) VALUES ($1, $2)")
                .persistent(false)
                .bind(version)
                .bind(&desc)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            applied.insert(version);
            ran += 1;
        }
        info!(applied = ran, "migrations up-to-date");
        Ok(ran)
    }
}

/// `(version, description, path)` for every `digits_name.sql` file, sorted by
/// version. Other files are ignored.
fn migration_files(dir: &Path) -> Result<Vec<(i64, String, PathBuf)>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some((version, desc)) = parse_migration_name(fname) {
            candidates.push((version, desc, path));
        }
    }
    candidates.sort_by_key(|(v, _, _)| *v);
    Ok(candidates)
}

fn parse_migration_name(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let desc = stem[digits.len()..].strip_prefix('_')?;
    let version = digits.parse::<i64>().ok()?;
    Some((version, desc.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_migration_names() {
        assert_eq!(
            parse_migration_name("0001_catalog.sql"),
            Some((1, "catalog".to_string()))
        );
        assert_eq!(
            parse_migration_name("20240102_store_links.sql"),
            Some((20240102, "store_links".to_string()))
        );
        assert_eq!(parse_migration_name("database_settings.sql"), None);
        assert_eq!(parse_migration_name("0002catalog.sql"), None);
        assert_eq!(parse_migration_name("0003_notes.txt"), None);
    }

    #[test]
    fn lists_repository_migrations_in_order() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        let files = migration_files(&dir).unwrap();
        assert!(!files.is_empty());
        assert_eq!(files[0].0, 1);
        assert!(files.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
