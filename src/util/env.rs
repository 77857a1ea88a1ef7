//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => parse_flag(&raw),
        None => default,
    }
}

pub fn parse_flag(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "on" | "yes")
}

/// Database URL: `DATABASE_URL`, then `DB_URL`, then a DSN composed from
/// `DB_HOST`/`DB_USERNAME`/`DB_PASSWORD`/`DB_DATABASE`/`DB_PORT`/`DB_SSLMODE`.
pub fn db_url() -> anyhow::Result<String> {
    for k in ["DATABASE_URL", "DB_URL"] {
        if let Some(v) = env_opt(k) {
            return Ok(v.trim().to_string());
        }
    }
    if let Some(dsn) = compose_dsn(
        env_opt("DB_HOST").as_deref(),
        env_opt("DB_USERNAME").as_deref(),
        env_opt("DB_PASSWORD").as_deref(),
        env_opt("DB_DATABASE").as_deref(),
        env_opt("DB_PORT").as_deref(),
        env_opt("DB_SSLMODE").as_deref(),
    ) {
        info!(target = "env", "using DSN composed from DB_* variables");
        return Ok(dsn);
    }
    Err(anyhow::anyhow!("no database URL env vars set (DATABASE_URL / DB_URL / DB_HOST)"))
}

/// Build a postgres DSN with percent-encoded credentials. `None` when host or
/// user is missing.
fn compose_dsn(
    host: Option<&str>,
    user: Option<&str>,
    password: Option<&str>,
    database: Option<&str>,
    port: Option<&str>,
    ssl_mode: Option<&str>,
) -> Option<String> {
    let host = host?.trim().trim_matches(|c| c == '[' || c == ']');
    let user = user?;
    let port: u16 = port.and_then(|p| p.trim().parse().ok()).unwrap_or(5432);
    let database = database.unwrap_or("postgres");
    let ssl_mode = ssl_mode.unwrap_or("prefer");

    let mut out = url::Url::parse("postgresql://localhost").ok()?;
    out.set_username(user).ok()?;
    if let Some(pass) = password {
        out.set_password(Some(pass)).ok()?;
    }
    if host.contains(':') {
        out.set_host(Some(&format!("[{host}]"))).ok()?;
    } else {
        out.set_host(Some(host)).ok()?;
    }
    out.set_port(Some(port)).ok()?;
    out.set_path(&format!("/{database}"));
    if ssl_mode != "disable" {
        out.query_pairs_mut().append_pair("sslmode", ssl_mode);
    }
    Some(out.to_string())
}

pub fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("TOKEN") || k.contains("KEY") {
        return if val.trim().is_empty() { String::new() } else { "***".to_string() };
    }

    let val_trim = val.trim();
    if let Ok(mut u) = url::Url::parse(val_trim) {
        let scheme = u.scheme().to_ascii_lowercase();
        if scheme == "postgres" || scheme == "postgresql" {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
        // tokens passed as query parameters (e.g. a rendering service URL)
        if u.query_pairs().any(|(q, _)| q.eq_ignore_ascii_case("token")) {
            u.set_query(None);
            return format!("{u}?***");
        }
    }
    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// A required entry may list alternatives separated by `|`; any one set satisfies it.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    init_env();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|alts| alts.split('|').all(|k| env_opt(k).is_none()))
        .collect();
    let snapshot: Vec<(String, String)> = also_log
        .iter()
        .map(|k| (k.to_string(), redact_value(k, &env_opt(k).unwrap_or_default())))
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        return Err(anyhow::anyhow!("missing required env: {:?}", missing));
    }
    Ok(())
}
