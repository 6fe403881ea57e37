use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Mount point for every route, e.g. `/api`. Empty means the root.
    pub api_prefix: String,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_path = match lookup("DB_PATH").map(|p| p.trim().to_string()) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => std::env::current_dir()
                .context("working directory must be readable")?
                .join("instance")
                .join("products.db"),
        };

        Ok(Self {
            database_path,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: lookup("PORT")
                .unwrap_or_else(|| "3001".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            api_prefix: normalize_prefix(&lookup("API_PREFIX").unwrap_or_default()),
            max_connections: lookup("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|| "5".to_string())
                .parse()
                .context("DB_MAX_CONNECTIONS must be a valid number")?,
        })
    }
}

/// `"api/v1/"` becomes `"/api/v1"`; blank or `"/"` becomes `""`.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
