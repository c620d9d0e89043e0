// src/config.rs

use std::{env, path::PathBuf};

#[derive(Clone, Debug)]
pub struct Config {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    // csv folders
    pub base_original: PathBuf,
    pub base_auxiliar: PathBuf,
    pub dashboard_csv: PathBuf,
    pub reports_dir: PathBuf,
}

impl Config {
    // read .env (if present) then the process environment
    pub fn new() -> Self {
        dotenv::dotenv().ok();

        Self {
            user: var_or("DB_USER", "postgres"),
            password: var_or("DB_PASSWORD", ""),
            host: var_or("DB_HOST", "localhost"),
            port: var_or("DB_PORT", "5432").parse().unwrap_or(5432),
            database: var_or("DB_NAME", "tiendita_auxiliar"),
            base_original: PathBuf::from(var_or("BASE_ORIGINAL", "tiendita_csv")),
            base_auxiliar: PathBuf::from(var_or("BASE_AUXILIAR", "tiendita_auxiliar_csv")),
            dashboard_csv: PathBuf::from(var_or("DASHBOARD_CSV", "CSV_tienda")),
            reports_dir: PathBuf::from(var_or("REPORTS_DIR", "Reportes_excel")),
        }
    }

    // connection target without the password, for logs
    pub fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            user: "postgres".into(),
            password: String::new(),
            host: "localhost".into(),
            port: 5432,
            database: "tiendita_auxiliar".into(),
            base_original: "tiendita_csv".into(),
            base_auxiliar: "tiendita_auxiliar_csv".into(),
            dashboard_csv: "CSV_tienda".into(),
            reports_dir: "Reportes_excel".into(),
        }
    }

    #[test]
    fn target_hides_password() {
        let config = Config { password: "secret".into(), port: 5433, ..sample() };
        assert_eq!(config.target(), "postgres@localhost:5433/tiendita_auxiliar");
    }
}
