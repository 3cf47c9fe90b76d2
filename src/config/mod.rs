// src/config/mod.rs
// All tunables come from the environment (.env supported); defaults match the
// reference Chinook setup so `sibyl ask` works out of the box.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct SibylConfig {
    // ── Generative model
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub embedding_model: String,
    pub llm_timeout_secs: u64,
    pub llm_max_retries: u32,

    // ── Database
    pub database_path: String,
    pub sqlite_max_connections: u32,
    pub max_result_rows: usize,
    pub lookup_value_limit: usize,

    // ── Agent
    pub max_sql_retries: u32,
    pub max_chart_points: usize,
    pub explore_entity_cap: usize,
    pub schema_top_k: usize,

    // ── Server
    pub host: String,
    pub port: u16,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean = val.split('#').next().unwrap_or("").trim();
            clean.parse::<T>().unwrap_or(default)
        }
        Err(_) => default,
    }
}

impl SibylConfig {
    pub fn from_env() -> Self {
        // Missing .env is fine; plain environment variables still apply.
        let _ = dotenvy::dotenv();

        Self {
            gemini_api_key: env_var_or("GEMINI_API_KEY", String::new()),
            gemini_base_url: env_var_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta".to_string(),
            ),
            gemini_model: env_var_or("SIBYL_MODEL", "gemini-2.0-flash".to_string()),
            embedding_model: env_var_or("SIBYL_EMBEDDING_MODEL", "text-embedding-004".to_string()),
            llm_timeout_secs: env_var_or("SIBYL_LLM_TIMEOUT_SECS", 30),
            llm_max_retries: env_var_or("SIBYL_LLM_MAX_RETRIES", 5),
            database_path: env_var_or("SIBYL_DATABASE", "Chinook_Sqlite.sqlite".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),
            max_result_rows: env_var_or("SIBYL_MAX_RESULT_ROWS", 1000),
            lookup_value_limit: env_var_or("SIBYL_LOOKUP_VALUE_LIMIT", 10),
            max_sql_retries: env_var_or("SIBYL_MAX_SQL_RETRIES", 3),
            max_chart_points: env_var_or("SIBYL_MAX_CHART_POINTS", 20),
            explore_entity_cap: env_var_or("SIBYL_EXPLORE_ENTITY_CAP", 3),
            schema_top_k: env_var_or("SIBYL_SCHEMA_TOP_K", 5),
            host: env_var_or("SIBYL_HOST", "0.0.0.0".to_string()),
            port: env_var_or("SIBYL_PORT", 8000),
        }
    }
}

pub static CONFIG: Lazy<SibylConfig> = Lazy::new(SibylConfig::from_env);
