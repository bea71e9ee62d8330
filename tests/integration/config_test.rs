//! Configuration Integration Tests
//!
//! Covers:
//! - Loading config.json from an explicit path, with defaults for omitted sections
//! - Rejecting invalid files at load time
//! - Credential resolution from environment-style lookups
//! - Building the provider chain and key pools from configuration
//! - Opening the SQLite database described by the settings

use std::collections::HashMap;
use std::fs;

use tempfile::TempDir;

use query_cascade::storage::config::resolve_provider_keys;
use query_cascade::{ConfigService, SqliteDatabase};
use query_cascade_core::QueryDatabase;
use query_cascade_llm::{LlmGateway, ProviderType};

// ============================================================================
// Helpers
// ============================================================================

const CHAIN_CONFIG: &str = r#"{
    "pipeline": { "max_retries": 2, "batch_intent_and_plan": false },
    "gateway": { "max_calls_per_query": 7, "rate_limit": { "max_requests": 10, "window_secs": 30 } },
    "providers": [
        { "provider": "openai", "name": "groq", "model": "llama-3.3-70b-versatile",
          "api_keys": ["gsk-inline"], "api_key_env": ["GROQ_API_KEY"] },
        { "provider": "anthropic", "model": "claude-haiku", "api_key_env": ["ANTHROPIC_KEYS"] },
        { "provider": "ollama", "model": "llama3.2" }
    ]
}"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    fs::write(&path, content).unwrap();
    path
}

fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
    vars.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_config_from_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, CHAIN_CONFIG);

    let service = ConfigService::from_path(&path).unwrap();
    let config = service.get_config();

    assert_eq!(service.config_path(), path.as_path());
    assert_eq!(config.pipeline.max_retries, 2);
    assert!(!config.pipeline.batch_intent_and_plan);
    assert_eq!(config.pipeline.max_join_hops, 3);
    assert_eq!(config.gateway.max_calls_per_query, 7);
    assert_eq!(config.gateway.rate_limit.window_secs, 30);
    assert_eq!(config.providers.len(), 3);
    assert_eq!(config.providers[0].label(), "groq");
    assert_eq!(config.providers[1].provider, ProviderType::Anthropic);
    assert_eq!(config.database.max_rows, 200);
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");

    let service = ConfigService::from_path(&path).unwrap();
    assert_eq!(service.get_config().pipeline.max_retries, 3);
    assert!(service.get_config().providers.is_empty());
    assert!(!path.exists());
}

#[test]
fn test_invalid_config_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, r#"{ "gateway": { "max_calls_per_query": 0 } }"#);
    assert!(ConfigService::from_path(&path).is_err());

    let path = write_config(&dir, r#"{ "pipeline": { "max_join_hops": 0 } }"#);
    assert!(ConfigService::from_path(&path).is_err());

    let path = write_config(&dir, "{ not json");
    assert!(ConfigService::from_path(&path).is_err());
}

#[test]
fn test_save_round_trips_without_secrets() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, CHAIN_CONFIG);

    let service = ConfigService::from_path(&path).unwrap();
    service.save().unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(!written.contains("gsk-inline"));
    assert!(written.contains("GROQ_API_KEY"));

    let reloaded = ConfigService::from_path(&path).unwrap();
    assert_eq!(reloaded.get_config().gateway.max_calls_per_query, 7);
}

// ============================================================================
// Credentials & provider chain
// ============================================================================

#[test]
fn test_resolve_keys_from_lookup() {
    let dir = TempDir::new().unwrap();
    let service = ConfigService::from_path(write_config(&dir, CHAIN_CONFIG)).unwrap();
    let vars = env(&[
        ("GROQ_API_KEY", "gsk-env-1, gsk-inline ,gsk-env-2"),
        ("ANTHROPIC_KEYS", "sk-ant-1"),
    ]);

    let providers =
        resolve_provider_keys(&service.get_config().providers, |name| vars.get(name).cloned());

    assert_eq!(
        providers[0].api_keys,
        vec!["gsk-inline", "gsk-env-1", "gsk-env-2"]
    );
    assert_eq!(providers[1].api_keys, vec!["sk-ant-1"]);
    assert!(providers[2].api_keys.is_empty());
}

#[test]
fn test_unset_env_leaves_inline_keys() {
    let dir = TempDir::new().unwrap();
    let service = ConfigService::from_path(write_config(&dir, CHAIN_CONFIG)).unwrap();

    let providers = resolve_provider_keys(&service.get_config().providers, |_| None);

    assert_eq!(providers[0].api_keys, vec!["gsk-inline"]);
    assert!(providers[1].api_keys.is_empty());
}

#[test]
fn test_gateway_chain_from_config() {
    let dir = TempDir::new().unwrap();
    let service = ConfigService::from_path(write_config(&dir, CHAIN_CONFIG)).unwrap();
    let vars = env(&[("GROQ_API_KEY", "gsk-env-1")]);
    let providers =
        resolve_provider_keys(&service.get_config().providers, |name| vars.get(name).cloned());

    let gateway = LlmGateway::from_configs(
        &providers,
        service.get_config().gateway.gateway_config(),
    );
    let status = gateway.provider_status();

    assert_eq!(gateway.provider_count(), 3);
    assert_eq!(status[0].provider, "groq");
    assert_eq!(status[0].model, "llama-3.3-70b-versatile");
    assert_eq!(status[0].total_keys, 2);
    assert!(status[0].active_key.starts_with("groq#1"));
    assert!(!status[0].active_key.contains("gsk-inline"));

    // Anthropic without any key is already spent
    assert_eq!(status[1].total_keys, 0);
    assert_eq!(status[1].active_key, "anthropic#exhausted");

    assert_eq!(status[2].total_keys, 1);
    assert_eq!(status[2].active_key, "ollama#keyless");
}

// ============================================================================
// Database settings
// ============================================================================

#[tokio::test]
async fn test_database_from_settings() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("data").join("chinook.db");
    let config_json = format!(
        r#"{{ "database": {{ "path": {}, "max_rows": 2, "pool_size": 2 }} }}"#,
        serde_json::to_string(&db_path).unwrap()
    );
    let service = ConfigService::from_path(write_config(&dir, &config_json)).unwrap();

    let db = SqliteDatabase::from_settings(&service.get_config().database).unwrap();
    assert_eq!(db.max_rows(), 2);
    db.execute_batch(
        "CREATE TABLE Genre (GenreId INTEGER PRIMARY KEY, Name TEXT);
         INSERT INTO Genre VALUES (1, 'Rock'), (2, 'Jazz'), (3, 'Metal');",
    )
    .unwrap();
    assert!(db_path.exists());

    let rows = db.execute("SELECT Name FROM Genre ORDER BY GenreId").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.truncated);

    let schema = db.get_schema().await.unwrap();
    assert_eq!(schema.tables.len(), 1);
    assert_eq!(schema.tables[0].name, "Genre");
}
