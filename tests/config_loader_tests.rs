use sapb1::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for (key, _) in env::vars() {
        if key.starts_with("SAPB1_") {
            unsafe {
                env::remove_var(key);
            }
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.database_url, "sqlite://sapb1.db?mode=rwc");
    assert_eq!(cfg.service_layer.base_url, "https://localhost:50000/b1s/v1");
    assert_eq!(cfg.service_layer.max_retries, 3);
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.cache.ttl_seconds, 300);
    assert_eq!(cfg.sync.default_batch_size, 5000);
    assert_eq!(cfg.sync.key_batch_size, 20000);
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "SAPB1_SYNC_DEFAULT_BATCH_SIZE=100\n");
    write_env_file(&temp_dir, ".env.test", "SAPB1_SYNC_DEFAULT_BATCH_SIZE=200\n");
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "SAPB1_SYNC_DEFAULT_BATCH_SIZE=300\n",
    );
    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "SAPB1_PROFILE=test\nSAPB1_CACHE_TTL_SECONDS=60\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.sync.default_batch_size, 300);
    assert_eq!(cfg.cache.ttl_seconds, 60);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "SAPB1_DATABASE_URL=sqlite://from-file.db\nSAPB1_CACHE_ENABLED=true\n",
    );
    unsafe {
        env::set_var("SAPB1_DATABASE_URL", "sqlite::memory:");
        env::set_var("SAPB1_CACHE_ENABLED", "false");
    }

    let cfg = loader(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.database_url, "sqlite::memory:");
    assert!(!cfg.cache.enabled);
    clear_env();
}

#[test]
fn production_profile_requires_credentials() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("SAPB1_PROFILE", "prod");
        env::set_var("SAPB1_SERVICE_LAYER_URL", "https://sap.example.com:50000/b1s/v1");
    }
    let err = loader(&temp_dir).load().expect_err("credentials are required");
    assert!(matches!(err, ConfigError::MissingCompanyDb));

    unsafe {
        env::set_var("SAPB1_COMPANY_DB", "SBODEMOUS");
        env::set_var("SAPB1_USERNAME", "manager");
        env::set_var("SAPB1_PASSWORD", "secret");
    }
    let cfg = loader(&temp_dir).load().expect("complete production config");
    assert_eq!(cfg.service_layer.company_db.as_deref(), Some("SBODEMOUS"));
    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("secret"));
    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("SAPB1_SERVICE_LAYER_URL", "not a url");
    }
    let err = loader(&temp_dir).load().expect_err("bad url should fail");
    assert!(format!("{}", err).contains("invalid Service Layer URL"));

    clear_env();
    unsafe {
        env::set_var("SAPB1_SYNC_KEY_BATCH_SIZE", "0");
    }
    let err = loader(&temp_dir).load().expect_err("zero batch size should fail");
    assert!(matches!(err, ConfigError::InvalidBatchSize { .. }));
    clear_env();
}
