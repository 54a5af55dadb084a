//! Startup env loading.
//!
//! File: `~/.zg-inference/.env` (standard dotenvy format). Typically holds
//! `ZG_PRIVATE_KEY` so the key stays out of shell history and out of the
//! TOML config.

use std::path::{Path, PathBuf};

use crate::settings::zg_home_dir;

/// Path to the per-user `.env` file: `~/.zg-inference/.env`.
pub fn zg_env_path() -> PathBuf {
    zg_home_dir().join(".env")
}

/// Load `./.env`, then `~/.zg-inference/.env`.
///
/// dotenvy never overwrites existing vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.zg-inference/.env`
pub fn load_zg_env() {
    let _ = dotenvy::dotenv();
    load_env_file(&zg_env_path());
}

fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = dotenvy::from_path(path) {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_zg_env_path() {
        let path = zg_env_path();
        assert!(path.ends_with(".zg-inference/.env"));
    }

    #[test]
    fn test_env_file_does_not_override_existing_vars() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "ZG_BOOTSTRAP_TEST_SET=from_file\nZG_BOOTSTRAP_TEST_NEW=\"from file\"\n",
        )
        .unwrap();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("ZG_BOOTSTRAP_TEST_SET", "explicit");
            std::env::remove_var("ZG_BOOTSTRAP_TEST_NEW");
        }

        load_env_file(&path);
        assert_eq!(std::env::var("ZG_BOOTSTRAP_TEST_SET").unwrap(), "explicit");
        assert_eq!(std::env::var("ZG_BOOTSTRAP_TEST_NEW").unwrap(), "from file");

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("ZG_BOOTSTRAP_TEST_SET");
            std::env::remove_var("ZG_BOOTSTRAP_TEST_NEW");
        }
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        load_env_file(&dir.path().join("missing.env"));
    }
}
