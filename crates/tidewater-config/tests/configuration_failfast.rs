//! Malformed configuration must stop startup with a descriptive error.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;
use tidewater_config::{CONFIG_PATH_ENV_VAR, Config, ConfigError};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        // Environment mutation is unsafe in edition 2024; the override is
        // serialised by the mutex and reverted on drop.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

fn args(extra: &[&OsStr]) -> Vec<OsString> {
    let mut args = vec![OsString::from("tidewaterd")];
    args.extend(extra.iter().map(|arg| arg.to_os_string()));
    args
}

#[test]
fn malformed_configs_return_aggregated_error() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let cli_path = temp_dir.path().join("cli_tidewater.toml");
    let env_path = temp_dir.path().join("env_tidewater.toml");

    fs::write(&cli_path, "client_listen = { host = \"127.0.0.1\" port = 9000 }\n")
        .expect("write malformed cli config");
    fs::write(&env_path, "max_open_files = not_a_number\n").expect("write malformed env config");

    let _env = EnvOverride::set_var(CONFIG_PATH_ENV_VAR, env_path.as_os_str());

    let error = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        cli_path.as_os_str(),
    ]))
    .expect_err("loading must fail");

    match error.as_ref() {
        OrthoError::Aggregate(aggregate) => {
            let mut mentioned_paths = aggregate
                .iter()
                .filter_map(|err| match err {
                    OrthoError::File { path, .. } => Some(path.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>();
            mentioned_paths.sort();

            assert_eq!(
                mentioned_paths.len(),
                2,
                "expected both failing files to be reported, got {mentioned_paths:?}"
            );
            assert!(mentioned_paths.contains(&cli_path));
            assert!(mentioned_paths.contains(&env_path));
        }
        other => panic!("expected aggregated error, got {other:?}"),
    }
}

#[test]
fn wrongly_typed_value_fails_to_load() {
    let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("tidewater.toml");
    fs::write(&path, "max_open_files = \"many\"\n").expect("write mistyped config");

    let result = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]));

    assert!(result.is_err(), "a string count must not load: {result:?}");
}

#[test]
fn zero_heartbeat_interval_loads_but_fails_validation() {
    let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("tidewater.toml");
    fs::write(&path, "heartbeat_interval_secs = 0\n").expect("write config");

    let config = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]))
    .expect("zero is a well-typed interval");

    assert_eq!(
        config.validate(),
        Err(ConfigError::Invalid {
            field: "heartbeat_interval_secs",
            reason: "must be at least 1".to_owned(),
        })
    );
}

#[test]
fn invalid_cli_address_fails_to_load() {
    let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
    let result = Config::load_from_iter(args(&[
        OsStr::new("--client-listen"),
        OsStr::new("no-port"),
    ]));

    assert!(result.is_err(), "an address without a port must not load");
}
