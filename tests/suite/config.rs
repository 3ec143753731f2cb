//! Configuration files feeding conductor behaviour.

use std::sync::Arc;
use std::time::Duration;

use assay_config::{AssayConfig, CONFIG_ENV, ConfigError};
use assay_engine::{Conductor, ConductorOptions, DependencyMode, InstrumentRegistry, SchedulerOptions};
use tempfile::tempdir;

use crate::common::{dag_manifest, step};

fn options(config: &AssayConfig) -> ConductorOptions {
    ConductorOptions {
        max_concurrent_executions: config.conductor.max_concurrent_executions,
        scheduler: SchedulerOptions {
            backoff: config.retry.backoff(),
            dependency_mode: config.conductor.dependency_mode,
        },
        preflight: config.preflight.retry_policy(),
    }
}

#[tokio::test]
async fn lenient_mode_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[conductor]\ndependency_mode = \"lenient\"\n\n[retry]\ninitial_delay_ms = 0\n",
    )
    .unwrap();

    let config = AssayConfig::load_from(&path).unwrap();
    assert_eq!(config.retry.backoff().initial_delay, Duration::ZERO);

    let conductor = Conductor::new(Arc::new(InstrumentRegistry::with_builtins()), options(&config));
    let text = dag_manifest(1, &[step("a", &["b"]), step("b", &["a"])]);
    let report = conductor.run(text).await.unwrap();
    assert_eq!(report.phases[0].unreachable, ["a", "b"]);
}

#[test]
fn env_var_points_at_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[preflight]\nmax_attempts = 5\n\n[logging]\nfilter = \"debug\"\n").unwrap();

    unsafe {
        std::env::set_var(CONFIG_ENV, &path);
    }
    let loaded = AssayConfig::load();
    unsafe {
        std::env::remove_var(CONFIG_ENV);
    }

    let config = loaded.unwrap();
    assert_eq!(config.preflight.retry_policy().max_attempts, 5);
    assert_eq!(config.logging.filter, "debug");
    assert_eq!(config.conductor.dependency_mode, DependencyMode::Strict);
}

#[test]
fn unreadable_config_is_a_read_error() {
    let dir = tempdir().unwrap();
    // A directory exists but cannot be read as a file.
    let err = AssayConfig::load_from(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert_eq!(err.path(), dir.path());
}
