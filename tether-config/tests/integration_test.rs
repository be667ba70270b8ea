//! Integration tests for tether-config

use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;
use tether_config::*;

#[test]
fn test_default_config_validation() {
    let config = TetherConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("TETHER_HOST", Some("0.0.0.0")),
        ("TETHER_PORT", Some("9123")),
        ("TETHER_SHUTDOWN_TIMEOUT", Some("3")),
        ("TETHER_KILL_TIMEOUT", Some("0.5")),
        ("TETHER_RESPONSE_TIMEOUT", Some("60")),
        ("TETHER_AUTHKEY", Some("pre-shared")),
        ("TETHER_LOG_LEVEL", Some("debug")),
    ];

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.endpoint.host, "0.0.0.0");
        assert_eq!(config.endpoint.port, 9123);
        assert_eq!(config.supervisor.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.supervisor.kill_timeout, Duration::from_millis(500));
        assert_eq!(config.channel.response_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.channel.authkey.as_deref(), Some("pre-shared"));
        assert_eq!(config.logging.level, LogLevel::Debug);
    });
}

#[test]
fn test_invalid_env_value() {
    with_vars(vec![("TETHER_BADPORT_PORT", Some("ninety"))], || {
        let result = ConfigLoader::with_prefix("TETHER_BADPORT").from_env();
        match result {
            Err(ConfigError::EnvError { var, .. }) => assert_eq!(var, "TETHER_BADPORT_PORT"),
            other => panic!("expected an EnvError, got {:?}", other),
        }
    });
}

#[test]
fn test_env_overrides_file_values() {
    with_vars(vec![("TETHER_OVERRIDE_PORT", Some("9400"))], || {
        let config = ConfigLoader::with_prefix("TETHER_OVERRIDE")
            .from_yaml_str("endpoint:\n  port: 9300\n")
            .unwrap();
        assert_eq!(config.endpoint.port, 9400);
    });
}

#[test]
fn test_yaml_config_serialization() {
    let yaml = TetherConfig::generate_sample();

    // Parse it back
    let parsed: TetherConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed, TetherConfig::default());
}

#[test]
fn test_comprehensive_config() {
    let yaml = r#"
endpoint:
  host: "127.0.0.1"
  port: 9500

launcher:
  executable: "python3"
  args: ["calc_server.py", "--threads", "4"]
  bind_flag: "--bind"
  keep_input_open: true
  readiness:
    mode: fixed_delay
    settle: 2

supervisor:
  shutdown_timeout: 10
  kill_timeout: 2

channel:
  connect_timeout: 5
  response_timeout: 600
  max_frame_bytes: 1048576

logging:
  level: warn
  format: json
  directives: ["tether_ipc=debug"]
"#;

    let loader = ConfigLoader::with_prefix("TETHER_COMPREHENSIVE_TEST");
    let config = loader.from_yaml_str(yaml).unwrap();

    assert_eq!(config.endpoint.port, 9500);
    assert_eq!(config.launcher.args, vec!["calc_server.py", "--threads", "4"]);
    assert!(config.launcher.keep_input_open);
    assert_eq!(
        config.launcher.readiness,
        ReadinessConfig::FixedDelay {
            settle: Duration::from_secs(2)
        }
    );
    assert_eq!(config.supervisor.shutdown_timeout, Duration::from_secs(10));
    assert_eq!(config.channel.connect_timeout, Some(Duration::from_secs(5)));
    assert_eq!(config.channel.max_frame_bytes, 1_048_576);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_partial_config_uses_defaults() {
    let loader = ConfigLoader::with_prefix("TETHER_PARTIAL_TEST");
    let config = loader.from_yaml_str("endpoint:\n  port: 9100\n").unwrap();

    assert_eq!(config.endpoint.port, 9100);
    assert_eq!(config.endpoint.host, "127.0.0.1");
    assert_eq!(config.launcher, LauncherConfig::default());
    assert_eq!(config.supervisor, SupervisorConfig::default());
}

#[test]
fn test_empty_file_is_default() {
    let loader = ConfigLoader::with_prefix("TETHER_EMPTY_TEST");
    assert_eq!(loader.from_yaml_str("").unwrap(), TetherConfig::default());
}

#[test]
fn test_invalid_config_rejected() {
    let loader = ConfigLoader::with_prefix("TETHER_INVALID_TEST");
    let result = loader.from_yaml_str("launcher:\n  bind_flag: bind\n");

    match result {
        Err(ConfigError::DomainError { domain, .. }) => assert_eq!(domain, "launcher"),
        other => panic!("expected launcher domain error, got {:?}", other),
    }
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "endpoint:\n  port: 9200\nsupervisor:\n  shutdown_timeout: 1").unwrap();

    let loader = ConfigLoader::with_prefix("TETHER_FILE_TEST");
    let config = loader.load(Some(file.path())).unwrap();
    assert_eq!(config.endpoint.port, 9200);
    assert_eq!(config.supervisor.shutdown_timeout, Duration::from_secs(1));
}

#[test]
fn test_missing_file() {
    let loader = ConfigLoader::with_prefix("TETHER_MISSING_TEST");
    let result = loader.from_file("/nonexistent/tether.yaml");
    match result {
        Err(ConfigError::FileReadError { path, .. }) => {
            assert_eq!(path, std::path::Path::new("/nonexistent/tether.yaml"))
        }
        other => panic!("expected a FileReadError, got {:?}", other),
    }
}
