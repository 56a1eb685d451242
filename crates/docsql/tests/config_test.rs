//! Storage configuration parsing tests

use docsql::config::{StorageConfig, DEFAULT_CHARSET};
use docsql::connection::ConnectionTarget;
use docsql::registry::{DriverRegistry, SERVER_NAME};

const FULL_CONFIG: &str = r#"
server: sqldriver
options:
  driver: mysql
  host: db.internal
  port: 3307
  dbname: cockpit
  username: cockpit
  password: s3cret
  charset: utf8mb4
  indexes:
    cockpit/accounts:
      - user
      - email
driverOptions:
  init_command: "SET NAMES utf8mb4"
  use_buffered_query: true
  stmt_cache_size: 64
  ssl_mode: required
"#;

#[test]
fn test_full_configuration() {
    let config = StorageConfig::from_yaml_str(FULL_CONFIG).unwrap();

    assert_eq!(config.server, SERVER_NAME);
    assert!(DriverRegistry::accepts(&config));
    config.options.check().unwrap();

    assert_eq!(config.options.driver, "mysql");
    assert_eq!(config.options.require_dbname().unwrap(), "cockpit");
    assert_eq!(config.options.charset(), "utf8mb4");
    assert_eq!(
        config.options.password.as_ref().map(|p| p.expose()),
        Some("s3cret")
    );
    assert_eq!(
        config.options.indexed_fields("cockpit/accounts"),
        ["user".to_string(), "email".to_string()]
    );
    assert!(config.options.indexed_fields("other").is_empty());

    assert_eq!(
        config.driver_options.init_command_or("SET sql_mode = 'ANSI'"),
        "SET NAMES utf8mb4"
    );
    assert!(config.driver_options.buffered());
    assert_eq!(config.driver_options.stmt_cache_size, Some(64));
    // Unknown flags are kept for the caller
    assert_eq!(
        config.driver_options.extra.get("ssl_mode"),
        Some(&serde_json::json!("required"))
    );

    match ConnectionTarget::resolve(&config.options, 3306) {
        ConnectionTarget::Tcp { host, port } => {
            assert_eq!(host, "db.internal");
            assert_eq!(port, 3307);
        }
        other => panic!("expected tcp target, got {:?}", other),
    }
}

#[test]
fn test_minimal_configuration_uses_defaults() {
    let config = StorageConfig::from_yaml_str(
        r#"
server: sqldriver
options:
  dbname: cockpit
"#,
    )
    .unwrap();

    assert_eq!(config.options.driver, "mysql");
    assert_eq!(config.options.charset(), DEFAULT_CHARSET);
    assert!(!config.driver_options.buffered());
    assert_eq!(config.driver_options.init_command_or("DEFAULT"), "DEFAULT");

    match ConnectionTarget::resolve(&config.options, 3306) {
        ConnectionTarget::Tcp { host, port } => {
            assert_eq!(host, "localhost");
            assert_eq!(port, 3306);
        }
        other => panic!("expected tcp target, got {:?}", other),
    }
}

#[test]
fn test_socket_takes_precedence() {
    let config = StorageConfig::from_yaml_str(
        r#"
server: sqldriver
options:
  host: db.internal
  socket: /var/run/mysqld/mysqld.sock
  dbname: cockpit
"#,
    )
    .unwrap();

    let target = ConnectionTarget::resolve(&config.options, 3306);
    assert!(target.is_socket());
}

#[test]
fn test_environment_expansion() {
    std::env::set_var("DOCSQL_TEST_DBNAME", "from_env");
    std::env::remove_var("DOCSQL_TEST_UNSET_HOST");

    let config = StorageConfig::from_yaml_str(
        r#"
server: sqldriver
options:
  host: ${DOCSQL_TEST_UNSET_HOST:-fallback.local}
  dbname: ${DOCSQL_TEST_DBNAME}
"#,
    )
    .unwrap();

    assert_eq!(config.options.host.as_deref(), Some("fallback.local"));
    assert_eq!(config.options.dbname.as_deref(), Some("from_env"));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.yaml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = StorageConfig::from_file(&path).unwrap();
    assert_eq!(config.options.port, Some(3307));

    assert!(StorageConfig::from_file(dir.path().join("missing.yaml")).is_err());
}

#[test]
fn test_missing_database_name_is_rejected() {
    let config = StorageConfig::from_yaml_str(
        r#"
server: sqldriver
options:
  driver: sqlite
"#,
    )
    .unwrap();

    let err = config.options.check().unwrap_err();
    assert!(err.to_string().contains("database name"));
}

#[test]
fn test_identity_never_contains_password() {
    let config = StorageConfig::from_yaml_str(FULL_CONFIG).unwrap();
    let identity = config.identity();
    assert!(identity.contains("db.internal:3307"));
    assert!(!identity.contains("s3cret"));
}
