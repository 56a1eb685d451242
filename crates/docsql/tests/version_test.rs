//! Server version gate tests

use docsql::error::Error;
use docsql::version::{
    compare_versions, detect_family, is_version_supported, parse_version_string,
    strip_compat_sentinel, MySqlVersionPolicy, SqliteVersionPolicy, VersionPolicy,
};
use std::cmp::Ordering;

#[test]
fn test_ubuntu_mysql_build() {
    let version = MySqlVersionPolicy::default()
        .check("5.7.27-0ubuntu0.18.04.1")
        .unwrap();

    assert_eq!(version.family, "MySQL");
    assert_eq!(version.version(), "5.7.27");
    assert_eq!(version.raw, "5.7.27-0ubuntu0.18.04.1");
}

#[test]
fn test_mariadb_with_replication_prefix() {
    let version = MySqlVersionPolicy::default()
        .check("5.5.5-10.2.26-MariaDB-1:10.2.26+maria~bionic")
        .unwrap();

    assert_eq!(version.family, "MariaDB");
    assert_eq!((version.major, version.minor, version.patch), (10, 2, 26));
}

#[test]
fn test_mariadb_without_prefix() {
    let version = MySqlVersionPolicy::default()
        .check("10.4.18-MariaDB-cll-lve")
        .unwrap();

    assert_eq!(version.family, "MariaDB");
    assert_eq!(version.to_string(), "MariaDB 10.4.18");
}

#[test]
fn test_mysql_threshold() {
    let policy = MySqlVersionPolicy::default();

    let err = policy.check("5.7.8").unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { .. }));
    let msg = err.to_string();
    assert!(msg.contains("5.7.8"));
    assert!(msg.contains("5.7.9"));

    assert!(policy.check("5.7.9").is_ok());
    assert!(policy.check("8.0.36").is_ok());
}

#[test]
fn test_mariadb_threshold() {
    let policy = MySqlVersionPolicy::default();

    let err = policy.check("10.2.5-MariaDB-log").unwrap_err();
    assert!(err.to_string().contains("MariaDB"));
    assert!(err.to_string().contains("10.2.6"));

    assert!(policy.check("10.2.6-MariaDB").is_ok());
    assert!(policy.check("5.5.5-10.2.6-MariaDB").is_ok());
}

#[test]
fn test_custom_minimum() {
    let policy = MySqlVersionPolicy::default().with_min_version("8.0.0");
    assert!(policy.check("5.7.44").is_err());
    assert!(policy.check("8.0.1").is_ok());
    // Fork thresholds are independent of the base minimum
    assert!(policy.check("10.3.0-MariaDB").is_ok());
}

#[test]
fn test_sqlite_threshold() {
    let policy = SqliteVersionPolicy::default();
    assert!(policy.check("3.31.0").is_ok());
    assert!(policy.check("3.46.1").is_ok());

    let err = policy.check("3.30.1").unwrap_err();
    assert!(err.to_string().contains("SQLite"));
}

#[test]
fn test_parsing_steps() {
    let fragments = parse_version_string("5.5.5-10.2.26-MariaDB-1:10.2.26+maria~bionic");
    assert_eq!(fragments.candidate, "5.5.5");
    assert_eq!(detect_family(&fragments, &["MariaDB"]), Some("MariaDB"));

    let stripped = strip_compat_sentinel(fragments, "5.5.5");
    assert_eq!(stripped.candidate, "10.2.26");

    let plain = parse_version_string("5.7.27-0ubuntu0.18.04.1");
    assert_eq!(detect_family(&plain, &["MariaDB"]), None);
}

#[test]
fn test_numeric_comparison() {
    assert_eq!(compare_versions("10.2.26", "5.7.9"), Ordering::Greater);
    assert_eq!(compare_versions("5.7.9", "5.7.10"), Ordering::Less);
    assert!(is_version_supported("5.7.9", "5.7.9"));
    assert!(!is_version_supported("5.7.8", "5.7.9"));
}
