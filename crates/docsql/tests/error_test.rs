//! Error classification tests

use docsql::error::{Error, ErrorCategory};

#[test]
fn test_error_connection() {
    let err = Error::connection("Failed to connect");

    assert_eq!(err.category(), ErrorCategory::Connection);
    assert!(err.to_string().contains("Failed to connect"));
    assert!(err.is_retriable());
    assert!(err.category().is_fatal_to_driver());
}

#[test]
fn test_error_config() {
    let err = Error::config("missing dbname");

    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.to_string().contains("missing dbname"));
    assert!(!err.is_retriable());
}

#[test]
fn test_error_authentication() {
    let err = Error::authentication("Access denied for user 'cockpit'");

    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert!(!err.is_retriable());
    assert!(!err.category().is_fatal_to_driver());
}

#[test]
fn test_error_unsupported_version() {
    let err = Error::unsupported_version("MySQL", "5.7.8", "5.7.9");

    assert_eq!(err.category(), ErrorCategory::UnsupportedVersion);
    assert_eq!(
        err.to_string(),
        "unsupported MySQL server version 5.7.8 (requires 5.7.9 or newer)"
    );
}

#[test]
fn test_per_operation_errors_keep_driver_usable() {
    for err in [
        Error::unsupported_query("$where"),
        Error::conflict("posts", "abc"),
        Error::invalid_document("not an object"),
        Error::query("syntax error"),
        Error::table_not_found("posts"),
    ] {
        assert!(!err.category().is_fatal_to_driver(), "{}", err);
        assert!(!err.is_retriable(), "{}", err);
    }
}

#[test]
fn test_error_conflict_message() {
    let err = Error::conflict("cockpit/accounts", "5f1d2c3b4a5e6f7a8b9c0d1e");

    assert_eq!(err.category(), ErrorCategory::Conflict);
    assert!(err.to_string().contains("cockpit/accounts"));
    assert!(err.to_string().contains("5f1d2c3b4a5e6f7a8b9c0d1e"));
}

#[test]
fn test_error_not_ready() {
    let err = Error::not_ready("failed");

    assert_eq!(err.category(), ErrorCategory::NotReady);
    assert_eq!(err.to_string(), "driver not ready (state: failed)");
}

#[test]
fn test_serialization_error_is_invalid_document() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err = Error::from(json_err);

    assert_eq!(err.category(), ErrorCategory::InvalidDocument);
}

#[test]
fn test_category_display() {
    assert_eq!(ErrorCategory::Connection.to_string(), "connection");
    assert_eq!(ErrorCategory::UnsupportedQuery.to_string(), "unsupported_query");
    assert_eq!(ErrorCategory::NotReady.to_string(), "not_ready");
}
