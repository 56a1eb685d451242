//! Server version gate
//!
//! Servers report versions in engine-specific shapes:
//!
//! - MySQL: `5.7.27-0ubuntu0.18.04.1`
//! - MariaDB with replication prefix: `5.5.5-10.2.26-MariaDB-1:10.2.26+maria~bionic`
//! - MariaDB: `10.4.18-MariaDB-cll-lve`
//! - SQLite: `3.46.0`
//!
//! Parsing is split into named steps ([`parse_version_string`],
//! [`detect_family`], [`strip_compat_sentinel`]) so each rule can be tested on
//! its own; [`compare_versions`] is the shared numeric comparison every
//! [`VersionPolicy`] delegates to.

use std::cmp::Ordering;
use std::fmt;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Parsed server version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
    /// Engine family (`MySQL`, `MariaDB`, `SQLite`)
    pub family: String,
    /// Version string as reported by the server
    pub raw: String,
}

impl ServerVersion {
    /// Dotted version triple
    pub fn version(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.version())
    }
}

/// A version string split on `-`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFragments {
    /// Candidate version number (leading fragment)
    pub candidate: String,
    /// Remaining dash-delimited fragments, in order
    pub rest: Vec<String>,
}

/// Split a reported version string; the fragment before the first dash is the
/// candidate version.
pub fn parse_version_string(raw: &str) -> VersionFragments {
    let mut parts = raw.trim().split('-').map(str::to_string);
    let candidate = parts.next().unwrap_or_default();
    VersionFragments {
        candidate,
        rest: parts.collect(),
    }
}

/// Return the first fork marker found among the trailing fragments
pub fn detect_family<'a>(fragments: &VersionFragments, markers: &[&'a str]) -> Option<&'a str> {
    markers
        .iter()
        .copied()
        .find(|marker| fragments.rest.iter().any(|f| f == marker))
}

/// Drop a leading replication-compatibility version (`5.5.5`) and promote the
/// next fragment to candidate.
pub fn strip_compat_sentinel(mut fragments: VersionFragments, sentinel: &str) -> VersionFragments {
    if fragments.candidate == sentinel && !fragments.rest.is_empty() {
        fragments.candidate = fragments.rest.remove(0);
    }
    fragments
}

/// Parse `MAJOR.MINOR.PATCH`, taking the leading digits of each component.
///
/// Missing components are zero. Returns `None` when the major component has no
/// digits at all.
pub fn parse_version_numbers(version: &str) -> Option<[u64; 3]> {
    let mut out = [0u64; 3];
    for (i, piece) in version.split('.').take(3).enumerate() {
        let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            if i == 0 {
                return None;
            }
            break;
        }
        out[i] = digits.parse().ok()?;
    }
    Some(out)
}

/// Component-wise numeric comparison; unparseable versions compare as `0.0.0`
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = parse_version_numbers(a).unwrap_or_default();
    let b = parse_version_numbers(b).unwrap_or_default();
    a.cmp(&b)
}

/// Whether `current` is at least `minimum` (inclusive)
pub fn is_version_supported(current: &str, minimum: &str) -> bool {
    compare_versions(current, minimum) != Ordering::Less
}

/// Shared numeric gate used by every policy
pub fn assert_version_supported(
    family: &str,
    candidate: &str,
    minimum: &str,
    raw: &str,
) -> Result<ServerVersion> {
    let [major, minor, patch] = parse_version_numbers(candidate)
        .ok_or_else(|| Error::unsupported_version(family, raw, minimum))?;

    if !is_version_supported(candidate, minimum) {
        warn!(
            family,
            detected = candidate,
            required = minimum,
            "Database server version is not supported"
        );
        return Err(Error::unsupported_version(family, candidate, minimum));
    }

    Ok(ServerVersion {
        major,
        minor,
        patch,
        family: family.to_string(),
        raw: raw.to_string(),
    })
}

/// Per-dialect version acceptance rules
pub trait VersionPolicy: Send + Sync {
    /// Validate a reported version string and return the parsed version
    fn check(&self, raw: &str) -> Result<ServerVersion>;
}

/// Minimum version for a fork family identified by a marker token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkThreshold {
    /// Dash-delimited token identifying the fork (e.g. `MariaDB`)
    pub marker: String,
    /// Minimum supported version of the fork
    pub min_version: String,
}

/// MySQL-family policy.
///
/// MySQL 5.7.9 brings JSON support and shorthand operators; MariaDB 10.2.6 is
/// the first release with both JSON functions and generated columns.
#[derive(Debug, Clone)]
pub struct MySqlVersionPolicy {
    /// Minimum version of the base engine
    pub min_version: String,
    /// Known forks
    pub forks: Vec<ForkThreshold>,
    /// Replication-compatibility prefix some forks report
    pub compat_sentinel: String,
}

impl Default for MySqlVersionPolicy {
    fn default() -> Self {
        Self {
            min_version: "5.7.9".into(),
            forks: vec![ForkThreshold {
                marker: "MariaDB".into(),
                min_version: "10.2.6".into(),
            }],
            compat_sentinel: "5.5.5".into(),
        }
    }
}

impl MySqlVersionPolicy {
    /// Override the base engine minimum
    pub fn with_min_version(mut self, version: impl Into<String>) -> Self {
        self.min_version = version.into();
        self
    }
}

impl VersionPolicy for MySqlVersionPolicy {
    fn check(&self, raw: &str) -> Result<ServerVersion> {
        let mut fragments = parse_version_string(raw);
        let markers: Vec<&str> = self.forks.iter().map(|f| f.marker.as_str()).collect();

        let (family, minimum) = match detect_family(&fragments, &markers) {
            Some(marker) => {
                // Only forks use the replication prefix
                fragments = strip_compat_sentinel(fragments, &self.compat_sentinel);
                let fork = self
                    .forks
                    .iter()
                    .find(|f| f.marker == marker)
                    .ok_or_else(|| Error::internal("fork marker without threshold"))?;
                (marker, fork.min_version.as_str())
            }
            None => ("MySQL", self.min_version.as_str()),
        };

        debug!(
            raw,
            family,
            candidate = %fragments.candidate,
            required = minimum,
            "Checking database server version"
        );

        assert_version_supported(family, &fragments.candidate, minimum, raw)
    }
}

/// SQLite policy; 3.31.0 introduced generated columns.
#[derive(Debug, Clone)]
pub struct SqliteVersionPolicy {
    /// Minimum library version
    pub min_version: String,
}

impl Default for SqliteVersionPolicy {
    fn default() -> Self {
        Self {
            min_version: "3.31.0".into(),
        }
    }
}

impl VersionPolicy for SqliteVersionPolicy {
    fn check(&self, raw: &str) -> Result<ServerVersion> {
        let fragments = parse_version_string(raw);
        assert_version_supported("SQLite", &fragments.candidate, &self.min_version, raw)
    }
}
