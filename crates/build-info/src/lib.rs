//! Build identification for fleet binaries.
//!
//! Values are stamped by build.rs at compile time.

use once_cell::sync::Lazy;

static BUILD_ID: Lazy<&'static str> =
    Lazy::new(|| option_env!("FLEETD_BUILD_ID").unwrap_or("unknown build"));
static BUILD_TIME: Lazy<&'static str> =
    Lazy::new(|| option_env!("FLEETD_BUILD_TIME").unwrap_or("unknown time"));
static GIT_LABEL: Lazy<&'static str> =
    Lazy::new(|| option_env!("FLEETD_BUILD_GIT").unwrap_or("unknown git"));

/// Full build identifier, timestamp plus git label.
pub fn build_id() -> &'static str {
    *BUILD_ID
}

/// Build timestamp (UTC).
pub fn build_timestamp() -> &'static str {
    *BUILD_TIME
}

/// Git label (tag/commit) detected at build time.
pub fn git_label() -> &'static str {
    *GIT_LABEL
}

/// Display-ready banner for a specific binary.
pub fn formatted_banner(package: &str, version: &str) -> String {
    format!("{} {} | {}", package, version, build_id())
}
