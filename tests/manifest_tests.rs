#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests.
//!
//! These read Cargo.toml and fail when the panic-free lint policy or the
//! feature layout drifts. Synchronous filesystem reads only.

use std::path::PathBuf;

fn manifest() -> toml::Table {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    contents
        .parse::<toml::Table>()
        .unwrap_or_else(|e| panic!("Cargo.toml is not valid TOML: {e}"))
}

fn table<'a>(parent: &'a toml::Table, key: &str) -> &'a toml::Table {
    parent
        .get(key)
        .and_then(toml::Value::as_table)
        .unwrap_or_else(|| panic!("Cargo.toml is missing [{key}]"))
}

const REQUIRED_DENY_LINTS: &[&str] = &[
    "unwrap_used",
    "expect_used",
    "panic",
    "todo",
    "unimplemented",
    "indexing_slicing",
];

#[test]
fn panic_prone_lints_are_denied() {
    let manifest = manifest();
    let clippy = table(table(&manifest, "lints"), "clippy");

    for lint in REQUIRED_DENY_LINTS {
        assert_eq!(
            clippy.get(*lint).and_then(toml::Value::as_str),
            Some("deny"),
            "[lints.clippy] must set `{lint} = \"deny\"` to keep library code panic-free"
        );
    }
}

#[test]
fn tcp_transport_is_a_default_feature() {
    let manifest = manifest();
    let features = table(&manifest, "features");

    let default: Vec<&str> = features
        .get("default")
        .and_then(toml::Value::as_array)
        .expect("[features] must declare `default`")
        .iter()
        .filter_map(toml::Value::as_str)
        .collect();
    assert!(default.contains(&"transport-tcp"), "default features: {default:?}");

    let tcp: Vec<&str> = features
        .get("transport-tcp")
        .and_then(toml::Value::as_array)
        .expect("[features] must declare `transport-tcp`")
        .iter()
        .filter_map(toml::Value::as_str)
        .collect();
    assert!(tcp.contains(&"tokio/net"));
    assert!(tcp.contains(&"tokio/io-util"));
}

#[test]
fn runtime_dependencies_stay_minimal() {
    let manifest = manifest();
    let dependencies = table(&manifest, "dependencies");

    // Tokio must not pull in the multi-threaded runtime for library users.
    let tokio_features: Vec<&str> = table(dependencies, "tokio")
        .get("features")
        .and_then(toml::Value::as_array)
        .expect("tokio must list its features explicitly")
        .iter()
        .filter_map(toml::Value::as_str)
        .collect();
    assert!(!tokio_features.contains(&"full"), "{tokio_features:?}");
    assert!(!tokio_features.contains(&"rt-multi-thread"), "{tokio_features:?}");

    // JSON is only used by tests and fuzzing.
    assert!(!dependencies.contains_key("serde_json"));
}

#[test]
fn rust_version_is_declared() {
    let manifest = manifest();
    let package = table(&manifest, "package");
    let version = package
        .get("rust-version")
        .and_then(toml::Value::as_str)
        .expect("package must declare rust-version");
    assert!(version.split('.').count() >= 2, "rust-version `{version}`");
}
