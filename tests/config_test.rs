//! Integration tests for Settings config loading with layered merge semantics.
//!
//! These tests run without a global config (temp directories only),
//! so they exercise project config merging over compiled defaults.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use rulecraft::application::{Compiler, DEFAULT_RULE_FORMAT};
use rulecraft::config::Settings;
use rulecraft::domain::CompileError;
use rulecraft::infrastructure::RealFileSystem;
use rulecraft::util::testing::sample_catalog;

#[test]
fn given_no_project_config_when_load_then_defaults() {
    let project = TempDir::new().unwrap();

    let settings = Settings::load(Some(project.path())).expect("load settings");

    assert_eq!(settings.rule_format, DEFAULT_RULE_FORMAT);
    assert_eq!(settings.excerpt_width, 80);
}

#[test]
fn given_project_config_when_load_then_relative_paths_anchored() {
    // Arrange
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join("rulecraft.toml"),
        r#"
rule_format = "v2023-10-30"
catalog = "gen/catalog.json"
excerpt_width = 40
"#,
    )
    .unwrap();

    // Act
    let settings = Settings::load(Some(project.path())).expect("load settings");

    // Assert
    assert_eq!(settings.rule_format, "v2023-10-30");
    assert_eq!(settings.catalog, Some(project.path().join("gen/catalog.json")));
    assert_eq!(settings.excerpt_width, 40);
}

#[test]
fn given_malformed_project_config_when_load_then_config_error() {
    let project = TempDir::new().unwrap();
    fs::write(project.path().join("rulecraft.toml"), "excerpt_width = \"wide\"").unwrap();

    let result = Settings::load(Some(project.path()));

    assert!(result.is_err());
}

#[test]
fn given_settings_when_rendering_toml_then_round_trips() {
    let settings = Settings {
        rule_format: "v2023-10-30".into(),
        excerpt_width: 64,
        ..Default::default()
    };

    let rendered = settings.to_toml().expect("toml");
    let parsed: Settings = toml::from_str(&rendered).expect("parse");

    assert_eq!(parsed, settings);
}

#[test]
fn given_schema_dir_when_building_compiler_then_external_versions_registered() {
    // Arrange: an external, permissive schema for an older rule format
    let project = TempDir::new().unwrap();
    let schemas = project.path().join("schemas");
    fs::create_dir_all(&schemas).unwrap();
    fs::write(
        schemas.join("v2023-01-05.json"),
        r#"{ "type": "object", "properties": { "name": { "type": "string" } } }"#,
    )
    .unwrap();
    fs::write(schemas.join("README.md"), "not a schema").unwrap();
    let fragment = project.path().join("legacy.json");
    fs::write(&fragment, r#"{ "ruleFormat": "v2023-01-05", "name": 7 }"#).unwrap();

    let settings = Settings {
        schema_dir: Some(schemas),
        source_root: project.path().to_path_buf(),
        ..Default::default()
    };

    // Act
    let compiler = Compiler::from_settings(&settings, sample_catalog(), Arc::new(RealFileSystem))
        .expect("compiler");
    let expression = fragment.to_str().expect("utf-8 path").to_string();
    let result = compiler.compile(|root| {
        root.import(&expression)?;
        Ok(())
    });

    // Assert: the fragment is checked against the external schema, not the built-in one
    assert!(matches!(result, Err(CompileError::BadFragment { .. })));
}
