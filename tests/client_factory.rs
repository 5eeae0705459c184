use std::error::Error;

use querydrive::errors::QueryDriveError;
use querydrive::exec::{ExecutorParams, ExecutorRegistry, FieldType};
use querydrive_test_utils::fake_client::{FakeClient, fake_executor_spec};
use serde_json::json;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn builtin_registry_resolves_every_variant() -> TestResult {
    let registry = ExecutorRegistry::builtin();
    for (language, executor) in [
        ("script", "inline"),
        ("shell", "command"),
        ("trino", "trino"),
        ("presto", "presto"),
    ] {
        let spec = registry.get_executor_class(language, executor)?;
        assert_eq!(spec.language(), language);
        assert_eq!(spec.name(), executor);
        assert!(!spec.probe_query().is_empty());
    }
    Ok(())
}

#[test]
fn unregistered_pair_is_a_configuration_error() {
    let registry = ExecutorRegistry::builtin();
    let err = registry
        .get_executor_class("cobol", "mainframe")
        .unwrap_err();
    assert!(err.is_configuration());
    match err {
        QueryDriveError::UnsupportedEngine { language, executor } => {
            assert_eq!(language, "cobol");
            assert_eq!(executor, "mainframe");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn executor_kind_must_match_language() {
    let registry = ExecutorRegistry::builtin();
    assert!(registry.get_executor_class("trino", "presto").is_err());
    assert!(registry.get_executor_class("script", "command").is_err());
}

#[test]
fn flattened_template_lists_fields_with_types_and_defaults() -> TestResult {
    let registry = ExecutorRegistry::builtin();
    let templates = registry.get_flattened_executor_template();
    assert_eq!(templates.len(), 4);

    let trino = templates
        .iter()
        .find(|t| t.language == "trino")
        .expect("trino template");
    let base_url = trino
        .template
        .iter()
        .find(|f| f.name == "base_url")
        .expect("base_url field");
    assert!(base_url.required);
    assert_eq!(base_url.field_type, FieldType::String);

    let password = trino.template.iter().find(|f| f.name == "password").unwrap();
    assert_eq!(password.field_type, FieldType::Password);
    assert!(!password.required);

    let json = serde_json::to_value(&templates)?;
    let script = json
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["language"] == "script")
        .unwrap();
    assert_eq!(script["template"][0]["name"], "max_rows");
    assert_eq!(script["template"][0]["field_type"], "integer");
    assert_eq!(script["template"][0]["default"], 10000);
    Ok(())
}

#[test]
fn validate_params_fills_defaults() -> TestResult {
    let registry = ExecutorRegistry::builtin();
    let spec = registry.get_executor_class("trino", "trino")?;
    let resolved = spec.validate_params(&ExecutorParams::new().with("base_url", "http://coord:8080"))?;
    assert_eq!(resolved.get_str("user"), Some("querydrive"));
    assert_eq!(resolved.get_str("request_timeout"), Some("30s"));
    Ok(())
}

#[test]
fn validate_params_rejects_missing_unknown_and_mistyped() -> TestResult {
    let registry = ExecutorRegistry::builtin();
    let trino = registry.get_executor_class("trino", "trino")?;

    let missing = trino.validate_params(&ExecutorParams::new()).unwrap_err();
    assert!(missing.to_string().contains("base_url"));

    let unknown = trino
        .validate_params(
            &ExecutorParams::new()
                .with("base_url", "http://x")
                .with("warehouse", "w"),
        )
        .unwrap_err();
    assert!(unknown.to_string().contains("warehouse"));

    let script = registry.get_executor_class("script", "inline")?;
    let mistyped = script
        .validate_params(&ExecutorParams::new().with("max_rows", "ten"))
        .unwrap_err();
    assert!(matches!(mistyped, QueryDriveError::ConfigError(_)));
    Ok(())
}

#[test]
fn create_client_validates_before_constructing() {
    let registry = ExecutorRegistry::builtin();
    let shell = registry.get_executor_class("shell", "command").unwrap();
    let err = shell
        .create_client(&ExecutorParams::new().with("output_format", "xml"))
        .err()
        .expect("invalid format is rejected");
    assert!(err.is_configuration());
}

#[test]
fn redact_masks_password_fields() -> TestResult {
    let registry = ExecutorRegistry::builtin();
    let spec = registry.get_executor_class("presto", "presto")?;
    let params = ExecutorParams::new()
        .with("base_url", "http://coord")
        .with("password", "hunter2");
    let redacted = spec.redact(&params);
    assert_eq!(redacted.get_str("password"), Some("********"));
    assert_eq!(redacted.get_str("base_url"), Some("http://coord"));
    Ok(())
}

#[test]
fn custom_specs_can_be_registered_once() {
    let mut registry = ExecutorRegistry::empty();
    registry
        .register(fake_executor_spec("fake", "fake", FakeClient::new()))
        .unwrap();
    let dup = registry.register(fake_executor_spec("fake", "fake", FakeClient::new()));
    assert!(dup.is_err());
    assert_eq!(registry.iter().count(), 1);
}

#[test]
fn merged_params_prefer_overrides() {
    let base = ExecutorParams::new().with("a", 1).with("b", "x");
    let merged = base.merged_with(&ExecutorParams::new().with("b", json!("y")));
    assert_eq!(merged.get_u64("a"), Some(1));
    assert_eq!(merged.get_str("b"), Some("y"));
}
