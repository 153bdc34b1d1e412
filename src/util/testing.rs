use std::env;
use std::sync::Once;

use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::domain::{CapabilityDescriptor, CapabilityKind, Catalog, VariableHandling};

static TEST_SETUP: Once = Once::new();

pub fn init_test_setup() {
    TEST_SETUP.call_once(|| {
        // global logging subscriber, used by all tracing log macros
        setup_test_logging();
        info!("Test Setup complete");
    });
}

fn setup_test_logging() {
    debug!("INIT: Attempting logger init from testing.rs");

    // Create a filter for noisy modules
    let noisy_modules = ["jsonschema"];
    let module_filter = filter_fn(move |metadata| {
        !noisy_modules
            .iter()
            .any(|name| metadata.target().starts_with(name))
    });

    let env_filter = env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("debug"));

    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .with_filter(module_filter)
            .with_filter(env_filter),
    );

    // Only set if we haven't already set a global subscriber
    if tracing::dispatcher::has_been_set() {
        debug!("Tracing subscriber already set");
    } else {
        subscriber.try_init().unwrap_or_else(|e| {
            eprintln!("Error: Failed to set up logging: {}", e);
        });
    }
}

/// Small catalog covering every variable-handling kind, for tests and demos.
pub fn sample_catalog() -> Catalog {
    let values = json!({ "type": "array", "items": { "type": "string" } });
    let match_operator = json!({ "enum": ["MATCHES_ONE_OF", "DOES_NOT_MATCH_ONE_OF"] });

    let criteria = [
        CapabilityDescriptor::new("path")
            .with_option_schema(json!({
                "type": "object",
                "properties": {
                    "values": values,
                    "matchOperator": match_operator,
                    "matchCaseSensitive": { "type": "boolean" }
                }
            }))
            .with_default("matchOperator", json!("MATCHES_ONE_OF"))
            .with_default("matchCaseSensitive", json!(false)),
        CapabilityDescriptor::new("hostname")
            .with_option_schema(json!({
                "type": "object",
                "properties": { "values": values, "matchOperator": match_operator }
            }))
            .with_default("matchOperator", json!("MATCHES_ONE_OF")),
        CapabilityDescriptor::new("matchVariable")
            .with_option_schema(json!({
                "type": "object",
                "properties": {
                    "variableName": { "type": "string" },
                    "variableValues": values
                }
            }))
            .with_variables(VariableHandling {
                names: vec!["variableName".into()],
                ..Default::default()
            }),
    ];

    let behaviors = [
        CapabilityDescriptor::new("caching")
            .with_option_schema(json!({
                "type": "object",
                "properties": {
                    "behavior": { "enum": ["MAX_AGE", "NO_STORE", "BYPASS_CACHE"] },
                    "ttl": { "type": "string" },
                    "mustRevalidate": { "type": "boolean" }
                }
            }))
            .with_default("behavior", json!("MAX_AGE"))
            .with_default("mustRevalidate", json!(false)),
        CapabilityDescriptor::new("origin")
            .with_option_schema(json!({
                "type": "object",
                "properties": {
                    "hostname": { "type": "string" },
                    "forwardHostHeader": { "enum": ["REQUEST_HOST_HEADER", "ORIGIN_HOSTNAME"] }
                }
            }))
            .with_default("forwardHostHeader", json!("REQUEST_HOST_HEADER"))
            .with_variables(VariableHandling {
                inline: vec!["hostname".into()],
                ..Default::default()
            }),
        CapabilityDescriptor::new("setVariable")
            .with_option_schema(json!({
                "type": "object",
                "properties": {
                    "variableName": { "type": "string" },
                    "value": { "type": "string" }
                }
            }))
            .with_variables(VariableHandling {
                inline: vec!["value".into()],
                names: vec!["variableName".into()],
                ..Default::default()
            }),
        CapabilityDescriptor::new("cacheId")
            .with_option_schema(json!({
                "type": "object",
                "properties": {
                    "rule": { "enum": ["INCLUDE_VARIABLE", "INCLUDE_HEADERS"] },
                    "variables": { "type": "array" }
                }
            }))
            .with_variables(VariableHandling {
                lists: vec!["variables".into()],
                ..Default::default()
            }),
    ];

    let mut catalog = Catalog::new();
    for descriptor in criteria {
        catalog
            .register(CapabilityKind::Criteria, descriptor)
            .expect("sample criteria descriptor");
    }
    for descriptor in behaviors {
        catalog
            .register(CapabilityKind::Behavior, descriptor)
            .expect("sample behavior descriptor");
    }
    catalog
}

// test
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_setup() {
        init_test_setup();
    }

    #[test]
    fn given_sample_catalog_then_all_descriptors_registered() {
        let catalog = sample_catalog();
        assert_eq!(catalog.descriptors(CapabilityKind::Criteria).count(), 3);
        assert_eq!(catalog.descriptors(CapabilityKind::Behavior).count(), 4);
    }
}
