//! JSON Schema derivation for structured completion.
//!
//! Schemas are derived from the Rust data model with `schemars`, normalized
//! into the shape strict backends expect (`$defs`, explicit open objects), and
//! checked against [`SchemaRules`] before anything is sent over the wire. The
//! only way to obtain a [`ValidatedSchema`] is through [`validate`], and the
//! gateway only accepts that type.

mod rules;

pub use rules::{SchemaRules, DEFAULT_MAX_DEPTH};

use std::sync::Arc;

use jsonschema::JSONSchema;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::{Map, Value};

use crate::core::TaskGraphSnapshot;
use crate::error::{Error, Result};
use crate::plog_debug;
use rules::{is_bare_object, split_string_enum, string_choices, MAP_KEYWORDS, SCHEMA_KEYWORDS};

/// Name under which the task graph schema is submitted.
pub const TASK_GRAPH_SCHEMA_NAME: &str = "task_graph";

/// Derive a normalized schema for `T`.
pub fn derive_schema<T: JsonSchema>() -> Result<Value> {
    let generator = SchemaSettings::draft2019_09().into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(&root)?;
    normalize(&mut value);
    Ok(value)
}

/// Rewrite a schema into the form strict backends accept.
///
/// - drops the `$schema` meta key
/// - moves `definitions` under `$defs` and rewrites `#/definitions/` refs
/// - gives every bare object schema (`type: object` with nothing describing
///   its members) an explicit `additionalProperties: true`
/// - folds a `oneOf` of single-string branches into one string `enum`
///
/// Nothing is removed from the schema's constraints; per-branch descriptions
/// of a folded enum are dropped.
pub fn normalize(schema: &mut Value) {
    if let Value::Object(root) = schema {
        root.remove("$schema");
        if let Some(Value::Object(legacy)) = root.remove("definitions") {
            let defs = root
                .entry("$defs")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(defs) = defs {
                for (name, def) in legacy {
                    defs.entry(name).or_insert(def);
                }
            }
        }
        if let Some(Value::Object(defs)) = root.get_mut("$defs") {
            for def in defs.values_mut() {
                normalize_node(def);
            }
        }
    }
    normalize_node(schema);
}

fn normalize_node(node: &mut Value) {
    let Value::Object(map) = node else {
        return;
    };

    if let Some(Value::String(reference)) = map.get_mut("$ref") {
        if let Some(name) = reference.strip_prefix("#/definitions/") {
            *reference = format!("#/$defs/{}", name);
        }
    }

    if is_bare_object(map) {
        map.insert("additionalProperties".to_string(), Value::Bool(true));
    }

    if let Some(key) = split_string_enum(map) {
        if let Some(values) = map.remove(key).and_then(|branches| string_choices(Some(&branches))) {
            map.insert("type".to_string(), Value::String("string".to_string()));
            map.insert("enum".to_string(), Value::Array(values));
        }
    }

    for key in MAP_KEYWORDS {
        if let Some(Value::Object(children)) = map.get_mut(*key) {
            for child in children.values_mut() {
                normalize_node(child);
            }
        }
    }
    for key in SCHEMA_KEYWORDS {
        match map.get_mut(*key) {
            Some(Value::Array(items)) => items.iter_mut().for_each(normalize_node),
            Some(child) => normalize_node(child),
            None => {}
        }
    }
}

/// A schema that passed [`SchemaRules`] and is ready for submission.
#[derive(Clone)]
pub struct ValidatedSchema {
    name: String,
    schema: Arc<Value>,
    compiled: Arc<JSONSchema>,
}

impl ValidatedSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// Re-check a backend response locally.
    ///
    /// Returns one message per violation, each prefixed with the instance
    /// pointer.
    pub fn check_instance(&self, instance: &Value) -> std::result::Result<(), Vec<String>> {
        self.compiled.validate(instance).map_err(|errors| {
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        format!("/: {}", e)
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for ValidatedSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Check `schema` against `rules` and compile it for local re-validation.
///
/// The schema is taken as-is: callers that want bare objects opened up must
/// run [`normalize`] first. Fields are never stripped to make a schema pass.
pub fn validate(name: &str, schema: Value, rules: &SchemaRules) -> Result<ValidatedSchema> {
    rules.check(&schema)?;
    let compiled = JSONSchema::compile(&schema).map_err(|e| Error::SchemaConfig {
        pointer: e.schema_path.to_string(),
        reason: format!("schema does not compile: {}", e),
    })?;
    plog_debug!("Schema {} validated", name);
    Ok(ValidatedSchema {
        name: name.to_string(),
        schema: Arc::new(schema),
        compiled: Arc::new(compiled),
    })
}

/// The task graph schema, derived, normalized, and validated.
pub fn task_graph_schema(rules: &SchemaRules) -> Result<ValidatedSchema> {
    validate(
        TASK_GRAPH_SCHEMA_NAME,
        derive_schema::<TaskGraphSnapshot>()?,
        rules,
    )
}
