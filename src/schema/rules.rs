//! Local checks mirroring what strict structured-output backends accept.
//!
//! A schema that would be refused remotely is refused here first, with a JSON
//! pointer to the offending subschema, instead of surfacing as an opaque
//! HTTP 400 after a network round trip.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Keywords whose value is a map of name -> subschema.
pub(crate) const MAP_KEYWORDS: &[&str] = &["properties", "patternProperties"];

/// Keywords whose value is a subschema or a list of subschemas.
pub(crate) const SCHEMA_KEYWORDS: &[&str] = &[
    "additionalProperties",
    "items",
    "prefixItems",
    "anyOf",
    "oneOf",
    "allOf",
    "not",
    "if",
    "then",
    "else",
    "contains",
];

/// Keywords that give a subschema a shape, directly or by composition.
const SHAPE_KEYWORDS: &[&str] = &["type", "$ref", "anyOf", "oneOf", "allOf", "enum", "const"];

pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Backend restrictions enforced before a schema is handed to a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRules {
    /// Object schemas must say what their members are: `properties`, a
    /// composition keyword, a `$ref`, or an explicit `additionalProperties`.
    pub require_object_shape: bool,
    /// Every subschema must carry a type, a `$ref`, a composition, or an enum.
    pub require_typed: bool,
    /// `enum` must be a non-empty list of strings.
    pub string_enums_only: bool,
    /// Deepest allowed subschema nesting, counted from the root.
    pub max_depth: usize,
}

impl Default for SchemaRules {
    fn default() -> Self {
        Self::strict()
    }
}

impl SchemaRules {
    /// Restrictions of a strict json_schema response-format backend.
    pub fn strict() -> Self {
        Self {
            require_object_shape: true,
            require_typed: true,
            string_enums_only: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Check `schema` against these rules.
    ///
    /// Root must be an object schema with `properties`; every `$ref` must be
    /// local to `#/$defs/` and resolve; every `required` name must be a
    /// declared property.
    pub fn check(&self, schema: &Value) -> Result<()> {
        let root = schema
            .as_object()
            .ok_or_else(|| reject("", "root schema must be a JSON object"))?;
        if !is_object_type(root) || !root.contains_key("properties") {
            return Err(reject("", "root schema must be an object with properties"));
        }
        if root.contains_key("definitions") {
            return Err(reject(
                "/definitions",
                "definitions must live under $defs",
            ));
        }

        let defs = match root.get("$defs") {
            None => None,
            Some(Value::Object(defs)) => Some(defs),
            Some(_) => return Err(reject("/$defs", "$defs must be an object")),
        };

        let walker = Walker { rules: self, defs };
        walker.walk(schema, "", 0)?;
        if let Some(defs) = defs {
            for (name, def) in defs {
                walker.walk(def, &format!("/$defs/{}", escape(name)), 1)?;
            }
        }
        Ok(())
    }
}

struct Walker<'a> {
    rules: &'a SchemaRules,
    defs: Option<&'a Map<String, Value>>,
}

impl Walker<'_> {
    fn walk(&self, node: &Value, pointer: &str, depth: usize) -> Result<()> {
        if depth > self.rules.max_depth {
            return Err(reject(
                pointer,
                &format!("nesting deeper than {} levels", self.rules.max_depth),
            ));
        }

        let map = match node {
            Value::Object(map) => map,
            Value::Bool(_) => return Err(reject(pointer, "boolean schemas are not supported")),
            _ => return Err(reject(pointer, "subschema must be a JSON object")),
        };

        if self.rules.require_typed && !SHAPE_KEYWORDS.iter().any(|k| map.contains_key(*k)) {
            return Err(reject(pointer, "schema has no type"));
        }

        if self.rules.require_object_shape && is_bare_object(map) {
            return Err(reject(
                pointer,
                "object schema has no properties, anyOf, or additionalProperties",
            ));
        }

        if let Some(reference) = map.get("$ref") {
            self.check_ref(reference, pointer)?;
        }

        if let Some(values) = map.get("enum") {
            self.check_enum(values, pointer)?;
        }

        if self.rules.string_enums_only {
            if let Some(key) = split_string_enum(map) {
                return Err(reject(
                    &format!("{}/{}", pointer, key),
                    "string choices must be a single enum",
                ));
            }
        }

        if let Some(required) = map.get("required") {
            check_required(map, required, pointer)?;
        }

        for key in MAP_KEYWORDS {
            if let Some(children) = map.get(*key) {
                let children = children.as_object().ok_or_else(|| {
                    reject(&format!("{}/{}", pointer, key), "must be an object")
                })?;
                for (name, child) in children {
                    self.walk(child, &format!("{}/{}/{}", pointer, key, escape(name)), depth + 1)?;
                }
            }
        }

        for key in SCHEMA_KEYWORDS {
            let child_pointer = format!("{}/{}", pointer, key);
            match map.get(*key) {
                None => {}
                // Explicit open/closed members are fine.
                Some(Value::Bool(_)) if *key == "additionalProperties" => {}
                Some(Value::Array(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        self.walk(item, &format!("{}/{}", child_pointer, i), depth + 1)?;
                    }
                }
                Some(child) => self.walk(child, &child_pointer, depth + 1)?,
            }
        }
        Ok(())
    }

    fn check_ref(&self, reference: &Value, pointer: &str) -> Result<()> {
        let here = format!("{}/$ref", pointer);
        let target = reference
            .as_str()
            .ok_or_else(|| reject(&here, "$ref must be a string"))?;
        let name = target
            .strip_prefix("#/$defs/")
            .ok_or_else(|| reject(&here, &format!("non-local reference {}", target)))?;
        let resolves = self
            .defs
            .map(|defs| defs.contains_key(&unescape(name)))
            .unwrap_or(false);
        if resolves {
            Ok(())
        } else {
            Err(reject(&here, &format!("unresolved reference {}", target)))
        }
    }

    fn check_enum(&self, values: &Value, pointer: &str) -> Result<()> {
        let here = format!("{}/enum", pointer);
        let values = values
            .as_array()
            .ok_or_else(|| reject(&here, "enum must be an array"))?;
        if values.is_empty() {
            return Err(reject(&here, "enum must not be empty"));
        }
        if self.rules.string_enums_only && !values.iter().all(Value::is_string) {
            return Err(reject(&here, "enum values must all be strings"));
        }
        Ok(())
    }
}

fn check_required(map: &Map<String, Value>, required: &Value, pointer: &str) -> Result<()> {
    let here = format!("{}/required", pointer);
    let names = required
        .as_array()
        .ok_or_else(|| reject(&here, "required must be an array"))?;
    let properties = map.get("properties").and_then(Value::as_object);
    for name in names {
        let name = name
            .as_str()
            .ok_or_else(|| reject(&here, "required entries must be strings"))?;
        if !properties.map(|p| p.contains_key(name)).unwrap_or(false) {
            return Err(reject(
                &here,
                &format!("required property {} is not declared", name),
            ));
        }
    }
    Ok(())
}

/// `type` is `"object"` or a list containing it.
pub(crate) fn is_object_type(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => false,
    }
}

/// An object schema that says nothing about its members.
pub(crate) fn is_bare_object(map: &Map<String, Value>) -> bool {
    is_object_type(map)
        && ![
            "properties",
            "patternProperties",
            "additionalProperties",
            "anyOf",
            "oneOf",
            "allOf",
            "$ref",
        ]
        .iter()
        .any(|k| map.contains_key(*k))
}

/// The composition keyword whose branches each allow exactly one string.
///
/// schemars renders a unit enum with documented variants this way; strict
/// backends only take the flat `{"type": "string", "enum": [...]}` form.
pub(crate) fn split_string_enum(map: &Map<String, Value>) -> Option<&'static str> {
    ["oneOf", "anyOf"].into_iter().find(|key| {
        string_choices(map.get(*key))
            .map(|values| !values.is_empty())
            .unwrap_or(false)
    })
}

/// Values of a `oneOf`/`anyOf` list made only of single-string branches.
pub(crate) fn string_choices(branches: Option<&Value>) -> Option<Vec<Value>> {
    branches?.as_array()?.iter().map(single_string).collect()
}

fn single_string(branch: &Value) -> Option<Value> {
    let map = branch.as_object()?;
    if map.get("type").and_then(Value::as_str) != Some("string") {
        return None;
    }
    if map
        .keys()
        .any(|k| !matches!(k.as_str(), "type" | "enum" | "const" | "description" | "title"))
    {
        return None;
    }
    match (map.get("enum"), map.get("const")) {
        (Some(Value::Array(values)), None) if values.len() == 1 && values[0].is_string() => {
            Some(values[0].clone())
        }
        (None, Some(value)) if value.is_string() => Some(value.clone()),
        _ => None,
    }
}

fn reject(pointer: &str, reason: &str) -> Error {
    Error::SchemaConfig {
        pointer: if pointer.is_empty() {
            "/".to_string()
        } else {
            pointer.to_string()
        },
        reason: reason.to_string(),
    }
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}
