//! JSON schema generation for structured model output.
//!
//! `schemars` output uses `$ref`/`definitions`, `allOf` wrappers for
//! documented fields, and a few keywords providers reject. Both providers
//! want a single fully inlined schema, with different dialect rules on top.

use schemars::{JsonSchema, schema_for};
use serde_json::{Map, Value};

/// Keywords neither provider accepts in a response schema
const UNSUPPORTED_KEYWORDS: &[&str] = &["$schema", "title", "default", "format", "definitions"];

/// Schema for OpenAI strict `json_schema` output.
///
/// Every object gets `additionalProperties: false` and lists all of its
/// properties as required.
pub fn openai_schema<T: JsonSchema>() -> Value {
    let mut value = inlined_schema::<T>();
    visit_schemas(&mut value, &mut |map| {
        if map.get("type").and_then(Value::as_str) == Some("object") {
            map.insert("additionalProperties".to_string(), Value::Bool(false));
            if let Some(Value::Object(props)) = map.get("properties") {
                let required = props.keys().cloned().map(Value::String).collect();
                map.insert("required".to_string(), Value::Array(required));
            }
        }
    });
    value
}

/// Schema in the OpenAPI subset accepted by Gemini `responseSchema`.
///
/// Types are upper-case enum names and `["T", "null"]` becomes
/// `nullable: true`.
pub fn gemini_schema<T: JsonSchema>() -> Value {
    let mut value = inlined_schema::<T>();
    visit_schemas(&mut value, &mut |map| {
        map.remove("additionalProperties");

        let (kind, nullable) = match map.get("type") {
            Some(Value::String(kind)) => (Some(kind.clone()), false),
            Some(Value::Array(kinds)) => {
                let nullable = kinds.iter().any(|k| k == "null");
                let kind = kinds
                    .iter()
                    .filter_map(Value::as_str)
                    .find(|k| *k != "null")
                    .map(str::to_string);
                (kind, nullable)
            }
            _ => (None, false),
        };

        if let Some(kind) = kind {
            map.insert("type".to_string(), Value::String(kind.to_uppercase()));
        }
        if nullable {
            map.insert("nullable".to_string(), Value::Bool(true));
        }
    });
    value
}

/// Root schema with refs inlined, single-entry `allOf` flattened and
/// unsupported keywords removed
fn inlined_schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schema_for!(T)).unwrap_or_default();

    let definitions = value
        .get("definitions")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    inline_refs(&mut value, &definitions);

    visit_schemas(&mut value, &mut |map| {
        flatten_all_of(map);
        for keyword in UNSUPPORTED_KEYWORDS {
            map.remove(*keyword);
        }
    });
    value
}

/// Replace every `{"$ref": "#/definitions/X"}` with a copy of X
fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let target = match map.get("$ref") {
                Some(Value::String(path)) => path
                    .strip_prefix("#/definitions/")
                    .and_then(|name| definitions.get(name))
                    .cloned(),
                _ => None,
            };
            if let Some(mut inlined) = target {
                // Keep sibling keywords such as a field description.
                if let Value::Object(target) = &mut inlined {
                    for (key, sibling) in map.iter() {
                        if key != "$ref" {
                            target.insert(key.clone(), sibling.clone());
                        }
                    }
                }
                *value = inlined;
                inline_refs(value, definitions);
                return;
            }
            for (_, nested) in map.iter_mut() {
                inline_refs(nested, definitions);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

/// Merge `{"description": d, "allOf": [S]}` into S plus the description
fn flatten_all_of(map: &mut Map<String, Value>) {
    let single = match map.get("allOf") {
        Some(Value::Array(items)) if items.len() == 1 => items[0].clone(),
        _ => return,
    };
    let Value::Object(inner) = single else {
        return;
    };

    map.remove("allOf");
    for (key, value) in inner {
        map.entry(key).or_insert(value);
    }
}

/// Apply `f` to every schema node, recursing through schema-valued keywords
/// only, so property names are never mistaken for keywords.
fn visit_schemas(value: &mut Value, f: &mut impl FnMut(&mut Map<String, Value>)) {
    let Value::Object(map) = value else {
        return;
    };
    f(map);

    if let Some(Value::Object(props)) = map.get_mut("properties") {
        for (_, schema) in props.iter_mut() {
            visit_schemas(schema, f);
        }
    }
    if let Some(items) = map.get_mut("items") {
        match items {
            Value::Array(list) => list.iter_mut().for_each(|s| visit_schemas(s, f)),
            schema => visit_schemas(schema, f),
        }
    }
    for keyword in ["allOf", "anyOf", "oneOf"] {
        if let Some(Value::Array(list)) = map.get_mut(keyword) {
            for schema in list.iter_mut() {
                visit_schemas(schema, f);
            }
        }
    }
    if let Some(Value::Object(defs)) = map.get_mut("definitions") {
        for (_, schema) in defs.iter_mut() {
            visit_schemas(schema, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParserResultScore, Prescription};

    fn contains_key(value: &Value, needle: &str) -> bool {
        match value {
            Value::Object(map) => map
                .iter()
                .any(|(k, v)| k == needle || contains_key(v, needle)),
            Value::Array(items) => items.iter().any(|v| contains_key(v, needle)),
            _ => false,
        }
    }

    #[test]
    fn test_openai_schema_is_strict_and_inlined() {
        let schema = openai_schema::<Prescription>();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert!(!contains_key(&schema, "$ref"));
        assert!(!contains_key(&schema, "definitions"));
        assert!(!contains_key(&schema, "allOf"));
        assert!(!contains_key(&schema, "default"));

        let required = schema["required"].as_array().unwrap();
        let props = schema["properties"].as_object().unwrap();
        assert_eq!(required.len(), props.len());
        assert!(required.iter().any(|r| r == "prescriber_signature"));

        let patient = &schema["properties"]["patient"];
        assert_eq!(patient["type"], "object");
        assert_eq!(patient["additionalProperties"], false);
        assert!(patient["description"].as_str().is_some());

        let medication = &schema["properties"]["medications"]["items"];
        assert_eq!(medication["additionalProperties"], false);
        assert!(medication["properties"]["drug_name"].is_object());
    }

    #[test]
    fn test_insurance_type_property_survives() {
        let schema = openai_schema::<Prescription>();
        let insurance = &schema["properties"]["patient"]["properties"]["insurance"]["items"];
        assert_eq!(insurance["properties"]["type"]["type"], "string");
        assert!(
            insurance["required"]
                .as_array()
                .unwrap()
                .iter()
                .any(|r| r == "type")
        );
    }

    #[test]
    fn test_gemini_schema_dialect() {
        let schema = gemini_schema::<ParserResultScore>();

        assert_eq!(schema["type"], "OBJECT");
        assert!(!contains_key(&schema, "additionalProperties"));
        assert!(!contains_key(&schema, "$schema"));

        let field = &schema["properties"]["field_scores"]["items"];
        assert_eq!(field["type"], "OBJECT");
        assert_eq!(field["properties"]["score"]["type"], "NUMBER");
        assert_eq!(field["properties"]["expected_value"]["type"], "STRING");
        assert_eq!(field["properties"]["expected_value"]["nullable"], true);
    }
}
