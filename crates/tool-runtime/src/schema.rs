//! Tool input schemas: structural validation and model-facing export.
//!
//! Schemas are generated from the tool's input type with `schemars` and may
//! contain `#/definitions/...` references. Validation walks the schema and
//! collects every violation instead of stopping at the first one. Export
//! produces a self-contained copy with all references inlined.

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::{json, Map, Value};
use std::fmt;

/// Guards against self-referential definitions.
const MAX_REF_DEPTH: usize = 32;

/// One failed constraint, located by a dot-joined path (empty = root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn root(message: impl Into<String>) -> Self {
        Self::at("", message)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "(root)" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

/// `path: message` entries joined by `"; "`.
pub fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaExportError {
    #[error("tool '{tool}': root schema must be an object, found {found}")]
    NotAnObject { tool: String, found: String },
    #[error("tool '{tool}': root schema declares no properties")]
    NoProperties { tool: String },
    #[error("tool '{tool}': unresolved schema reference {reference}")]
    UnresolvedReference { tool: String, reference: String },
    #[error("tool '{tool}': schema references nest deeper than {depth}")]
    TooDeep { tool: String, depth: usize },
}

/// A tool's native input schema.
#[derive(Debug, Clone)]
pub struct InputSchema {
    root: Value,
}

impl InputSchema {
    /// Schema for `T`. Optional fields are emitted without a `null` type.
    pub fn of<T: JsonSchema>() -> Self {
        let settings = SchemaSettings::draft07().with(|s| {
            s.option_nullable = false;
            s.option_add_null_type = false;
            s.inline_subschemas = true;
        });
        let root = settings.into_generator().into_root_schema_for::<T>();
        Self {
            root: serde_json::to_value(root).unwrap_or_else(|_| json!({})),
        }
    }

    /// Wrap a hand-written JSON schema.
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Self-contained schema for the model: references inlined, generator
    /// metadata stripped, root checked to be an object with properties.
    pub fn export(&self, tool: &str) -> Result<Value, SchemaExportError> {
        let empty = Map::new();
        let defs = definitions(&self.root).unwrap_or(&empty);
        let mut exported = inline_refs(&self.root, defs, 0, tool)?;

        if let Value::Object(map) = &mut exported {
            for key in ["$schema", "definitions", "$defs", "title"] {
                map.remove(key);
            }
        }

        match exported.get("type").and_then(Value::as_str) {
            Some("object") => {}
            other => {
                return Err(SchemaExportError::NotAnObject {
                    tool: tool.to_string(),
                    found: other.unwrap_or("untyped").to_string(),
                })
            }
        }

        let has_properties = exported
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|props| !props.is_empty());
        if !has_properties {
            return Err(SchemaExportError::NoProperties {
                tool: tool.to_string(),
            });
        }

        Ok(exported)
    }

    /// Every structural violation of `value` against this schema.
    pub fn validate(&self, value: &Value) -> Vec<Violation> {
        let validator = Validator {
            defs: definitions(&self.root),
        };
        let mut path = Vec::new();
        let mut out = Vec::new();
        validator.check(&self.root, value, &mut path, &mut out, 0);
        out
    }
}

fn definitions(root: &Value) -> Option<&Map<String, Value>> {
    root.get("definitions")
        .or_else(|| root.get("$defs"))
        .and_then(Value::as_object)
}

fn ref_name(reference: &str) -> Option<&str> {
    reference
        .strip_prefix("#/definitions/")
        .or_else(|| reference.strip_prefix("#/$defs/"))
}

fn inline_refs(
    node: &Value,
    defs: &Map<String, Value>,
    depth: usize,
    tool: &str,
) -> Result<Value, SchemaExportError> {
    match node {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                if depth >= MAX_REF_DEPTH {
                    return Err(SchemaExportError::TooDeep {
                        tool: tool.to_string(),
                        depth: MAX_REF_DEPTH,
                    });
                }
                let target = ref_name(reference)
                    .and_then(|name| defs.get(name))
                    .ok_or_else(|| SchemaExportError::UnresolvedReference {
                        tool: tool.to_string(),
                        reference: reference.to_string(),
                    })?;
                let mut resolved = inline_refs(target, defs, depth + 1, tool)?;
                // Sibling keywords (usually `description`) override the target's.
                if let Value::Object(resolved_map) = &mut resolved {
                    for (key, value) in map.iter().filter(|(k, _)| k.as_str() != "$ref") {
                        resolved_map.insert(key.clone(), inline_refs(value, defs, depth, tool)?);
                    }
                }
                return Ok(resolved);
            }

            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                if key == "definitions" || key == "$defs" {
                    continue;
                }
                out.insert(key.clone(), inline_refs(value, defs, depth, tool)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| inline_refs(item, defs, depth, tool))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

struct Validator<'a> {
    defs: Option<&'a Map<String, Value>>,
}

impl Validator<'_> {
    fn check(
        &self,
        schema: &Value,
        value: &Value,
        path: &mut Vec<String>,
        out: &mut Vec<Violation>,
        depth: usize,
    ) {
        let obj = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                out.push(Violation::at(path.join("."), "is not allowed"));
                return;
            }
            Value::Object(obj) => obj,
            _ => return,
        };
        if depth > MAX_REF_DEPTH {
            return;
        }

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            match ref_name(reference).and_then(|name| self.defs?.get(name)) {
                Some(target) => self.check(target, value, path, out, depth + 1),
                None => out.push(Violation::at(
                    path.join("."),
                    format!("unresolvable schema reference {reference}"),
                )),
            }
            return;
        }

        if let Some(all) = obj.get("allOf").and_then(Value::as_array) {
            for sub in all {
                self.check(sub, value, path, out, depth + 1);
            }
        }
        for key in ["anyOf", "oneOf"] {
            if let Some(branches) = obj.get(key).and_then(Value::as_array) {
                self.check_union(branches, value, path, out, depth);
            }
        }

        if let Some(expected) = obj.get("type") {
            if !type_matches(expected, value) {
                out.push(Violation::at(
                    path.join("."),
                    format!(
                        "expected {}, received {}",
                        describe_type(expected),
                        json_type_name(value)
                    ),
                ));
                return;
            }
        }

        if let Some(allowed) = obj.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
                out.push(Violation::at(
                    path.join("."),
                    format!("must be one of {}", options.join(", ")),
                ));
            }
        }
        if let Some(constant) = obj.get("const") {
            if constant != value {
                out.push(Violation::at(path.join("."), format!("must equal {constant}")));
            }
        }

        match value {
            Value::String(s) => self.check_string(obj, s, path, out),
            Value::Number(n) => check_number(obj, n, path, out),
            Value::Array(items) => self.check_array(obj, items, path, out, depth),
            Value::Object(map) => self.check_object(obj, map, path, out, depth),
            _ => {}
        }
    }

    fn check_union(
        &self,
        branches: &[Value],
        value: &Value,
        path: &mut Vec<String>,
        out: &mut Vec<Violation>,
        depth: usize,
    ) {
        let mut attempts = Vec::with_capacity(branches.len());
        for branch in branches {
            let mut violations = Vec::new();
            self.check(branch, value, path, &mut violations, depth + 1);
            if violations.is_empty() {
                return;
            }
            attempts.push((branch, violations));
        }

        // A tagged variant whose discriminator matches explains the failure best.
        if let Value::Object(map) = value {
            if let Some((_, violations)) = attempts
                .iter()
                .find(|(branch, _)| discriminator_matches(branch, map))
            {
                out.extend(violations.iter().cloned());
                return;
            }
        }

        out.push(Violation::at(
            path.join("."),
            "does not match any allowed variant",
        ));
    }

    fn check_string(
        &self,
        obj: &Map<String, Value>,
        s: &str,
        path: &[String],
        out: &mut Vec<Violation>,
    ) {
        let len = s.chars().count() as u64;
        if let Some(min) = obj.get("minLength").and_then(Value::as_u64) {
            if len < min {
                out.push(Violation::at(
                    path.join("."),
                    format!("must contain at least {min} character(s)"),
                ));
            }
        }
        if let Some(max) = obj.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                out.push(Violation::at(
                    path.join("."),
                    format!("must contain at most {max} character(s)"),
                ));
            }
        }
        match obj.get("format").and_then(Value::as_str) {
            Some("email") if !is_email(s) => {
                out.push(Violation::at(path.join("."), "invalid email address"));
            }
            Some("uri") | Some("url") if url::Url::parse(s).is_err() => {
                out.push(Violation::at(path.join("."), "invalid url"));
            }
            _ => {}
        }
        if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
            if let Ok(re) = regex::Regex::new(pattern) {
                if !re.is_match(s) {
                    out.push(Violation::at(
                        path.join("."),
                        format!("does not match pattern {pattern}"),
                    ));
                }
            }
        }
    }

    fn check_array(
        &self,
        obj: &Map<String, Value>,
        items: &[Value],
        path: &mut Vec<String>,
        out: &mut Vec<Violation>,
        depth: usize,
    ) {
        if let Some(min) = obj.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                out.push(Violation::at(
                    path.join("."),
                    format!("must contain at least {min} item(s)"),
                ));
            }
        }
        if let Some(max) = obj.get("maxItems").and_then(Value::as_u64) {
            if items.len() as u64 > max {
                out.push(Violation::at(
                    path.join("."),
                    format!("must contain at most {max} item(s)"),
                ));
            }
        }
        if let Some(item_schema) = obj.get("items").filter(|s| !s.is_array()) {
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                self.check(item_schema, item, path, out, depth + 1);
                path.pop();
            }
        }
    }

    fn check_object(
        &self,
        obj: &Map<String, Value>,
        map: &Map<String, Value>,
        path: &mut Vec<String>,
        out: &mut Vec<Violation>,
        depth: usize,
    ) {
        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        for name in &required {
            if map.get(*name).map_or(true, Value::is_null) {
                path.push((*name).to_string());
                out.push(Violation::at(path.join("."), "is required"));
                path.pop();
            }
        }

        let properties = obj.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (name, prop_schema) in properties {
                let Some(prop_value) = map.get(name) else {
                    continue;
                };
                // Explicit null on an optional field means "absent".
                if prop_value.is_null() {
                    continue;
                }
                path.push(name.clone());
                self.check(prop_schema, prop_value, path, out, depth + 1);
                path.pop();
            }
        }

        if let Some(additional) = obj.get("additionalProperties") {
            for (key, extra) in map {
                if properties.is_some_and(|p| p.contains_key(key)) {
                    continue;
                }
                path.push(key.clone());
                match additional {
                    Value::Bool(false) => out.push(Violation::at(path.join("."), "is not allowed")),
                    schema @ Value::Object(_) => self.check(schema, extra, path, out, depth + 1),
                    _ => {}
                }
                path.pop();
            }
        }
    }
}

fn check_number(
    obj: &Map<String, Value>,
    number: &serde_json::Number,
    path: &[String],
    out: &mut Vec<Violation>,
) {
    let n = number.as_f64().unwrap_or_default();
    if let Some(min) = obj.get("minimum").and_then(Value::as_f64) {
        if n < min {
            out.push(Violation::at(path.join("."), format!("must be >= {min}")));
        }
    }
    if let Some(max) = obj.get("maximum").and_then(Value::as_f64) {
        if n > max {
            out.push(Violation::at(path.join("."), format!("must be <= {max}")));
        }
    }
    if let Some((format, (lo, hi))) = obj
        .get("format")
        .and_then(Value::as_str)
        .and_then(|f| integer_range(f).map(|range| (f, range)))
    {
        let in_range = match (number.as_i64(), number.as_u64()) {
            (Some(i), _) => (lo..=hi).contains(&i128::from(i)),
            (None, Some(u)) => (lo..=hi).contains(&i128::from(u)),
            _ => true,
        };
        if !in_range {
            out.push(Violation::at(
                path.join("."),
                format!("must be between {lo} and {hi}"),
            ));
        }
    }
}

/// Bounds for the integer formats schemars emits for Rust integer types.
fn integer_range(format: &str) -> Option<(i128, i128)> {
    let range = match format {
        "uint8" => (0, i128::from(u8::MAX)),
        "uint16" => (0, i128::from(u16::MAX)),
        "uint32" => (0, i128::from(u32::MAX)),
        "uint64" | "uint" => (0, i128::from(u64::MAX)),
        "int8" => (i128::from(i8::MIN), i128::from(i8::MAX)),
        "int16" => (i128::from(i16::MIN), i128::from(i16::MAX)),
        "int32" => (i128::from(i32::MIN), i128::from(i32::MAX)),
        "int64" | "int" => (i128::from(i64::MIN), i128::from(i64::MAX)),
        _ => return None,
    };
    Some(range)
}

fn discriminator_matches(branch: &Value, map: &Map<String, Value>) -> bool {
    let Some(properties) = branch.get("properties").and_then(Value::as_object) else {
        return false;
    };
    properties.iter().any(|(name, schema)| {
        let tag = schema.get("const").or_else(|| {
            schema
                .get("enum")
                .and_then(Value::as_array)
                .filter(|values| values.len() == 1)
                .and_then(|values| values.first())
        });
        matches!((tag, map.get(name)), (Some(tag), Some(actual)) if tag == actual)
    })
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => single_type_matches(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| single_type_matches(t, value)),
        _ => true,
    }
}

fn single_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Loose address check: one `@`, non-empty local part, dotted domain, no spaces.
pub fn is_email(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return false;
    }
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
