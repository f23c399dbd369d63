//! Compiled JSON schema subset.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::{SchemaCompileError, SchemaValidator, SchemaValidatorError, SchemaValidatorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonType {
    Null,
    Boolean,
    Object,
    Array,
    Number,
    Integer,
    String,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "null" => JsonType::Null,
            "boolean" => JsonType::Boolean,
            "object" => JsonType::Object,
            "array" => JsonType::Array,
            "number" => JsonType::Number,
            "integer" => JsonType::Integer,
            "string" => JsonType::String,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::String => "string",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            JsonType::Null => value.is_null(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
            JsonType::Number => value.is_number(),
            JsonType::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
                _ => false,
            },
            JsonType::String => value.is_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Items {
    Single(Box<Node>),
    Tuple(Vec<Node>),
}

#[derive(Debug, Clone, Default)]
struct Rules {
    types: Option<Vec<JsonType>>,
    properties: BTreeMap<String, Node>,
    required: Vec<String>,
    additional: Option<Box<Node>>,
    items: Option<Items>,
    enum_values: Option<Vec<Value>>,
    const_value: Option<Value>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<u64>,
    max_length: Option<u64>,
    any_of: Vec<Node>,
    one_of: Vec<Node>,
    all_of: Vec<Node>,
    default: Option<Value>,
}

#[derive(Debug, Clone)]
enum Node {
    Bool(bool),
    Rules(Box<Rules>),
}

/// A schema compiled by [`super::CoreSchemaRegistry`].
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    root: Node,
}

impl CompiledSchema {
    /// Compile a schema value.
    pub fn compile(schema: &Value) -> Result<Self, SchemaCompileError> {
        Ok(CompiledSchema {
            root: compile_node(schema, "#")?,
        })
    }
}

impl SchemaValidator for CompiledSchema {
    fn validate(&self, mut data: Value) -> SchemaValidatorResult {
        let mut errors = Vec::new();
        check(&self.root, &mut data, "", &mut errors);
        SchemaValidatorResult {
            success: errors.is_empty(),
            data,
            errors,
        }
    }
}

fn invalid(path: &str, message: impl Into<String>) -> SchemaCompileError {
    SchemaCompileError {
        path: path.to_string(),
        message: message.into(),
    }
}

fn compile_list(value: &Value, path: &str) -> Result<Vec<Node>, SchemaCompileError> {
    let list = value
        .as_array()
        .ok_or_else(|| invalid(path, "expected an array of schemas"))?;
    list.iter()
        .enumerate()
        .map(|(i, s)| compile_node(s, &format!("{}/{}", path, i)))
        .collect()
}

fn compile_node(schema: &Value, path: &str) -> Result<Node, SchemaCompileError> {
    let obj = match schema {
        Value::Bool(b) => return Ok(Node::Bool(*b)),
        Value::Object(obj) => obj,
        _ => return Err(invalid(path, "schema must be an object or a boolean")),
    };

    let mut rules = Rules::default();

    if let Some(ty) = obj.get("type") {
        let names: Vec<&str> = match ty {
            Value::String(s) => vec![s.as_str()],
            Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
            _ => return Err(invalid(path, "`type` must be a string or an array")),
        };
        let types = names
            .iter()
            .map(|n| JsonType::parse(n).ok_or_else(|| invalid(path, format!("unknown type `{}`", n))))
            .collect::<Result<Vec<_>, _>>()?;
        rules.types = Some(types);
    }

    if let Some(props) = obj.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| invalid(path, "`properties` must be an object"))?;
        for (name, sub) in props {
            let node = compile_node(sub, &format!("{}/properties/{}", path, name))?;
            rules.properties.insert(name.clone(), node);
        }
    }

    if let Some(required) = obj.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| invalid(path, "`required` must be an array"))?;
        rules.required = required
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }

    if let Some(additional) = obj.get("additionalProperties") {
        rules.additional = Some(Box::new(compile_node(
            additional,
            &format!("{}/additionalProperties", path),
        )?));
    }

    if let Some(items) = obj.get("items") {
        rules.items = Some(match items {
            Value::Array(_) => Items::Tuple(compile_list(items, &format!("{}/items", path))?),
            _ => Items::Single(Box::new(compile_node(items, &format!("{}/items", path))?)),
        });
    }

    if let Some(values) = obj.get("enum") {
        rules.enum_values = Some(
            values
                .as_array()
                .ok_or_else(|| invalid(path, "`enum` must be an array"))?
                .clone(),
        );
    }

    rules.const_value = obj.get("const").cloned();
    rules.minimum = obj.get("minimum").and_then(Value::as_f64);
    rules.maximum = obj.get("maximum").and_then(Value::as_f64);
    rules.min_length = obj.get("minLength").and_then(Value::as_u64);
    rules.max_length = obj.get("maxLength").and_then(Value::as_u64);
    rules.default = obj.get("default").cloned();

    if let Some(list) = obj.get("anyOf") {
        rules.any_of = compile_list(list, &format!("{}/anyOf", path))?;
    }
    if let Some(list) = obj.get("oneOf") {
        rules.one_of = compile_list(list, &format!("{}/oneOf", path))?;
    }
    if let Some(list) = obj.get("allOf") {
        rules.all_of = compile_list(list, &format!("{}/allOf", path))?;
    }

    Ok(Node::Rules(Box::new(rules)))
}

fn error(path: &str, keyword: &str, message: impl Into<String>, params: Value) -> SchemaValidatorError {
    SchemaValidatorError {
        instance_path: path.to_string(),
        keyword: keyword.to_string(),
        message: message.into(),
        params,
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn passes(node: &Node, value: &Value) -> bool {
    let mut scratch = value.clone();
    let mut errors = Vec::new();
    check(node, &mut scratch, "", &mut errors);
    errors.is_empty()
}

fn check(node: &Node, value: &mut Value, path: &str, errors: &mut Vec<SchemaValidatorError>) {
    let rules = match node {
        Node::Bool(true) => return,
        Node::Bool(false) => {
            errors.push(error(path, "false schema", "boolean schema is false", json!({})));
            return;
        }
        Node::Rules(rules) => rules,
    };

    if let Some(types) = &rules.types {
        if !types.iter().any(|t| t.matches(value)) {
            let names: Vec<&str> = types.iter().map(|t| t.name()).collect();
            errors.push(error(
                path,
                "type",
                format!("must be {}", names.join(",")),
                json!({ "type": names.join(",") }),
            ));
            return;
        }
    }

    if let Value::Object(obj) = value {
        check_object(rules, obj, path, errors);
    }

    if let Value::Array(list) = value {
        match &rules.items {
            Some(Items::Single(item)) => {
                for (i, element) in list.iter_mut().enumerate() {
                    check(item, element, &format!("{}/{}", path, i), errors);
                }
            }
            Some(Items::Tuple(items)) => {
                for (i, (element, item)) in list.iter_mut().zip(items.iter()).enumerate() {
                    check(item, element, &format!("{}/{}", path, i), errors);
                }
            }
            None => {}
        }
    }

    if let Some(allowed) = &rules.enum_values {
        if !allowed.contains(value) {
            errors.push(error(
                path,
                "enum",
                "must be equal to one of the allowed values",
                json!({ "allowedValues": allowed }),
            ));
        }
    }

    if let Some(expected) = &rules.const_value {
        if value != expected {
            errors.push(error(
                path,
                "const",
                "must be equal to constant",
                json!({ "allowedValue": expected }),
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = rules.minimum {
            if n < min {
                errors.push(error(path, "minimum", format!("must be >= {}", min), json!({ "limit": min })));
            }
        }
        if let Some(max) = rules.maximum {
            if n > max {
                errors.push(error(path, "maximum", format!("must be <= {}", max), json!({ "limit": max })));
            }
        }
    }

    if let Value::String(s) = value {
        let len = s.chars().count() as u64;
        if let Some(min) = rules.min_length {
            if len < min {
                errors.push(error(
                    path,
                    "minLength",
                    format!("must NOT have fewer than {} characters", min),
                    json!({ "limit": min }),
                ));
            }
        }
        if let Some(max) = rules.max_length {
            if len > max {
                errors.push(error(
                    path,
                    "maxLength",
                    format!("must NOT have more than {} characters", max),
                    json!({ "limit": max }),
                ));
            }
        }
    }

    for sub in &rules.all_of {
        check(sub, value, path, errors);
    }

    if !rules.any_of.is_empty() && !rules.any_of.iter().any(|s| passes(s, value)) {
        errors.push(error(path, "anyOf", "must match a schema in anyOf", json!({})));
    }

    if !rules.one_of.is_empty() {
        let matching = rules.one_of.iter().filter(|s| passes(s, value)).count();
        if matching != 1 {
            errors.push(error(
                path,
                "oneOf",
                "must match exactly one schema in oneOf",
                json!({ "passingSchemas": matching }),
            ));
        }
    }
}

fn check_object(
    rules: &Rules,
    obj: &mut Map<String, Value>,
    path: &str,
    errors: &mut Vec<SchemaValidatorError>,
) {
    for (name, prop) in &rules.properties {
        if obj.contains_key(name) {
            continue;
        }
        if let Node::Rules(prop_rules) = prop {
            if let Some(default) = &prop_rules.default {
                obj.insert(name.clone(), default.clone());
            }
        }
    }

    for name in &rules.required {
        if !obj.contains_key(name) {
            errors.push(error(
                path,
                "required",
                format!("must have required property '{}'", name),
                json!({ "missingProperty": name }),
            ));
        }
    }

    for (name, element) in obj.iter_mut() {
        let child_path = format!("{}/{}", path, escape_pointer(name));
        match rules.properties.get(name) {
            Some(prop) => check(prop, element, &child_path, errors),
            None => match rules.additional.as_deref() {
                Some(Node::Bool(false)) => errors.push(error(
                    path,
                    "additionalProperties",
                    "must NOT have additional properties",
                    json!({ "additionalProperty": name }),
                )),
                Some(additional) => check(additional, element, &child_path, errors),
                None => {}
            },
        }
    }
}
