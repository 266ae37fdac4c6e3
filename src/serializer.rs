//! Dual serialization dialects (spec §4.3): V1 (out-of-band type map) and
//! V2 (inline `.type`/`.val` tagging), both round-tripping the augmented
//! JSON value set through a plain `serde_json::Value` wire channel.

use crate::ascii85;
use crate::error::{AceError, AceResult};
use crate::path::{keys_to_path_string, Key};
use crate::value::{PathReference, Value};
use serde_json::{json, Map as JsonMap, Value as Json};
use std::collections::BTreeMap;

const TAG_DATE: &str = "date";
const TAG_BINARY: &str = "binary";
const TAG_REFERENCE: &str = "reference";
const TAG_REGEXP: &str = "regexp";
const TAG_BIGINT: &str = "bigint";
const TAG_ARRAY: &str = "array";

fn format_date_ms(ms: i64) -> String {
    let secs = ms.div_euclid(1000);
    let millis = ms.rem_euclid(1000);
    let dt = time::OffsetDateTime::from_unix_timestamp(secs).unwrap_or(time::OffsetDateTime::UNIX_EPOCH);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        millis
    )
}

fn parse_date_ms(s: &str) -> AceResult<i64> {
    let dt = time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .map_err(|e| AceError::SerializerFormat { reason: format!("invalid date {s:?}: {e}") })?;
    Ok(dt.unix_timestamp() * 1000 + dt.millisecond() as i64)
}

fn leaf_tag(value: &Value) -> Option<&'static str> {
    match value {
        Value::BigInt(_) => Some(TAG_BIGINT),
        Value::Date(_) => Some(TAG_DATE),
        Value::Bytes(_) => Some(TAG_BINARY),
        Value::Regex { .. } => Some(TAG_REGEXP),
        Value::Reference(_) => Some(TAG_REFERENCE),
        Value::PartialArray(_) => Some(TAG_ARRAY),
        _ => None,
    }
}

fn leaf_payload_v1(value: &Value) -> Json {
    match value {
        Value::BigInt(s) => json!(s),
        Value::Date(ms) => json!(format_date_ms(*ms)),
        Value::Bytes(b) => json!(ascii85::encode(b)),
        Value::Regex { pattern, flags } => json!({"pattern": pattern, "flags": flags}),
        Value::Reference(r) => json!(r.0),
        Value::PartialArray(_) => unreachable!("PartialArray payload is produced by walking its children"),
        _ => unreachable!("not a typed leaf"),
    }
}

fn leaf_payload_v2(value: &Value) -> Json {
    match value {
        Value::Regex { pattern, flags } => json!(format!("/{pattern}/{flags}")),
        other => leaf_payload_v1(other),
    }
}

fn deserialize_leaf(tag: &str, payload: &Json) -> AceResult<Value> {
    match tag {
        TAG_DATE => {
            let s = payload.as_str().ok_or_else(|| AceError::SerializerFormat { reason: "date payload is not a string".into() })?;
            Ok(Value::Date(parse_date_ms(s)?))
        }
        TAG_BINARY => {
            let s = payload.as_str().ok_or_else(|| AceError::SerializerFormat { reason: "binary payload is not a string".into() })?;
            let bytes = ascii85::decode(s).map_err(|reason| AceError::SerializerFormat { reason })?;
            Ok(Value::Bytes(bytes))
        }
        TAG_REFERENCE => {
            let s = payload.as_str().ok_or_else(|| AceError::SerializerFormat { reason: "reference payload is not a string".into() })?;
            Ok(Value::Reference(PathReference::new(s)))
        }
        TAG_REGEXP => match payload {
            Json::Object(obj) => {
                let pattern = obj.get("pattern").and_then(Json::as_str).unwrap_or_default().to_string();
                let flags = obj.get("flags").and_then(Json::as_str).unwrap_or_default().to_string();
                Ok(Value::Regex { pattern, flags })
            }
            Json::String(s) => parse_regex_literal(s),
            _ => Err(AceError::SerializerFormat { reason: "malformed regexp payload".into() }),
        },
        TAG_BIGINT => {
            let s = payload.as_str().ok_or_else(|| AceError::SerializerFormat { reason: "bigint payload is not a string".into() })?;
            Ok(Value::BigInt(s.to_string()))
        }
        other => Err(AceError::SerializerFormat { reason: format!("unknown type tag {other:?}") }),
    }
}

fn parse_regex_literal(s: &str) -> AceResult<Value> {
    if !s.starts_with('/') {
        return Err(AceError::SerializerFormat { reason: "malformed regexp literal".into() });
    }
    let rest = &s[1..];
    let close = rest.rfind('/').ok_or_else(|| AceError::SerializerFormat { reason: "malformed regexp literal".into() })?;
    Ok(Value::Regex { pattern: rest[..close].to_string(), flags: rest[close + 1..].to_string() })
}

// ---------------------------------------------------------------------
// V1
// ---------------------------------------------------------------------

enum MapSpec {
    None,
    Single(String),
    Paths(BTreeMap<String, String>),
}

fn walk_v1(value: &Value, trail: &mut Vec<Key>, map: &mut BTreeMap<String, String>) -> Json {
    if let Some(tag) = leaf_tag(value) {
        map.insert(keys_to_path_string(trail), tag.to_string());
        if let Value::PartialArray(entries) = value {
            let mut obj = JsonMap::new();
            for (i, child) in entries {
                trail.push(Key::Index(*i));
                obj.insert(i.to_string(), walk_v1(child, trail, map));
                trail.pop();
            }
            return Json::Object(obj);
        }
        return leaf_payload_v1(value);
    }
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                trail.push(Key::Index(i));
                out.push(walk_v1(item, trail, map));
                trail.pop();
            }
            Json::Array(out)
        }
        Value::Object(obj) => {
            let mut out = JsonMap::new();
            for (k, v) in obj {
                trail.push(Key::Str(k.clone()));
                out.insert(k.clone(), walk_v1(v, trail, map));
                trail.pop();
            }
            Json::Object(out)
        }
        _ => unreachable!("typed leaves handled above"),
    }
}

pub fn serialize_v1(value: &Value) -> Json {
    let mut map = BTreeMap::new();
    let mut trail = Vec::new();
    let val = walk_v1(value, &mut trail, &mut map);

    if map.is_empty() {
        return json!({ "val": val });
    }
    if map.len() == 1 && map.contains_key("") {
        return json!({ "map": map[""], "val": val });
    }
    json!({ "map": map, "val": val })
}

fn read_map_spec(map_json: Option<&Json>) -> AceResult<MapSpec> {
    match map_json {
        None => Ok(MapSpec::None),
        Some(Json::String(tag)) => Ok(MapSpec::Single(tag.clone())),
        Some(Json::Object(obj)) => {
            let mut paths = BTreeMap::new();
            for (k, v) in obj {
                let tag = v.as_str().ok_or_else(|| AceError::SerializerFormat { reason: "map entry is not a string tag".into() })?;
                paths.insert(k.clone(), tag.to_string());
            }
            Ok(MapSpec::Paths(paths))
        }
        Some(_) => Err(AceError::SerializerFormat { reason: "malformed `map` property".into() }),
    }
}

fn tag_for_path<'a>(spec: &'a MapSpec, path: &str) -> Option<&'a str> {
    match spec {
        MapSpec::None => None,
        MapSpec::Single(tag) => (path.is_empty()).then_some(tag.as_str()),
        MapSpec::Paths(paths) => paths.get(path).map(String::as_str),
    }
}

fn unwalk_v1(json: &Json, trail: &mut Vec<Key>, spec: &MapSpec) -> AceResult<Value> {
    let path = keys_to_path_string(trail);
    if let Some(tag) = tag_for_path(spec, &path) {
        if tag == TAG_ARRAY {
            let obj = json.as_object().ok_or_else(|| AceError::SerializerFormat { reason: "array-tagged value is not an object".into() })?;
            let mut entries = BTreeMap::new();
            for (k, v) in obj {
                let idx: usize = k.parse().map_err(|_| AceError::SerializerFormat { reason: format!("non-numeric sparse array index {k:?}") })?;
                trail.push(Key::Index(idx));
                entries.insert(idx, unwalk_v1(v, trail, spec)?);
                trail.pop();
            }
            return Ok(Value::PartialArray(entries));
        }
        return deserialize_leaf(tag, json);
    }
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(if let Some(i) = n.as_i64() { Value::Int(i) } else { Value::Float(n.as_f64().unwrap_or(f64::NAN)) }),
        Json::String(s) => Ok(Value::Str(s.clone())),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                trail.push(Key::Index(i));
                out.push(unwalk_v1(item, trail, spec)?);
                trail.pop();
            }
            Ok(Value::Array(out))
        }
        Json::Object(obj) => {
            let mut out = BTreeMap::new();
            for (k, v) in obj {
                trail.push(Key::Str(k.clone()));
                out.insert(k.clone(), unwalk_v1(v, trail, spec)?);
                trail.pop();
            }
            Ok(Value::Object(out))
        }
    }
}

pub fn deserialize_v1(json: &Json) -> AceResult<Value> {
    let obj = json.as_object().ok_or(AceError::SerializerFormat { reason: "V1 value must be an object".into() })?;
    let val = obj.get("val").ok_or(AceError::SerializerFormat { reason: "missing `val` property".into() })?;
    let spec = read_map_spec(obj.get("map"))?;
    unwalk_v1(val, &mut Vec::new(), &spec)
}

// ---------------------------------------------------------------------
// V2
// ---------------------------------------------------------------------

fn walk_v2(value: &Value) -> Json {
    if let Some(tag) = leaf_tag(value) {
        if let Value::PartialArray(entries) = value {
            let mut obj = JsonMap::new();
            obj.insert(".type".to_string(), json!(TAG_ARRAY));
            for (i, child) in entries {
                obj.insert(i.to_string(), walk_v2(child));
            }
            return Json::Object(obj);
        }
        return json!({ ".type": tag, ".val": leaf_payload_v2(value) });
    }
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::Array(items) => Json::Array(items.iter().map(walk_v2).collect()),
        Value::Object(obj) => {
            let mut out: JsonMap<String, Json> = obj.iter().map(|(k, v)| (k.clone(), walk_v2(v))).collect();
            if out.len() == 1 && out.contains_key("val") {
                out.insert(".version".to_string(), json!(2));
            }
            Json::Object(out)
        }
        _ => unreachable!("typed leaves handled above"),
    }
}

pub fn serialize_v2(value: &Value) -> Json {
    walk_v2(value)
}

fn unwalk_v2(json: &Json) -> AceResult<Value> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(if let Some(i) = n.as_i64() { Value::Int(i) } else { Value::Float(n.as_f64().unwrap_or(f64::NAN)) }),
        Json::String(s) => Ok(Value::Str(s.clone())),
        Json::Array(items) => Ok(Value::Array(items.iter().map(unwalk_v2).collect::<AceResult<_>>()?)),
        Json::Object(obj) => {
            if let Some(tag) = obj.get(".type").and_then(Json::as_str) {
                if tag == TAG_ARRAY {
                    let mut entries = BTreeMap::new();
                    for (k, v) in obj {
                        if k == ".type" {
                            continue;
                        }
                        let idx: usize = k.parse().map_err(|_| AceError::SerializerFormat { reason: format!("non-numeric sparse array index {k:?}") })?;
                        entries.insert(idx, unwalk_v2(v)?);
                    }
                    return Ok(Value::PartialArray(entries));
                }
                let payload = obj.get(".val").unwrap_or(&Json::Null);
                return deserialize_leaf(tag, payload);
            }
            let mut out = BTreeMap::new();
            for (k, v) in obj {
                if k == ".version" {
                    continue;
                }
                out.insert(k.clone(), unwalk_v2(v)?);
            }
            Ok(Value::Object(out))
        }
    }
}

pub fn deserialize_v2(json: &Json) -> AceResult<Value> {
    unwalk_v2(json)
}

// ---------------------------------------------------------------------
// Version detection and dispatch
// ---------------------------------------------------------------------

/// Returns 2 iff `json` is a primitive/array/object lacking both `map` and
/// `val`, or is an object with `val` plus other keys. Returns 1 only if the
/// object has exactly `map`+`val`, or `val` as its only property.
pub fn detect_version(json: &Json) -> u8 {
    match json.as_object() {
        None => 2,
        Some(obj) => {
            let has_map = obj.contains_key("map");
            let has_val = obj.contains_key("val");
            if has_map && has_val && obj.len() == 2 {
                1
            } else if has_val && obj.len() == 1 {
                1
            } else {
                2
            }
        }
    }
}

pub fn serialize(value: &Value, version: u8) -> Json {
    match version {
        1 => serialize_v1(value),
        _ => serialize_v2(value),
    }
}

pub fn deserialize(json: &Json) -> AceResult<Value> {
    match detect_version(json) {
        1 => deserialize_v1(json),
        _ => deserialize_v2(json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::values_are_equal;
    use std::collections::BTreeMap as Map;

    fn rich_value() -> Value {
        let mut sparse = Map::new();
        sparse.insert(5, Value::Str("x".into()));
        sparse.insert(12, Value::Date(1654041600000)); // 2022-06-01T00:00:00.000Z
        Value::Object(
            [
                ("when".to_string(), Value::Date(1650613763000)), // 2022-04-22T07:49:23.000Z
                ("bytes".to_string(), Value::Bytes(vec![0x41, 0x63, 0x65, 0x42, 0x61, 0x73, 0x65])),
                ("tag".to_string(), Value::Regex { pattern: "Ace".into(), flags: "i".into() }),
                ("big".to_string(), Value::BigInt("2983834762734857652534876237876233438476".into())),
                ("ref".to_string(), Value::Reference(PathReference::new("other/path"))),
                ("sparse".to_string(), Value::PartialArray(sparse)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn v1_round_trips_rich_value() {
        let value = rich_value();
        let wire = serialize_v1(&value);
        assert_eq!(detect_version(&wire), 1);
        let back = deserialize_v1(&wire).unwrap();
        assert!(values_are_equal(&value, &back));
    }

    #[test]
    fn v2_round_trips_rich_value() {
        let value = rich_value();
        let wire = serialize_v2(&value);
        assert_eq!(detect_version(&wire), 2);
        let back = deserialize_v2(&wire).unwrap();
        assert!(values_are_equal(&value, &back));
    }

    #[test]
    fn v2_disambiguates_bare_val_object() {
        let value = Value::Object([("val".to_string(), Value::Int(42))].into_iter().collect());
        let wire = serialize_v2(&value);
        assert_eq!(detect_version(&wire), 2);
        let back = deserialize_v2(&wire).unwrap();
        assert!(values_are_equal(&value, &back));
    }

    #[test]
    fn untyped_value_round_trips_without_map() {
        let value = Value::from(json!({"a": 1, "b": [1, 2, 3]}));
        let wire = serialize_v1(&value);
        assert!(wire.as_object().unwrap().get("map").is_none());
        assert!(values_are_equal(&value, &deserialize(&wire).unwrap()));
    }

    #[test]
    fn top_level_typed_value_uses_single_tag_map() {
        let value = Value::Date(1650613763000);
        let wire = serialize_v1(&value);
        assert_eq!(wire.get("map").unwrap(), &json!("date"));
        assert!(values_are_equal(&value, &deserialize_v1(&wire).unwrap()));
    }

    #[test]
    fn unknown_v2_tag_is_an_error() {
        let bogus = json!({".type": "mystery", ".val": "x"});
        assert!(matches!(deserialize_v2(&bogus), Err(AceError::SerializerFormat { .. })));
    }
}
