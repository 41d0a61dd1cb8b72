//! Tagged-variant field value model with a wire format matching Firestore's
//! `{"<typeTag>": <payload>}` singleton-map encoding (spec §3 FieldValue, §4.2).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Reference(String),
    GeoPoint { latitude: f64, longitude: f64 },
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Classifies a native JSON value into a tagged variant, probing strings
    /// for timestamp-ness purely on the value (no field-name heuristics).
    pub fn from_json(v: &Json) -> FieldValue {
        match v {
            Json::Null => FieldValue::Null,
            Json::Bool(b) => FieldValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int64(i)
                } else {
                    FieldValue::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => {
                if let Some(ts) = try_parse_timestamp(s) {
                    FieldValue::Timestamp(ts)
                } else {
                    FieldValue::String(s.clone())
                }
            }
            Json::Array(items) => FieldValue::Array(items.iter().map(FieldValue::from_json).collect()),
            Json::Object(map) => {
                FieldValue::Map(map.iter().map(|(k, v)| (k.clone(), FieldValue::from_json(v))).collect())
            }
        }
    }

    /// Canonical string form, used by the `==` fallback comparison (§4.3) and
    /// for resume-token debug rendering. Not used for wire encoding.
    pub fn canonical_string(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int64(i) => i.to_string(),
            FieldValue::Double(d) => d.to_string(),
            FieldValue::String(s) => s.clone(),
            FieldValue::Bytes(b) => base64::encode(b),
            FieldValue::Timestamp(t) => t.to_rfc3339_opts(SecondsFormat::Nanos, true),
            FieldValue::Reference(r) => r.clone(),
            FieldValue::GeoPoint { latitude, longitude } => format!("{},{}", latitude, longitude),
            FieldValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(FieldValue::canonical_string).collect();
                format!("[{}]", parts.join(","))
            }
            FieldValue::Map(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{}:{}", k, v.canonical_string())).collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }

    /// Wire encoding: a singleton map `{"<typeTag>": <payload>}`.
    pub fn to_wire(&self) -> Json {
        match self {
            FieldValue::Null => wire("nullValue", Json::Null),
            FieldValue::Bool(b) => wire("booleanValue", Json::Bool(*b)),
            FieldValue::Int64(i) => wire("integerValue", Json::String(i.to_string())),
            FieldValue::Double(d) => wire("doubleValue", serde_json::Number::from_f64(*d).map(Json::Number).unwrap_or(Json::Null)),
            FieldValue::String(s) => wire("stringValue", Json::String(s.clone())),
            FieldValue::Bytes(b) => wire("bytesValue", Json::String(base64::encode(b))),
            FieldValue::Timestamp(t) => wire("timestampValue", Json::String(t.to_rfc3339_opts(SecondsFormat::Nanos, true))),
            FieldValue::Reference(r) => wire("referenceValue", Json::String(r.clone())),
            FieldValue::GeoPoint { latitude, longitude } => wire(
                "geoPointValue",
                serde_json::json!({ "latitude": latitude, "longitude": longitude }),
            ),
            FieldValue::Array(items) => wire(
                "arrayValue",
                serde_json::json!({ "values": items.iter().map(FieldValue::to_wire).collect::<Vec<_>>() }),
            ),
            FieldValue::Map(m) => wire(
                "mapValue",
                serde_json::json!({ "fields": m.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect::<BTreeMap<_, _>>() }),
            ),
        }
    }

    /// Accepts either the §3 wire form (a singleton `{"<typeTag>": ...}` map)
    /// or a bare JSON scalar, classifying the latter the same way
    /// [`FieldValue::from_json`] does. Used for filter literals arriving in
    /// a `subscribe` frame's `query.filters[].value`, which callers may send
    /// either way.
    pub fn from_json_or_wire(v: &Json) -> FieldValue {
        if let Some(parsed) = Self::from_wire(v) {
            return parsed;
        }
        Self::from_json(v)
    }

    pub fn from_wire(v: &Json) -> Option<FieldValue> {
        let obj = v.as_object()?;
        let (tag, payload) = obj.iter().next()?;
        Some(match tag.as_str() {
            "nullValue" => FieldValue::Null,
            "booleanValue" => FieldValue::Bool(payload.as_bool()?),
            "integerValue" => FieldValue::Int64(payload.as_str()?.parse().ok()?),
            "doubleValue" => FieldValue::Double(payload.as_f64()?),
            "stringValue" => FieldValue::String(payload.as_str()?.to_string()),
            "bytesValue" => FieldValue::Bytes(base64::decode(payload.as_str()?).ok()?),
            "timestampValue" => FieldValue::Timestamp(DateTime::parse_from_rfc3339(payload.as_str()?).ok()?.with_timezone(&Utc)),
            "referenceValue" => FieldValue::Reference(payload.as_str()?.to_string()),
            "geoPointValue" => FieldValue::GeoPoint {
                latitude: payload.get("latitude")?.as_f64()?,
                longitude: payload.get("longitude")?.as_f64()?,
            },
            "arrayValue" => {
                let values = payload.get("values").and_then(Json::as_array).cloned().unwrap_or_default();
                FieldValue::Array(values.iter().filter_map(FieldValue::from_wire).collect())
            }
            "mapValue" => {
                let fields = payload.get("fields").and_then(Json::as_object).cloned().unwrap_or_default();
                FieldValue::Map(
                    fields
                        .iter()
                        .filter_map(|(k, v)| FieldValue::from_wire(v).map(|fv| (k.clone(), fv)))
                        .collect(),
                )
            }
            _ => return None,
        })
    }
}

fn wire(tag: &str, payload: Json) -> Json {
    let mut m = serde_json::Map::new();
    m.insert(tag.to_string(), payload);
    Json::Object(m)
}

/// A document's field map, serde-transparent over the wire form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldMap(#[serde(with = "field_map_serde")] pub BTreeMap<String, FieldValue>);

mod field_map_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, FieldValue>, s: S) -> Result<S::Ok, S::Error> {
        let json: BTreeMap<String, Json> = map.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect();
        json.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, FieldValue>, D::Error> {
        let json: BTreeMap<String, Json> = BTreeMap::deserialize(d)?;
        Ok(json
            .into_iter()
            .filter_map(|(k, v)| FieldValue::from_wire(&v).map(|fv| (k, fv)))
            .collect())
    }
}

fn try_parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&ndt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_primitives() {
        assert_eq!(FieldValue::from_json(&json!(null)), FieldValue::Null);
        assert_eq!(FieldValue::from_json(&json!(true)), FieldValue::Bool(true));
        assert_eq!(FieldValue::from_json(&json!(42)), FieldValue::Int64(42));
        assert_eq!(FieldValue::from_json(&json!(1.5)), FieldValue::Double(1.5));
    }

    #[test]
    fn classifies_date_only_string_as_timestamp() {
        match FieldValue::from_json(&json!("2024-01-15")) {
            FieldValue::Timestamp(_) => (),
            other => panic!("expected Timestamp, got {:?}", other),
        }
    }

    #[test]
    fn classifies_plain_string_as_string() {
        assert_eq!(
            FieldValue::from_json(&json!("hello world")),
            FieldValue::String("hello world".to_string())
        );
    }

    #[test]
    fn integer_roundtrips_through_decimal_string() {
        let v = FieldValue::Int64(i64::MAX);
        let wire = v.to_wire();
        assert_eq!(wire["integerValue"], json!(i64::MAX.to_string()));
        assert_eq!(FieldValue::from_wire(&wire).unwrap(), v);
    }

    #[test]
    fn timestamp_roundtrips_with_nanos() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::nanoseconds(123);
        let v = FieldValue::Timestamp(t);
        let wire = v.to_wire();
        let back = FieldValue::from_wire(&wire).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn array_and_map_roundtrip() {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), FieldValue::Int64(1));
        m.insert("b".to_string(), FieldValue::Array(vec![FieldValue::Bool(true), FieldValue::Null]));
        let v = FieldValue::Map(m);
        let wire = v.to_wire();
        assert_eq!(FieldValue::from_wire(&wire).unwrap(), v);
    }

    #[test]
    fn bytes_roundtrip_through_base64() {
        let v = FieldValue::Bytes(vec![0, 1, 2, 255]);
        let wire = v.to_wire();
        assert_eq!(FieldValue::from_wire(&wire).unwrap(), v);
    }
}
