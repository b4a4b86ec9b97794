use crate::error::IngestError;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

pub const TAG_LOCATION: &str = "location";
const LOCATION_NAME_PATH: &str = "location.name";

/// Dotted source path -> output field name. Fixed at build time.
const FIELD_RENAMES: &[(&str, &str)] = &[
    ("current.temp_c", "temp_c"),
    ("current.wind_kph", "wind_kph"),
    ("current.pressure_mb", "PRES"),
    ("current.precip_mm", "RAIN"),
    ("current.humidity", "HUMID"),
    ("current.air_quality.pm2_5", "PM2_5"),
    ("current.air_quality.pm10", "PM10"),
    ("current.air_quality.so2", "SO2"),
    ("current.air_quality.no2", "NO2"),
    ("current.air_quality.co", "CO"),
    ("current.air_quality.o3", "O3"),
];

/// The weather API's nested `current.json` body, as received.
#[derive(Debug, Clone)]
pub struct RawSnapshot(JsonValue);

impl RawSnapshot {
    pub fn from_value(value: JsonValue) -> Result<Self, IngestError> {
        if !value.is_object() {
            return Err(IngestError::MalformedResponse(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }
        Ok(Self(value))
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    pub fn localtime_epoch(&self) -> Option<&JsonValue> {
        self.0.pointer("/location/localtime_epoch")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    /// Integral JSON numbers stay integers so the sink sees a stable field type.
    fn from_json(value: &JsonValue) -> Option<Self> {
        let JsonValue::Number(number) = value else {
            return None;
        };
        if let Some(int) = number.as_i64() {
            return Some(FieldValue::Integer(int));
        }
        number.as_f64().map(FieldValue::Float)
    }
}

/// Flat, whitelisted view of one snapshot. Fields the API did not report are
/// absent, never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    pub location: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl FlatRecord {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        output_field_names()
            .filter(|name| !self.fields.contains_key(*name))
            .collect()
    }
}

pub fn output_field_names() -> impl Iterator<Item = &'static str> {
    FIELD_RENAMES.iter().map(|(_, name)| *name)
}

/// Flattens nested objects into dotted-path keys. Arrays and scalars are leaves.
pub fn flatten_json(value: &JsonValue) -> BTreeMap<String, &JsonValue> {
    let mut out = BTreeMap::new();
    flatten_into("", value, &mut out);
    out
}

fn flatten_into<'a>(prefix: &str, value: &'a JsonValue, out: &mut BTreeMap<String, &'a JsonValue>) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&path, child, out);
            }
        }
        _ if prefix.is_empty() => {}
        _ => {
            out.insert(prefix.to_string(), value);
        }
    }
}

pub fn project(raw: &RawSnapshot) -> Result<FlatRecord, IngestError> {
    let flat = flatten_json(raw.as_value());

    let location = match flat.get(LOCATION_NAME_PATH) {
        Some(JsonValue::String(name)) if name.trim().is_empty() => {
            return Err(IngestError::MalformedResponse(format!(
                "{LOCATION_NAME_PATH} is empty"
            )))
        }
        // A line break in the tag would split the point into two lines.
        Some(JsonValue::String(name)) if name.chars().any(char::is_control) => {
            return Err(IngestError::MalformedResponse(format!(
                "{LOCATION_NAME_PATH} contains control characters: {name:?}"
            )))
        }
        Some(JsonValue::String(name)) => name.trim().to_string(),
        Some(JsonValue::Null) | None => {
            return Err(IngestError::MalformedResponse(format!(
                "{LOCATION_NAME_PATH} is missing"
            )))
        }
        Some(other) => {
            return Err(IngestError::MalformedResponse(format!(
                "{LOCATION_NAME_PATH} is a {}, expected a string",
                json_kind(other)
            )))
        }
    };

    let mut fields = BTreeMap::new();
    for (path, name) in FIELD_RENAMES {
        let Some(value) = flat.get(*path) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let field = FieldValue::from_json(value).ok_or_else(|| {
            IngestError::MalformedResponse(format!(
                "{path} ({name}) is a {}, expected a number",
                json_kind(value)
            ))
        })?;
        fields.insert((*name).to_string(), field);
    }

    Ok(FlatRecord { location, fields })
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{berlin_snapshot, berlin_value};
    use serde_json::json;

    #[test]
    fn flattens_nested_objects_into_dotted_paths() {
        let value = json!({
            "a": {"b": {"c": 1}, "d": "x"},
            "e": [1, 2],
        });
        let flat = flatten_json(&value);
        let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a.b.c", "a.d", "e"]);
        assert_eq!(flat["a.b.c"], &json!(1));
        assert_eq!(flat["e"], &json!([1, 2]));
    }

    #[test]
    fn projects_exactly_the_whitelisted_fields() {
        let record = project(&berlin_snapshot()).expect("projected");
        assert_eq!(record.location, "Berlin");

        let keys: Vec<&str> = record.fields.keys().map(String::as_str).collect();
        let mut expected: Vec<&str> = output_field_names().collect();
        expected.sort_unstable();
        assert_eq!(keys, expected);

        assert_eq!(record.fields.get("temp_c").copied(), Some(FieldValue::Float(5.2)));
        assert_eq!(record.fields.get("wind_kph").copied(), Some(FieldValue::Float(10.0)));
        assert_eq!(record.fields.get("PRES").copied(), Some(FieldValue::Integer(1012)));
        assert_eq!(record.fields.get("RAIN").copied(), Some(FieldValue::Float(0.0)));
        assert_eq!(record.fields.get("HUMID").copied(), Some(FieldValue::Integer(80)));
        assert_eq!(record.fields.get("PM2_5").copied(), Some(FieldValue::Float(9.1)));
        assert_eq!(record.fields.get("PM10").copied(), Some(FieldValue::Float(15.0)));
        assert_eq!(record.fields.get("SO2").copied(), Some(FieldValue::Float(1.0)));
        assert_eq!(record.fields.get("NO2").copied(), Some(FieldValue::Float(5.0)));
        assert_eq!(record.fields.get("CO").copied(), Some(FieldValue::Float(200.0)));
        assert_eq!(record.fields.get("O3").copied(), Some(FieldValue::Float(40.0)));
        assert!(record.missing_fields().is_empty());
    }

    #[test]
    fn drops_fields_outside_the_whitelist() {
        let mut value = berlin_value();
        value["location"]["region"] = json!("Berlin");
        value["current"]["feelslike_c"] = json!(1.5);
        value["current"]["air_quality"]["us-epa-index"] = json!(1);
        let record = project(&RawSnapshot::from_value(value).unwrap()).unwrap();
        assert!(!record.fields.contains_key("region"));
        assert!(!record.fields.contains_key("feelslike_c"));
        assert!(!record.fields.contains_key("current.air_quality.us-epa-index"));
        assert!(!record.fields.contains_key(TAG_LOCATION));
        assert_eq!(record.fields.len(), 11);
    }

    #[test]
    fn omits_air_quality_when_not_reported() {
        let mut value = berlin_value();
        value["current"]
            .as_object_mut()
            .unwrap()
            .remove("air_quality");
        let record = project(&RawSnapshot::from_value(value).unwrap()).unwrap();

        assert_eq!(record.fields.len(), 5);
        assert_eq!(record.fields.get("HUMID").copied(), Some(FieldValue::Integer(80)));
        assert_eq!(record.fields.get("PM2_5").copied(), None);
        assert_eq!(
            record.missing_fields(),
            vec!["PM2_5", "PM10", "SO2", "NO2", "CO", "O3"]
        );
    }

    #[test]
    fn treats_null_values_as_not_reported() {
        let mut value = berlin_value();
        value["current"]["air_quality"]["so2"] = JsonValue::Null;
        let record = project(&RawSnapshot::from_value(value).unwrap()).unwrap();
        assert_eq!(record.fields.get("SO2").copied(), None);
        assert_eq!(record.missing_fields(), vec!["SO2"]);
    }

    #[test]
    fn rejects_non_numeric_field() {
        let mut value = berlin_value();
        value["current"]["humidity"] = json!("80%");
        let err = project(&RawSnapshot::from_value(value).unwrap()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedResponse(_)));
        assert!(err.to_string().contains("HUMID"));
    }

    #[test]
    fn rejects_missing_or_non_string_location() {
        let mut value = berlin_value();
        value["location"].as_object_mut().unwrap().remove("name");
        let err = project(&RawSnapshot::from_value(value).unwrap()).unwrap_err();
        assert!(err.to_string().contains("location.name is missing"));

        let mut value = berlin_value();
        value["location"]["name"] = json!(42);
        let err = project(&RawSnapshot::from_value(value).unwrap()).unwrap_err();
        assert!(err.to_string().contains("expected a string"));
    }

    #[test]
    fn rejects_location_with_control_characters() {
        for name in ["Berlin\nweather,location=Paris temp_c=1", "Ber\rlin", "Berlin\t"] {
            let mut value = berlin_value();
            value["location"]["name"] = json!(name);
            let err = project(&RawSnapshot::from_value(value).unwrap()).unwrap_err();
            assert!(matches!(err, IngestError::MalformedResponse(_)), "{name:?}");
            assert!(err.to_string().contains("control characters"), "{name:?}");
        }
    }

    #[test]
    fn snapshot_must_be_an_object() {
        let err = RawSnapshot::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, IngestError::MalformedResponse(_)));
    }

    #[test]
    fn exposes_localtime_epoch() {
        assert_eq!(
            berlin_snapshot().localtime_epoch(),
            Some(&json!(1614600000))
        );
    }
}
