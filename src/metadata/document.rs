use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// How a record's `image_data` column reads once parsed.
///
/// Legacy uploads may carry free text; anything that is not a JSON object is
/// kept as `Opaque` and never looked into.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataView {
    Absent,
    Opaque,
    Structured(PhotoMetadata),
}

impl MetadataView {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return MetadataView::Absent;
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(fields)) => MetadataView::Structured(PhotoMetadata { fields }),
            _ => MetadataView::Opaque,
        }
    }

    pub fn as_structured(&self) -> Option<&PhotoMetadata> {
        match self {
            MetadataView::Structured(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn world(&self) -> Option<WorldInfo> {
        self.as_structured().and_then(PhotoMetadata::world)
    }
}

/// World the photo was taken in.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldInfo {
    pub name: String,
    pub id: Option<Value>,
    /// Set when the name was borrowed from a neighbouring photo.
    pub auto_assigned: bool,
}

/// A metadata object as written by the capture tool.
///
/// Only `date` and `world` are interpreted; every other field is carried
/// through untouched when the document is rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMetadata {
    fields: Map<String, Value>,
}

impl PhotoMetadata {
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.fields.get("date").and_then(Value::as_str).and_then(parse_date)
    }

    pub fn raw_date(&self) -> Option<&str> {
        self.fields.get("date").and_then(Value::as_str)
    }

    pub fn world(&self) -> Option<WorldInfo> {
        let world = self.fields.get("world")?.as_object()?;
        let name = world.get("name")?.as_str()?;
        if name.is_empty() {
            return None;
        }
        Some(WorldInfo {
            name: name.to_string(),
            id: world.get("id").filter(|id| !id.is_null()).cloned(),
            auto_assigned: world
                .get("auto_assigned")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Marks `world` as inferred. Only `name`, `id` and `auto_assigned` are
    /// overwritten; other keys of an existing world object stay.
    pub fn with_inferred_world(&self, name: &str, marker_id: &str) -> Self {
        let mut world = match self.fields.get("world") {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };
        world.insert("name".into(), Value::String(name.to_string()));
        world.insert("id".into(), Value::String(marker_id.to_string()));
        world.insert("auto_assigned".into(), Value::Bool(true));

        let mut fields = self.fields.clone();
        fields.insert("world".into(), Value::Object(world));
        Self { fields }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }
}

/// Dates without an offset are read as UTC.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn structured(raw: &str) -> PhotoMetadata {
        match MetadataView::parse(Some(raw)) {
            MetadataView::Structured(meta) => meta,
            other => panic!("expected structured metadata, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_classifies_payloads() {
        assert_eq!(MetadataView::parse(None), MetadataView::Absent);
        assert_eq!(MetadataView::parse(Some("{invalid json")), MetadataView::Opaque);
        assert_eq!(MetadataView::parse(Some("taken at the lake")), MetadataView::Opaque);
        assert_eq!(MetadataView::parse(Some("[1,2]")), MetadataView::Opaque);
        assert_eq!(MetadataView::parse(Some("\"text\"")), MetadataView::Opaque);
        assert!(MetadataView::parse(Some("{}")).as_structured().is_some());
    }

    #[test]
    fn test_world_shape_validation() {
        let meta = structured(r#"{"world":{"name":"Forest","id":"wrld_1"}}"#);
        let world = meta.world().unwrap();
        assert_eq!(world.name, "Forest");
        assert_eq!(world.id, Some(Value::String("wrld_1".into())));
        assert!(!world.auto_assigned);

        assert!(structured(r#"{"world":"Forest"}"#).world().is_none());
        assert!(structured(r#"{"world":{"name":""}}"#).world().is_none());
        assert!(structured(r#"{"world":{"name":42}}"#).world().is_none());
        assert!(structured(r#"{"world":{"id":"wrld_1"}}"#).world().is_none());
        assert!(structured(r#"{"world":null}"#).world().is_none());
    }

    #[test]
    fn test_auto_assigned_flag() {
        let meta = structured(r#"{"world":{"name":"Forest","auto_assigned":true}}"#);
        assert!(meta.world().unwrap().auto_assigned);

        let meta = structured(r#"{"world":{"name":"Forest","auto_assigned":"yes"}}"#);
        assert!(!meta.world().unwrap().auto_assigned);
    }

    #[test]
    fn test_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_date("2024-05-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_date("2024-05-01T19:00:00+09:00"), Some(expected));
        assert_eq!(parse_date("2024-05-01T10:00:00"), Some(expected));
        assert_eq!(parse_date("2024-05-01 10:00:00.000"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);

        assert_eq!(structured(r#"{"date":"2024-05-01T10:00:00Z"}"#).date(), Some(expected));
        assert_eq!(structured(r#"{"date":1714557600}"#).date(), None);
    }

    #[test]
    fn test_inferred_world_preserves_other_fields() {
        let meta = structured(
            r#"{"application":"VRCX","date":"2024-05-01T10:00:00Z","players":[{"name":"a"}],"world":{"name":"Old","auto_assigned":true}}"#,
        );
        let updated = meta.with_inferred_world("Forest", "marker-1");

        let world = updated.world().unwrap();
        assert_eq!(world.name, "Forest");
        assert!(world.auto_assigned);
        assert_eq!(world.id, Some(Value::String("marker-1".into())));

        let json: Value = serde_json::from_str(&updated.to_json().unwrap()).unwrap();
        assert_eq!(json["application"], "VRCX");
        assert_eq!(json["players"][0]["name"], "a");
        assert_eq!(json["date"], "2024-05-01T10:00:00Z");

        let text = updated.to_json().unwrap();
        assert!(text.find("application").unwrap() < text.find("world").unwrap());
    }

    #[test]
    fn test_inferred_world_keeps_extra_world_keys() {
        let meta = structured(r#"{"world":{"id":"wrld_1","instance":"12345~private","extra":1}}"#);
        let updated = meta.with_inferred_world("Forest", "marker-1");

        let json: Value = serde_json::from_str(&updated.to_json().unwrap()).unwrap();
        assert_eq!(json["world"]["instance"], "12345~private");
        assert_eq!(json["world"]["extra"], 1);
        assert_eq!(json["world"]["name"], "Forest");
        assert_eq!(json["world"]["id"], "marker-1");
        assert_eq!(json["world"]["auto_assigned"], true);

        let replaced = structured(r#"{"world":"Forest"}"#).with_inferred_world("Beach", "m");
        assert_eq!(replaced.world().unwrap().name, "Beach");
    }
}
