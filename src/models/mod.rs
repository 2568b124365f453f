use chrono::{TimeZone, Utc};
use mongodb::bson::{oid::ObjectId, DateTime};

use crate::error::{Error, Result};

pub mod aircraft;
pub mod assessment;
pub mod attachment;
pub mod filter;
pub mod investigation;
pub mod occurrence;
pub mod profile;
pub mod stage;
pub mod stats;

pub fn parse_id(id: &str) -> Result<ObjectId> {
    id.parse()
        .map_err(|_| Error::Validation("INVALID_ID".to_string()))
}

pub fn parse_optional_id(id: Option<&str>) -> Result<Option<ObjectId>> {
    id.filter(|id| !id.is_empty()).map(parse_id).transpose()
}

/// Distinguishes a field set to `null` (`Some(None)`) from a missing one (`None`).
/// Use together with `#[serde(default)]`.
pub fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

pub fn to_utc(datetime: DateTime) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(datetime.timestamp_millis())
        .single()
        .unwrap_or_default()
}

pub fn to_bson(datetime: chrono::DateTime<Utc>) -> DateTime {
    DateTime::from_millis(datetime.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_ids() {
        let id = ObjectId::new();
        assert_eq!(parse_id(&id.to_hex()).unwrap(), id);
        assert!(matches!(parse_id("not-an-id"), Err(Error::Validation(_))));
        assert_eq!(parse_optional_id(Some("")).unwrap(), None);
        assert_eq!(parse_optional_id(None).unwrap(), None);
    }

    #[test]
    fn converts_timestamps_both_ways() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        assert_eq!(to_utc(to_bson(now)), now);
    }

    #[test]
    fn tells_null_apart_from_missing() {
        #[derive(serde::Deserialize)]
        struct Patch {
            #[serde(default, deserialize_with = "nullable")]
            reasoning: Option<Option<String>>,
        }

        let missing: Patch = serde_json::from_str("{}").unwrap();
        let cleared: Patch = serde_json::from_str(r#"{"reasoning":null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"reasoning":"ok"}"#).unwrap();

        assert_eq!(missing.reasoning, None);
        assert_eq!(cleared.reasoning, Some(None));
        assert_eq!(set.reasoning, Some(Some("ok".to_string())));
    }
}
