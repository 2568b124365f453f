//! List filters shared by the dashboard URL and the list endpoints.
//!
//! A filter serializes to the query string the dashboard keeps in its URL and
//! parses back from it. Only fields that are set are written, so an empty
//! filter is an empty query string.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use mongodb::bson::{doc, DateTime, Document};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};

use super::{
    occurrence::{OccurrenceStatus, Severity},
    stage::Stage,
};
use crate::error::{Error, Result};

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;
/// Largest offset the store accepts as a `$skip`.
pub const MAX_OFFSET: u64 = i64::MAX as u64;
/// Largest page whose offset stays within `MAX_OFFSET` at any limit.
pub const MAX_PAGE: u64 = MAX_OFFSET / MAX_LIMIT + 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilter {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub status: Option<OccurrenceStatus>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(
        default = "first_page",
        deserialize_with = "page_number",
        skip_serializing_if = "is_first_page"
    )]
    pub page: u64,
    #[serde(
        default = "default_limit",
        deserialize_with = "limit_number",
        skip_serializing_if = "is_default_limit"
    )]
    pub limit: u64,
}

/// Explicit `offset` accepted by the list endpoints next to the filter.
#[derive(Debug, Default, Deserialize)]
pub struct OffsetQuery {
    #[serde(default, deserialize_with = "offset_number")]
    pub offset: Option<u64>,
}

impl Default for ListFilter {
    fn default() -> Self {
        ListFilter {
            stage: None,
            status: None,
            severity: None,
            start_date: None,
            end_date: None,
            page: first_page(),
            limit: default_limit(),
        }
    }
}

impl ListFilter {
    pub fn from_query_string(query: &str) -> Result<Self> {
        serde_urlencoded::from_str(query.trim_start_matches('?'))
            .map_err(|error| Error::Validation(format!("INVALID_QUERY: {error}")))
    }
    pub fn to_query_string(&self) -> String {
        serde_urlencoded::to_string(self).unwrap_or_default()
    }

    pub fn with_stage(self, stage: Option<Stage>) -> Self {
        ListFilter { stage, page: 1, ..self }
    }
    pub fn with_status(self, status: Option<OccurrenceStatus>) -> Self {
        ListFilter { status, page: 1, ..self }
    }
    pub fn with_severity(self, severity: Option<Severity>) -> Self {
        ListFilter { severity, page: 1, ..self }
    }
    pub fn with_date_range(self, start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Self {
        ListFilter {
            start_date,
            end_date,
            page: 1,
            ..self
        }
    }
    pub fn with_page(self, page: u64) -> Self {
        ListFilter {
            page: page.clamp(1, MAX_PAGE),
            ..self
        }
    }
    /// Clears every filter field, keeping the page size.
    pub fn reset(self) -> Self {
        ListFilter {
            limit: self.limit,
            ..ListFilter::default()
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page.max(1) - 1)
            .saturating_mul(self.limit)
            .min(MAX_OFFSET)
    }
    pub fn resolve_offset(&self, explicit: Option<u64>) -> u64 {
        explicit.map_or_else(|| self.offset(), |offset| offset.min(MAX_OFFSET))
    }
    /// `$skip` and `$limit` stages for one page starting at `offset`.
    pub fn window(&self, offset: u64) -> Result<[Document; 2]> {
        let skip =
            i64::try_from(offset).map_err(|_| Error::Validation("OFFSET_OUT_OF_RANGE".to_string()))?;
        let limit = self.limit.clamp(1, MAX_LIMIT) as i64;
        Ok([doc! { "$skip": skip }, doc! { "$limit": limit }])
    }

    /// Adds `field` bounds for the date range. The end date is inclusive.
    pub fn apply_date_range(&self, field: &str, filter: &mut Document) {
        let mut bounds = Document::new();
        if let Some(start) = self.start_date.and_then(start_of_day) {
            bounds.insert("$gte", start);
        }
        if let Some(end) = self
            .end_date
            .and_then(|end| end.checked_add_signed(Duration::days(1)))
            .and_then(start_of_day)
        {
            bounds.insert("$lt", end);
        }
        if !bounds.is_empty() {
            filter.insert(field, bounds);
        }
    }
}

fn start_of_day(date: NaiveDate) -> Option<DateTime> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(DateTime::from_millis(
        Utc.from_utc_datetime(&midnight).timestamp_millis(),
    ))
}

/// `{total, limit, offset}` plus page navigation for list responses.
#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub page: u64,
    pub pages: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl Pagination {
    pub fn new(filter: &ListFilter, offset: u64, total: u64) -> Self {
        let limit = filter.limit.max(1);
        let page = (offset / limit).saturating_add(1);
        let pages = total.div_ceil(limit);

        Pagination {
            total,
            limit,
            offset,
            page,
            pages,
            next: (offset.saturating_add(limit) < total)
                .then(|| filter.clone().with_page(page.saturating_add(1)).to_query_string()),
            previous: (page > 1).then(|| filter.clone().with_page(page - 1).to_query_string()),
        }
    }
}

fn first_page() -> u64 {
    1
}
fn is_first_page(page: &u64) -> bool {
    *page == 1
}
fn default_limit() -> u64 {
    DEFAULT_LIMIT
}
fn is_default_limit(limit: &u64) -> bool {
    *limit == DEFAULT_LIMIT
}

/// Missing and empty values are both "not set".
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(de::Error::custom),
    }
}

fn page_number<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let page = present::<D, u64>(deserializer)?.unwrap_or(1).max(1);
    if page > MAX_PAGE {
        return Err(de::Error::custom("PAGE_OUT_OF_RANGE"));
    }
    Ok(page)
}

fn offset_number<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match present::<D, u64>(deserializer)? {
        Some(offset) if offset > MAX_OFFSET => Err(de::Error::custom("OFFSET_OUT_OF_RANGE")),
        offset => Ok(offset),
    }
}

fn limit_number<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(present::<D, u64>(deserializer)?
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_stage_filter() {
        let filter = ListFilter::default().with_stage(Some(Stage::Analysis));
        let query = filter.to_query_string();

        assert_eq!(query, "stage=analysis");
        assert_eq!(ListFilter::from_query_string(&query).unwrap(), filter);
    }

    #[test]
    fn empty_filter_serializes_to_empty_query() {
        assert_eq!(ListFilter::default().to_query_string(), "");
        assert_eq!(ListFilter::from_query_string("").unwrap(), ListFilter::default());
    }

    #[test]
    fn writes_only_present_fields_in_camel_case() {
        let filter = ListFilter::default()
            .with_status(Some(OccurrenceStatus::InProgress))
            .with_date_range(NaiveDate::from_ymd_opt(2026, 1, 2), None)
            .with_page(3);

        assert_eq!(filter.to_query_string(), "status=in_progress&startDate=2026-01-02&page=3");
    }

    #[test]
    fn empty_values_are_treated_as_absent() {
        let filter =
            ListFilter::from_query_string("?stage=&severity=high&startDate=&page=&limit=25").unwrap();

        assert_eq!(filter.stage, None);
        assert_eq!(filter.severity, Some(Severity::High));
        assert_eq!(filter.start_date, None);
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, 25);
    }

    #[test]
    fn rejects_unknown_enum_values() {
        assert!(matches!(
            ListFilter::from_query_string("stage=archived"),
            Err(Error::Validation(_))
        ));
        assert!(ListFilter::from_query_string("startDate=yesterday").is_err());
    }

    #[test]
    fn changing_a_filter_resets_the_page() {
        let filter = ListFilter::default().with_page(4);
        assert_eq!(filter.offset(), 30);

        let filter = filter.with_severity(Some(Severity::Critical));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.offset(), 0);

        let reset = filter.with_page(2).reset();
        assert_eq!(reset, ListFilter::default());
    }

    #[test]
    fn clamps_limit_and_page() {
        let filter = ListFilter::from_query_string("limit=1000&page=0").unwrap();
        assert_eq!(filter.limit, MAX_LIMIT);
        assert_eq!(filter.page, 1);
        assert_eq!(filter.resolve_offset(Some(7)), 7);
    }

    #[test]
    fn out_of_range_page_and_offset_are_rejected() {
        assert!(matches!(
            ListFilter::from_query_string("page=18446744073709551615"),
            Err(Error::Validation(_))
        ));
        let last = ListFilter::from_query_string(&format!("page={MAX_PAGE}&limit=100")).unwrap();
        assert!(last.offset() <= MAX_OFFSET);

        let offset: std::result::Result<OffsetQuery, _> =
            serde_urlencoded::from_str("offset=18446744073709551615");
        assert!(offset.is_err());
        let offset: OffsetQuery = serde_urlencoded::from_str("offset=40").unwrap();
        assert_eq!(offset.offset, Some(40));
    }

    #[test]
    fn offset_math_saturates() {
        let filter = ListFilter {
            page: u64::MAX,
            limit: MAX_LIMIT,
            ..ListFilter::default()
        };
        assert_eq!(filter.offset(), MAX_OFFSET);
        assert_eq!(filter.resolve_offset(Some(u64::MAX)), MAX_OFFSET);
        assert!(filter.window(filter.offset()).is_ok());
        assert!(matches!(filter.window(u64::MAX), Err(Error::Validation(_))));

        let pagination = Pagination::new(&ListFilter::default(), u64::MAX, 3);
        assert_eq!(pagination.next, None);
        assert_eq!(pagination.pages, 1);
        assert!(pagination.previous.is_some());
    }

    #[test]
    fn end_date_is_inclusive() {
        let filter = ListFilter::default().with_date_range(
            NaiveDate::from_ymd_opt(2026, 3, 1),
            NaiveDate::from_ymd_opt(2026, 3, 31),
        );
        let mut query = doc! { "deleted_at": null };
        filter.apply_date_range("created_at", &mut query);

        let bounds = query.get_document("created_at").unwrap();
        let start = bounds.get_datetime("$gte").unwrap();
        let end = bounds.get_datetime("$lt").unwrap();
        assert_eq!(
            start.timestamp_millis(),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap().timestamp_millis()
        );
        assert_eq!(
            end.timestamp_millis(),
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn paginates_with_navigation_links() {
        let filter = ListFilter::default().with_stage(Some(Stage::Review)).with_page(2);
        let pagination = Pagination::new(&filter, filter.offset(), 25);

        assert_eq!(pagination.page, 2);
        assert_eq!(pagination.pages, 3);
        assert_eq!(pagination.offset, 10);
        assert_eq!(pagination.next.as_deref(), Some("stage=review&page=3"));
        assert_eq!(pagination.previous.as_deref(), Some("stage=review"));

        let last = Pagination::new(&filter, 20, 25);
        assert_eq!(last.next, None);

        let empty = Pagination::new(&ListFilter::default(), 0, 0);
        assert_eq!(empty.pages, 0);
        assert_eq!(empty.previous, None);
    }
}
