//! Dashboard statistics: per-bucket counts over closed enums.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::{
    occurrence::{OccurrenceStatus, Severity},
    stage::Stage,
};

/// A closed set of values records can be grouped by.
pub trait Bucket: Copy + Ord + Serialize + 'static {
    const ALL: &'static [Self];
}

impl Bucket for Stage {
    const ALL: &'static [Self] = &Stage::ALL;
}
impl Bucket for OccurrenceStatus {
    const ALL: &'static [Self] = &OccurrenceStatus::ALL;
}
impl Bucket for Severity {
    const ALL: &'static [Self] = &Severity::ALL;
}

/// Count of records per bucket. Every known bucket is present, zero included.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Tally<K: Bucket> {
    pub total: u64,
    #[serde(flatten)]
    counts: BTreeMap<K, u64>,
}

impl<K: Bucket> Tally<K> {
    pub fn new() -> Self {
        Tally {
            total: 0,
            counts: K::ALL.iter().map(|key| (*key, 0)).collect(),
        }
    }
    pub fn add(&mut self, key: K) {
        *self.counts.entry(key).or_insert(0) += 1;
        self.total += 1;
    }
    pub fn get(&self, key: K) -> u64 {
        self.counts.get(&key).copied().unwrap_or(0)
    }
    /// Share of `key` in percent; 0 for an empty tally.
    pub fn percent_of_total(&self, key: K) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.get(key) as f64 * 100.0 / self.total as f64
    }
    pub fn rounded_percent(&self, key: K) -> u64 {
        self.percent_of_total(key).round() as u64
    }
}

impl<K: Bucket> Default for Tally<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Bucket> FromIterator<K> for Tally<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut tally = Tally::new();
        for key in iter {
            tally.add(key);
        }
        tally
    }
}

/// Records created in the current calendar week (from Monday) and month, UTC.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recency {
    pub this_week: u64,
    pub this_month: u64,
}

impl Recency {
    pub fn count<I>(timestamps: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let today = now.date_naive();
        let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let month_start = today.with_day(1).unwrap_or(today);
        let midnight =
            |date: NaiveDate| date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        let (week_start, month_start) = (midnight(week_start), midnight(month_start));

        let mut recency = Recency::default();
        for timestamp in timestamps {
            if timestamp > now {
                continue;
            }
            if week_start.is_some_and(|start| timestamp >= start) {
                recency.this_week += 1;
            }
            if month_start.is_some_and(|start| timestamp >= start) {
                recency.this_month += 1;
            }
        }
        recency
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InvestigationStatistics {
    #[serde(flatten)]
    pub stages: Tally<Stage>,
    #[serde(flatten)]
    pub recency: Recency,
}

impl InvestigationStatistics {
    pub fn from_records<I>(records: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (Stage, DateTime<Utc>)>,
    {
        let (stages, created): (Vec<Stage>, Vec<DateTime<Utc>>) = records.into_iter().unzip();
        InvestigationStatistics {
            stages: stages.into_iter().collect(),
            recency: Recency::count(created, now),
        }
    }
    pub fn in_progress(&self) -> u64 {
        [
            Stage::DataCollection,
            Stage::Analysis,
            Stage::Recommendations,
            Stage::Review,
        ]
        .into_iter()
        .map(|stage| self.stages.get(stage))
        .sum()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OccurrenceStatistics {
    #[serde(flatten)]
    pub statuses: Tally<OccurrenceStatus>,
    pub severity: Tally<Severity>,
    pub high_severity: u64,
    #[serde(flatten)]
    pub recency: Recency,
}

impl OccurrenceStatistics {
    pub fn from_records<I>(records: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (OccurrenceStatus, Severity, DateTime<Utc>)>,
    {
        let mut statuses = Tally::new();
        let mut severity = Tally::new();
        let mut created = Vec::new();
        for (status, level, created_at) in records {
            statuses.add(status);
            severity.add(level);
            created.push(created_at);
        }

        OccurrenceStatistics {
            high_severity: severity.get(Severity::High) + severity.get(Severity::Critical),
            statuses,
            severity,
            recency: Recency::count(created, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn counts_each_bucket_and_total() {
        let tally: Tally<Stage> = [Stage::Analysis, Stage::Analysis, Stage::Review]
            .into_iter()
            .collect();

        assert_eq!(tally.get(Stage::Analysis), 2);
        assert_eq!(tally.get(Stage::Review), 1);
        assert_eq!(tally.get(Stage::Completed), 0);
        assert_eq!(tally.total, 3);
        assert_eq!(tally.rounded_percent(Stage::Analysis), 67);
    }

    #[test]
    fn empty_tally_is_all_zero_and_never_nan() {
        let tally: Tally<Stage> = Tally::new();

        assert_eq!(tally.total, 0);
        for stage in Stage::ALL {
            assert_eq!(tally.get(stage), 0);
            assert_eq!(tally.percent_of_total(stage), 0.0);
        }
        assert!(!tally.percent_of_total(Stage::Completed).is_nan());
    }

    #[test]
    fn serializes_flat_with_every_stage() {
        let tally: Tally<Stage> = [Stage::NotStarted].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&tally).unwrap(),
            json!({
                "total": 1,
                "not_started": 1,
                "data_collection": 0,
                "analysis": 0,
                "recommendations": 0,
                "review": 0,
                "completed": 0,
            })
        );
    }

    #[test]
    fn recency_uses_calendar_week_and_month() {
        // Wednesday 2026-10-14
        let now = at(2026, 10, 14, 12);
        let recency = Recency::count(
            [
                at(2026, 10, 12, 0),  // Monday this week
                at(2026, 10, 11, 23), // Sunday last week
                at(2026, 10, 1, 0),   // first of month
                at(2026, 9, 30, 23),  // last month
                at(2026, 10, 20, 0),  // future, ignored
            ],
            now,
        );

        assert_eq!(recency, Recency { this_week: 1, this_month: 3 });
    }

    #[test]
    fn investigation_statistics_group_stage_and_recency() {
        let now = at(2026, 10, 14, 12);
        let stats = InvestigationStatistics::from_records(
            [
                (Stage::Analysis, at(2026, 10, 13, 9)),
                (Stage::Review, at(2026, 8, 1, 9)),
                (Stage::Completed, at(2026, 10, 2, 9)),
            ],
            now,
        );

        assert_eq!(stats.stages.total, 3);
        assert_eq!(stats.in_progress(), 2);
        assert_eq!(stats.recency, Recency { this_week: 1, this_month: 2 });

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["this_week"], 1);
        assert_eq!(value["completed"], 1);
    }

    #[test]
    fn occurrence_statistics_count_high_severity() {
        let now = at(2026, 10, 14, 12);
        let stats = OccurrenceStatistics::from_records(
            [
                (OccurrenceStatus::New, Severity::Critical, now),
                (OccurrenceStatus::New, Severity::High, now),
                (OccurrenceStatus::Closed, Severity::Low, now),
            ],
            now,
        );

        assert_eq!(stats.statuses.total, 3);
        assert_eq!(stats.statuses.get(OccurrenceStatus::New), 2);
        assert_eq!(stats.high_severity, 2);
        assert_eq!(stats.severity.get(Severity::Medium), 0);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["under_investigation"], 0);
        assert_eq!(value["severity"]["critical"], 1);
    }
}
