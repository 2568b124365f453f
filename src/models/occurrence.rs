use crate::{
    database::{get_db, next_sequence},
    error::{Error, Result},
};
use chrono::{Datelike, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, from_document, oid::ObjectId, Bson, DateTime, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection, Database,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

use super::{
    aircraft::{Aircraft, AircraftResponse},
    filter::ListFilter,
    investigation::{Investigation, InvestigationSummary},
    parse_optional_id,
    profile::{PersonSummary, Profile},
    stats::OccurrenceStatistics,
    to_bson, to_utc,
};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    New,
    InProgress,
    UnderInvestigation,
    Closed,
}
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Occurrence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub occurrence_number: String,
    pub title: String,
    pub description: String,
    pub occurrence_date: DateTime,
    pub location: String,
    pub status: OccurrenceStatus,
    pub severity: Severity,
    pub occurrence_type: String,
    pub reporter_id: ObjectId,
    pub aircraft_id: Option<ObjectId>,
    pub assigned_to: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,
}
#[derive(Debug, Deserialize)]
pub struct OccurrenceRequest {
    pub title: String,
    pub description: String,
    pub occurrence_date: chrono::DateTime<Utc>,
    pub location: String,
    pub severity: Severity,
    pub occurrence_type: String,
    pub aircraft_id: Option<String>,
}
#[derive(Debug, Default, Deserialize)]
pub struct OccurrenceUpdateRequest {
    pub status: Option<OccurrenceStatus>,
    pub severity: Option<Severity>,
    /// An empty string clears the assignment.
    pub assigned_to: Option<String>,
}
#[derive(Debug, Serialize)]
pub struct OccurrenceResponse {
    pub id: String,
    pub occurrence_number: String,
    pub title: String,
    pub description: String,
    pub occurrence_date: chrono::DateTime<Utc>,
    pub location: String,
    pub status: OccurrenceStatus,
    pub status_label: &'static str,
    pub severity: Severity,
    pub severity_label: &'static str,
    pub occurrence_type: String,
    pub reporter_id: String,
    pub aircraft_id: Option<String>,
    pub assigned_to: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub reporter: Option<PersonSummary>,
    pub aircraft: Option<AircraftResponse>,
    pub assigned_user: Option<PersonSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigations: Option<Vec<InvestigationSummary>>,
}

/// The occurrence fields shown next to an investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccurrenceBrief {
    #[serde(
        rename(deserialize = "_id"),
        serialize_with = "mongodb::bson::serde_helpers::serialize_object_id_as_hex_string"
    )]
    pub id: ObjectId,
    pub occurrence_number: String,
    pub title: String,
    #[serde(serialize_with = "mongodb::bson::serde_helpers::serialize_bson_datetime_as_rfc3339_string")]
    pub occurrence_date: DateTime,
    pub location: String,
    pub severity: Severity,
    pub occurrence_type: String,
}

/// Records joined onto a batch of occurrences.
#[derive(Debug, Default)]
pub struct OccurrenceRelations {
    pub people: HashMap<ObjectId, PersonSummary>,
    pub aircraft: HashMap<ObjectId, AircraftResponse>,
    pub investigations: Option<HashMap<ObjectId, Vec<InvestigationSummary>>>,
}

#[derive(Deserialize)]
struct OccurrenceStatRecord {
    status: OccurrenceStatus,
    severity: Severity,
    created_at: DateTime,
}

impl OccurrenceStatus {
    pub const ALL: [OccurrenceStatus; 4] = [
        OccurrenceStatus::New,
        OccurrenceStatus::InProgress,
        OccurrenceStatus::UnderInvestigation,
        OccurrenceStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OccurrenceStatus::New => "new",
            OccurrenceStatus::InProgress => "in_progress",
            OccurrenceStatus::UnderInvestigation => "under_investigation",
            OccurrenceStatus::Closed => "closed",
        }
    }
    pub fn label(self) -> &'static str {
        match self {
            OccurrenceStatus::New => "New",
            OccurrenceStatus::InProgress => "In Progress",
            OccurrenceStatus::UnderInvestigation => "Under Investigation",
            OccurrenceStatus::Closed => "Closed",
        }
    }
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for OccurrenceStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        OccurrenceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| Error::Validation(format!("UNKNOWN_STATUS: {value}")))
    }
}
impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for Severity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str() == value)
            .ok_or_else(|| Error::Validation(format!("UNKNOWN_SEVERITY: {value}")))
    }
}

impl OccurrenceRequest {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("TITLE", &self.title),
            ("DESCRIPTION", &self.description),
            ("LOCATION", &self.location),
            ("OCCURRENCE_TYPE", &self.occurrence_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("OCCURRENCE_MUST_HAVE_{field}")));
            }
        }
        if self.occurrence_date > Utc::now() {
            return Err(Error::Validation(
                "OCCURRENCE_DATE_IN_FUTURE".to_string(),
            ));
        }
        Ok(())
    }
    pub fn into_occurrence(self, reporter_id: ObjectId) -> Result<Occurrence> {
        self.validate()?;
        let now = DateTime::now();

        Ok(Occurrence {
            _id: None,
            occurrence_number: String::new(),
            title: self.title.trim().to_string(),
            description: self.description,
            occurrence_date: to_bson(self.occurrence_date),
            location: self.location.trim().to_string(),
            status: OccurrenceStatus::New,
            severity: self.severity,
            occurrence_type: self.occurrence_type.trim().to_string(),
            reporter_id,
            aircraft_id: parse_optional_id(self.aircraft_id.as_deref())?,
            assigned_to: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

impl OccurrenceUpdateRequest {
    pub fn to_document(&self, now: DateTime) -> Result<Document> {
        let mut set = Document::new();
        if let Some(status) = self.status {
            set.insert("status", status.as_str());
        }
        if let Some(severity) = self.severity {
            set.insert("severity", severity.as_str());
        }
        if let Some(assigned_to) = &self.assigned_to {
            set.insert("assigned_to", parse_optional_id(Some(assigned_to.as_str()))?);
        }
        if set.is_empty() {
            return Err(Error::Validation("NOTHING_TO_UPDATE".to_string()));
        }
        set.insert("updated_at", now);
        Ok(doc! { "$set": set })
    }
}

pub fn format_number(year: i32, sequence: i64) -> String {
    format!("OCC-{year}-{sequence:04}")
}

/// `$match` stage for the occurrence list. Soft-deleted records are hidden.
pub fn list_match(filter: &ListFilter) -> Document {
    let mut query = doc! { "deleted_at": Bson::Null };
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(severity) = filter.severity {
        query.insert("severity", severity.as_str());
    }
    filter.apply_date_range("occurrence_date", &mut query);
    query
}

impl Occurrence {
    pub async fn save(&mut self) -> Result<ObjectId> {
        let db: Database = get_db()?;
        let collection: Collection<Occurrence> = db.collection::<Occurrence>("occurrences");

        let year = to_utc(self.created_at).year();
        let sequence = next_sequence(&format!("occurrence-{year}")).await?;
        self.occurrence_number = format_number(year, sequence);

        let id = ObjectId::new();
        self._id = Some(id);
        collection.insert_one(&*self, None).await?;
        tracing::info!(number = %self.occurrence_number, "occurrence reported");
        Ok(id)
    }
    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<Occurrence>> {
        let db: Database = get_db()?;
        let collection: Collection<Occurrence> = db.collection::<Occurrence>("occurrences");

        Ok(collection
            .find_one(doc! { "_id": _id, "deleted_at": Bson::Null }, None)
            .await?)
    }
    pub async fn exists(_id: &ObjectId) -> Result<bool> {
        Ok(Occurrence::find_by_id(_id).await?.is_some())
    }
    pub async fn find_many(filter: &ListFilter, offset: u64) -> Result<(Vec<Occurrence>, u64)> {
        let db: Database = get_db()?;
        let collection: Collection<Occurrence> = db.collection::<Occurrence>("occurrences");

        let query = list_match(filter);
        let total = collection.count_documents(query.clone(), None).await?;

        let [skip, limit] = filter.window(offset)?;
        let pipeline = vec![
            doc! { "$match": query },
            doc! { "$sort": { "created_at": -1 } },
            skip,
            limit,
        ];
        let mut cursor = collection.aggregate(pipeline, None).await?;
        let mut occurrences: Vec<Occurrence> = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            occurrences.push(from_document::<Occurrence>(doc)?);
        }
        Ok((occurrences, total))
    }
    pub async fn statistics() -> Result<OccurrenceStatistics> {
        let db: Database = get_db()?;
        let collection: Collection<OccurrenceStatRecord> =
            db.collection::<OccurrenceStatRecord>("occurrences");

        let options = FindOptions::builder()
            .projection(doc! { "status": 1, "severity": 1, "created_at": 1 })
            .build();
        let records: Vec<OccurrenceStatRecord> = collection
            .find(doc! { "deleted_at": Bson::Null }, options)
            .await?
            .try_collect()
            .await?;

        Ok(OccurrenceStatistics::from_records(
            records
                .into_iter()
                .map(|r| (r.status, r.severity, to_utc(r.created_at))),
            Utc::now(),
        ))
    }
    pub async fn update(_id: &ObjectId, update: &OccurrenceUpdateRequest) -> Result<Option<Occurrence>> {
        let db: Database = get_db()?;
        let collection: Collection<Occurrence> = db.collection::<Occurrence>("occurrences");

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(collection
            .find_one_and_update(
                doc! { "_id": _id, "deleted_at": Bson::Null },
                update.to_document(DateTime::now())?,
                options,
            )
            .await?)
    }
    pub async fn set_status(_id: &ObjectId, status: OccurrenceStatus) -> Result<()> {
        let db: Database = get_db()?;
        let collection: Collection<Occurrence> = db.collection::<Occurrence>("occurrences");

        collection
            .update_one(
                doc! { "_id": _id },
                doc! { "$set": { "status": status.as_str(), "updated_at": DateTime::now() } },
                None,
            )
            .await?;
        Ok(())
    }
    pub async fn find_briefs(ids: &[ObjectId]) -> Result<HashMap<ObjectId, OccurrenceBrief>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db: Database = get_db()?;
        let collection: Collection<OccurrenceBrief> =
            db.collection::<OccurrenceBrief>("occurrences");

        let options = FindOptions::builder()
            .projection(doc! {
                "occurrence_number": 1,
                "title": 1,
                "occurrence_date": 1,
                "location": 1,
                "severity": 1,
                "occurrence_type": 1,
            })
            .build();
        let briefs: Vec<OccurrenceBrief> = collection
            .find(doc! { "_id": { "$in": ids.to_vec() } }, options)
            .await?
            .try_collect()
            .await?;

        Ok(briefs.into_iter().map(|brief| (brief.id, brief)).collect())
    }
    /// Supplementary details document, rendered as relaxed extended JSON.
    pub async fn find_details(occurrence_id: &ObjectId) -> Result<Option<serde_json::Value>> {
        let db: Database = get_db()?;
        let collection: Collection<Document> = db.collection::<Document>("occurrence-details");

        Ok(collection
            .find_one(doc! { "occurrence_id": occurrence_id }, None)
            .await?
            .map(|details| Bson::Document(details).into_relaxed_extjson()))
    }

    /// Loads reporters, assignees, aircraft and optionally investigations.
    pub async fn load_relations(
        occurrences: &[Occurrence],
        with_investigations: bool,
    ) -> Result<OccurrenceRelations> {
        let mut people: Vec<ObjectId> = Vec::new();
        let mut aircraft: Vec<ObjectId> = Vec::new();
        let mut ids: Vec<ObjectId> = Vec::new();
        for occurrence in occurrences {
            people.push(occurrence.reporter_id);
            people.extend(occurrence.assigned_to);
            aircraft.extend(occurrence.aircraft_id);
            ids.extend(occurrence._id);
        }
        people.sort();
        people.dedup();

        Ok(OccurrenceRelations {
            people: Profile::find_summaries(&people).await?,
            aircraft: Aircraft::find_summaries(&aircraft).await?,
            investigations: if with_investigations {
                Some(Investigation::summaries_by_occurrence(&ids).await?)
            } else {
                None
            },
        })
    }
}

impl OccurrenceResponse {
    pub fn new(occurrence: Occurrence, relations: &OccurrenceRelations) -> Self {
        let id = occurrence._id;
        OccurrenceResponse {
            id: id.map(|id| id.to_hex()).unwrap_or_default(),
            reporter: relations.people.get(&occurrence.reporter_id).cloned(),
            assigned_user: occurrence
                .assigned_to
                .and_then(|person| relations.people.get(&person).cloned()),
            aircraft: occurrence
                .aircraft_id
                .and_then(|aircraft| relations.aircraft.get(&aircraft).cloned()),
            investigations: relations.investigations.as_ref().map(|by_occurrence| {
                id.and_then(|id| by_occurrence.get(&id).cloned())
                    .unwrap_or_default()
            }),
            occurrence_number: occurrence.occurrence_number,
            title: occurrence.title,
            description: occurrence.description,
            occurrence_date: to_utc(occurrence.occurrence_date),
            location: occurrence.location,
            status: occurrence.status,
            status_label: occurrence.status.label(),
            severity: occurrence.severity,
            severity_label: occurrence.severity.label(),
            occurrence_type: occurrence.occurrence_type,
            reporter_id: occurrence.reporter_id.to_hex(),
            aircraft_id: occurrence.aircraft_id.map(|id| id.to_hex()),
            assigned_to: occurrence.assigned_to.map(|id| id.to_hex()),
            created_at: to_utc(occurrence.created_at),
            updated_at: to_utc(occurrence.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request() -> OccurrenceRequest {
        OccurrenceRequest {
            title: "  Bird strike on departure ".to_string(),
            description: "Single bird ingested in engine #2 during rotation.".to_string(),
            occurrence_date: Utc::now() - Duration::hours(3),
            location: "EGLL".to_string(),
            severity: Severity::High,
            occurrence_type: "bird_strike".to_string(),
            aircraft_id: None,
        }
    }

    #[test]
    fn new_reports_start_as_new() {
        let reporter = ObjectId::new();
        let occurrence = request().into_occurrence(reporter).unwrap();

        assert_eq!(occurrence.status, OccurrenceStatus::New);
        assert_eq!(occurrence.title, "Bird strike on departure");
        assert_eq!(occurrence.reporter_id, reporter);
        assert!(occurrence.deleted_at.is_none());
    }

    #[test]
    fn rejects_incomplete_or_future_reports() {
        let mut missing_title = request();
        missing_title.title = " ".to_string();
        assert!(matches!(
            missing_title.into_occurrence(ObjectId::new()),
            Err(Error::Validation(message)) if message == "OCCURRENCE_MUST_HAVE_TITLE"
        ));

        let mut future = request();
        future.occurrence_date = Utc::now() + Duration::days(2);
        assert!(future.validate().is_err());

        let mut bad_aircraft = request();
        bad_aircraft.aircraft_id = Some("G-ABCD".to_string());
        assert!(bad_aircraft.into_occurrence(ObjectId::new()).is_err());
    }

    #[test]
    fn formats_human_readable_numbers() {
        assert_eq!(format_number(2026, 7), "OCC-2026-0007");
        assert_eq!(format_number(2026, 12345), "OCC-2026-12345");
    }

    #[test]
    fn builds_list_match_from_filter() {
        let filter = ListFilter::default()
            .with_status(Some(OccurrenceStatus::UnderInvestigation))
            .with_severity(Some(Severity::Critical));
        let query = list_match(&filter);

        assert_eq!(query.get_str("status").unwrap(), "under_investigation");
        assert_eq!(query.get_str("severity").unwrap(), "critical");
        assert!(query.contains_key("deleted_at"));
        assert!(!query.contains_key("occurrence_date"));
    }

    #[test]
    fn update_sets_only_given_fields() {
        let update = OccurrenceUpdateRequest {
            status: Some(OccurrenceStatus::Closed),
            assigned_to: Some(String::new()),
            ..Default::default()
        };
        let document = update.to_document(DateTime::now()).unwrap();
        let set = document.get_document("$set").unwrap();

        assert_eq!(set.get_str("status").unwrap(), "closed");
        assert_eq!(set.get("assigned_to"), Some(&Bson::Null));
        assert!(!set.contains_key("severity"));
        assert!(set.contains_key("updated_at"));

        assert!(OccurrenceUpdateRequest::default()
            .to_document(DateTime::now())
            .is_err());
    }

    #[test]
    fn response_joins_related_records() {
        let reporter = ObjectId::new();
        let mut occurrence = request().into_occurrence(reporter).unwrap();
        occurrence._id = Some(ObjectId::new());

        let mut relations = OccurrenceRelations::default();
        relations.people.insert(
            reporter,
            PersonSummary {
                id: reporter.to_hex(),
                full_name: "Ana Lima".to_string(),
                email: "ana@example.org".to_string(),
            },
        );
        relations.investigations = Some(HashMap::new());

        let response = OccurrenceResponse::new(occurrence, &relations);
        assert_eq!(response.reporter.unwrap().full_name, "Ana Lima");
        assert_eq!(response.status_label, "New");
        assert_eq!(response.severity_label, "High");
        assert!(response.aircraft.is_none());
        assert_eq!(response.investigations.map(|i| i.len()), Some(0));
    }
}
