use crate::{
    database::get_db,
    error::{is_duplicate_key, Error, Result},
};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, from_document, oid::ObjectId, Bson, DateTime, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection, Database,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{
    filter::ListFilter,
    nullable,
    occurrence::{Occurrence, OccurrenceBrief, OccurrenceResponse},
    parse_id, parse_optional_id,
    profile::{PersonSummary, Profile},
    stage::{ProgressTracker, Stage},
    stats::InvestigationStatistics,
    to_bson, to_utc,
};

#[derive(Debug, Deserialize, Serialize)]
pub struct Investigation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub occurrence_id: ObjectId,
    pub stage: Stage,
    pub lead_investigator_id: Option<ObjectId>,
    pub findings: Option<String>,
    pub root_causes: Option<String>,
    pub contributing_factors: Option<String>,
    pub recommendations: Option<String>,
    pub started_at: Option<DateTime>,
    pub completed_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,
    #[serde(default)]
    pub revision: i64,
}
#[derive(Debug, Deserialize)]
pub struct InvestigationRequest {
    pub occurrence_id: String,
    pub lead_investigator_id: Option<String>,
}
#[derive(Debug, Default, Deserialize)]
pub struct InvestigationUpdate {
    pub stage: Option<Stage>,
    #[serde(default, deserialize_with = "nullable")]
    pub lead_investigator_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub findings: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub root_causes: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub contributing_factors: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub recommendations: Option<Option<String>>,
    pub revision: Option<i64>,
}
#[derive(Debug, Clone, Serialize)]
pub struct InvestigationResponse {
    pub id: String,
    pub occurrence_id: String,
    pub occurrence: Option<OccurrenceBrief>,
    pub stage: Stage,
    pub stage_label: &'static str,
    pub lead_investigator_id: Option<String>,
    pub lead_investigator: Option<PersonSummary>,
    pub findings: Option<String>,
    pub root_causes: Option<String>,
    pub contributing_factors: Option<String>,
    pub recommendations: Option<String>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub revision: i64,
}
/// Investigation reference embedded in occurrence responses.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InvestigationSummary {
    pub id: String,
    pub stage: Stage,
    pub stage_label: &'static str,
    pub lead_investigator_id: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Scheduled,
    Completed,
    Cancelled,
}
#[derive(Debug, Deserialize, Serialize)]
pub struct Interview {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub investigation_id: ObjectId,
    pub date: DateTime,
    pub interviewee: String,
    pub summary: Option<String>,
    pub status: InterviewStatus,
    pub created_by: ObjectId,
    pub created_at: DateTime,
}
#[derive(Debug, Deserialize)]
pub struct InterviewRequest {
    pub date: chrono::DateTime<Utc>,
    pub interviewee: String,
    pub summary: Option<String>,
    pub status: Option<InterviewStatus>,
}
#[derive(Debug, Serialize)]
pub struct InterviewResponse {
    pub id: String,
    pub investigation_id: String,
    pub date: chrono::DateTime<Utc>,
    pub interviewee: String,
    pub summary: Option<String>,
    pub status: InterviewStatus,
    pub created_by: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}
#[derive(Debug, Deserialize, Serialize)]
pub struct Communication {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub investigation_id: ObjectId,
    pub date: DateTime,
    pub direction: Direction,
    pub participants: Vec<String>,
    pub subject: String,
    pub summary: Option<String>,
    pub created_by: ObjectId,
    pub created_at: DateTime,
}
#[derive(Debug, Deserialize)]
pub struct CommunicationRequest {
    pub date: chrono::DateTime<Utc>,
    pub direction: Direction,
    #[serde(default)]
    pub participants: Vec<String>,
    pub subject: String,
    pub summary: Option<String>,
}
#[derive(Debug, Serialize)]
pub struct CommunicationResponse {
    pub id: String,
    pub investigation_id: String,
    pub date: chrono::DateTime<Utc>,
    pub direction: Direction,
    pub participants: Vec<String>,
    pub subject: String,
    pub summary: Option<String>,
    pub created_by: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetailTab {
    Overview,
    Findings,
    Interviews,
    Communications,
    Attachments,
    Timeline,
}
#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct TabEntry {
    pub tab: DetailTab,
    pub label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    InvestigationOpened,
    InvestigationStarted,
    InvestigationCompleted,
    Interview,
    Communication,
}
#[derive(Serialize, Debug, PartialEq)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub at: chrono::DateTime<Utc>,
    pub title: String,
}

#[derive(Serialize, Debug)]
pub struct InvestigationDetail {
    pub investigation: InvestigationResponse,
    pub occurrence: Option<OccurrenceResponse>,
    pub occurrence_details: Option<serde_json::Value>,
    pub interviews: Vec<InterviewResponse>,
    pub communications: Vec<CommunicationResponse>,
    pub progress: ProgressTracker,
    pub tabs: Vec<TabEntry>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Serialize, Debug)]
pub struct BoardColumn {
    pub stage: Stage,
    pub label: &'static str,
    pub count: usize,
    pub investigations: Vec<InvestigationResponse>,
}
/// Kanban board: one column per stage, in stage order.
#[derive(Serialize, Debug)]
pub struct Board {
    pub columns: Vec<BoardColumn>,
}

#[derive(Deserialize)]
struct InvestigationStatRecord {
    stage: Stage,
    created_at: DateTime,
}

/// `$match` stage for the investigation list.
pub fn list_match(filter: &ListFilter) -> Document {
    let mut query = doc! { "deleted_at": Bson::Null };
    if let Some(stage) = filter.stage {
        query.insert("stage", stage.as_str());
    }
    filter.apply_date_range("created_at", &mut query);
    query
}

impl InvestigationRequest {
    pub fn into_investigation(self) -> Result<Investigation> {
        let now = DateTime::now();
        Ok(Investigation {
            _id: None,
            occurrence_id: parse_id(&self.occurrence_id)?,
            stage: Stage::NotStarted,
            lead_investigator_id: parse_optional_id(self.lead_investigator_id.as_deref())?,
            findings: None,
            root_causes: None,
            contributing_factors: None,
            recommendations: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            revision: 0,
        })
    }
}

impl InvestigationUpdate {
    /// Builds the update against the stored record. Leaving `not_started` stamps
    /// `started_at` once; reaching `completed` stamps `completed_at`, leaving it clears it.
    pub fn to_document(&self, current: &Investigation, now: DateTime) -> Result<Document> {
        let mut set = Document::new();

        if let Some(stage) = self.stage {
            set.insert("stage", stage.as_str());
            if stage != Stage::NotStarted && current.started_at.is_none() {
                set.insert("started_at", now);
            }
            match stage {
                Stage::Completed if current.completed_at.is_none() => {
                    set.insert("completed_at", now);
                }
                Stage::Completed => {}
                _ => {
                    set.insert("completed_at", Bson::Null);
                }
            }
        }
        if let Some(lead) = &self.lead_investigator_id {
            set.insert("lead_investigator_id", parse_optional_id(lead.as_deref())?);
        }
        let texts = [
            ("findings", &self.findings),
            ("root_causes", &self.root_causes),
            ("contributing_factors", &self.contributing_factors),
            ("recommendations", &self.recommendations),
        ];
        for (field, value) in texts {
            if let Some(value) = value {
                set.insert(field, value.clone());
            }
        }

        if set.is_empty() {
            return Err(Error::Validation("NOTHING_TO_UPDATE".to_string()));
        }
        set.insert("updated_at", now);
        Ok(doc! { "$set": set, "$inc": { "revision": 1_i64 } })
    }
}

impl Investigation {
    pub async fn save(&mut self) -> Result<ObjectId> {
        let db: Database = get_db()?;
        let collection: Collection<Investigation> = db.collection::<Investigation>("investigations");

        let id = ObjectId::new();
        self._id = Some(id);
        match collection.insert_one(&*self, None).await {
            Ok(_) => Ok(id),
            Err(error) if is_duplicate_key(&error) => {
                Err(Error::Conflict("INVESTIGATION_ALREADY_EXISTS".to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<Investigation>> {
        let db: Database = get_db()?;
        let collection: Collection<Investigation> = db.collection::<Investigation>("investigations");

        Ok(collection
            .find_one(doc! { "_id": _id, "deleted_at": Bson::Null }, None)
            .await?)
    }
    pub async fn find_by_occurrence(occurrence_id: &ObjectId) -> Result<Option<Investigation>> {
        let db: Database = get_db()?;
        let collection: Collection<Investigation> = db.collection::<Investigation>("investigations");

        Ok(collection
            .find_one(
                doc! { "occurrence_id": occurrence_id, "deleted_at": Bson::Null },
                None,
            )
            .await?)
    }
    pub async fn find_many(filter: &ListFilter, offset: u64) -> Result<(Vec<Investigation>, u64)> {
        let db: Database = get_db()?;
        let collection: Collection<Investigation> = db.collection::<Investigation>("investigations");

        let query = list_match(filter);
        let total = collection.count_documents(query.clone(), None).await?;

        let [skip, limit] = filter.window(offset)?;
        let pipeline = vec![
            doc! { "$match": query },
            doc! { "$sort": { "updated_at": -1 } },
            skip,
            limit,
        ];
        let mut cursor = collection.aggregate(pipeline, None).await?;
        let mut investigations: Vec<Investigation> = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            investigations.push(from_document::<Investigation>(doc)?);
        }
        Ok((investigations, total))
    }
    /// Every live investigation in the date range, for the board.
    pub async fn find_all(filter: &ListFilter) -> Result<Vec<Investigation>> {
        let db: Database = get_db()?;
        let collection: Collection<Investigation> = db.collection::<Investigation>("investigations");

        let options = FindOptions::builder().sort(doc! { "updated_at": -1 }).build();
        Ok(collection
            .find(list_match(filter), options)
            .await?
            .try_collect()
            .await?)
    }
    pub async fn statistics() -> Result<InvestigationStatistics> {
        let db: Database = get_db()?;
        let collection: Collection<InvestigationStatRecord> =
            db.collection::<InvestigationStatRecord>("investigations");

        let options = FindOptions::builder()
            .projection(doc! { "stage": 1, "created_at": 1 })
            .build();
        let records: Vec<InvestigationStatRecord> = collection
            .find(doc! { "deleted_at": Bson::Null }, options)
            .await?
            .try_collect()
            .await?;

        Ok(InvestigationStatistics::from_records(
            records.into_iter().map(|r| (r.stage, to_utc(r.created_at))),
            Utc::now(),
        ))
    }
    /// A client that sends the revision it read must still be looking at the latest one.
    pub fn check_revision(&self, requested: Option<i64>) -> Result<()> {
        match requested {
            Some(revision) if revision != self.revision => {
                Err(Error::Conflict("INVESTIGATION_REVISION_CONFLICT".to_string()))
            }
            _ => Ok(()),
        }
    }
    /// Applies `update`, rejecting it when the record changed since it was read.
    pub async fn update(_id: &ObjectId, update: &InvestigationUpdate) -> Result<Investigation> {
        let db: Database = get_db()?;
        let collection: Collection<Investigation> = db.collection::<Investigation>("investigations");

        let current = Investigation::find_by_id(_id)
            .await?
            .ok_or_else(|| Error::not_found("INVESTIGATION"))?;
        current.check_revision(update.revision)?;

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        collection
            .find_one_and_update(
                doc! { "_id": _id, "revision": current.revision },
                update.to_document(&current, DateTime::now())?,
                options,
            )
            .await?
            .ok_or_else(|| Error::Conflict("INVESTIGATION_REVISION_CONFLICT".to_string()))
    }
    pub async fn summaries_by_occurrence(
        occurrence_ids: &[ObjectId],
    ) -> Result<HashMap<ObjectId, Vec<InvestigationSummary>>> {
        if occurrence_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db: Database = get_db()?;
        let collection: Collection<Investigation> = db.collection::<Investigation>("investigations");

        let investigations: Vec<Investigation> = collection
            .find(
                doc! {
                    "occurrence_id": { "$in": occurrence_ids.to_vec() },
                    "deleted_at": Bson::Null,
                },
                None,
            )
            .await?
            .try_collect()
            .await?;

        let mut summaries: HashMap<ObjectId, Vec<InvestigationSummary>> = HashMap::new();
        for investigation in &investigations {
            summaries
                .entry(investigation.occurrence_id)
                .or_default()
                .push(InvestigationSummary::from(investigation));
        }
        Ok(summaries)
    }

    /// Joins lead investigators and occurrence briefs onto a batch.
    pub async fn into_responses(investigations: Vec<Investigation>) -> Result<Vec<InvestigationResponse>> {
        let mut leads: Vec<ObjectId> = investigations
            .iter()
            .filter_map(|i| i.lead_investigator_id)
            .collect();
        leads.sort();
        leads.dedup();
        let occurrences: Vec<ObjectId> = investigations.iter().map(|i| i.occurrence_id).collect();

        let people = Profile::find_summaries(&leads).await?;
        let briefs = Occurrence::find_briefs(&occurrences).await?;

        Ok(investigations
            .into_iter()
            .map(|investigation| {
                let lead = investigation
                    .lead_investigator_id
                    .and_then(|id| people.get(&id).cloned());
                let brief = briefs.get(&investigation.occurrence_id).cloned();
                InvestigationResponse::new(investigation, brief, lead)
            })
            .collect())
    }
}

impl From<&Investigation> for InvestigationSummary {
    fn from(investigation: &Investigation) -> Self {
        InvestigationSummary {
            id: investigation._id.map(|id| id.to_hex()).unwrap_or_default(),
            stage: investigation.stage,
            stage_label: investigation.stage.label(),
            lead_investigator_id: investigation.lead_investigator_id.map(|id| id.to_hex()),
            created_at: to_utc(investigation.created_at),
        }
    }
}

impl InvestigationResponse {
    pub fn new(
        investigation: Investigation,
        occurrence: Option<OccurrenceBrief>,
        lead_investigator: Option<PersonSummary>,
    ) -> Self {
        InvestigationResponse {
            id: investigation._id.map(|id| id.to_hex()).unwrap_or_default(),
            occurrence_id: investigation.occurrence_id.to_hex(),
            occurrence,
            stage: investigation.stage,
            stage_label: investigation.stage.label(),
            lead_investigator_id: investigation.lead_investigator_id.map(|id| id.to_hex()),
            lead_investigator,
            findings: investigation.findings,
            root_causes: investigation.root_causes,
            contributing_factors: investigation.contributing_factors,
            recommendations: investigation.recommendations,
            started_at: investigation.started_at.map(to_utc),
            completed_at: investigation.completed_at.map(to_utc),
            created_at: to_utc(investigation.created_at),
            updated_at: to_utc(investigation.updated_at),
            revision: investigation.revision,
        }
    }
}

impl InterviewRequest {
    pub fn into_interview(self, investigation_id: ObjectId, actor: ObjectId) -> Result<Interview> {
        if self.interviewee.trim().is_empty() {
            return Err(Error::Validation("INTERVIEW_MUST_HAVE_INTERVIEWEE".to_string()));
        }
        Ok(Interview {
            _id: None,
            investigation_id,
            date: to_bson(self.date),
            interviewee: self.interviewee.trim().to_string(),
            summary: self.summary,
            status: self.status.unwrap_or(InterviewStatus::Scheduled),
            created_by: actor,
            created_at: DateTime::now(),
        })
    }
}

impl Interview {
    pub async fn save(&mut self) -> Result<ObjectId> {
        let db: Database = get_db()?;
        let collection: Collection<Interview> = db.collection::<Interview>("interviews");

        let id = ObjectId::new();
        self._id = Some(id);
        collection.insert_one(&*self, None).await?;
        Ok(id)
    }
    /// Newest first.
    pub async fn find_by_investigation(investigation_id: &ObjectId) -> Result<Vec<Interview>> {
        let db: Database = get_db()?;
        let collection: Collection<Interview> = db.collection::<Interview>("interviews");

        let options = FindOptions::builder().sort(doc! { "date": -1 }).build();
        Ok(collection
            .find(doc! { "investigation_id": investigation_id }, options)
            .await?
            .try_collect()
            .await?)
    }
}

impl From<Interview> for InterviewResponse {
    fn from(interview: Interview) -> Self {
        InterviewResponse {
            id: interview._id.map(|id| id.to_hex()).unwrap_or_default(),
            investigation_id: interview.investigation_id.to_hex(),
            date: to_utc(interview.date),
            interviewee: interview.interviewee,
            summary: interview.summary,
            status: interview.status,
            created_by: interview.created_by.to_hex(),
            created_at: to_utc(interview.created_at),
        }
    }
}

impl CommunicationRequest {
    pub fn into_communication(self, investigation_id: ObjectId, actor: ObjectId) -> Result<Communication> {
        if self.subject.trim().is_empty() {
            return Err(Error::Validation("COMMUNICATION_MUST_HAVE_SUBJECT".to_string()));
        }
        Ok(Communication {
            _id: None,
            investigation_id,
            date: to_bson(self.date),
            direction: self.direction,
            participants: self
                .participants
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            subject: self.subject.trim().to_string(),
            summary: self.summary,
            created_by: actor,
            created_at: DateTime::now(),
        })
    }
}

impl Communication {
    pub async fn save(&mut self) -> Result<ObjectId> {
        let db: Database = get_db()?;
        let collection: Collection<Communication> = db.collection::<Communication>("communications");

        let id = ObjectId::new();
        self._id = Some(id);
        collection.insert_one(&*self, None).await?;
        Ok(id)
    }
    /// Newest first.
    pub async fn find_by_investigation(investigation_id: &ObjectId) -> Result<Vec<Communication>> {
        let db: Database = get_db()?;
        let collection: Collection<Communication> = db.collection::<Communication>("communications");

        let options = FindOptions::builder().sort(doc! { "date": -1 }).build();
        Ok(collection
            .find(doc! { "investigation_id": investigation_id }, options)
            .await?
            .try_collect()
            .await?)
    }
}

impl From<Communication> for CommunicationResponse {
    fn from(communication: Communication) -> Self {
        CommunicationResponse {
            id: communication._id.map(|id| id.to_hex()).unwrap_or_default(),
            investigation_id: communication.investigation_id.to_hex(),
            date: to_utc(communication.date),
            direction: communication.direction,
            participants: communication.participants,
            subject: communication.subject,
            summary: communication.summary,
            created_by: communication.created_by.to_hex(),
            created_at: to_utc(communication.created_at),
        }
    }
}

impl DetailTab {
    pub const ALL: [DetailTab; 6] = [
        DetailTab::Overview,
        DetailTab::Findings,
        DetailTab::Interviews,
        DetailTab::Communications,
        DetailTab::Attachments,
        DetailTab::Timeline,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DetailTab::Overview => "Overview",
            DetailTab::Findings => "Findings",
            DetailTab::Interviews => "Interviews",
            DetailTab::Communications => "Communications",
            DetailTab::Attachments => "Attachments",
            DetailTab::Timeline => "Timeline",
        }
    }

    pub fn entries(interviews: usize, communications: usize) -> Vec<TabEntry> {
        DetailTab::ALL
            .into_iter()
            .map(|tab| TabEntry {
                tab,
                label: tab.label(),
                count: match tab {
                    DetailTab::Interviews => Some(interviews),
                    DetailTab::Communications => Some(communications),
                    _ => None,
                },
            })
            .collect()
    }
}

/// Events of an investigation, newest first.
pub fn timeline(
    investigation: &InvestigationResponse,
    interviews: &[InterviewResponse],
    communications: &[CommunicationResponse],
) -> Vec<TimelineEntry> {
    let mut entries = vec![TimelineEntry {
        kind: TimelineKind::InvestigationOpened,
        at: investigation.created_at,
        title: "Investigation opened".to_string(),
    }];
    if let Some(at) = investigation.started_at {
        entries.push(TimelineEntry {
            kind: TimelineKind::InvestigationStarted,
            at,
            title: "Investigation started".to_string(),
        });
    }
    if let Some(at) = investigation.completed_at {
        entries.push(TimelineEntry {
            kind: TimelineKind::InvestigationCompleted,
            at,
            title: "Investigation completed".to_string(),
        });
    }
    entries.extend(interviews.iter().map(|interview| TimelineEntry {
        kind: TimelineKind::Interview,
        at: interview.date,
        title: format!("Interview with {}", interview.interviewee),
    }));
    entries.extend(communications.iter().map(|communication| TimelineEntry {
        kind: TimelineKind::Communication,
        at: communication.date,
        title: communication.subject.clone(),
    }));

    entries.sort_by(|a, b| b.at.cmp(&a.at));
    entries
}

impl Board {
    pub fn partition(investigations: Vec<InvestigationResponse>) -> Self {
        let mut columns: Vec<BoardColumn> = Stage::ALL
            .into_iter()
            .map(|stage| BoardColumn {
                stage,
                label: stage.label(),
                count: 0,
                investigations: Vec::new(),
            })
            .collect();

        for investigation in investigations {
            let column = &mut columns[investigation.stage.index()];
            column.count += 1;
            column.investigations.push(investigation);
        }
        Board { columns }
    }
}
