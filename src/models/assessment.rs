use crate::{
    database::get_db,
    error::{is_duplicate_key, Error, Result},
};
use chrono::Utc;
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson, Bson, DateTime, Document},
    options::{FindOneAndUpdateOptions, ReturnDocument},
    Collection, Database,
};
use serde::{Deserialize, Serialize};

use super::{nullable, parse_optional_id, profile::PersonSummary, profile::Profile, to_utc};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    PendingAssessment,
    Invalid,
    Valid,
}
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentClassification {
    Operational,
    Technical,
    Environmental,
    HumanFactors,
    Organizational,
    Other,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OccurrenceAssessment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub occurrence_id: ObjectId,
    pub status: AssessmentStatus,
    pub incident_classification: Option<IncidentClassification>,
    pub reasoning: Option<String>,
    pub assigned_investigator_id: Option<ObjectId>,
    pub date_assigned: Option<DateTime>,
    pub completion_due_date: Option<DateTime>,
    pub assessment_date: Option<DateTime>,
    pub cfi_approved: bool,
    pub cfi_approval_date: Option<DateTime>,
    pub created_by: ObjectId,
    pub updated_by: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    #[serde(default)]
    pub revision: i64,
}

/// Partial update. Nullable fields accept `null` to clear them.
#[derive(Debug, Default, Deserialize)]
pub struct AssessmentUpdate {
    pub status: Option<AssessmentStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub incident_classification: Option<Option<IncidentClassification>>,
    #[serde(default, deserialize_with = "nullable")]
    pub reasoning: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub assigned_investigator_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub date_assigned: Option<Option<chrono::DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub completion_due_date: Option<Option<chrono::DateTime<Utc>>>,
    pub cfi_approved: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub cfi_approval_date: Option<Option<chrono::DateTime<Utc>>>,
    /// Revision the client last read. A mismatch is a conflict.
    pub revision: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AssessmentResponse {
    pub id: String,
    pub occurrence_id: String,
    pub status: AssessmentStatus,
    pub incident_classification: Option<IncidentClassification>,
    pub reasoning: Option<String>,
    pub assigned_investigator_id: Option<String>,
    pub assigned_investigator: Option<PersonSummary>,
    pub date_assigned: Option<chrono::DateTime<Utc>>,
    pub completion_due_date: Option<chrono::DateTime<Utc>>,
    pub assessment_date: Option<chrono::DateTime<Utc>>,
    pub cfi_approved: bool,
    pub cfi_approval_date: Option<chrono::DateTime<Utc>>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub revision: i64,
}

fn optional_date(date: Option<chrono::DateTime<Utc>>) -> Bson {
    date.map(|date| Bson::DateTime(super::to_bson(date)))
        .unwrap_or(Bson::Null)
}

impl OccurrenceAssessment {
    pub fn pending(occurrence_id: ObjectId, actor: ObjectId, now: DateTime) -> Self {
        OccurrenceAssessment {
            _id: None,
            occurrence_id,
            status: AssessmentStatus::PendingAssessment,
            incident_classification: None,
            reasoning: None,
            assigned_investigator_id: None,
            date_assigned: None,
            completion_due_date: None,
            assessment_date: None,
            cfi_approved: false,
            cfi_approval_date: None,
            created_by: actor,
            updated_by: actor,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Returns the assessment of an occurrence, creating a pending one on first read.
    pub async fn ensure(occurrence_id: &ObjectId, actor: &ObjectId) -> Result<OccurrenceAssessment> {
        let db: Database = get_db()?;
        let collection: Collection<OccurrenceAssessment> =
            db.collection::<OccurrenceAssessment>("occurrence-assessments");

        let mut defaults = mongodb::bson::to_document(&OccurrenceAssessment::pending(
            *occurrence_id,
            *actor,
            DateTime::now(),
        ))?;
        defaults.remove("occurrence_id");

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let filter = doc! { "occurrence_id": occurrence_id };
        let ensured = collection
            .find_one_and_update(filter.clone(), doc! { "$setOnInsert": defaults }, options)
            .await;

        match ensured {
            Ok(Some(assessment)) => Ok(assessment),
            Ok(None) => Err(Error::not_found("ASSESSMENT")),
            Err(error) if is_duplicate_key(&error) => {
                tracing::debug!(%occurrence_id, "assessment created concurrently, re-reading");
                collection
                    .find_one(filter, None)
                    .await?
                    .ok_or_else(|| Error::not_found("ASSESSMENT"))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn update(
        occurrence_id: &ObjectId,
        update: &AssessmentUpdate,
        actor: &ObjectId,
    ) -> Result<OccurrenceAssessment> {
        let db: Database = get_db()?;
        let collection: Collection<OccurrenceAssessment> =
            db.collection::<OccurrenceAssessment>("occurrence-assessments");

        let mut filter = doc! { "occurrence_id": occurrence_id };
        if let Some(revision) = update.revision {
            filter.insert("revision", revision);
        }
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = collection
            .find_one_and_update(filter, update.to_document(actor, DateTime::now())?, options)
            .await?;
        match updated {
            Some(assessment) => Ok(assessment),
            None if update.revision.is_some()
                && collection
                    .find_one(doc! { "occurrence_id": occurrence_id }, None)
                    .await?
                    .is_some() =>
            {
                Err(Error::Conflict("ASSESSMENT_REVISION_CONFLICT".to_string()))
            }
            None => Err(Error::not_found("ASSESSMENT")),
        }
    }

    pub async fn into_response(self) -> Result<AssessmentResponse> {
        let investigator = Profile::find_summary(self.assigned_investigator_id).await?;
        Ok(AssessmentResponse::new(self, investigator))
    }
}

impl AssessmentUpdate {
    /// Builds the update. Setting a status stamps `assessment_date`, assigning an
    /// investigator stamps `date_assigned`, approving stamps `cfi_approval_date`,
    /// unless the request carries those dates itself.
    pub fn to_document(&self, actor: &ObjectId, now: DateTime) -> Result<Document> {
        let mut set = Document::new();

        if let Some(status) = self.status {
            set.insert("status", to_bson(&status)?);
            set.insert(
                "assessment_date",
                match status {
                    AssessmentStatus::PendingAssessment => Bson::Null,
                    _ => Bson::DateTime(now),
                },
            );
        }
        if let Some(classification) = self.incident_classification {
            set.insert("incident_classification", to_bson(&classification)?);
        }
        if let Some(reasoning) = &self.reasoning {
            set.insert("reasoning", reasoning.clone());
        }
        if let Some(investigator) = &self.assigned_investigator_id {
            let investigator = parse_optional_id(investigator.as_deref())?;
            set.insert("assigned_investigator_id", investigator);
            if self.date_assigned.is_none() {
                set.insert(
                    "date_assigned",
                    investigator.map(|_| Bson::DateTime(now)).unwrap_or(Bson::Null),
                );
            }
        }
        if let Some(date) = self.date_assigned {
            set.insert("date_assigned", optional_date(date));
        }
        if let Some(date) = self.completion_due_date {
            set.insert("completion_due_date", optional_date(date));
        }
        if let Some(approved) = self.cfi_approved {
            set.insert("cfi_approved", approved);
            if !approved {
                set.insert("cfi_approval_date", Bson::Null);
            } else if self.cfi_approval_date.is_none() {
                set.insert("cfi_approval_date", now);
            }
        }
        if let Some(date) = self.cfi_approval_date {
            if self.cfi_approved != Some(false) {
                set.insert("cfi_approval_date", optional_date(date));
            }
        }

        if set.is_empty() {
            return Err(Error::Validation("NOTHING_TO_UPDATE".to_string()));
        }
        set.insert("updated_at", now);
        set.insert("updated_by", actor);

        Ok(doc! { "$set": set, "$inc": { "revision": 1_i64 } })
    }
}

impl AssessmentResponse {
    pub fn new(assessment: OccurrenceAssessment, investigator: Option<PersonSummary>) -> Self {
        AssessmentResponse {
            id: assessment._id.map(|id| id.to_hex()).unwrap_or_default(),
            occurrence_id: assessment.occurrence_id.to_hex(),
            status: assessment.status,
            incident_classification: assessment.incident_classification,
            reasoning: assessment.reasoning,
            assigned_investigator_id: assessment.assigned_investigator_id.map(|id| id.to_hex()),
            assigned_investigator: investigator,
            date_assigned: assessment.date_assigned.map(to_utc),
            completion_due_date: assessment.completion_due_date.map(to_utc),
            assessment_date: assessment.assessment_date.map(to_utc),
            cfi_approved: assessment.cfi_approved,
            cfi_approval_date: assessment.cfi_approval_date.map(to_utc),
            created_by: assessment.created_by.to_hex(),
            updated_by: assessment.updated_by.to_hex(),
            created_at: to_utc(assessment.created_at),
            updated_at: to_utc(assessment.updated_at),
            revision: assessment.revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;

    fn patch(json: &str) -> AssessmentUpdate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn pending_assessment_defaults() {
        let actor = ObjectId::new();
        let assessment = OccurrenceAssessment::pending(ObjectId::new(), actor, DateTime::now());

        assert_eq!(assessment.status, AssessmentStatus::PendingAssessment);
        assert!(!assessment.cfi_approved);
        assert_eq!(assessment.created_by, actor);
        assert_eq!(assessment.revision, 0);
    }

    #[test]
    fn deciding_validity_stamps_assessment_date() {
        let now = DateTime::now();
        let document = patch(r#"{"status":"valid","incident_classification":"human_factors"}"#)
            .to_document(&ObjectId::new(), now)
            .unwrap();
        let set = document.get_document("$set").unwrap();

        assert_eq!(set.get_str("status").unwrap(), "valid");
        assert_eq!(set.get_str("incident_classification").unwrap(), "human_factors");
        assert_eq!(set.get_datetime("assessment_date").unwrap(), &now);
        assert_eq!(document.get_document("$inc").unwrap().get_i64("revision").unwrap(), 1);

        let reopened = patch(r#"{"status":"pending_assessment"}"#)
            .to_document(&ObjectId::new(), now)
            .unwrap();
        assert_eq!(
            reopened.get_document("$set").unwrap().get("assessment_date"),
            Some(&Bson::Null)
        );
    }

    #[test]
    fn assigning_and_approving_stamp_their_dates() {
        let now = DateTime::now();
        let investigator = ObjectId::new();
        let update = patch(&format!(
            r#"{{"assigned_investigator_id":"{}","cfi_approved":true}}"#,
            investigator.to_hex()
        ));
        let document = update.to_document(&ObjectId::new(), now).unwrap();
        let set = document.get_document("$set").unwrap();

        assert_eq!(set.get_object_id("assigned_investigator_id").unwrap(), investigator);
        assert_eq!(set.get_datetime("date_assigned").unwrap(), &now);
        assert_eq!(set.get_datetime("cfi_approval_date").unwrap(), &now);

        let revoked = patch(r#"{"cfi_approved":false,"assigned_investigator_id":null}"#)
            .to_document(&ObjectId::new(), now)
            .unwrap();
        let set = revoked.get_document("$set").unwrap();
        assert_eq!(set.get("cfi_approval_date"), Some(&Bson::Null));
        assert_eq!(set.get("assigned_investigator_id"), Some(&Bson::Null));
        assert_eq!(set.get("date_assigned"), Some(&Bson::Null));
    }

    #[test]
    fn explicit_dates_win_over_stamps() {
        let now = DateTime::now();
        let document = patch(
            r#"{"cfi_approved":true,"cfi_approval_date":"2026-03-04T00:00:00Z","reasoning":null}"#,
        )
        .to_document(&ObjectId::new(), now)
        .unwrap();
        let set = document.get_document("$set").unwrap();

        assert_ne!(set.get_datetime("cfi_approval_date").unwrap(), &now);
        assert_eq!(set.get("reasoning"), Some(&Bson::Null));
    }

    #[test]
    fn rejects_empty_and_malformed_updates() {
        assert!(matches!(
            AssessmentUpdate::default().to_document(&ObjectId::new(), DateTime::now()),
            Err(Error::Validation(_))
        ));
        assert!(serde_json::from_str::<AssessmentUpdate>(r#"{"status":"maybe"}"#).is_err());
        assert!(patch(r#"{"assigned_investigator_id":"nope"}"#)
            .to_document(&ObjectId::new(), DateTime::now())
            .is_err());
    }

    #[actix_web::test]
    #[ignore = "requires a running MongoDB instance"]
    async fn ensure_is_idempotent() {
        database::connect("mongodb://localhost:27017", "occurrence-tracker-test")
            .await
            .unwrap();
        let occurrence = ObjectId::new();
        let actor = ObjectId::new();

        let first = OccurrenceAssessment::ensure(&occurrence, &actor).await.unwrap();
        let second = OccurrenceAssessment::ensure(&occurrence, &actor).await.unwrap();

        assert_eq!(first.status, AssessmentStatus::PendingAssessment);
        assert_eq!(first._id, second._id);

        let stale = AssessmentUpdate {
            status: Some(AssessmentStatus::Valid),
            revision: Some(first.revision + 5),
            ..Default::default()
        };
        assert!(matches!(
            OccurrenceAssessment::update(&occurrence, &stale, &actor).await,
            Err(Error::Conflict(_))
        ));
    }
}
