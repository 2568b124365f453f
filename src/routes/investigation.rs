use actix_web::{get, patch, post, web, HttpResponse};
use mongodb::bson::oid::ObjectId;
use serde_json::json;

use crate::{
    error::{Error, Result},
    models::{
        filter::{ListFilter, OffsetQuery, Pagination},
        investigation::{
            timeline, Board, Communication, CommunicationRequest, CommunicationResponse, DetailTab,
            Interview, InterviewRequest, InterviewResponse, Investigation, InvestigationDetail,
            InvestigationRequest, InvestigationUpdate,
        },
        occurrence::{Occurrence, OccurrenceResponse, OccurrenceStatus},
        parse_id, parse_optional_id,
        profile::{Permission, Profile, Session},
        stage::ProgressTracker,
    },
};

async fn require_investigation(investigation_id: &str) -> Result<Investigation> {
    let investigation_id: ObjectId = parse_id(investigation_id)?;
    Investigation::find_by_id(&investigation_id)
        .await?
        .ok_or_else(|| Error::not_found("INVESTIGATION"))
}

async fn require_profile(profile_id: Option<ObjectId>) -> Result<()> {
    if let Some(profile_id) = profile_id {
        if Profile::find_by_id(&profile_id).await?.is_none() {
            return Err(Error::not_found("PROFILE"));
        }
    }
    Ok(())
}

#[get("/investigations")]
pub async fn get_investigations(
    _session: Session,
    filter: web::Query<ListFilter>,
    offset: web::Query<OffsetQuery>,
) -> Result<HttpResponse> {
    let filter: ListFilter = filter.into_inner();
    let offset = filter.resolve_offset(offset.offset);

    let (investigations, total) = Investigation::find_many(&filter, offset).await?;
    let investigations = Investigation::into_responses(investigations).await?;
    let stats = Investigation::statistics().await?;

    Ok(HttpResponse::Ok().json(json!({
        "investigations": investigations,
        "pagination": Pagination::new(&filter, offset, total),
        "stats": stats,
    })))
}
#[post("/investigations")]
pub async fn create_investigation(
    session: Session,
    payload: web::Json<InvestigationRequest>,
) -> Result<HttpResponse> {
    session.require(Permission::CreateInvestigation)?;

    let mut investigation = payload.into_inner().into_investigation()?;
    if !Occurrence::exists(&investigation.occurrence_id).await? {
        return Err(Error::not_found("OCCURRENCE"));
    }
    require_profile(investigation.lead_investigator_id).await?;

    let investigation_id = investigation.save().await?;
    Occurrence::set_status(&investigation.occurrence_id, OccurrenceStatus::UnderInvestigation)
        .await?;
    tracing::info!(
        %investigation_id,
        occurrence_id = %investigation.occurrence_id,
        "investigation opened"
    );

    let investigation = Investigation::into_responses(vec![investigation])
        .await?
        .into_iter()
        .next();
    Ok(HttpResponse::Created().json(json!({ "investigation": investigation })))
}
#[get("/investigations/board")]
pub async fn get_board(
    _session: Session,
    filter: web::Query<ListFilter>,
) -> Result<HttpResponse> {
    let filter: ListFilter = filter.into_inner();
    let investigations = Investigation::find_all(&filter).await?;
    let investigations = Investigation::into_responses(investigations).await?;

    Ok(HttpResponse::Ok().json(Board::partition(investigations)))
}
#[get("/investigations/{investigation_id}")]
pub async fn get_investigation(
    _session: Session,
    investigation_id: web::Path<String>,
) -> Result<HttpResponse> {
    let investigation = require_investigation(&investigation_id).await?;
    let id = investigation._id.ok_or_else(|| Error::not_found("INVESTIGATION"))?;
    let occurrence_id = investigation.occurrence_id;

    let occurrence = match Occurrence::find_by_id(&occurrence_id).await? {
        Some(occurrence) => {
            let relations =
                Occurrence::load_relations(std::slice::from_ref(&occurrence), false).await?;
            Some(OccurrenceResponse::new(occurrence, &relations))
        }
        None => None,
    };
    let occurrence_details = Occurrence::find_details(&occurrence_id).await?;
    let interviews: Vec<InterviewResponse> = Interview::find_by_investigation(&id)
        .await?
        .into_iter()
        .map(InterviewResponse::from)
        .collect();
    let communications: Vec<CommunicationResponse> = Communication::find_by_investigation(&id)
        .await?
        .into_iter()
        .map(CommunicationResponse::from)
        .collect();

    let investigation = Investigation::into_responses(vec![investigation])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found("INVESTIGATION"))?;

    Ok(HttpResponse::Ok().json(InvestigationDetail {
        progress: ProgressTracker::new(investigation.stage),
        tabs: DetailTab::entries(interviews.len(), communications.len()),
        timeline: timeline(&investigation, &interviews, &communications),
        investigation,
        occurrence,
        occurrence_details,
        interviews,
        communications,
    }))
}
#[patch("/investigations/{investigation_id}")]
pub async fn update_investigation(
    _session: Session,
    investigation_id: web::Path<String>,
    payload: web::Json<InvestigationUpdate>,
) -> Result<HttpResponse> {
    let investigation_id = parse_id(&investigation_id)?;
    let payload: InvestigationUpdate = payload.into_inner();

    if let Some(Some(lead)) = &payload.lead_investigator_id {
        require_profile(parse_optional_id(Some(lead.as_str()))?).await?;
    }

    let investigation = Investigation::update(&investigation_id, &payload).await?;
    tracing::info!(
        %investigation_id,
        stage = %investigation.stage,
        revision = investigation.revision,
        "investigation updated"
    );

    let investigation = Investigation::into_responses(vec![investigation])
        .await?
        .into_iter()
        .next();
    Ok(HttpResponse::Ok().json(json!({ "investigation": investigation })))
}
#[get("/investigations/{investigation_id}/progress")]
pub async fn get_progress(
    _session: Session,
    investigation_id: web::Path<String>,
) -> Result<HttpResponse> {
    let investigation = require_investigation(&investigation_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "progress": ProgressTracker::new(investigation.stage) })))
}
#[get("/investigations/{investigation_id}/interviews")]
pub async fn get_interviews(
    _session: Session,
    investigation_id: web::Path<String>,
) -> Result<HttpResponse> {
    let investigation = require_investigation(&investigation_id).await?;
    let id = investigation._id.ok_or_else(|| Error::not_found("INVESTIGATION"))?;

    let interviews: Vec<InterviewResponse> = Interview::find_by_investigation(&id)
        .await?
        .into_iter()
        .map(InterviewResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "interviews": interviews })))
}
#[post("/investigations/{investigation_id}/interviews")]
pub async fn create_interview(
    session: Session,
    investigation_id: web::Path<String>,
    payload: web::Json<InterviewRequest>,
) -> Result<HttpResponse> {
    let investigation = require_investigation(&investigation_id).await?;
    let id = investigation._id.ok_or_else(|| Error::not_found("INVESTIGATION"))?;

    let mut interview = payload.into_inner().into_interview(id, session.profile_id)?;
    interview.save().await?;

    Ok(HttpResponse::Created().json(json!({ "interview": InterviewResponse::from(interview) })))
}
#[get("/investigations/{investigation_id}/communications")]
pub async fn get_communications(
    _session: Session,
    investigation_id: web::Path<String>,
) -> Result<HttpResponse> {
    let investigation = require_investigation(&investigation_id).await?;
    let id = investigation._id.ok_or_else(|| Error::not_found("INVESTIGATION"))?;

    let communications: Vec<CommunicationResponse> = Communication::find_by_investigation(&id)
        .await?
        .into_iter()
        .map(CommunicationResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "communications": communications })))
}
#[post("/investigations/{investigation_id}/communications")]
pub async fn create_communication(
    session: Session,
    investigation_id: web::Path<String>,
    payload: web::Json<CommunicationRequest>,
) -> Result<HttpResponse> {
    let investigation = require_investigation(&investigation_id).await?;
    let id = investigation._id.ok_or_else(|| Error::not_found("INVESTIGATION"))?;

    let mut communication = payload
        .into_inner()
        .into_communication(id, session.profile_id)?;
    communication.save().await?;

    Ok(HttpResponse::Created().json(json!({
        "communication": CommunicationResponse::from(communication),
    })))
}

#[cfg(test)]
mod tests {
    use crate::{models::profile::ProfileRole, routes::tests::app_with_session, storage::AttachmentStorage};
    use actix_web::{http::StatusCode, test};
    use tempfile::tempdir;

    #[actix_web::test]
    async fn reporters_cannot_open_investigations() {
        let dir = tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let app = test::init_service(app_with_session(ProfileRole::Reporter, storage)).await;

        let req = test::TestRequest::post()
            .uri("/api/investigations")
            .set_json(serde_json::json!({ "occurrence_id": "6650c0ffee0000000000abcd" }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "FORBIDDEN");
    }

    #[actix_web::test]
    async fn rejects_unknown_stage_in_updates() {
        let dir = tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let app = test::init_service(app_with_session(ProfileRole::Investigator, storage)).await;

        let req = test::TestRequest::patch()
            .uri("/api/investigations/6650c0ffee0000000000abcd")
            .set_json(serde_json::json!({ "stage": "archived" }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
