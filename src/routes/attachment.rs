use actix_multipart::form::MultipartForm;
use actix_web::{delete, get, post, web, HttpResponse};
use chrono::Utc;
use mongodb::bson::{oid::ObjectId, DateTime};
use serde_json::json;

use crate::{
    error::{Error, Result},
    models::{
        attachment::{
            is_allowed_size, is_allowed_type, Attachment, AttachmentResponse, AttachmentUploadForm,
        },
        occurrence::Occurrence,
        parse_id,
        profile::{Profile, Session},
    },
    storage::{object_key, AttachmentStorage},
};

#[get("/attachments/{occurrence_id}/list")]
pub async fn get_attachments(
    _session: Session,
    occurrence_id: web::Path<String>,
) -> Result<HttpResponse> {
    let occurrence_id = parse_id(&occurrence_id)?;
    if !Occurrence::exists(&occurrence_id).await? {
        return Err(Error::not_found("OCCURRENCE"));
    }

    let attachments = Attachment::find_by_occurrence(&occurrence_id).await?;
    let mut uploaders: Vec<ObjectId> = attachments.iter().map(|a| a.uploaded_by).collect();
    uploaders.sort();
    uploaders.dedup();
    let uploaders = Profile::find_summaries(&uploaders).await?;

    let attachments: Vec<AttachmentResponse> = attachments
        .into_iter()
        .map(|attachment| {
            let uploader = uploaders.get(&attachment.uploaded_by).cloned();
            AttachmentResponse::new(attachment, uploader)
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "attachments": attachments })))
}
#[post("/attachments/upload")]
pub async fn upload_attachment(
    session: Session,
    form: MultipartForm<AttachmentUploadForm>,
    storage: web::Data<AttachmentStorage>,
) -> Result<HttpResponse> {
    let form: AttachmentUploadForm = form.into_inner();
    let file = form
        .file
        .ok_or_else(|| Error::Validation("NO_FILE_PROVIDED".to_string()))?;
    let occurrence_id = form
        .occurrence_id
        .map(|id| id.into_inner())
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::Validation("OCCURRENCE_ID_REQUIRED".to_string()))?;

    let file_type = file
        .content_type
        .as_ref()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_default();
    if !is_allowed_type(&file_type) {
        return Err(Error::Validation("FILE_TYPE_NOT_ALLOWED".to_string()));
    }
    if !is_allowed_size(file.size as u64) {
        return Err(Error::Validation("FILE_SIZE_EXCEEDED".to_string()));
    }

    let occurrence_id = parse_id(&occurrence_id)?;
    if !Occurrence::exists(&occurrence_id).await? {
        return Err(Error::not_found("OCCURRENCE"));
    }

    let file_name = file
        .file_name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let key = object_key(
        &occurrence_id.to_hex(),
        &file_name,
        Utc::now().timestamp_millis(),
    );
    let storage: &AttachmentStorage = &storage;
    let file_size = file.size as i64;
    let uploaded_by = session.profile_id;
    let attachment = storage
        .store_then(file.file.path(), &key, |key| async move {
            let now = DateTime::now();
            let mut attachment = Attachment {
                _id: None,
                occurrence_id,
                file_name,
                public_url: storage.public_url(&key),
                file_path: key,
                file_type,
                file_size,
                uploaded_by,
                created_at: now,
                updated_at: now,
            };
            attachment.save().await?;
            Ok(attachment)
        })
        .await?;
    tracing::info!(
        %occurrence_id,
        key = %attachment.file_path,
        size = attachment.file_size,
        "attachment uploaded"
    );

    let uploader = Profile::find_summary(Some(session.profile_id)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "File uploaded successfully",
        "attachment": AttachmentResponse::new(attachment, uploader),
    })))
}
#[delete("/attachments/{attachment_id}/delete")]
pub async fn delete_attachment(
    _session: Session,
    attachment_id: web::Path<String>,
    storage: web::Data<AttachmentStorage>,
) -> Result<HttpResponse> {
    let attachment_id = parse_id(&attachment_id)?;
    let attachment = Attachment::find_by_id(&attachment_id)
        .await?
        .ok_or_else(|| Error::not_found("ATTACHMENT"))?;
    if !Occurrence::exists(&attachment.occurrence_id).await? {
        return Err(Error::not_found("OCCURRENCE"));
    }

    if let Err(error) = storage.remove(&attachment.file_path) {
        tracing::warn!(key = %attachment.file_path, %error, "failed to remove attachment object");
    }
    if Attachment::delete(&attachment_id).await? == 0 {
        return Err(Error::not_found("ATTACHMENT"));
    }

    Ok(HttpResponse::Ok().json(json!({ "message": "Attachment deleted successfully" })))
}
