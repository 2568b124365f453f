use crate::{database::get_db, error::Result};
use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    options::FindOptions,
    Collection, Database,
};
use serde::{Deserialize, Serialize};

use super::{profile::PersonSummary, to_utc};

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub const ALLOWED_FILE_TYPES: [&str; 17] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "text/csv",
    "text/html",
    "application/zip",
    "application/x-rar-compressed",
];

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

pub fn is_allowed_type(mime: &str) -> bool {
    ALLOWED_FILE_TYPES.contains(&mime)
}

pub fn is_allowed_size(bytes: u64) -> bool {
    bytes <= MAX_FILE_SIZE
}

/// Human readable size in base 1024, e.g. `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{value:.2}");
    let mantissa = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{mantissa} {}", SIZE_UNITS[unit])
}

/// Lower-cased extension of `name`, empty when it has none.
pub fn file_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => extension.to_lowercase(),
        _ => String::new(),
    }
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileIconKind {
    Image,
    Pdf,
    Spreadsheet,
    Document,
    Presentation,
    Archive,
    Text,
    File,
}

impl FileIconKind {
    pub fn of(mime: &str) -> Self {
        let has = |needle: &str| mime.contains(needle);
        if mime.starts_with("image/") {
            FileIconKind::Image
        } else if mime == "application/pdf" {
            FileIconKind::Pdf
        } else if has("spreadsheet") || has("excel") {
            FileIconKind::Spreadsheet
        } else if has("presentation") || has("powerpoint") {
            // before documents: OOXML types all contain "officedocument"
            FileIconKind::Presentation
        } else if has("document") || has("word") {
            FileIconKind::Document
        } else if has("zip") || has("compressed") {
            FileIconKind::Archive
        } else if mime.starts_with("text/") {
            FileIconKind::Text
        } else {
            FileIconKind::File
        }
    }
}

#[derive(Debug, MultipartForm)]
pub struct AttachmentUploadForm {
    #[multipart(rename = "file")]
    pub file: Option<TempFile>,
    #[multipart(rename = "occurrenceId")]
    pub occurrence_id: Option<Text<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub occurrence_id: ObjectId,
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: i64,
    pub public_url: String,
    pub uploaded_by: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}
#[derive(Debug, Serialize)]
pub struct AttachmentResponse {
    pub id: String,
    pub occurrence_id: String,
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: i64,
    pub formatted_size: String,
    pub extension: String,
    pub icon: FileIconKind,
    pub public_url: String,
    pub uploaded_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<PersonSummary>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl Attachment {
    pub async fn save(&mut self) -> Result<ObjectId> {
        let db: Database = get_db()?;
        let collection: Collection<Attachment> = db.collection::<Attachment>("attachments");

        let id = ObjectId::new();
        self._id = Some(id);
        collection.insert_one(&*self, None).await?;
        Ok(id)
    }
    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<Attachment>> {
        let db: Database = get_db()?;
        let collection: Collection<Attachment> = db.collection::<Attachment>("attachments");

        Ok(collection.find_one(doc! { "_id": _id }, None).await?)
    }
    /// Newest first.
    pub async fn find_by_occurrence(occurrence_id: &ObjectId) -> Result<Vec<Attachment>> {
        let db: Database = get_db()?;
        let collection: Collection<Attachment> = db.collection::<Attachment>("attachments");

        let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
        Ok(collection
            .find(doc! { "occurrence_id": occurrence_id }, options)
            .await?
            .try_collect()
            .await?)
    }
    pub async fn delete(_id: &ObjectId) -> Result<u64> {
        let db: Database = get_db()?;
        let collection: Collection<Attachment> = db.collection::<Attachment>("attachments");

        Ok(collection
            .delete_one(doc! { "_id": _id }, None)
            .await?
            .deleted_count)
    }
}

impl AttachmentResponse {
    pub fn new(attachment: Attachment, uploader: Option<PersonSummary>) -> Self {
        AttachmentResponse {
            id: attachment._id.map(|id| id.to_hex()).unwrap_or_default(),
            occurrence_id: attachment.occurrence_id.to_hex(),
            formatted_size: format_size(attachment.file_size.max(0) as u64),
            extension: file_extension(&attachment.file_name),
            icon: FileIconKind::of(&attachment.file_type),
            file_name: attachment.file_name,
            file_path: attachment.file_path,
            file_type: attachment.file_type,
            file_size: attachment.file_size,
            public_url: attachment.public_url,
            uploaded_by: attachment.uploaded_by.to_hex(),
            uploader,
            created_at: to_utc(attachment.created_at),
            updated_at: to_utc(attachment.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_exactly_the_listed_types() {
        assert!(is_allowed_type("application/pdf"));
        assert!(is_allowed_type("text/csv"));
        assert!(is_allowed_type("application/x-rar-compressed"));
        assert!(!is_allowed_type("application/x-msdownload"));
        assert!(!is_allowed_type("image/bmp"));
        assert!(!is_allowed_type("IMAGE/PNG"));
        assert!(!is_allowed_type(""));
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(is_allowed_size(0));
        assert!(is_allowed_size(10_485_760));
        assert!(!is_allowed_size(10_485_761));
    }

    #[test]
    fn formats_sizes_with_trimmed_decimals() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(512), "512 Bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_000_000), "976.56 KB");
        assert_eq!(format_size(10_485_760), "10 MB");
        assert_eq!(format_size(1024_u64.pow(4) * 3), "3 TB");
        assert_eq!(format_size(1024_u64.pow(5)), "1024 TB");
    }

    #[test]
    fn extracts_lower_case_extensions() {
        assert_eq!(file_extension("Report.PDF"), "pdf");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("README"), "");
        assert_eq!(file_extension(".env"), "");
    }

    #[test]
    fn picks_icon_kind_from_mime() {
        assert_eq!(FileIconKind::of("image/svg+xml"), FileIconKind::Image);
        assert_eq!(FileIconKind::of("application/pdf"), FileIconKind::Pdf);
        assert_eq!(FileIconKind::of("application/vnd.ms-excel"), FileIconKind::Spreadsheet);
        assert_eq!(
            FileIconKind::of("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            FileIconKind::Document
        );
        assert_eq!(
            FileIconKind::of("application/vnd.openxmlformats-officedocument.presentationml.presentation"),
            FileIconKind::Presentation
        );
        assert_eq!(FileIconKind::of("application/zip"), FileIconKind::Archive);
        assert_eq!(FileIconKind::of("text/plain"), FileIconKind::Text);
        assert_eq!(FileIconKind::of("application/octet-stream"), FileIconKind::File);
    }

    #[test]
    fn response_carries_display_fields() {
        let now = DateTime::now();
        let attachment = Attachment {
            _id: Some(ObjectId::new()),
            occurrence_id: ObjectId::new(),
            file_name: "Tech Log.PDF".to_string(),
            file_path: "abc/1-Tech Log.PDF".to_string(),
            file_type: "application/pdf".to_string(),
            file_size: 1536,
            public_url: "http://localhost:8000/files/attachments/abc/1-Tech Log.PDF".to_string(),
            uploaded_by: ObjectId::new(),
            created_at: now,
            updated_at: now,
        };
        let response = AttachmentResponse::new(attachment, None);

        assert_eq!(response.formatted_size, "1.5 KB");
        assert_eq!(response.extension, "pdf");
        assert_eq!(response.icon, FileIconKind::Pdf);
    }
}
