use actix_multipart::form::MultipartFormConfig;
use actix_web::{
    get,
    http::header::{
        ContentDisposition, DispositionParam, DispositionType, CONTENT_SECURITY_POLICY,
        X_CONTENT_TYPE_OPTIONS,
    },
    web, HttpResponse,
};
use mime_guess::{from_path, mime, Mime};

use crate::{
    error::{Error, Result},
    models::{attachment::MAX_FILE_SIZE, profile::Session},
    storage::AttachmentStorage,
};

pub mod aircraft;
pub mod assessment;
pub mod attachment;
pub mod investigation;
pub mod investigator;
pub mod occurrence;
pub mod profile;
pub mod storage;

/// Room for the multipart envelope and the text fields next to the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|error, _| Error::Validation(format!("INVALID_QUERY: {error}")).into()),
    )
    .app_data(
        web::JsonConfig::default()
            .error_handler(|error, _| Error::Validation(format!("INVALID_JSON: {error}")).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|error, _| Error::Validation(format!("INVALID_PATH: {error}")).into()),
    )
    .app_data(
        MultipartFormConfig::default()
            .total_limit(MAX_FILE_SIZE as usize + MULTIPART_OVERHEAD)
            .error_handler(|error, _| {
                Error::Validation(format!("INVALID_UPLOAD: {error}")).into()
            }),
    )
    .service(get_file)
    .service(
        web::scope("/api")
            .service(profile::login)
            .service(profile::logout)
            .service(profile::create_profile)
            .service(occurrence::get_occurrences)
            .service(occurrence::create_occurrence)
            .service(assessment::get_assessment)
            .service(assessment::update_assessment)
            .service(occurrence::get_occurrence)
            .service(occurrence::update_occurrence)
            .service(investigation::get_investigations)
            .service(investigation::create_investigation)
            .service(investigation::get_board)
            .service(investigation::get_progress)
            .service(investigation::get_interviews)
            .service(investigation::create_interview)
            .service(investigation::get_communications)
            .service(investigation::create_communication)
            .service(investigation::get_investigation)
            .service(investigation::update_investigation)
            .service(investigator::get_investigators)
            .service(aircraft::get_aircraft)
            .service(aircraft::create_aircraft)
            .service(attachment::get_attachments)
            .service(attachment::upload_attachment)
            .service(attachment::delete_attachment)
            .service(storage::initialize_storage),
    );
}

#[get("/files/attachments/{key:.*}")]
pub async fn get_file(
    _session: Session,
    key: web::Path<String>,
    storage: web::Data<AttachmentStorage>,
) -> Result<HttpResponse> {
    let key = key.into_inner();
    let file = storage.read(&key)?;
    let mime = from_path(&key).first_or_octet_stream();

    let mut response = HttpResponse::Ok();
    response.insert_header((X_CONTENT_TYPE_OPTIONS, "nosniff"));
    if !renders_inline(&mime) {
        let file_name = key.rsplit('/').next().unwrap_or("attachment").to_string();
        response
            .insert_header(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(file_name)],
            })
            .insert_header((CONTENT_SECURITY_POLICY, "sandbox"));
    }
    Ok(response.content_type(mime).body(file))
}

/// Raster images and PDFs open in the browser. Anything that can carry
/// script (html, svg) or is opaque is downloaded instead.
fn renders_inline(content_type: &Mime) -> bool {
    (content_type.type_() == mime::IMAGE && content_type.subtype() != mime::SVG)
        || *content_type == mime::APPLICATION_PDF
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::profile::{ProfileRole, Session};
    use actix_web::{
        body::MessageBody,
        dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse},
        http::StatusCode,
        test, App, HttpMessage,
    };
    use mongodb::bson::oid::ObjectId;
    use std::fs::write;
    use tempfile::tempdir;

    /// App with every route, where each request carries a session of `role`.
    pub(crate) fn app_with_session(
        role: ProfileRole,
        storage: AttachmentStorage,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody>,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        App::new()
            .app_data(web::Data::new(storage))
            .configure(configure)
            .wrap_fn(move |req, srv| {
                req.extensions_mut().insert(Session {
                    profile_id: ObjectId::new(),
                    role,
                });
                srv.call(req)
            })
    }

    #[actix_web::test]
    async fn requires_a_session() {
        let dir = tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(storage))
                .configure(configure),
        )
        .await;

        for uri in ["/api/occurrences", "/api/investigations/board", "/files/attachments/a/b.pdf"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[actix_web::test]
    async fn rejects_malformed_queries_and_ids() {
        let dir = tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let app = test::init_service(app_with_session(ProfileRole::Reporter, storage)).await;

        let req = test::TestRequest::get()
            .uri("/api/occurrences?status=bogus")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/api/investigations?stage=archived")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/api/occurrences/not-an-id")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "INVALID_ID");
    }

    #[actix_web::test]
    async fn storage_keys_cannot_escape_the_bucket() {
        let dir = tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let app = test::init_service(app_with_session(ProfileRole::Reporter, storage)).await;

        let req = test::TestRequest::get()
            .uri("/files/attachments/..%2F..%2Fetc%2Fpasswd")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_client_error());
    }

    #[::core::prelude::v1::test]
    fn only_images_and_pdfs_render_inline() {
        assert!(renders_inline(&mime::IMAGE_PNG));
        assert!(renders_inline(&mime::APPLICATION_PDF));
        assert!(!renders_inline(&mime::IMAGE_SVG));
        assert!(!renders_inline(&mime::TEXT_HTML));
        assert!(!renders_inline(&mime::APPLICATION_OCTET_STREAM));
    }

    #[actix_web::test]
    async fn html_objects_are_served_as_downloads() {
        let dir = tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let upload = dir.path().join("upload.tmp");
        write(&upload, "<script>alert(1)</script>").unwrap();
        storage.store(&upload, "occ-1/1700000000000-notes.html").unwrap();
        let chart = dir.path().join("chart.tmp");
        write(&chart, "png").unwrap();
        storage.store(&chart, "occ-1/1700000000000-chart.png").unwrap();
        let app = test::init_service(app_with_session(ProfileRole::Reporter, storage)).await;

        let req = test::TestRequest::get()
            .uri("/files/attachments/occ-1/1700000000000-notes.html")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let headers = res.headers();
        assert_eq!(headers.get(X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(headers.get(CONTENT_SECURITY_POLICY).unwrap(), "sandbox");
        let disposition = headers
            .get(actix_web::http::header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(disposition.starts_with("attachment"), "{disposition}");

        let req = test::TestRequest::get()
            .uri("/files/attachments/occ-1/1700000000000-chart.png")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert!(res
            .headers()
            .get(actix_web::http::header::CONTENT_DISPOSITION)
            .is_none());
    }
}
