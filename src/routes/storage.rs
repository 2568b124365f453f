use actix_web::{post, web, HttpResponse};
use serde_json::json;

use crate::{
    error::Result,
    models::profile::{Permission, Session},
    storage::AttachmentStorage,
};

#[post("/admin/storage/initialize")]
pub async fn initialize_storage(
    session: Session,
    storage: web::Data<AttachmentStorage>,
) -> Result<HttpResponse> {
    session.require(Permission::InitializeStorage)?;

    let message = if storage.initialize()? {
        "Attachments bucket created successfully"
    } else {
        "Attachments bucket already exists"
    };
    Ok(HttpResponse::Ok().json(json!({ "message": message })))
}

#[cfg(test)]
mod tests {
    use crate::{models::profile::ProfileRole, routes::tests::app_with_session, storage::AttachmentStorage};
    use actix_web::{http::StatusCode, test};
    use tempfile::tempdir;

    #[actix_web::test]
    async fn only_admins_initialize_the_bucket() {
        let dir = tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let bucket = storage.bucket_dir();

        let app = test::init_service(app_with_session(ProfileRole::SafetyOfficer, storage.clone())).await;
        let req = test::TestRequest::post()
            .uri("/api/admin/storage/initialize")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(!bucket.exists());

        let app = test::init_service(app_with_session(ProfileRole::Admin, storage)).await;
        for expected in [
            "Attachments bucket created successfully",
            "Attachments bucket already exists",
        ] {
            let req = test::TestRequest::post()
                .uri("/api/admin/storage/initialize")
                .to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::OK);

            let body: serde_json::Value = test::read_body_json(res).await;
            assert_eq!(body["message"], expected);
        }
        assert!(bucket.is_dir());
    }
}
