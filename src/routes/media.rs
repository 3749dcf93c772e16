use std::fs;
use std::path::PathBuf;

use actix_web::{web, HttpResponse};

use crate::config::AppConfig;
use crate::error::AppError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/{path:.*}").route(web::get().to(serve)));
}

/// Serves a stored upload. Left unauthenticated on purpose: image URLs
/// returned by the API must be embeddable without a token.
async fn serve(
    config: web::Data<AppConfig>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let relative = path.into_inner();
    if relative.is_empty() || relative.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(AppError::not_found());
    }

    let full = PathBuf::from(config.upload_storage_path()).join(&relative);
    let data = fs::read(&full).map_err(|_| AppError::not_found())?;
    let mime = mime_guess::from_path(&full).first_or_octet_stream();

    Ok(HttpResponse::Ok().content_type(mime.as_ref()).body(data))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};

    use crate::test_util::{init_app, test_config_with_upload, test_db};

    #[actix_web::test]
    async fn serves_stored_file() {
        let db = test_db().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_upload(tmp.path());
        std::fs::create_dir_all(tmp.path().join("courses")).unwrap();
        std::fs::write(tmp.path().join("courses/pic.png"), b"fake-bytes").unwrap();
        let app = init_app(&config, &db).await;

        let req = test::TestRequest::get()
            .uri("/api/media/courses/pic.png")
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        let content_type = res.headers().get("content-type").unwrap().to_str().unwrap();
        assert_eq!(content_type, "image/png");
    }

    #[actix_web::test]
    async fn unknown_file_is_not_found() {
        let db = test_db().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_upload(tmp.path());
        let app = init_app(&config, &db).await;

        let req = test::TestRequest::get()
            .uri("/api/media/courses/missing.png")
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn traversal_is_rejected() {
        let db = test_db().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config_with_upload(tmp.path());
        let app = init_app(&config, &db).await;

        let req = test::TestRequest::get()
            .uri("/api/media/../etc/passwd")
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_ne!(res.status(), StatusCode::OK);
    }
}
