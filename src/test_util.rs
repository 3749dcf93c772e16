use std::path::Path;

use actix_http::Request;
use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::{middleware, test, web, App, Error};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use crate::config::AppConfig;
use crate::entity::{course, course_tag, tag, user};
use crate::response::json_error_handler;

pub async fn test_db() -> DatabaseConnection {
    // a single connection so the in-memory database survives the pool
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    crate::db::init_schema(&db).await;
    db
}

pub fn test_config() -> AppConfig {
    test_config_with_upload(&std::env::temp_dir())
}

pub fn test_config_with_upload(upload_dir: &Path) -> AppConfig {
    AppConfig {
        server_port: 0,
        sqlite_path: String::new(),
        database_url: None,
        jwt_secret: "test-secret".to_string(),
        token_ttl_days: 1,
        upload_storage_path: upload_dir.to_string_lossy().to_string(),
    }
}

pub async fn init_app(
    config: &AppConfig,
    db: &DatabaseConnection,
) -> impl Service<Request, Response = ServiceResponse<impl MessageBody>, Error = Error> {
    test::init_service(
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(db.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::NormalizePath::trim())
            .service(crate::routes::api_scope()),
    )
    .await
}

pub fn bearer(config: &AppConfig, user_id: i32) -> (&'static str, String) {
    let token = crate::routes::user::issue_token(config, user_id).unwrap();
    ("Authorization", format!("Bearer {}", token))
}

pub async fn create_user(db: &DatabaseConnection, email: &str) -> user::Model {
    let now = Utc::now();
    user::ActiveModel {
        email: Set(email.to_string()),
        // low cost to keep the suite fast
        password_hash: Set(bcrypt::hash("testpass123", 4).unwrap()),
        name: Set(Some("Test User".to_string())),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn create_course(db: &DatabaseConnection, user_id: i32, title: &str) -> course::Model {
    let now = Utc::now();
    course::ActiveModel {
        user_id: Set(user_id),
        title: Set(title.to_string()),
        duration_hours: Set(20),
        price: Set("22.80".to_string()),
        description: Set(Some("Sample course description.".to_string())),
        link: Set(Some("http://example.com/".to_string())),
        image: Set(None),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn create_tag(db: &DatabaseConnection, user_id: i32, name: &str) -> tag::Model {
    let now = Utc::now();
    tag::ActiveModel {
        user_id: Set(user_id),
        name: Set(name.to_string()),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn attach_tag(db: &DatabaseConnection, course_id: i32, tag_id: i32) {
    course_tag::ActiveModel {
        course_id: Set(course_id),
        tag_id: Set(tag_id),
    }
    .insert(db)
    .await
    .unwrap();
}
