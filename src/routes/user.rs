use actix_web::{web, HttpResponse};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use log::error;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};

use crate::auth::Claims;
use crate::config::AppConfig;
use crate::entity::user;
use crate::error::AppError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::post().to(register)))
        .service(web::resource("/token").route(web::post().to(create_token)));
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: Option<String>,
    password: Option<String>,
    name: Option<String>,
}

#[derive(Serialize)]
struct UserDto {
    id: i32,
    email: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct TokenRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

async fn register(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let email = payload
        .email
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::required("email"))?;
    let password = payload
        .password
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::required("password"))?;

    if !email.contains('@') {
        return Err(AppError::field_error("email", "Enter a valid email address."));
    }
    if password.len() < 5 {
        return Err(AppError::field_error(
            "password",
            "Ensure this field has at least 5 characters.",
        ));
    }

    let password_hash = hash(password, 10).map_err(|_| AppError::internal())?;
    let now = Utc::now();

    let user_model = user::ActiveModel {
        email: Set(email),
        password_hash: Set(password_hash),
        name: Set(payload.name.clone()),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };

    let inserted = match user_model.insert(db.get_ref()).await {
        Ok(model) => model,
        Err(err) => {
            let msg = err.to_string();
            if msg.contains("UNIQUE") || msg.contains("Duplicate") {
                return Err(AppError::field_error(
                    "email",
                    "A user with that email already exists.",
                ));
            }
            error!("user insert failed: {}", err);
            return Err(AppError::internal());
        }
    };

    Ok(HttpResponse::Created().json(UserDto {
        id: inserted.id,
        email: inserted.email,
        name: inserted.name,
    }))
}

async fn create_token(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<TokenRequest>,
) -> Result<HttpResponse, AppError> {
    let email = payload
        .email
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::required("email"))?;
    let password = payload
        .password
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::required("password"))?;

    let user = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db.get_ref())
        .await
        .map_err(|_| AppError::internal())?;

    let user = match user {
        Some(user) => user,
        None => return Err(invalid_credentials()),
    };

    let ok = verify(password, &user.password_hash).map_err(|_| AppError::internal())?;
    if !ok {
        return Err(invalid_credentials());
    }

    let token = issue_token(&config, user.id)?;
    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

fn invalid_credentials() -> AppError {
    AppError::field_error(
        "non_field_errors",
        "Unable to authenticate with provided credentials.",
    )
}

pub fn issue_token(config: &AppConfig, user_id: i32) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::days(config.token_ttl_days)).timestamp() as usize;
    let claims = Claims { sub: user_id, exp };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::internal())
}
