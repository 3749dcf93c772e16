use actix_web::{web, HttpResponse};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::entity::{course, course_tag, tag};
use crate::error::AppError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::get().to(list))).service(
        web::resource("/{id:\\d+}")
            .route(web::patch().to(update))
            .route(web::delete().to(remove)),
    );
}

#[derive(Serialize, PartialEq, Debug)]
pub struct TagDto {
    pub id: i32,
    pub name: String,
}

#[derive(Deserialize)]
struct ListQuery {
    assigned_only: Option<String>,
}

#[derive(Deserialize)]
struct UpdateTagRequest {
    name: Option<String>,
}

async fn list(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let mut select = tag::Entity::find().filter(tag::Column::UserId.eq(auth.user_id));

    if is_truthy(query.assigned_only.as_deref()) {
        // restrict to tags attached to at least one of the caller's courses;
        // is_in deduplicates even when a tag spans several courses
        let course_ids: Vec<i32> = course::Entity::find()
            .filter(course::Column::UserId.eq(auth.user_id))
            .all(db.get_ref())
            .await
            .map_err(|_| AppError::internal())?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let tag_ids: Vec<i32> = course_tag::Entity::find()
            .filter(course_tag::Column::CourseId.is_in(course_ids))
            .all(db.get_ref())
            .await
            .map_err(|_| AppError::internal())?
            .into_iter()
            .map(|ct| ct.tag_id)
            .collect();

        select = select.filter(tag::Column::Id.is_in(tag_ids));
    }

    let rows = select
        .order_by_desc(tag::Column::Name)
        .all(db.get_ref())
        .await
        .map_err(|_| AppError::internal())?;

    let list = rows.into_iter().map(to_dto).collect::<Vec<_>>();
    Ok(HttpResponse::Ok().json(list))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<UpdateTagRequest>,
) -> Result<HttpResponse, AppError> {
    let tag_id = *path;
    let existing = find_owned(db.get_ref(), auth.user_id, tag_id).await?;

    let name = payload
        .name
        .clone()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::field_error("name", "This field may not be blank."))?;

    let active = tag::ActiveModel {
        id: Set(existing.id),
        name: Set(name),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    };

    let updated = match active.update(db.get_ref()).await {
        Ok(model) => model,
        Err(err) => {
            let msg = err.to_string();
            if msg.contains("UNIQUE") || msg.contains("Duplicate") {
                return Err(AppError::field_error(
                    "name",
                    "A tag with that name already exists.",
                ));
            }
            return Err(AppError::internal());
        }
    };

    Ok(HttpResponse::Ok().json(to_dto(updated)))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let tag_id = *path;
    find_owned(db.get_ref(), auth.user_id, tag_id).await?;

    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            course_tag::Entity::delete_many()
                .filter(course_tag::Column::TagId.eq(tag_id))
                .exec(txn)
                .await
                .map_err(|_| AppError::internal())?;
            tag::Entity::delete_by_id(tag_id)
                .exec(txn)
                .await
                .map_err(|_| AppError::internal())?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;

    Ok(HttpResponse::NoContent().finish())
}

/// Cross-user access answers 404, same as true absence.
async fn find_owned(
    db: &DatabaseConnection,
    user_id: i32,
    tag_id: i32,
) -> Result<tag::Model, AppError> {
    tag::Entity::find_by_id(tag_id)
        .filter(tag::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(|_| AppError::internal())?
        .ok_or_else(AppError::not_found)
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v == "1" || v.eq_ignore_ascii_case("true"))
}

fn to_dto(model: tag::Model) -> TagDto {
    TagDto {
        id: model.id,
        name: model.name,
    }
}

fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(_) => AppError::internal(),
        TransactionError::Transaction(app) => app,
    }
}
