use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::config::AppConfig;
use crate::entity::{course, course_tag, tag};
use crate::error::AppError;
use crate::routes::tag::TagDto;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(retrieve))
            .route(web::patch().to(partial_update))
            .route(web::put().to(full_update))
            .route(web::delete().to(remove)),
    )
    .service(web::resource("/{id:\\d+}/upload-image").route(web::post().to(upload_image)));
}

#[derive(Serialize)]
struct CourseDto {
    id: i32,
    title: String,
    duration_hours: i32,
    price: String,
    link: Option<String>,
    tags: Vec<TagDto>,
}

#[derive(Serialize)]
struct CourseDetailDto {
    id: i32,
    title: String,
    duration_hours: i32,
    price: String,
    link: Option<String>,
    description: Option<String>,
    image: Option<String>,
    tags: Vec<TagDto>,
}

#[derive(Deserialize, Clone)]
struct TagNameDto {
    name: String,
}

/// Owner is never part of the request shape; unknown fields such as `user`
/// are dropped by serde, which makes ownership reassignment a silent no-op.
#[derive(Deserialize)]
struct CourseWriteRequest {
    title: Option<String>,
    duration_hours: Option<i32>,
    price: Option<String>,
    description: Option<String>,
    link: Option<String>,
    tags: Option<Vec<TagNameDto>>,
}

#[derive(Deserialize)]
struct ListQuery {
    tags: Option<String>,
}

async fn list(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let mut select = course::Entity::find().filter(course::Column::UserId.eq(auth.user_id));

    if let Some(raw) = query.tags.as_deref().filter(|v| !v.trim().is_empty()) {
        let tag_ids = parse_id_list(raw)?;
        let course_ids: Vec<i32> = course_tag::Entity::find()
            .filter(course_tag::Column::TagId.is_in(tag_ids))
            .all(db.get_ref())
            .await
            .map_err(|_| AppError::internal())?
            .into_iter()
            .map(|ct| ct.course_id)
            .collect();
        select = select.filter(course::Column::Id.is_in(course_ids));
    }

    let courses = select
        .order_by_desc(course::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(|_| AppError::internal())?;

    let mut tag_map = load_tag_map(db.get_ref(), &courses).await?;
    let list: Vec<CourseDto> = courses
        .into_iter()
        .map(|c| {
            let tags = tag_map.remove(&c.id).unwrap_or_default();
            CourseDto {
                id: c.id,
                title: c.title,
                duration_hours: c.duration_hours,
                price: c.price,
                link: c.link,
                tags,
            }
        })
        .collect();

    Ok(HttpResponse::Ok().json(list))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<CourseWriteRequest>,
) -> Result<HttpResponse, AppError> {
    let title = required_title(&payload)?;
    let duration_hours = payload
        .duration_hours
        .ok_or_else(|| AppError::required("duration_hours"))?;
    let price = validate_price(
        payload
            .price
            .as_deref()
            .ok_or_else(|| AppError::required("price"))?,
    )?;
    let tag_names = tag_names(payload.tags.clone().unwrap_or_default());

    let now = Utc::now();
    let model = course::ActiveModel {
        user_id: Set(auth.user_id),
        title: Set(title),
        duration_hours: Set(duration_hours),
        price: Set(price),
        description: Set(payload.description.clone()),
        link: Set(payload.link.clone()),
        image: Set(None),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };

    let inserted = db
        .transaction::<_, course::Model, AppError>(|txn| {
            let tag_names = tag_names.clone();
            Box::pin(async move {
                let inserted = model.insert(txn).await.map_err(|e| {
                    error!("course insert failed: {}", e);
                    AppError::internal()
                })?;
                reconcile_tags(txn, auth.user_id, inserted.id, &tag_names).await?;
                debug!("course created id={}", inserted.id);
                Ok(inserted)
            })
        })
        .await
        .map_err(map_tx_error)?;

    let dto = to_detail_dto(db.get_ref(), inserted).await?;
    Ok(HttpResponse::Created().json(dto))
}

async fn retrieve(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let course = find_owned(db.get_ref(), auth.user_id, *path).await?;
    let dto = to_detail_dto(db.get_ref(), course).await?;
    Ok(HttpResponse::Ok().json(dto))
}

async fn partial_update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<CourseWriteRequest>,
) -> Result<HttpResponse, AppError> {
    apply_update(db, auth, *path, payload.into_inner(), true).await
}

async fn full_update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<CourseWriteRequest>,
) -> Result<HttpResponse, AppError> {
    apply_update(db, auth, *path, payload.into_inner(), false).await
}

async fn apply_update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    course_id: i32,
    payload: CourseWriteRequest,
    partial: bool,
) -> Result<HttpResponse, AppError> {
    find_owned(db.get_ref(), auth.user_id, course_id).await?;

    let mut active = course::ActiveModel {
        id: Set(course_id),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    };

    if partial {
        if let Some(title) = payload.title.clone() {
            active.title = Set(non_blank_title(title)?);
        }
        if let Some(duration) = payload.duration_hours {
            active.duration_hours = Set(duration);
        }
        if let Some(price) = payload.price.as_deref() {
            active.price = Set(validate_price(price)?);
        }
        if let Some(description) = payload.description.clone() {
            active.description = Set(Some(description));
        }
        if let Some(link) = payload.link.clone() {
            active.link = Set(Some(link));
        }
    } else {
        active.title = Set(required_title(&payload)?);
        active.duration_hours = Set(payload
            .duration_hours
            .ok_or_else(|| AppError::required("duration_hours"))?);
        active.price = Set(validate_price(
            payload
                .price
                .as_deref()
                .ok_or_else(|| AppError::required("price"))?,
        )?);
        active.description = Set(payload.description.clone());
        active.link = Set(payload.link.clone());
    }

    // PATCH only touches the association set when `tags` is present;
    // PUT always replaces it, defaulting to empty.
    let new_tags = if partial {
        payload.tags.clone().map(tag_names)
    } else {
        Some(tag_names(payload.tags.clone().unwrap_or_default()))
    };

    let updated = db
        .transaction::<_, course::Model, AppError>(|txn| {
            let new_tags = new_tags.clone();
            Box::pin(async move {
                let updated = active.update(txn).await.map_err(|e| {
                    error!("course update failed: {}", e);
                    AppError::internal()
                })?;
                if let Some(names) = new_tags {
                    reconcile_tags(txn, auth.user_id, course_id, &names).await?;
                }
                Ok(updated)
            })
        })
        .await
        .map_err(map_tx_error)?;

    let dto = to_detail_dto(db.get_ref(), updated).await?;
    Ok(HttpResponse::Ok().json(dto))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let course = find_owned(db.get_ref(), auth.user_id, *path).await?;
    let course_id = course.id;

    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            course_tag::Entity::delete_many()
                .filter(course_tag::Column::CourseId.eq(course_id))
                .exec(txn)
                .await
                .map_err(|_| AppError::internal())?;
            course::Entity::delete_by_id(course_id)
                .exec(txn)
                .await
                .map_err(|_| AppError::internal())?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;

    // housekeeping: do not leave the uploaded file behind
    if let Some(image) = &course.image {
        let _ = fs::remove_file(PathBuf::from(config.upload_storage_path()).join(image));
    }

    Ok(HttpResponse::NoContent().finish())
}

async fn upload_image(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    auth: AuthUser,
    path: web::Path<i32>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let course = find_owned(db.get_ref(), auth.user_id, *path).await?;

    let mut data: Option<Vec<u8>> = None;
    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|_| AppError::bad_request("Malformed multipart payload."))?;
        let mut buf = Vec::new();
        while let Some(chunk) = field.next().await {
            let bytes =
                chunk.map_err(|_| AppError::bad_request("Malformed multipart payload."))?;
            buf.extend_from_slice(&bytes);
        }
        if field.name() == "image" {
            data = Some(buf);
        }
    }

    let data = data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::field_error("image", "No file was submitted."))?;

    let kind = infer::get(&data)
        .filter(|k| k.matcher_type() == infer::MatcherType::Image)
        .ok_or_else(|| {
            AppError::field_error(
                "image",
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
            )
        })?;

    let relative = format!(
        "courses/{}/{}.{}",
        Utc::now().format("%Y/%m"),
        generate_image_id(),
        kind.extension()
    );
    let target = PathBuf::from(config.upload_storage_path()).join(&relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            error!("upload dir create failed: {}", e);
            AppError::internal()
        })?;
    }
    fs::write(&target, &data).map_err(|e| {
        error!("image write failed: {}", e);
        AppError::internal()
    })?;

    let active = course::ActiveModel {
        id: Set(course.id),
        image: Set(Some(relative.clone())),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    };
    if let Err(e) = active.update(db.get_ref()).await {
        error!("image update failed: {}", e);
        let _ = fs::remove_file(&target);
        return Err(AppError::internal());
    }

    if let Some(old) = &course.image {
        let _ = fs::remove_file(PathBuf::from(config.upload_storage_path()).join(old));
    }

    Ok(HttpResponse::Ok().json(json!({
        "id": course.id,
        "image": image_url(&relative),
    })))
}

/// Resolves each name to an existing tag of the user or creates it, then
/// replaces the course's association set. Runs inside the caller's
/// transaction so a partial tag set is never committed.
async fn reconcile_tags<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    course_id: i32,
    names: &[String],
) -> Result<(), AppError> {
    course_tag::Entity::delete_many()
        .filter(course_tag::Column::CourseId.eq(course_id))
        .exec(db)
        .await
        .map_err(|_| AppError::internal())?;

    if names.is_empty() {
        return Ok(());
    }

    let existing = tag::Entity::find()
        .filter(tag::Column::UserId.eq(user_id))
        .filter(tag::Column::Name.is_in(names.iter().cloned()))
        .all(db)
        .await
        .map_err(|_| AppError::internal())?;

    let mut by_name: HashMap<String, i32> =
        existing.into_iter().map(|t| (t.name, t.id)).collect();

    for name in names {
        if by_name.contains_key(name) {
            continue;
        }
        let now = Utc::now();
        let active = tag::ActiveModel {
            user_id: Set(user_id),
            name: Set(name.clone()),
            created: Set(Some(now)),
            updated: Set(Some(now)),
            ..Default::default()
        };
        match active.insert(db).await {
            Ok(inserted) => {
                by_name.insert(inserted.name, inserted.id);
            }
            Err(err) => {
                // lost a (user_id, name) unique race; the row exists now
                let msg = err.to_string();
                if !msg.contains("UNIQUE") && !msg.contains("Duplicate") {
                    error!("tag insert failed: {}", err);
                    return Err(AppError::internal());
                }
                let model = tag::Entity::find()
                    .filter(tag::Column::UserId.eq(user_id))
                    .filter(tag::Column::Name.eq(name.clone()))
                    .one(db)
                    .await
                    .map_err(|_| AppError::internal())?
                    .ok_or_else(AppError::internal)?;
                by_name.insert(model.name, model.id);
            }
        }
    }

    for name in names {
        let tag_id = by_name[name];
        let link = course_tag::ActiveModel {
            course_id: Set(course_id),
            tag_id: Set(tag_id),
        };
        link.insert(db).await.map_err(|_| AppError::internal())?;
    }

    Ok(())
}

async fn find_owned(
    db: &DatabaseConnection,
    user_id: i32,
    course_id: i32,
) -> Result<course::Model, AppError> {
    course::Entity::find_by_id(course_id)
        .filter(course::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(|_| AppError::internal())?
        .ok_or_else(AppError::not_found)
}

async fn load_tags<C: ConnectionTrait>(db: &C, course_id: i32) -> Result<Vec<TagDto>, AppError> {
    let tag_ids: Vec<i32> = course_tag::Entity::find()
        .filter(course_tag::Column::CourseId.eq(course_id))
        .all(db)
        .await
        .map_err(|_| AppError::internal())?
        .into_iter()
        .map(|ct| ct.tag_id)
        .collect();

    let rows = tag::Entity::find()
        .filter(tag::Column::Id.is_in(tag_ids))
        .order_by_asc(tag::Column::Id)
        .all(db)
        .await
        .map_err(|_| AppError::internal())?;

    Ok(rows
        .into_iter()
        .map(|t| TagDto {
            id: t.id,
            name: t.name,
        })
        .collect())
}

async fn load_tag_map(
    db: &DatabaseConnection,
    courses: &[course::Model],
) -> Result<HashMap<i32, Vec<TagDto>>, AppError> {
    let course_ids: Vec<i32> = courses.iter().map(|c| c.id).collect();
    if course_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let links = course_tag::Entity::find()
        .filter(course_tag::Column::CourseId.is_in(course_ids))
        .all(db)
        .await
        .map_err(|_| AppError::internal())?;

    let tag_ids: Vec<i32> = links.iter().map(|l| l.tag_id).collect();
    let tags: HashMap<i32, tag::Model> = tag::Entity::find()
        .filter(tag::Column::Id.is_in(tag_ids))
        .all(db)
        .await
        .map_err(|_| AppError::internal())?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let mut map: HashMap<i32, Vec<TagDto>> = HashMap::new();
    for link in links {
        if let Some(t) = tags.get(&link.tag_id) {
            map.entry(link.course_id).or_default().push(TagDto {
                id: t.id,
                name: t.name.clone(),
            });
        }
    }
    for list in map.values_mut() {
        list.sort_by_key(|t| t.id);
    }
    Ok(map)
}

async fn to_detail_dto(
    db: &DatabaseConnection,
    course: course::Model,
) -> Result<CourseDetailDto, AppError> {
    let tags = load_tags(db, course.id).await?;
    Ok(CourseDetailDto {
        id: course.id,
        title: course.title,
        duration_hours: course.duration_hours,
        price: course.price,
        link: course.link,
        description: course.description,
        image: course.image.as_deref().map(image_url),
        tags,
    })
}

fn image_url(relative: &str) -> String {
    format!("/api/media/{}", relative)
}

fn generate_image_id() -> String {
    let prefix = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let rand: String = (0..12)
        .map(|_| {
            let idx = rand::random::<u8>() % 26;
            (b'a' + idx) as char
        })
        .collect();
    format!("{}{}", prefix, rand)
}

fn required_title(payload: &CourseWriteRequest) -> Result<String, AppError> {
    let title = payload
        .title
        .clone()
        .ok_or_else(|| AppError::required("title"))?;
    non_blank_title(title)
}

fn non_blank_title(title: String) -> Result<String, AppError> {
    if title.trim().is_empty() {
        return Err(AppError::field_error("title", "This field may not be blank."));
    }
    Ok(title)
}

/// Normalizes names the way the association expects them: trimmed,
/// de-duplicated, order preserved.
fn tag_names(tags: Vec<TagNameDto>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.name.trim().to_string())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

fn parse_id_list(raw: &str) -> Result<Vec<i32>, AppError> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i32>()
                .map_err(|_| AppError::field_error("tags", "Enter a comma separated list of tag ids."))
        })
        .collect()
}

/// Decimal validation matching the stored representation: at most five
/// digits in total, at most two of them after the point. Returns the
/// normalized two-fraction-digit string.
fn validate_price(raw: &str) -> Result<String, AppError> {
    let invalid = || AppError::field_error("price", "A valid number is required.");
    let value = raw.trim();
    if value.is_empty() {
        return Err(invalid());
    }

    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    if frac_part.len() > 2 {
        return Err(AppError::field_error(
            "price",
            "Ensure that there are no more than 2 decimal places.",
        ));
    }

    let int_digits = int_part.trim_start_matches('0');
    let significant = int_digits.len() + frac_part.len();
    if significant > 5 {
        return Err(AppError::field_error(
            "price",
            "Ensure that there are no more than 5 digits in total.",
        ));
    }

    let int_out = if int_digits.is_empty() { "0" } else { int_digits };
    Ok(format!("{}.{:0<2}", int_out, frac_part))
}

fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(_) => AppError::internal(),
        TransactionError::Transaction(app) => app,
    }
}
