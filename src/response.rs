use actix_web::{error::JsonPayloadError, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::AppError;

#[derive(Serialize)]
pub struct ErrorDetail {
    pub detail: String,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let app_err = match err {
        JsonPayloadError::ContentType => {
            AppError::bad_request("Unsupported media type in request.")
        }
        JsonPayloadError::Deserialize(e) => AppError::bad_request(format!("JSON parse error: {}", e)),
        _ => AppError::bad_request("Malformed request body."),
    };
    app_err.into()
}

pub fn response_from_error(err: &AppError) -> HttpResponse {
    let status = err.status_code();
    match err {
        AppError::Field { field, msg } => {
            let mut body = Map::new();
            body.insert(field.clone(), json!([msg]));
            HttpResponse::build(status).json(Value::Object(body))
        }
        _ => HttpResponse::build(status).json(ErrorDetail {
            detail: err.to_string(),
        }),
    }
}
