use actix_web::web;

pub mod course;
pub mod media;
pub mod tag;
pub mod user;

pub fn api_scope() -> actix_web::Scope {
    web::scope("/api")
        .service(web::scope("/users").configure(user::config))
        .service(web::scope("/courses").configure(course::config))
        .service(web::scope("/tags").configure(tag::config))
        .service(web::scope("/media").configure(media::config))
}
