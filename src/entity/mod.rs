pub mod course;
pub mod course_tag;
pub mod tag;
pub mod user;
