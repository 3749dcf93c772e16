use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub upload_storage_path: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8000);

        let sqlite_path =
            env::var("SQLITE_PATH").unwrap_or_else(|_| "/opt/courses/data.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok();

        let jwt_secret =
            env::var("JWT_SECRET").unwrap_or_else(|_| "insecure-dev-secret".to_string());

        let token_ttl_days = env::var("TOKEN_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(30);

        let upload_storage_path = env::var("UPLOAD_STORAGE_PATH")
            .unwrap_or_else(|_| "/opt/courses/upload".to_string());

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            token_ttl_days,
            upload_storage_path,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}", path)
    }

    pub fn upload_storage_path(&self) -> String {
        self.upload_storage_path.clone()
    }
}
