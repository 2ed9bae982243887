use anyhow::{bail, Context};
use config::{Config, Environment};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "BOOKSHELF";
pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbMode {
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbSettings {
    pub mode: DbMode,
    pub sqlite_path: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibrarySettings {
    /// TOML file with the curated books
    pub path: String,
    /// Directory the image names of the library are resolved against
    pub images_dir: String,
    /// Seed the backend on startup. When unset the in-memory and SQLite backends are seeded.
    pub seed_on_startup: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaSettings {
    pub site_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminSettings {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db: DbSettings,
    pub library: LibrarySettings,
    pub server: ServerSettings,
    pub oauth: OAuthSettings,
    pub captcha: CaptchaSettings,
    pub session: SessionSettings,
    pub admin: AdminSettings,
}

impl Settings {
    /// Reads settings from `BOOKSHELF_*` environment variables, nested keys are separated by `__`
    /// e.g. `BOOKSHELF_DB__MODE=sqlite`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_environment(Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn from_environment(environment: Environment) -> anyhow::Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("db.sqlite_path", "bookshelf.db")?
            .set_default("db.host", "127.0.0.1")?
            .set_default("db.port", 5432)?
            .set_default("db.username", "postgres")?
            .set_default("db.password", "postgres")?
            .set_default("db.name", "postgres")?
            .set_default("library.path", "library/books_db.toml")?
            .set_default("library.images_dir", "images")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8180)?
            .add_source(environment)
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.session.secret.len() < MIN_SESSION_SECRET_LEN {
            bail!(
                "session.secret must be at least {} bytes long",
                MIN_SESSION_SECRET_LEN
            );
        }
        if self.admin.user_id.trim().is_empty() {
            bail!("admin.user_id must not be empty");
        }
        Ok(())
    }

    pub fn seed_on_startup(&self) -> bool {
        self.library
            .seed_on_startup
            .unwrap_or(self.db.mode != DbMode::Postgres)
    }
}
