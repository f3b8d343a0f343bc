use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use codesphere_llm::ProxyConfig;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_CHAT_URL: &str = "http://127.0.0.1:54321/functions/v1/chat";
pub const DEFAULT_COLLABORATION_URL: &str = "http://127.0.0.1:54321/functions/v1/collaboration-ai";
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_MEMBER_ID: &str = "local-user";
pub const SETTINGS_DIRECTORY_NAME: &str = "codesphere";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "codesphere.db";
pub const ENV_PREFIX: &str = "CODESPHERE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub chat_url: String,
    pub collaboration_url: String,
    /// Publishable key sent as the bearer token.
    pub api_key: String,
    /// Sqlite file path, or `:memory:`.
    pub database_path: String,
    pub log_filter: String,
    /// Author id used for collaboration messages typed locally.
    pub member_id: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            chat_url: DEFAULT_CHAT_URL.to_string(),
            collaboration_url: DEFAULT_COLLABORATION_URL.to_string(),
            api_key: String::new(),
            database_path: default_database_path(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            member_id: DEFAULT_MEMBER_ID.to_string(),
        }
    }
}

impl AppSettings {
    pub fn to_proxy_config(&self) -> ProxyConfig {
        ProxyConfig::new(
            &self.chat_url,
            &self.collaboration_url,
            &self.api_key,
        )
    }

    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.chat_url = or_default(self.chat_url, defaults.chat_url);
        self.collaboration_url = or_default(self.collaboration_url, defaults.collaboration_url);
        self.api_key = self.api_key.trim().to_string();
        self.database_path = or_default(self.database_path, defaults.database_path);
        self.log_filter = or_default(self.log_filter, defaults.log_filter);
        self.member_id = or_default(self.member_id, defaults.member_id);
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".codesphere"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from(&config_path, Env::prefixed(ENV_PREFIX));
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    // Defaults, then the JSON file, then environment overrides.
    fn load_from(path: &Path, env: Env) -> AppSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .merge(env);

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                AppSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".codesphere"))
        .join(DATABASE_FILE_NAME)
        .display()
        .to_string()
}

fn or_default(value: String, fallback: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed.to_string()
    }
}
