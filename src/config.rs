use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_DIR_NAME: &str = "innovug-chat";
const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_API_HOST: &str = "chatbot-backend-nqls.onrender.com";
pub const DEFAULT_LOCAL_API_BASE: &str = "http://localhost:5000";
pub const DEFAULT_PRODUCTION_API_BASE: &str = "https://chatbot-backend-nqls.onrender.com";
pub const DEFAULT_POLICY_URL: &str = "https://www.ug.edu.ec/politicas-de-privacidad/";
pub const DEFAULT_PROBE_MESSAGE: &str = "ping";

/// Sent in place of empty text when only a document is attached.
pub const DEFAULT_ATTACHMENT_PROMPT: &str = "\
Evaluate the attached business proposal against the following six criteria. \
Score each criterion on a four-tier scale: Excellent (4), Good (3), \
Fair (2), Insufficient (1).

1. Problem definition: is the problem clear, relevant and evidenced?
2. Value proposition: is the solution differentiated and does it answer the problem?
3. Target market: are the customer segment and market size identified?
4. Business model: are revenue streams, costs and channels coherent?
5. Feasibility: are the technical, financial and operational resources realistic?
6. Impact and scalability: does the proposal describe social or economic impact and growth potential?

Output format:
- A table with columns Criterion | Score | Justification.
- The total score out of 24.
- Three concrete recommendations for improvement.";

/// Client configuration, loaded from `{config_dir}/innovug-chat/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatClientConfig {
    /// Host the backend is reached on. A loopback host selects the local backend.
    pub api_host: String,
    /// Explicit backend base URL. Wins over host inspection when set.
    pub api_base: Option<String>,
    pub local_api_base: String,
    pub production_api_base: String,
    pub session_minutes: u64,
    pub extension_minutes: u64,
    pub warning_minutes: u64,
    pub policy_url: String,
    /// Sent as `message` when the user submits only an attachment. `None` sends empty text.
    pub attachment_default_prompt: Option<String>,
    /// Phrases that mark a reply as asking for the user's full name when the
    /// backend does not send an explicit `next_step`.
    pub name_prompt_markers: Vec<String>,
    pub probe_message: String,
    pub notification_sound: bool,
    pub request_timeout_secs: u64,
    /// Overrides the directory holding `session.toml`.
    pub data_dir: Option<PathBuf>,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            api_base: None,
            local_api_base: DEFAULT_LOCAL_API_BASE.to_string(),
            production_api_base: DEFAULT_PRODUCTION_API_BASE.to_string(),
            session_minutes: 10,
            extension_minutes: 10,
            warning_minutes: 2,
            policy_url: DEFAULT_POLICY_URL.to_string(),
            attachment_default_prompt: Some(DEFAULT_ATTACHMENT_PROMPT.to_string()),
            name_prompt_markers: vec!["nombre completo".to_string(), "full name".to_string()],
            probe_message: DEFAULT_PROBE_MESSAGE.to_string(),
            notification_sound: true,
            request_timeout_secs: 60,
            data_dir: None,
        }
    }
}

impl ChatClientConfig {
    /// Loads the config file, falling back to defaults, then applies env overrides.
    pub fn load() -> Self {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(error) => {
                    tracing::warn!("Ignoring unreadable config ({:#}); using defaults", error);
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(host) = non_empty_env("INNOVUG_API_HOST") {
            self.api_host = host;
        }
        if let Some(base) = non_empty_env("INNOVUG_API_BASE") {
            self.api_base = Some(base);
        }
        if let Some(dir) = non_empty_env("INNOVUG_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Backend base URL: explicit override, else local for loopback hosts, else production.
    pub fn resolve_api_base(&self) -> String {
        if let Some(base) = self.api_base.as_deref().map(str::trim) {
            if !base.is_empty() {
                return base.trim_end_matches('/').to_string();
            }
        }
        let base = if is_loopback_host(&self.api_host) {
            &self.local_api_base
        } else {
            &self.production_api_base
        };
        base.trim_end_matches('/').to_string()
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_minutes * 60)
    }

    pub fn extension_duration(&self) -> Duration {
        Duration::from_secs(self.extension_minutes * 60)
    }

    pub fn warning_threshold(&self) -> Duration {
        Duration::from_secs(self.warning_minutes * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn session_file_path(&self) -> Option<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()?.join(APP_DIR_NAME),
        };
        Some(dir.join("session.toml"))
    }
}

fn config_file_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim();
    let host = match host.strip_prefix('[') {
        // `[v6]` or `[v6]:port`
        Some(rest) => rest.split_once(']').map_or(rest, |(inner, _)| inner),
        None => match host.rsplit_once(':') {
            // bare IPv6 literals carry colons of their own
            Some((name, port)) if !name.contains(':') && is_port(port) => name,
            _ => host,
        },
    };
    matches!(
        host.to_ascii_lowercase().as_str(),
        "localhost" | "127.0.0.1" | "::1"
    )
}

fn is_port(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}
