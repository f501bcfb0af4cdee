//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pibot/config.json`) and environment.
//! The same record backs the `/api/config` endpoints: clients read the relay
//! defaults (chat id, topic id, polling interval) from it and may merge partial
//! updates back, which are persisted to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Groq completion API settings.
    #[serde(default)]
    pub groq: GroqConfig,

    /// Telegram relay settings.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Allowlisted terminal commands.
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Audit log file. Relative paths resolve against the config file's parent.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Gateway bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 3000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Groq completion settings: credential, model, sampling, and the assistant persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroqConfig {
    /// API key. Overridden by GROQ_API_KEY env when set.
    pub api_key: Option<String>,

    #[serde(default = "default_groq_model")]
    pub model: String,

    #[serde(default = "default_groq_temperature")]
    pub temperature: f32,

    #[serde(default = "default_groq_max_tokens")]
    pub max_tokens: u32,

    /// Who the assistant is (used in the default system message).
    #[serde(default = "default_groq_role")]
    pub role: String,

    /// What the assistant is for (used in the default system message).
    #[serde(default = "default_groq_context")]
    pub context: String,
}

fn default_groq_model() -> String {
    "llama3-8b-8192".to_string()
}

fn default_groq_temperature() -> f32 {
    0.7
}

fn default_groq_max_tokens() -> u32 {
    2048
}

fn default_groq_role() -> String {
    "an AI assistant expert in software development and technical advice".to_string()
}

fn default_groq_context() -> String {
    "provide precise, concise and useful answers on programming, software architecture and web technologies".to_string()
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_groq_model(),
            temperature: default_groq_temperature(),
            max_tokens: default_groq_max_tokens(),
            role: default_groq_role(),
            context: default_groq_context(),
        }
    }
}

/// Telegram relay settings: credential and the default conversation address
/// web clients poll for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,

    /// Default chat id clients send to and filter on.
    pub chat_id: Option<String>,

    /// Default topic (forum thread) id within the chat. Absent means the
    /// general, non-threaded conversation — a distinct address from any
    /// concrete topic id.
    pub topic_id: Option<String>,

    /// Client polling interval in milliseconds (default 2000).
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
}

fn default_polling_interval_ms() -> u64 {
    2000
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            topic_id: None,
            polling_interval_ms: default_polling_interval_ms(),
        }
    }
}

/// Allowlisted terminal commands for POST /command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsConfig {
    /// Exact command lines the gateway may execute.
    #[serde(default = "default_authorized_commands")]
    pub authorized: Vec<String>,
}

fn default_authorized_commands() -> Vec<String> {
    vec![
        "ls -la".to_string(),
        "pwd".to_string(),
        "git status".to_string(),
    ]
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            authorized: default_authorized_commands(),
        }
    }
}

/// Resolve the Groq API key: env GROQ_API_KEY overrides config.
pub fn resolve_groq_api_key(config: &Config) -> Option<String> {
    std::env::var("GROQ_API_KEY")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .groq
                .api_key
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .telegram
                .bot_token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PIBOT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".pibot").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Resolve the audit log file: `config.logFile` if set (relative paths against
/// the config file's parent), otherwise `logs.json` next to the config file.
pub fn resolve_log_file(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.log_file {
        Some(f) if !f.as_os_str().is_empty() => {
            if f.is_absolute() {
                f.clone()
            } else {
                config_parent.join(f)
            }
        }
        _ => config_parent.join("logs.json"),
    }
}

/// Load config from the default path (or PIBOT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving sibling files).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

impl Config {
    /// Copy of the record with credentials cleared, for serving to clients.
    pub fn redacted(&self) -> Config {
        let mut c = self.clone();
        c.groq.api_key = None;
        c.telegram.bot_token = None;
        c
    }
}

/// Deep-merge `patch` into `base`: objects merge recursively, everything else
/// (including arrays) is replaced. `null` in the patch clears the field.
fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                match base_map.get_mut(&k) {
                    Some(slot) => merge_json(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

/// Shared, mutable view of the persisted config record.
///
/// The gateway reads a snapshot per request; POST /api/config merges a partial
/// record, re-validates it, and persists the result.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Config>,
}

impl ConfigStore {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            current: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone of the current record.
    pub async fn snapshot(&self) -> Config {
        self.current.read().await.clone()
    }

    /// Merge a partial record (JSON object) into the current one, re-validate,
    /// persist to disk, and return the merged record. Rejects non-object bodies
    /// and patches that do not deserialize into a valid record.
    pub async fn update(&self, patch: serde_json::Value) -> Result<Config> {
        if !patch.is_object() {
            anyhow::bail!("config update must be a JSON object");
        }
        let mut guard = self.current.write().await;
        let mut merged = serde_json::to_value(&*guard).context("serializing current config")?;
        merge_json(&mut merged, patch);
        let config: Config =
            serde_json::from_value(merged).context("merged config is not valid")?;
        let pretty =
            serde_json::to_string_pretty(&config).context("serializing merged config")?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        std::fs::write(&self.path, pretty)
            .with_context(|| format!("writing config to {}", self.path.display()))?;
        *guard = config.clone();
        log::info!("config record updated and persisted to {}", self.path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 3000);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn default_commands_allowlist() {
        let c = CommandsConfig::default();
        assert_eq!(c.authorized, vec!["ls -la", "pwd", "git status"]);
    }

    #[test]
    fn resolve_log_file_default_and_override() {
        let config = Config::default();
        let path = Path::new("/home/user/.pibot/config.json");
        assert_eq!(
            resolve_log_file(&config, path),
            PathBuf::from("/home/user/.pibot/logs.json")
        );

        let mut config = Config::default();
        config.log_file = Some(PathBuf::from("audit/activity.json"));
        assert_eq!(
            resolve_log_file(&config, path),
            PathBuf::from("/home/user/.pibot/audit/activity.json")
        );
    }

    #[test]
    fn merge_json_is_recursive_and_replacing() {
        let mut base = json!({
            "telegram": { "chatId": "42", "pollingIntervalMs": 2000 },
            "commands": { "authorized": ["pwd"] }
        });
        merge_json(
            &mut base,
            json!({
                "telegram": { "topicId": "7" },
                "commands": { "authorized": ["ls -la"] }
            }),
        );
        assert_eq!(base["telegram"]["chatId"], "42");
        assert_eq!(base["telegram"]["topicId"], "7");
        assert_eq!(base["telegram"]["pollingIntervalMs"], 2000);
        assert_eq!(base["commands"]["authorized"], json!(["ls -la"]));
    }

    #[tokio::test]
    async fn config_store_merges_and_persists() {
        let dir = std::env::temp_dir().join(format!("pibot-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("config.json");
        let store = ConfigStore::new(Config::default(), path.clone());

        let merged = store
            .update(json!({ "telegram": { "chatId": "1234", "topicId": "9" } }))
            .await
            .expect("merge");
        assert_eq!(merged.telegram.chat_id.as_deref(), Some("1234"));
        assert_eq!(merged.telegram.topic_id.as_deref(), Some("9"));
        assert_eq!(merged.gateway.port, 3000);

        let on_disk: Config =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(on_disk.telegram.chat_id.as_deref(), Some("1234"));
    }

    #[tokio::test]
    async fn config_store_rejects_non_object() {
        let dir = std::env::temp_dir().join(format!("pibot-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let store = ConfigStore::new(Config::default(), dir.join("config.json"));
        assert!(store.update(json!([1, 2, 3])).await.is_err());
        assert!(store.update(json!("nope")).await.is_err());
    }

    #[test]
    fn redacted_clears_credentials() {
        let mut config = Config::default();
        config.groq.api_key = Some("gsk_secret".to_string());
        config.telegram.bot_token = Some("123:abc".to_string());
        let redacted = config.redacted();
        assert!(redacted.groq.api_key.is_none());
        assert!(redacted.telegram.bot_token.is_none());
        assert_eq!(redacted.groq.model, config.groq.model);
    }
}
