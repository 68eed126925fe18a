use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::Bot;

// Pipeline constants — wire-bound values the components agree on.
pub const MAX_CONTEXT_ENTRIES: usize = 20;
pub const CONTEXT_TRIM_TO: usize = 10;
pub const SESSION_WINDOW_HOURS: i64 = 24;
pub const DEDUP_TTL_SECS: i64 = 300; // 5 min dedupe window
pub const WHATSAPP_RATE_PER_SEC: f64 = 80.0;
pub const WHATSAPP_BURST: f64 = 100.0;
pub const RETRY_BASE_MS: u64 = 1_000;
pub const RETRY_MAX_ATTEMPTS: u32 = 5;
pub const PROVIDER_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GRAPH_API_VERSION: &str = "v21.0";
pub const COEXISTENCE_SCAN_INTERVAL_SECS: u64 = 3_600;
pub const COEXISTENCE_WARNING_DAYS: i64 = 10;
pub const COEXISTENCE_DISCONNECT_DAYS: i64 = 14;
pub const OTP_ATTEMPT_LIMIT: u32 = 3;
pub const OTP_TTL_SECS: i64 = 300;
pub const DEFAULT_PORT: u16 = 18650;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (omnihub.toml + OMNIHUB_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub tenant: TenantConfig,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub coexistence: CoexistenceConfig,
    #[serde(default)]
    pub import: ImportConfig,
    /// Bots served by this node, matched to channels by id.
    #[serde(default)]
    pub bots: Vec<Bot>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            bus: BusConfig::default(),
            ai: AiConfig::default(),
            tenant: TenantConfig::default(),
            whatsapp: None,
            voice: VoiceConfig::default(),
            coexistence: CoexistenceConfig::default(),
            import: ImportConfig::default(),
            bots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Single-node deployments run one tenant; multi-tenant routing derives
/// the tenant from the channel registration instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default = "default_tenant_id")]
    pub id: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            id: default_tenant_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscription-group queue depth before the publisher detaches
    /// delivery into a background task.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Outbound worker parallelism per channel type.
    #[serde(default = "default_workers")]
    pub workers_per_channel: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            workers_per_channel: default_workers(),
        }
    }
}

/// OpenAI-compatible completion + embeddings endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_embeddings_model")]
    pub embeddings_model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            embeddings_model: default_embeddings_model(),
        }
    }
}

/// WhatsApp Business Cloud credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    pub verify_token: String,
    pub webhook_secret: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Fallback template when the 24h session window has expired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_template: Option<String>,
    #[serde(default = "default_template_language")]
    pub template_language: String,
    #[serde(default)]
    pub coexistence_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub twilio: Option<TwilioConfig>,
    pub vonage: Option<VonageConfig>,
    pub amazon_connect: Option<AmazonConnectConfig>,
    pub asterisk: Option<AsteriskConfig>,
    pub freeswitch: Option<FreeswitchConfig>,
    /// Provider answering `/voice/webhook` when none is named in the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    /// Opening line of the answer script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    /// Closing line after input is collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goodbye: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VonageConfig {
    pub application_id: String,
    /// RSA private key in PEM form.
    pub private_key: String,
    /// RSA public key in PEM form, used to verify inbound webhook JWTs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmazonConnectConfig {
    pub instance_id: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_flow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsteriskConfig {
    pub ami_host: String,
    #[serde(default = "default_ami_port")]
    pub ami_port: u16,
    pub ami_user: String,
    pub ami_password: String,
    #[serde(default = "default_asterisk_context")]
    pub context: String,
    /// Shared secret for webhook HMAC validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeswitchConfig {
    pub esl_host: String,
    #[serde(default = "default_esl_port")]
    pub esl_port: u16,
    pub esl_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recordings_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoexistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

impl Default for CoexistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_interval_secs: default_scan_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_import_batch")]
    pub batch_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_import_batch(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tenant_id() -> String {
    "default".to_string()
}
fn default_queue_depth() -> usize {
    256
}
fn default_workers() -> usize {
    4
}
fn default_ai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embeddings_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_api_version() -> String {
    DEFAULT_GRAPH_API_VERSION.to_string()
}
fn default_template_language() -> String {
    "en".to_string()
}
fn default_ami_port() -> u16 {
    5038
}
fn default_asterisk_context() -> String {
    "default".to_string()
}
fn default_esl_port() -> u16 {
    8021
}
fn default_scan_interval() -> u64 {
    COEXISTENCE_SCAN_INTERVAL_SECS
}
fn default_import_batch() -> usize {
    200
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.omnihub/omnihub.db", home)
}

impl HubConfig {
    /// Load config from a TOML file with OMNIHUB_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: HubConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("OMNIHUB_").split("_"))
            .extract()
            .map_err(|e| crate::error::HubError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.omnihub/omnihub.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.tenant.id, "default");
        assert!(cfg.whatsapp.is_none());
        assert!(cfg.voice.twilio.is_none());
        assert_eq!(cfg.bus.workers_per_channel, 4);
    }

    #[test]
    fn whatsapp_section_fills_api_version() {
        let cfg: WhatsAppConfig = serde_json::from_value(serde_json::json!({
            "access_token": "t",
            "phone_number_id": "123",
            "verify_token": "v",
            "webhook_secret": "s",
        }))
        .unwrap();
        assert_eq!(cfg.api_version, DEFAULT_GRAPH_API_VERSION);
        assert_eq!(cfg.template_language, "en");
    }
}
