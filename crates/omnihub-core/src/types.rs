use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Voice telephony backends supported by the voice adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceProvider {
    Twilio,
    Vonage,
    AmazonConnect,
    Asterisk,
    Freeswitch,
}

impl VoiceProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceProvider::Twilio => "twilio",
            VoiceProvider::Vonage => "vonage",
            VoiceProvider::AmazonConnect => "amazon_connect",
            VoiceProvider::Asterisk => "asterisk",
            VoiceProvider::Freeswitch => "freeswitch",
        }
    }
}

impl std::str::FromStr for VoiceProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twilio" => Ok(VoiceProvider::Twilio),
            "vonage" => Ok(VoiceProvider::Vonage),
            "amazon_connect" => Ok(VoiceProvider::AmazonConnect),
            "asterisk" => Ok(VoiceProvider::Asterisk),
            "freeswitch" => Ok(VoiceProvider::Freeswitch),
            other => Err(format!("unknown voice provider: {other}")),
        }
    }
}

/// Kind of channel a conversation runs over.
///
/// Serializes as a single string: `whatsapp_official`, `voice:twilio`,
/// `telegram`, `webchat`, `sms`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelType {
    WhatsAppOfficial,
    Voice(VoiceProvider),
    Telegram,
    WebChat,
    Sms,
}

impl ChannelType {
    /// Stable string used in bus subjects, persistence, and logs.
    pub fn as_key(&self) -> String {
        match self {
            ChannelType::WhatsAppOfficial => "whatsapp_official".to_string(),
            ChannelType::Voice(p) => format!("voice:{}", p.as_str()),
            ChannelType::Telegram => "telegram".to_string(),
            ChannelType::WebChat => "webchat".to_string(),
            ChannelType::Sms => "sms".to_string(),
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(provider) = s.strip_prefix("voice:") {
            return Ok(ChannelType::Voice(provider.parse()?));
        }
        match s {
            "whatsapp_official" => Ok(ChannelType::WhatsAppOfficial),
            "telegram" => Ok(ChannelType::Telegram),
            "webchat" => Ok(ChannelType::WebChat),
            "sms" => Ok(ChannelType::Sms),
            other => Err(format!("unknown channel type: {other}")),
        }
    }
}

impl Serialize for ChannelType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_key())
    }
}

impl<'de> Deserialize<'de> for ChannelType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// WhatsApp coexistence lifecycle, driven by `message_echoes` activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoexistenceStatus {
    Inactive,
    Pending,
    Active,
    Warning,
    Disconnected,
}

impl CoexistenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoexistenceStatus::Inactive => "inactive",
            CoexistenceStatus::Pending => "pending",
            CoexistenceStatus::Active => "active",
            CoexistenceStatus::Warning => "warning",
            CoexistenceStatus::Disconnected => "disconnected",
        }
    }
}

impl std::str::FromStr for CoexistenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(CoexistenceStatus::Inactive),
            "pending" => Ok(CoexistenceStatus::Pending),
            "active" => Ok(CoexistenceStatus::Active),
            "warning" => Ok(CoexistenceStatus::Warning),
            "disconnected" => Ok(CoexistenceStatus::Disconnected),
            other => Err(format!("unknown coexistence status: {other}")),
        }
    }
}

/// A tenant-owned channel registration. Credentials and config are opaque
/// key/value maps interpreted by the owning adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    pub tenant_id: String,
    pub channel_type: ChannelType,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default = "default_coexistence_status")]
    pub coexistence_status: CoexistenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_echo_at: Option<DateTime<Utc>>,
}

fn default_coexistence_status() -> CoexistenceStatus {
    CoexistenceStatus::Inactive
}

impl ChannelRecord {
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(|s| s.as_str())
    }

    /// Channel-level default template name for session-expired fallback.
    pub fn default_template(&self) -> Option<&str> {
        self.config.get("default_template").and_then(|v| v.as_str())
    }

    pub fn template_language(&self) -> &str {
        self.config
            .get("template_language")
            .and_then(|v| v.as_str())
            .unwrap_or("en")
    }

    pub fn coexistence_enabled(&self) -> bool {
        self.config
            .get("coexistence_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Pending,
    Resolved,
    Closed,
}

/// A thread of messages between one contact and one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub contact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_user_id: Option<String>,
    pub status: ConversationStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Detected intent with classifier confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    #[default]
    Unknown,
}

/// One escalation rule; the orchestrator checks rules in order and the
/// first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationRule {
    /// Confidence below the given threshold (falls back to the bot's
    /// `confidence_threshold` when absent).
    LowConfidence {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
    },
    NegativeSentiment,
    Keyword { keywords: Vec<String> },
    Intent { name: String },
    /// The contact explicitly asked for a human.
    UserRequest,
}

/// A single weekday window in "HH:MM" 24-hour local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayWindow {
    pub start: String,
    pub end: String,
}

/// Bot availability schedule evaluated in the bot's own timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHours {
    #[serde(default)]
    pub enabled: bool,
    /// IANA timezone name, e.g. "America/Sao_Paulo".
    pub timezone: String,
    /// Keys are lowercase three-letter weekdays: mon, tue, wed, thu, fri, sat, sun.
    #[serde(default)]
    pub schedule: HashMap<String, DayWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// Tool definition exposed to the AI provider. Visual tools route their
/// call arguments through the visual response engine instead of being
/// surfaced as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub visual: bool,
    /// VRE template this tool renders with, when `visual` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_template_id: Option<String>,
}

/// Tunable behavior of a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    pub fallback_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_hours: Option<WorkingHours>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_context_window_size() -> usize {
    20
}
fn default_confidence_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Active,
    Paused,
}

/// A configured AI bot bound to one or more channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub tenant_id: String,
    pub provider: String,
    pub model: String,
    pub config: BotSettings,
    #[serde(default)]
    pub channels: Vec<String>,
    pub status: BotStatus,
}

/// History import job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Running => "running",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
            ImportStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "running" => Ok(ImportStatus::Running),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            "cancelled" => Ok(ImportStatus::Cancelled),
            other => Err(format!("unknown import status: {other}")),
        }
    }
}

/// Progress counters shared by the totals and imported columns of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub conversations: u64,
    pub messages: u64,
    pub contacts: u64,
}

/// A channel history import job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub channel_id: String,
    pub status: ImportStatus,
    #[serde(default)]
    pub totals: ImportCounters,
    #[serde(default)]
    pub imported: ImportCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_since: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_string_form_round_trips() {
        for ct in [
            ChannelType::WhatsAppOfficial,
            ChannelType::Voice(VoiceProvider::Twilio),
            ChannelType::Voice(VoiceProvider::Freeswitch),
            ChannelType::Telegram,
            ChannelType::WebChat,
            ChannelType::Sms,
        ] {
            let key = ct.as_key();
            assert_eq!(key.parse::<ChannelType>().unwrap(), ct);
        }
        assert_eq!(
            ChannelType::Voice(VoiceProvider::Vonage).as_key(),
            "voice:vonage"
        );
    }

    #[test]
    fn escalation_rule_serde_tagging() {
        let rule: EscalationRule =
            serde_json::from_str(r#"{"type":"keyword","keywords":["refund"]}"#).unwrap();
        match rule {
            EscalationRule::Keyword { keywords } => assert_eq!(keywords, vec!["refund"]),
            other => panic!("wrong variant: {other:?}"),
        }

        let rule: EscalationRule = serde_json::from_str(r#"{"type":"low_confidence"}"#).unwrap();
        assert!(matches!(rule, EscalationRule::LowConfidence { threshold: None }));
    }

    #[test]
    fn coexistence_status_round_trip() {
        for s in [
            CoexistenceStatus::Inactive,
            CoexistenceStatus::Pending,
            CoexistenceStatus::Active,
            CoexistenceStatus::Warning,
            CoexistenceStatus::Disconnected,
        ] {
            assert_eq!(s.as_str().parse::<CoexistenceStatus>().unwrap(), s);
        }
    }
}
