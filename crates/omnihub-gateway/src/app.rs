//! Shared state, component wiring, and the HTTP router.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use omnihub_agent::openai::OpenAiProvider;
use omnihub_agent::Orchestrator;
use omnihub_bus::{InMemoryBus, MessageBus, MessageDeduplicator};
use omnihub_channels::AdapterRegistry;
use omnihub_context::ContextStore;
use omnihub_core::config::HubConfig;
use omnihub_core::directory::StaticBotDirectory;
use omnihub_core::types::{ChannelRecord, ChannelType, CoexistenceStatus, VoiceProvider};
use omnihub_dispatch::{
    CoexistenceMonitor, CoexistenceStore, InboundConsumer, OutboundDispatcher, SqliteDirectory,
};
use omnihub_flow::{FlowEngine, FlowStore};
use omnihub_whatsapp::webhook::ChannelIdentity;
use omnihub_whatsapp::{CloudApiAdapter, SessionWindowStore};

use crate::http;

/// Channel id used for the config-registered WhatsApp channel.
pub const WHATSAPP_CHANNEL_ID: &str = "whatsapp-main";

/// Central shared state — passed as Arc<AppState> to all handlers.
pub struct AppState {
    pub config: HubConfig,
    pub bus: Arc<InMemoryBus>,
    pub registry: Arc<AdapterRegistry>,
    pub whatsapp: Option<Arc<CloudApiAdapter>>,
    /// Concrete handles for the stateful socket adapters, kept so the
    /// connection supervisors drive the same clients the registry serves.
    pub asterisk: Option<Arc<omnihub_voice::AsteriskAdapter>>,
    pub freeswitch: Option<Arc<omnihub_voice::FreeswitchAdapter>>,
    pub sessions: Arc<SessionWindowStore>,
    pub coexistence: Arc<CoexistenceStore>,
    pub directory: Arc<SqliteDirectory>,
    pub context: Arc<ContextStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub dedup: Arc<MessageDeduplicator>,
    pub shutdown: CancellationToken,
}

fn open_db(config: &HubConfig) -> anyhow::Result<Connection> {
    if let Some(dir) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(Connection::open(&config.database.path)?)
}

/// Build every component from config.
pub async fn bootstrap(config: HubConfig) -> anyhow::Result<Arc<AppState>> {
    let bus = Arc::new(InMemoryBus::new(config.bus.queue_depth));
    let shutdown = bus.shutdown_token();

    let context = Arc::new(ContextStore::new(open_db(&config)?)?);
    let flow_store = Arc::new(FlowStore::new(open_db(&config)?)?);
    let flow_engine = Arc::new(FlowEngine::new(flow_store));
    let sessions = Arc::new(SessionWindowStore::new(open_db(&config)?)?);
    let coexistence = Arc::new(CoexistenceStore::new(open_db(&config)?)?);
    let directory = Arc::new(SqliteDirectory::new(open_db(&config)?)?);

    let provider = Arc::new(OpenAiProvider::new(&config.ai));
    let orchestrator = Arc::new(Orchestrator::new(
        context.clone(),
        flow_engine,
        provider,
    ));

    let mut registry = AdapterRegistry::new();

    let whatsapp = match &config.whatsapp {
        Some(wa_config) => {
            let adapter = Arc::new(CloudApiAdapter::new(
                ChannelIdentity {
                    tenant_id: config.tenant.id.clone(),
                    channel_id: WHATSAPP_CHANNEL_ID.to_string(),
                },
                wa_config,
            )?);
            registry.register_messaging(ChannelType::WhatsAppOfficial, adapter.clone());

            let mut channel_config = std::collections::HashMap::new();
            if let Some(t) = &wa_config.default_template {
                channel_config.insert("default_template".to_string(), serde_json::json!(t));
            }
            channel_config.insert(
                "template_language".to_string(),
                serde_json::json!(wa_config.template_language),
            );
            channel_config.insert(
                "coexistence_enabled".to_string(),
                serde_json::json!(wa_config.coexistence_enabled),
            );
            directory.upsert_channel(&ChannelRecord {
                id: WHATSAPP_CHANNEL_ID.to_string(),
                tenant_id: config.tenant.id.clone(),
                channel_type: ChannelType::WhatsAppOfficial,
                credentials: [
                    (
                        "phone_number_id".to_string(),
                        wa_config.phone_number_id.clone(),
                    ),
                ]
                .into(),
                config: channel_config,
                coexistence_status: CoexistenceStatus::Inactive,
                last_echo_at: None,
            })?;
            if wa_config.coexistence_enabled {
                coexistence.track(WHATSAPP_CHANNEL_ID)?;
            }
            Some(adapter)
        }
        None => None,
    };

    let mut asterisk = None;
    let mut freeswitch = None;
    if let Some(c) = &config.voice.twilio {
        registry.register_voice(
            VoiceProvider::Twilio,
            Arc::new(omnihub_voice::TwilioAdapter::new(c)?),
        );
    }
    if let Some(c) = &config.voice.vonage {
        registry.register_voice(
            VoiceProvider::Vonage,
            Arc::new(omnihub_voice::VonageAdapter::new(c)?),
        );
    }
    if let Some(c) = &config.voice.amazon_connect {
        registry.register_voice(
            VoiceProvider::AmazonConnect,
            Arc::new(omnihub_voice::ConnectAdapter::new(c)?),
        );
    }
    if let Some(c) = &config.voice.asterisk {
        let adapter = Arc::new(omnihub_voice::AsteriskAdapter::new(c)?);
        registry.register_voice(VoiceProvider::Asterisk, adapter.clone());
        asterisk = Some(adapter);
    }
    if let Some(c) = &config.voice.freeswitch {
        let adapter = Arc::new(omnihub_voice::FreeswitchAdapter::new(c)?);
        registry.register_voice(VoiceProvider::Freeswitch, adapter.clone());
        freeswitch = Some(adapter);
    }

    let state = AppState {
        config,
        bus,
        registry: Arc::new(registry),
        whatsapp,
        asterisk,
        freeswitch,
        sessions,
        coexistence,
        directory,
        context,
        orchestrator,
        dedup: Arc::new(MessageDeduplicator::new()),
        shutdown,
    };
    Ok(Arc::new(state))
}

/// Start the bus consumers and background loops.
pub async fn spawn_workers(state: Arc<AppState>) -> anyhow::Result<()> {
    // Inbound orchestration workers for this node's tenant.
    let consumer = Arc::new(InboundConsumer::new(
        state.orchestrator.clone(),
        state.context.clone(),
        Arc::new(StaticBotDirectory::new(state.config.bots.clone())),
        state.directory.clone(),
        state.bus.clone(),
        state.dedup.clone(),
        state.shutdown.clone(),
    ));
    state
        .bus
        .subscribe_inbound(&state.config.tenant.id, "orchestrator", handler(consumer))
        .await?;

    // One outbound dispatcher group per registered channel type.
    let mut outbound_types = state.registry.messaging_channel_types();
    outbound_types.extend(
        state
            .registry
            .voice_providers()
            .into_iter()
            .map(ChannelType::Voice),
    );
    for channel_type in outbound_types {
        let dispatcher = Arc::new(OutboundDispatcher::new(
            state.registry.clone(),
            state.sessions.clone(),
            state.directory.clone(),
            state.bus.clone(),
        ));
        state
            .bus
            .subscribe_outbound(&channel_type, "dispatcher", handler(dispatcher))
            .await?;
        info!(channel = %channel_type, "outbound dispatcher subscribed");
    }

    // Coexistence scanner.
    if state.config.coexistence.enabled {
        let monitor = CoexistenceMonitor::new(
            state.coexistence.clone(),
            state.bus.clone(),
            state.config.coexistence.scan_interval_secs,
        );
        let shutdown = state.shutdown.clone();
        tokio::spawn(monitor.run(shutdown));
    }

    // Dedupe sweeper.
    {
        let dedup = state.dedup.clone();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            dedup.run_sweeper(60, shutdown).await;
        });
    }

    // Stateful socket supervisors (AMI / ESL) reconnect with backoff
    // until shutdown.
    if let Some(adapter) = &state.asterisk {
        tokio::spawn(adapter.ami().run(state.shutdown.clone()));
    }
    if let Some(adapter) = &state.freeswitch {
        tokio::spawn(adapter.esl().run(state.shutdown.clone()));
    }

    Ok(())
}

fn handler<H: omnihub_bus::bus::MessageHandler + 'static>(
    h: Arc<H>,
) -> Arc<dyn omnihub_bus::bus::MessageHandler> {
    h
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health))
        .route(
            "/api/v1/webhooks/whatsapp",
            get(http::whatsapp::challenge).post(http::whatsapp::webhook),
        )
        .route("/voice/webhook", post(http::voice::webhook))
        .route("/voice/status", post(http::voice::status))
        .route("/voice/recording", post(http::voice::recording))
        .route("/voice/transcription", post(http::voice::transcription))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
