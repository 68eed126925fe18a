use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use omnihub_core::types::{ChannelType, VoiceProvider};

use crate::adapter::{MessagingAdapter, VoiceAdapter};

/// Holds every configured adapter, keyed by channel type.
///
/// Adapters are registered once at startup and shared (`Arc`) with the
/// ingress handlers and the outbound dispatcher. Registering a second
/// adapter for the same key replaces the first.
#[derive(Default)]
pub struct AdapterRegistry {
    messaging: HashMap<ChannelType, Arc<dyn MessagingAdapter>>,
    voice: HashMap<VoiceProvider, Arc<dyn VoiceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_messaging(
        &mut self,
        channel_type: ChannelType,
        adapter: Arc<dyn MessagingAdapter>,
    ) {
        info!(channel = %channel_type, adapter = %adapter.name(), "registering messaging adapter");
        self.messaging.insert(channel_type, adapter);
    }

    pub fn register_voice(&mut self, provider: VoiceProvider, adapter: Arc<dyn VoiceAdapter>) {
        info!(provider = provider.as_str(), adapter = %adapter.name(), "registering voice adapter");
        self.voice.insert(provider, adapter);
    }

    pub fn messaging(&self, channel_type: &ChannelType) -> Option<Arc<dyn MessagingAdapter>> {
        self.messaging.get(channel_type).cloned()
    }

    pub fn voice(&self, provider: &VoiceProvider) -> Option<Arc<dyn VoiceAdapter>> {
        self.voice.get(provider).cloned()
    }

    /// Channel types with a registered messaging adapter, for the
    /// dispatcher to subscribe on.
    pub fn messaging_channel_types(&self) -> Vec<ChannelType> {
        let mut types: Vec<_> = self.messaging.keys().cloned().collect();
        types.sort_by_key(|t| t.as_key());
        types
    }

    /// Registered voice providers, in stable order.
    pub fn voice_providers(&self) -> Vec<VoiceProvider> {
        let mut providers: Vec<_> = self.voice.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}
