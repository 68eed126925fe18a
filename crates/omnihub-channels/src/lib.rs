pub mod adapter;
pub mod error;
pub mod event;
pub mod ivr;
pub mod limiter;
pub mod manager;
pub mod normalize;
pub mod retry;

pub use adapter::{
    AdapterCapabilities, CallHandle, CallInfo, CallRequest, CallStatus, MediaDownload,
    MessagingAdapter, RecordingInfo, RenderFormat, SendReceipt, VoiceAdapter, WebhookHeaders,
};
pub use error::{ChannelError, Result};
pub use event::WebhookEvent;
pub use ivr::IvrAction;
pub use manager::AdapterRegistry;
