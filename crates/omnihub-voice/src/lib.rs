pub mod asterisk;
pub mod connect;
pub mod form;
pub mod freeswitch;
pub mod twilio;
pub mod vonage;

pub use asterisk::AsteriskAdapter;
pub use connect::ConnectAdapter;
pub use freeswitch::FreeswitchAdapter;
pub use twilio::TwilioAdapter;
pub use vonage::VonageAdapter;
