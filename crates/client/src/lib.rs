pub mod config;
pub mod driver;
pub mod link;
pub mod player;
pub mod session;
pub mod translator;

pub use config::{read_config, ClientConfig, CONFIG_FILE};
pub use driver::{ProxyRef, WorldDriver};
pub use link::{LinkSender, ReceiveHandler, ServerLink};
pub use player::{Avatar, LocalPlayer, RemotePlayer};
pub use session::{HostSession, SessionError};
pub use translator::Translator;
