pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod pda;
pub mod session;
pub mod stream;
pub mod tool;
pub mod trace;

pub use capability::{LlmCapabilities, ModelRole, ToolSupport};
pub use config::Config;
pub use error::{Error, ProviderError, ProviderErrorKind, Result};
pub use event::Event;
pub use session::{CompressedContext, Session, SessionStatus};
pub use stream::{BoxStream, StreamEvent, Usage};
pub use tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
