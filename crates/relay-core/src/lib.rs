//! Core, I/O-light building blocks shared by the proxy service, the MCP
//! pruner server, and the stdio bridge: token estimation, provider routing,
//! the observation masker, the pruner client, session bookkeeping, the
//! tool-call id sanitizer, and configuration loading.

pub mod config;
pub mod error;
pub mod goal_hint;
pub mod masking;
pub mod message;
pub mod pruner_client;
pub mod router;
pub mod rpc;
pub mod sanitizer;
pub mod session;
pub mod tokens;

pub use config::RelayConfig;
pub use error::CoreError;
pub use message::{ChatMessage, FunctionCall, MessageContent, ToolCall, WireMessage};
pub use router::{ProviderRouteEntry, ResolvedRoute, RouterTable};
pub use session::{Session, SessionManager};
