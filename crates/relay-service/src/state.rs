//! Shared application state threaded through every axum handler.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use relay_core::config::RelayConfig;
use relay_core::pruner_client::PrunerClient;
use relay_core::sanitizer::CircuitBreakerConfig;
use relay_core::session::SessionManager;

use crate::gateway::McpGateway;
use crate::metrics::MetricsStore;
use crate::upstream::UpstreamClient;
use crate::ws::WsHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Arc<dyn MetricsStore>,
    pub hub: Arc<WsHub>,
    pub upstream: Arc<UpstreamClient>,
    pub pruner_client: Arc<PrunerClient>,
    pub gateway: Arc<McpGateway>,
    pub sanitizer_breaker: CircuitBreakerConfig,
    pub cline_watermark: Arc<AtomicU64>,
}
