use crate::call::{CallControl, CallFlowRef};
use crate::config::Config;
use crate::dispatcher::EventDispatcher;
use crate::flowrecord::FlowRecordSender;
use anyhow::{anyhow, Result};
use axum::{response::IntoResponse, routing::get, Json, Router};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, select, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub dispatcher: Arc<EventDispatcher>,
    pub client: Arc<dyn CallControl>,
    pub active_flows: Arc<Mutex<HashMap<String, CallFlowRef>>>,
    pub flowrecord_sender: Mutex<Option<FlowRecordSender>>,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub client: Option<Arc<dyn CallControl>>,
    pub flowrecord_sender: Option<FlowRecordSender>,
    pub token: Option<CancellationToken>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            client: None,
            flowrecord_sender: None,
            token: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn client(mut self, client: Arc<dyn CallControl>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn flowrecord_sender(mut self, sender: FlowRecordSender) -> Self {
        self.flowrecord_sender = Some(sender);
        self
    }

    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        config.menu.validate()?;
        let client = self
            .client
            .ok_or_else(|| anyhow!("a call control client is required"))?;
        Ok(Arc::new(AppStateInner {
            config,
            dispatcher: Arc::new(EventDispatcher::new()),
            client,
            active_flows: Arc::new(Mutex::new(HashMap::new())),
            flowrecord_sender: Mutex::new(self.flowrecord_sender),
            token: self.token.unwrap_or_default(),
        }))
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };

    let http_task = axum::serve(listener, app.into_make_service());
    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    Ok(())
}

async fn index_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "callflow",
        "version": crate::version::get_short_version(),
    }))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    let webhook_routes = crate::handler::router().with_state(state);

    Router::new()
        .route("/", get(index_handler))
        .merge(webhook_routes)
        .layer(cors)
}
