//! Example web server keeping per-visitor state in the session store.
//!
//! Run with: cargo run -p web-server-demo
//!
//! Uses the in-memory backend by default. Set `KVSESSION_BACKEND=redis`
//! (plus optional `KVSESSION_HOST`, `KVSESSION_PORT`, `KVSESSION_PASSWORD`)
//! to talk to a Redis-protocol server instead.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use kvsession_core::Connector;
use kvsession_store::{
    KvSessionStore, Options, SessionId, SessionStore,
    backend::{MemoryBackend, MemoryConnector},
    session_struct,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Profile kept in the session, stored behind a pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Profile {
    name: String,
    #[serde(default)]
    theme: Option<String>,
}
session_struct!(Profile, "demo.Profile");

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let options = options_from_env();
    let result = match std::env::var("KVSESSION_BACKEND").as_deref() {
        Ok("redis") => match KvSessionStore::connect(options).await {
            Ok(store) => serve(store).await,
            Err(e) => Err(e.to_string()),
        },
        _ => {
            let connector = MemoryConnector::new(Arc::new(MemoryBackend::new()));
            match KvSessionStore::with_connector(connector, options).await {
                Ok(store) => serve(store).await,
                Err(e) => Err(e.to_string()),
            }
        }
    };

    if let Err(e) = result {
        tracing::error!("Server stopped: {e}");
        std::process::exit(1);
    }
}

fn options_from_env() -> Options {
    let mut options = Options::default();
    if let Ok(host) = std::env::var("KVSESSION_HOST") {
        options.host = host;
    }
    if let Some(port) = std::env::var("KVSESSION_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
    {
        options.port = port;
    }
    if let Ok(password) = std::env::var("KVSESSION_PASSWORD") {
        options = options.with_password(password);
    }
    options
}

async fn serve<C: Connector>(store: KvSessionStore<C>) -> Result<(), String> {
    let state = Arc::new(store);

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler::<C>))
        .route("/sessions", post(create_handler::<C>))
        .route(
            "/sessions/{id}",
            get(exists_handler::<C>).delete(clear_handler::<C>),
        )
        .route("/sessions/{id}/visits", post(visit_handler::<C>))
        .route(
            "/sessions/{id}/profile",
            get(get_profile_handler::<C>)
                .put(put_profile_handler::<C>)
                .delete(delete_profile_handler::<C>),
        )
        .route("/sessions/{id}/max-age/{secs}", put(max_age_handler::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| e.to_string())?;
    axum::serve(listener, app).await.map_err(|e| e.to_string())
}

type AppState<C> = State<Arc<KvSessionStore<C>>>;

async fn health_handler<C: Connector>(State(store): AppState<C>) -> impl IntoResponse {
    match store.health_check().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn create_handler<C: Connector>(State(store): AppState<C>) -> impl IntoResponse {
    let id = Uuid::new_v4().to_string();
    // Records appear with their first field; this never touches the store.
    store.add(&SessionId::from(id.as_str())).await;
    (StatusCode::CREATED, id)
}

async fn exists_handler<C: Connector>(
    State(store): AppState<C>,
    Path(id): Path<String>,
) -> StatusCode {
    if store.exists(&SessionId::from(id)).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn clear_handler<C: Connector>(
    State(store): AppState<C>,
    Path(id): Path<String>,
) -> StatusCode {
    if store.clear(&SessionId::from(id)).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn visit_handler<C: Connector>(
    State(store): AppState<C>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = SessionId::from(id);
    let visits = store
        .get(&id, "visits")
        .await
        .and_then(|value| value.downcast::<u64>().ok())
        .unwrap_or(0)
        + 1;

    match store.set(&id, "visits", &visits).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "visits": visits }))),
        Err(e) => {
            tracing::error!("Failed to record visit: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn get_profile_handler<C: Connector>(
    State(store): AppState<C>,
    Path(id): Path<String>,
) -> Result<Json<Profile>, StatusCode> {
    store
        .get(&SessionId::from(id), "profile")
        .await
        .and_then(|value| value.downcast::<Box<Profile>>().ok())
        .map(|profile| Json(*profile))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_profile_handler<C: Connector>(
    State(store): AppState<C>,
    Path(id): Path<String>,
    Json(profile): Json<Profile>,
) -> StatusCode {
    match store
        .set(&SessionId::from(id), "profile", &Box::new(profile))
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            tracing::error!("Failed to store profile: {e}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn delete_profile_handler<C: Connector>(
    State(store): AppState<C>,
    Path(id): Path<String>,
) -> StatusCode {
    if store.delete(&SessionId::from(id), "profile").await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn max_age_handler<C: Connector>(
    State(store): AppState<C>,
    Path((id, secs)): Path<(String, u64)>,
) -> StatusCode {
    store
        .set_id_max_age(&SessionId::from(id), Duration::from_secs(secs))
        .await;
    StatusCode::NO_CONTENT
}
