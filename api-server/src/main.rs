//! Entry point for the orchestrator API server.

mod auth;
mod error;
mod gateway;
mod routes;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchestrator_core::config::Config;
use orchestrator_core::kanban_engine::KanbanEngine;
use orchestrator_core::webhook_dispatcher::WebhookDispatcher;
use orchestrator_core::workflow_worker::{self, WorkflowWorker};

use crate::state::AppState;

/// A team-channel event observed on the bus, queued for the webhook
/// bridge task to turn into deliveries. `EventBus` handlers are
/// synchronous, so the bridge only does the `Uuid::parse`+`try_send` here
/// and leaves the async `enqueue_for_event` call to the draining task.
struct WebhookCandidate {
    team_uuid: uuid::Uuid,
    event_type: String,
    payload: serde_json::Value,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchestrator_api_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(data_dir = ?config.data_dir, "starting orchestrator API server");

    let state = AppState::new(config)
        .await
        .expect("failed to initialize application state");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_workflow_worker(state.clone(), shutdown_rx);
    gateway::start_heartbeat_checker(state.clone());
    spawn_webhook_sweeper(state.clone());
    spawn_webhook_event_bridge(state.clone());
    spawn_approval_expiry_sweeper(state.clone());
    spawn_kanban_timeout_sweeper(state.clone());
    spawn_agent_health_checker(state.clone());

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::agents::router())
        .merge(routes::teams::router())
        .merge(routes::kanban::router())
        .merge(routes::webhooks::router())
        .merge(routes::approvals::router())
        .merge(routes::locks::router())
        .merge(routes::audit::router())
        .merge(routes::workflows::router())
        .merge(routes::gateway::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", state.config().bind_host, state.config().bind_port)
        .parse()
        .expect("BIND_HOST/BIND_PORT did not form a valid socket address");
    tracing::info!(%addr, "orchestrator API server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listener");
    let shutdown_grace = Duration::from_millis(state.config().shutdown_grace_ms);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone(), shutdown_tx, shutdown_grace))
        .await
        .expect("server error");
}

/// Waits for SIGINT/SIGTERM, stops the workflow worker from taking new
/// jobs, closes every live gateway connection with code 1001, then gives
/// in-flight work `grace` to finish before returning.
async fn shutdown_signal(state: AppState, shutdown_tx: tokio::sync::watch::Sender<bool>, grace: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(true);
    for agent_uuid in state.gateway().connected_agents().await {
        state.gateway().send_close(agent_uuid, 1001, "server shutting down").await;
    }
    tokio::time::sleep(grace).await;
}

fn spawn_workflow_worker(state: AppState, shutdown_rx: tokio::sync::watch::Receiver<bool>) {
    tokio::spawn(async move {
        let worker = WorkflowWorker {
            workflow_store: state.workflow_store(),
            agent_store: state.agent_store(),
            audit_store: state.audit_store(),
            cache: state.cache(),
            bus: state.bus(),
            dispatcher: state.dispatcher(),
            signing_key: state.signing_key(),
            secret_key: state.secret_key(),
            dispatch_mode: state.config().dispatch_mode,
        };
        workflow_worker::run_loop(state.queue(), &worker, shutdown_rx, Duration::from_millis(200)).await;
    });
}

/// Subscribes to every `team:*` channel event and forwards it to a
/// draining task that turns matches into queued `WebhookDelivery` rows.
fn spawn_webhook_event_bridge(state: AppState) {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<WebhookCandidate>(256);

    state.bus().subscribe(std::sync::Arc::new(move |event| {
        let Some(team_id) = event.channel.strip_prefix("team:") else { return };
        let Ok(team_uuid) = uuid::Uuid::parse_str(team_id) else { return };
        let _ = tx.try_send(WebhookCandidate {
            team_uuid,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
        });
    }));

    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            let dispatcher = WebhookDispatcher::new(state.webhook_store());
            if let Err(err) = dispatcher
                .enqueue_for_event(candidate.team_uuid, &candidate.event_type, candidate.payload)
                .await
            {
                tracing::warn!(%err, "failed to enqueue webhook deliveries for event");
            }
        }
    });
}

fn spawn_webhook_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            let dispatcher = WebhookDispatcher::new(state.webhook_store());
            match dispatcher.sweep().await {
                Ok(attempted) if attempted > 0 => tracing::debug!(attempted, "webhook sweep attempted deliveries"),
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "webhook sweep failed"),
            }
        }
    });
}

fn spawn_approval_expiry_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            match state.approval_store().expire_overdue().await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!(count = expired.len(), "expired overdue approval gates");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "approval expiry sweep failed"),
            }
        }
    });
}

fn spawn_kanban_timeout_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            let engine = KanbanEngine::new(state.kanban_store(), state.bus());
            match engine.sweep_timeouts().await {
                Ok(count) if count > 0 => tracing::info!(count, "swept timed-out kanban tasks"),
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "kanban timeout sweep failed"),
            }
        }
    });
}

fn spawn_agent_health_checker(state: AppState) {
    tokio::spawn(async move {
        let interval_ms = state.config().health_check_interval_ms;
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            for agent_uuid in state.gateway().connected_agents().await {
                let Ok(agent) = state.agent_store().get(agent_uuid).await else { continue };
                let healthy = state.dispatcher().health_check(&agent.endpoint_url).await.unwrap_or(false);
                if !healthy {
                    tracing::warn!(%agent_uuid, "agent failed HTTP health check, marking degraded");
                    let _ = state
                        .agent_store()
                        .update(agent_uuid, |a| a.status = orchestrator_core::model::AgentStatus::Degraded)
                        .await;
                }
            }
        }
    });
}
