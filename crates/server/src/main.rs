use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use teamline_server::api::AppState;
use teamline_server::auth::jwt::TokenService;
use teamline_server::bus::{EventLog, Publisher, Subscriber};
use teamline_server::config::Config;
use teamline_server::db::migrations::run_migrations;
use teamline_server::db::pool::{check_pool_health, create_pg_pool, PoolConfig};
use teamline_server::pipeline::{
    ChatPipeline, TaskPipeline, CHAT_SUBSCRIBER_GROUP, TASK_SUBSCRIBER_GROUP,
};
use teamline_server::service::{ChatService, ProjectService, TaskService, UserService};
use teamline_server::store::{ChatStore, ProjectStore, TaskStore, UserStore};
use teamline_server::ws::Hub;
use teamline_server::{build_app, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .init();

    let db_dsn = config.db_dsn.clone().context("DB_DSN must be set")?;
    let pool = create_pg_pool(&db_dsn, PoolConfig::from_env()).await?;
    check_pool_health(&pool).await?;
    run_migrations(&pool).await?;

    let tokens = Arc::new(TokenService::new(&config.jwt_secret));

    let event_log = EventLog::new(config.pubsub_partitions);
    let publisher = Publisher::new(event_log.clone());

    let user_store = UserStore::postgres(pool.clone());
    let project_store = ProjectStore::postgres(pool.clone());
    let task_store = TaskStore::postgres(pool.clone());
    let chat_store = ChatStore::postgres(pool);

    let user_service = UserService::new(tokens.clone(), user_store.clone());
    let project_service =
        ProjectService::new(project_store.clone(), user_store.clone(), publisher.clone());
    let chat_service = ChatService::new(chat_store, user_store.clone(), publisher.clone());
    let task_service =
        TaskService::new(task_store, project_store, user_store, publisher.clone());

    let hub = Hub::new(chat_service.clone(), project_service.clone(), publisher.clone());

    let shutdown = CancellationToken::new();

    let chat_subscriber =
        Subscriber::new(event_log.clone(), CHAT_SUBSCRIBER_GROUP, shutdown.clone());
    ChatPipeline::new(chat_service.clone(), hub.clone()).run(&chat_subscriber);

    let task_subscriber = Subscriber::new(event_log, TASK_SUBSCRIBER_GROUP, shutdown.clone());
    TaskPipeline::new(hub.clone()).run(&task_subscriber);

    let presence_ticker = hub.spawn_presence_ticker(shutdown.clone());

    let state = AppState {
        tokens,
        users: user_service,
        projects: project_service,
        tasks: task_service,
        chats: chat_service,
    };
    let app = build_app(state, hub, &config.cors_origins);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;

    info!(listen_addr = %addr, environment = %config.environment, "starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")?;

    // Let in-flight records finish, then flush the producer.
    shutdown.cancel();
    chat_subscriber.join().await;
    task_subscriber.join().await;
    let _ = presence_ticker.await;
    publisher.close().await;

    info!(listen_addr = %addr, "stopped server");

    Ok(())
}
