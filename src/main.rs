use std::{net::SocketAddr, process, sync::Arc};

use contentgate::{
    application::{
        comments::CommentService,
        content::ContentService,
        error::AppError,
        publishing::PublishingService,
        repos::{ContentRepository, ContentWriteRepo},
        settings::{ConfigProvider, Configuration, RuntimeSettings, SettingsService},
    },
    cache::{CacheConfig, CacheStore, InvalidationIndex},
    clock::{SharedClock, SystemClock},
    config,
    domain::entities::SiteProfile,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        memory::{InMemoryRepository, Seed},
        telemetry,
    },
    limiter::RateLimiter,
};
use tokio::try_join;
use tracing::{Dispatch, Level, debug, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

struct ApplicationContext {
    http_state: HttpState,
    admin_state: AdminState,
    store: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    runtime: Arc<RuntimeSettings>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repository = Arc::new(init_repository(&settings)?);
    let app = build_application_context(repository, &settings);

    let sweep_handle = spawn_sweeper(
        app.store.clone(),
        app.limiter.clone(),
        app.runtime.clone(),
        CacheConfig::from(&settings.cache),
    );

    let result = serve_http(&settings, app.http_state, app.admin_state).await;

    sweep_handle.abort();
    let _ = sweep_handle.await;

    result
}

fn init_repository(settings: &config::Settings) -> Result<InMemoryRepository, AppError> {
    let mut seed = match settings.content.seed_file.as_deref() {
        Some(path) => {
            info!(
                target = "contentgate::seed",
                path = %path.display(),
                "Loading content seed"
            );
            Seed::load(path)?
        }
        None => Seed::default(),
    };

    if seed.site.name.trim().is_empty() {
        seed.site = SiteProfile {
            name: settings.site.name.clone(),
            description: settings.site.description.clone(),
            url: settings.site.url.clone(),
            admin_email: settings.site.admin_email.clone(),
        };
    }

    Ok(InMemoryRepository::from_seed(seed))
}

fn build_application_context(
    repository: Arc<InMemoryRepository>,
    settings: &config::Settings,
) -> ApplicationContext {
    let reader: Arc<dyn ContentRepository> = repository.clone();
    let writer: Arc<dyn ContentWriteRepo> = repository;
    let clock: SharedClock = Arc::new(SystemClock);

    let cache_config = CacheConfig::from(&settings.cache);
    let store = Arc::new(CacheStore::new(&cache_config, clock.clone()));
    let invalidation = Arc::new(InvalidationIndex::new(store.clone(), clock.clone()));

    let runtime = Arc::new(RuntimeSettings::new(Configuration::from(settings)));
    let provider: Arc<dyn ConfigProvider> = runtime.clone();
    let limiter = Arc::new(RateLimiter::new(clock.clone()));

    let content = Arc::new(ContentService::new(
        reader.clone(),
        store.clone(),
        invalidation.clone(),
        provider.clone(),
    ));
    let comments = Arc::new(CommentService::new(
        reader,
        writer.clone(),
        limiter.clone(),
        invalidation.clone(),
        provider,
        clock,
    ));
    let publishing = Arc::new(PublishingService::new(writer, invalidation.clone()));
    let settings_service = Arc::new(SettingsService::new(runtime.clone(), invalidation));

    ApplicationContext {
        http_state: HttpState {
            content: content.clone(),
            comments,
        },
        admin_state: AdminState {
            content,
            publishing,
            settings: settings_service,
        },
        store,
        limiter,
        runtime,
    }
}

/// Periodically drops expired cache entries and idle limiter identities.
fn spawn_sweeper(
    store: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    runtime: Arc<RuntimeSettings>,
    cache_config: CacheConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cache_config.sweep_interval());
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            let pruned = limiter.prune(runtime.snapshot().limit_policy().cooldown);
            debug!(
                target = "contentgate::sweep",
                purged,
                pruned,
                entries = store.len(),
                "Housekeeping sweep finished"
            );
        }
    })
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "contentgate::http",
        public = %settings.server.addr,
        admin = %settings.server.admin_addr,
        "Listening"
    );

    let grace = settings.server.graceful_shutdown;
    let public_server = axum::serve(
        public_listener,
        public_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(grace));
    let admin_server = axum::serve(
        admin_listener,
        admin_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(grace));

    let public_server = async { public_server.await };
    let admin_server = async { admin_server.await };

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

/// Resolves on ctrl-c. In-flight requests then get `grace` to finish before
/// the process stops waiting on them.
async fn shutdown_signal(grace: std::time::Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(
        target = "contentgate::http",
        grace_secs = grace.as_secs(),
        "Shutdown requested"
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        error!(target = "contentgate::http", "Graceful shutdown timed out");
        process::exit(1);
    });
}
