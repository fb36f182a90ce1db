use std::{process, sync::Arc, time::Duration};

use flashsale::{
    application::{
        error::AppError,
        repos::{ShopTypesRepo, ShopsRepo, VouchersRepo},
        seckill::SeckillService,
        shop_types::ShopTypeService,
        shops::ShopService,
    },
    cache::{
        CacheClient, CacheConfig, CacheStore, CacheStrategy, DistributedMutex, IdGenerator,
        MemoryCacheStore,
    },
    config,
    infra::{
        cache_warmer::CacheWarmer,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        redis::RedisCacheStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
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
        config::Command::Warm(_) => run_warm(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings, settings.database.run_migrations).await?;
    let store = init_cache_store(&settings).await?;
    let cache = CacheClient::new(store.clone(), CacheConfig::from(&settings.cache));
    let services = build_services(&repositories, store, cache.clone(), &settings);

    let cache_config = cache.config();
    if cache_config.warm_on_startup && cache_config.shop_strategy == CacheStrategy::LogicalExpire {
        let warmer = CacheWarmer::new((*services.shops).clone(), cache_config.warm_limit);
        if let Err(err) = warmer.warm_shops().await {
            warn!(
                target = "flashsale::serve",
                error = %err,
                "startup cache warm failed; logical-expire lookups will read as not found until warmed"
            );
        }
    }

    let state = HttpState {
        shops: services.shops,
        shop_types: services.shop_types,
        seckill: services.seckill,
        db: Some((*repositories).clone()),
    };

    let result = serve_http(&settings, state).await;

    let drain = settings.server.graceful_shutdown;
    if tokio::time::timeout(drain, cache.wait_for_rebuilds())
        .await
        .is_err()
    {
        warn!(
            target = "flashsale::serve",
            timeout_ms = drain.as_millis() as u64,
            "background cache rebuilds still running at shutdown"
        );
    }

    result
}

async fn run_warm(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings, false).await?;
    let store = init_cache_store(&settings).await?;
    if settings.redis.url.is_none() {
        warn!(
            target = "flashsale::warm",
            "no redis url configured; warming the in-process store has no lasting effect"
        );
    }
    let cache = CacheClient::new(store.clone(), CacheConfig::from(&settings.cache));
    let services = build_services(&repositories, store, cache.clone(), &settings);

    let report = CacheWarmer::new((*services.shops).clone(), cache.config().warm_limit)
        .warm_shops()
        .await
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    if report.failed > 0 {
        return Err(AppError::unexpected(format!(
            "{} of {} shops failed to warm",
            report.failed,
            report.warmed + report.missing + report.failed
        )));
    }
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_repositories(&settings, true).await?;
    info!(target = "flashsale::migrate", "database migrations applied");
    Ok(())
}

struct Services {
    shops: Arc<ShopService>,
    shop_types: Arc<ShopTypeService>,
    seckill: Arc<SeckillService>,
}

fn build_services(
    repositories: &Arc<PostgresRepositories>,
    store: Arc<dyn CacheStore>,
    cache: CacheClient,
    settings: &config::Settings,
) -> Services {
    let shops_repo: Arc<dyn ShopsRepo> = repositories.clone();
    let shop_types_repo: Arc<dyn ShopTypesRepo> = repositories.clone();
    let vouchers_repo: Arc<dyn VouchersRepo> = repositories.clone();

    Services {
        shops: Arc::new(ShopService::new(shops_repo, cache.clone())),
        shop_types: Arc::new(ShopTypeService::new(shop_types_repo, cache)),
        seckill: Arc::new(SeckillService::new(
            vouchers_repo,
            DistributedMutex::new(store.clone()),
            IdGenerator::new(store),
            settings.seckill.lock_lease,
        )),
    }
}

async fn init_repositories(
    settings: &config::Settings,
    run_migrations: bool,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    if run_migrations {
        PostgresRepositories::run_migrations(&pool)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    }

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn init_cache_store(settings: &config::Settings) -> Result<Arc<dyn CacheStore>, AppError> {
    match settings.redis.url.as_deref() {
        Some(url) => {
            let store = RedisCacheStore::connect(url, settings.redis.command_timeout)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            store
                .ping()
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!(
                target = "flashsale::serve",
                "no redis url configured; locks and ids only coordinate within this process"
            );
            Ok(Arc::new(MemoryCacheStore::new()))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "flashsale::serve",
        addr = %settings.server.addr,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "flashsale::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "flashsale::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        target = "flashsale::serve",
        grace_ms = grace.as_millis() as u64,
        "shutdown signal received; draining connections"
    );
}
