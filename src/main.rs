use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use clap::Parser;
use fastcache::{
    application::error::AppError,
    cache::{
        CacheConfig, CacheOrchestrator, Classifier, KeyDeriver, LocalTier, RemoteStore, RemoteTier,
    },
    config::{self, CliArgs, Command, KeyArgs, Settings},
    infra::{
        error::InfraError,
        http::{self, AdminState, ProxyState, RateGate, ResponseEmitter, RouterState},
        origin::HttpOrigin,
        redis::RedisStore,
        telemetry,
    },
};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;

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
    let cli = CliArgs::parse();

    match &cli.command {
        Some(Command::Key(args)) => run_key(&cli, args),
        Some(Command::Serve(_)) | None => {
            let settings = config::load(&cli)?;
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
    }
}

fn run_key(cli: &CliArgs, args: &KeyArgs) -> Result<(), AppError> {
    let cache = config::load_cache(cli)?;
    let url = Url::parse(&args.url)
        .map_err(|err| AppError::invalid_argument(format!("--url {}: {err}", args.url)))?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::invalid_argument(format!("--url {} has no host", args.url)))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    let path = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    };

    let keys = KeyDeriver::new(&CacheConfig::from(&cache));
    let derived = keys.derive(
        url.scheme() == "https" || args.https,
        &host,
        &path,
        args.vary.as_deref(),
    );

    println!("{}", derived.key);
    println!("{}", derived.url);
    Ok(())
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    if settings.admin.uses_default_secret() {
        warn!("admin.secret_key is the built-in default; set FASTCACHE__ADMIN__SECRET_KEY");
    }

    let mut cache_config = CacheConfig::from(&settings.cache);
    let remote = connect_remote(&settings, &mut cache_config).await;
    let origin = HttpOrigin::new(&settings.backend)?;
    info!(backend = %origin.base_url(), "origin client ready");

    let local = cache_config
        .local_enabled
        .then(|| Arc::new(LocalTier::new(&cache_config)));
    let janitor = local
        .clone()
        .map(|local| spawn_janitor(local, cache_config.purge_interval));

    let orchestrator = Arc::new(CacheOrchestrator::new(
        local.clone(),
        remote,
        Arc::new(origin),
        cache_config.fresh_ttl,
    ));

    let state = RouterState {
        proxy: ProxyState {
            orchestrator,
            classifier: Arc::new(Classifier::new(&cache_config)),
            keys: Arc::new(KeyDeriver::new(&cache_config)),
            emitter: ResponseEmitter::new(cache_config.diagnostics),
            max_body_bytes: settings.backend.max_body_bytes,
        },
        admin: AdminState {
            local,
            secret_key: Arc::from(settings.admin.secret_key.as_str()),
        },
    };
    let gate = RateGate::new(&settings.admission);

    let result = serve_http(&settings, state, gate).await;

    if let Some(janitor) = janitor {
        janitor.abort();
        let _ = janitor.await;
    }

    result
}

/// Connect the shared store when configured. Without a reachable store the
/// local tier is switched on so the proxy still caches.
async fn connect_remote(settings: &Settings, cache: &mut CacheConfig) -> RemoteTier {
    let Some(url) = settings.remote.url.as_deref() else {
        if !cache.local_enabled {
            info!("no remote store configured; enabling local cache");
        }
        cache.local_enabled = true;
        return RemoteTier::disabled();
    };

    match RedisStore::connect(url, settings.remote.hash_field.clone()).await {
        Ok(store) => {
            let store: Arc<dyn RemoteStore> = Arc::new(store);
            RemoteTier::new(store, settings.remote.key_prefix.clone())
                .with_max_value_bytes(settings.remote.max_value_bytes)
        }
        Err(err) => {
            warn!(error = %err, "remote store unreachable; disabling it and enabling local cache");
            cache.local_enabled = true;
            RemoteTier::disabled()
        }
    }
}

fn spawn_janitor(local: Arc<LocalTier>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = local.purge_expired();
            if purged > 0 {
                info!(purged, remaining = local.len(), "purged expired local entries");
            }
        }
    })
}

async fn serve_http(settings: &Settings, state: RouterState, gate: RateGate) -> Result<(), AppError> {
    let router = http::build_router(state, gate);
    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "fastcache listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for shutdown signal; serving until killed");
                // Dropping the sender would read as a shutdown request.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let mut server_rx = shutdown_rx.clone();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        },
    );

    let grace = settings.server.graceful_shutdown;
    let mut grace_rx = shutdown_rx;
    tokio::select! {
        result = server.into_future() => result.map_err(|err| AppError::from(InfraError::from(err)))?,
        _ = async move {
            let _ = grace_rx.wait_for(|stop| *stop).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_seconds = grace.as_secs(), "graceful shutdown timed out; dropping open connections");
        }
    }

    Ok(())
}
