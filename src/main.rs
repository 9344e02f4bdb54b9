use eyre::WrapErr;
use metrics_exporter_prometheus::PrometheusBuilder;
use motorval::{
    api::{self, AppState},
    aspects::AspectResolver,
    cache::{Clock, SystemClock, TtlCache},
    config::AppConfig,
    ebay::EbayClient,
    http::build_client,
    market::{
        DisabledProvider, HttpValuationProvider, MarketValueService, ValuationProvider, open_store,
    },
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "motorval.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http = build_client(config.http.timeout, config.http.connect_timeout);

    if !config.ebay.has_credentials() {
        warn!(
            target = "motorval.api",
            "EBAY_APP_ID/EBAY_CERT_ID not set; aspects will be served from the fallback catalog"
        );
    }
    let ebay = EbayClient::new(http.clone(), config.ebay.clone(), clock.clone());
    let aspect_cache = Arc::new(TtlCache::new("aspects", clock.clone()));
    let resolver = Arc::new(AspectResolver::new(
        Arc::new(ebay),
        aspect_cache.clone(),
        clock.clone(),
        config.resolver.clone(),
        config.cache.aspect_ttl,
    ));

    let provider: Arc<dyn ValuationProvider> = match &config.market.valuation_url {
        Some(url) => Arc::new(HttpValuationProvider::new(
            http.clone(),
            url,
            config.market.valuation_api_key.clone(),
        )),
        None => {
            warn!(
                target = "motorval.api",
                "VALUATION_API_URL not set; market-value lookups will report unavailable"
            );
            Arc::new(DisabledProvider)
        }
    };
    let store = open_store(&config.market.store).wrap_err("opening market value store")?;
    let market_cache = Arc::new(TtlCache::new("market", clock.clone()));
    let market = Arc::new(MarketValueService::new(
        provider,
        market_cache.clone(),
        store,
        clock.clone(),
        config.cache.market_value_ttl,
        config.market.debounce,
    ));
    market.hydrate().await;

    let _sweepers = [
        aspect_cache.spawn_sweeper(config.cache.sweep_interval),
        market_cache.spawn_sweeper(config.cache.sweep_interval),
    ];

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = api::router(AppState {
        resolver,
        market,
        prometheus: Some(prometheus),
        metrics_key: config.server.metrics_key.clone(),
    })
    .layer(cors)
    .layer(TraceLayer::new_for_http())
    .layer(axum::extract::DefaultBodyLimit::max(config.server.body_limit));

    let addr: SocketAddr = ([0, 0, 0, 0], config.server.port).into();
    info!(target = "motorval.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
