use sentinel_relay::error::StartupError;
use sentinel_relay::{config, hub, ingest, net, relay, routes, shutdown, state, ticker};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env: {e}");
        }
    }
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env()?;
    let state = state::AppState::new(config)?;
    let config = state.config.clone();
    info!(
        cipher = state.codec.cipher_name(),
        ingest_mode = ?config.ingest_mode,
        relay = config.is_relay(),
        "sentinel relay starting"
    );

    let (trigger, shutdown) = shutdown::channel();
    let mut tasks = vec![
        ticker::spawn_heartbeat_ticker(state.aggregator.clone(), state.hub.clone(), shutdown.clone()),
        hub::spawn_liveness_task(state.hub.clone(), config.liveness_interval, shutdown.clone()),
    ];

    if let Some(url) = &config.upstream_url {
        info!(%url, "relay mode: tcp ingest disabled");
        tasks.push(
            relay::RelayClient {
                url: url.clone(),
                aggregator: state.aggregator.clone(),
                hub: state.hub.clone(),
                connect_timeout: config.connect_timeout,
                reconnect_delay: config.reconnect_delay,
            }
            .spawn(shutdown.clone()),
        );
    } else {
        tasks.push(ticker::spawn_throughput_ticker(
            state.aggregator.clone(),
            state.hub.clone(),
            shutdown.clone(),
        ));
        let (listener, tcp_port) =
            net::bind_with_retry(&config.bind_host, config.tcp_port, config.port_retry_limit).await?;
        if tcp_port != config.tcp_port {
            warn!(requested = config.tcp_port, bound = tcp_port, "tcp port in use, bound next free port");
        }
        info!(host = %config.bind_host, port = tcp_port, "tcp ingest listening");
        tasks.push(ingest::serve(listener, state.clone(), shutdown.clone()));
    }

    let (http, http_port) = net::bind_with_retry(&config.bind_host, config.http_port, config.port_retry_limit).await?;
    if http_port != config.http_port {
        warn!(requested = config.http_port, bound = http_port, "http port in use, bound next free port");
    }
    info!(host = %config.bind_host, port = http_port, "http + ws listening");

    let hub = state.hub.clone();
    tokio::spawn(async move {
        shutdown::wait_for_signal().await;
        info!("shutdown signal received");
        trigger.trigger();
        hub.close_all();
    });

    let mut graceful = shutdown.clone();
    axum::serve(http, routes::app(state))
        .with_graceful_shutdown(async move { graceful.wait().await })
        .await
        .map_err(StartupError::Serve)?;

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "background task failed");
        }
    }
    info!("sentinel relay stopped");
    Ok(())
}
