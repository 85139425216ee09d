use std::net::SocketAddr;

use anyhow::Context;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Server};
use tracing::{error, info};

use ecotwin_core::config::Config;
use ecotwin_core::protocols::{graphql, grpc::TwinGrpc, rest};
use ecotwin_core::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = parse_config_path_from_args()
        .or_else(|| std::env::var("ECOTWIN_CONFIG").ok())
        .unwrap_or_else(|| "config/ecotwin.yaml".to_string());
    let cfg = Config::from_path(&config_path).context("loading config")?;
    info!(%config_path, history_backend = ?cfg.history.backend, "loaded config");

    let state = AppState::from_config(&cfg).await?;
    let state_for_http = state.clone();

    let http_addr: SocketAddr = cfg.core.bind_http.parse().context("invalid core.bind_http")?;
    let grpc_addr: SocketAddr = cfg.core.bind_grpc.parse().context("invalid core.bind_grpc")?;

    let graphql_schema = graphql::build_schema(state.clone());

    let make_svc = make_service_fn(move |_conn| {
        let state = state_for_http.clone();
        let graphql_schema = graphql_schema.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let state = state.clone();
                let graphql_schema = graphql_schema.clone();
                async move { rest::route(req, state, graphql_schema).await }
            }))
        }
    });

    let http_server = Server::bind(&http_addr).serve(make_svc);
    info!(%http_addr, "http listening");

    let grpc_server = tonic::transport::Server::builder()
        .add_service(TwinGrpc::new(state.clone()))
        .serve(grpc_addr);
    info!(%grpc_addr, "grpc listening");

    tokio::select! {
        r = http_server => {
            if let Err(e) = r { error!(error=%e, "http server error"); }
        }
        r = grpc_server => {
            if let Err(e) = r { error!(error=%e, "grpc server error"); }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    Ok(())
}

fn parse_config_path_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        if a == "--config" {
            return args.next();
        }
        if let Some(v) = a.strip_prefix("--config=") {
            return Some(v.to_string());
        }
    }
    None
}
