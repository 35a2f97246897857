//! quiver - QUIC RPC runtime
//!
//! Demo server entry point: registers an echo service and serves it over a
//! QUIC endpoint.

use bytes::Bytes;
use quiver_server::{tls, CallContext, Config, Server, ServerError, ServiceDesc};
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if QUIVER_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("QUIVER_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("QUIVER_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting quiver server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  ALPN: {}", config.network.alpn);
    tracing::info!("  Workers: {}", config.limits.num_server_workers);
    tracing::info!(
        "  Max concurrent streams: {}",
        config.limits.max_concurrent_streams
    );

    if let Err(e) = config.tls.validate() {
        tracing::error!("TLS configuration error: {}", e);
        return Err(e.into());
    }

    let server_tls = tls::server_config(&config.tls, config.network.alpn.as_bytes())?;
    let endpoint = quinn::Endpoint::server(server_tls, config.network.bind_addr)?;

    let server = Arc::new(Server::new(config.limits.server_options()));
    server.register_service(echo_service())?;

    // Shutdown on ctrl-c; in-flight handlers run to completion.
    let shutdown_server = server.clone();
    let shutdown_endpoint = endpoint.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        shutdown_endpoint.close(
            quinn::VarInt::from_u32(quiver_server::CloseReason::ServiceUnavailable.code()),
            quiver_server::CloseReason::ServiceUnavailable
                .message()
                .as_bytes(),
        );
    });

    server.serve(endpoint.clone()).await?;
    endpoint.wait_idle().await;

    tracing::info!("Server stopped");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GreetRequest {
    name: String,
}

/// The demo service: a byte echo, a JSON greeter, and a streaming chat echo.
fn echo_service() -> ServiceDesc {
    ServiceDesc::new("demo.EchoService")
        .unary("Echo", |_ctx: CallContext, body: Bytes| async move {
            Ok(Some(body))
        })
        .unary("Greet", |_ctx: CallContext, body: Bytes| async move {
            let request: GreetRequest = serde_json::from_slice(&body)
                .map_err(|e| ServerError::Handler(format!("bad greet request: {}", e)))?;
            let reply = serde_json::json!({ "greeting": format!("hello, {}", request.name) });
            Ok(Some(Bytes::from(reply.to_string())))
        })
        .streaming("Chat", |ctx: CallContext, stream| {
            Box::pin(async move {
                tracing::debug!(remote = %ctx.remote_addr, "chat stream opened");
                while let Some(message) = stream.recv().await? {
                    stream.send(Some(&message)).await?;
                }
                tracing::debug!(remote = %ctx.remote_addr, "chat stream drained");
                Ok(())
            })
        })
}
