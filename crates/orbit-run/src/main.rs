//! orbit-run entry point.
//!
//! Runs one HTTP-triggered function from a local module file and prints the
//! response to stdout. Logs go to stderr.

mod config;

use bytes::Bytes;
use config::RunConfig;
use http::Response;
use orbit_core::{Invoker, ModuleLoader};
use std::io::Write;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - logs go to stderr (stdout carries the response)
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("orbit_run=info".parse()?)
                .add_directive("orbit_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = RunConfig::from_env()?;
    tracing::info!(wasm = %config.wasm.display(), call = %config.call, "Configuration loaded");

    let spec = config.function_spec();
    let request = config.request(&spec)?;

    // Ctrl-C abandons the invocation; teardown still runs
    let cancel = CancellationToken::new();
    let ctx = config.context(&spec).with_cancellation(&cancel);
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("Received interrupt, cancelling invocation");
                cancel.cancel();
            }
        })
    };

    let invoker =
        Invoker::new(ModuleLoader::from_file(&config.wasm)).with_config(config.invoker_config());
    let result = invoker.invoke(&ctx, &spec, request).await;
    interrupt.abort();

    let invocation = result?;
    if let Some(err) = invocation.teardown_error() {
        tracing::warn!(error = %err, "Sandbox teardown reported errors");
    }
    tracing::info!(
        elapsed_ms = invocation.elapsed().as_millis() as u64,
        "Invocation complete"
    );

    print_response(invocation.response())?;
    Ok(())
}

fn print_response(response: &Response<Bytes>) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{:?} {}", response.version(), response.status())?;
    for (name, value) in response.headers() {
        writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
    }
    writeln!(out)?;
    out.write_all(response.body())?;
    out.flush()
}
