use std::sync::Arc;

use control_rpc::{
    build_registry,
    config::Config,
    http, logging,
    rpc::dispatcher::Dispatcher,
    shutdown::ShutdownSignal,
    stream::StreamServer,
    AppState,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    logging::init_logging(config.debug);

    let module = config.module()?;
    let shutdown = ShutdownSignal::new();

    let registry = build_registry(module, &config.stream_prefix, &shutdown);
    let methods = registry.names().join(", ");
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), config.debug));
    let server = StreamServer::bind(
        config.bind_socket()?,
        dispatcher,
        shutdown.clone(),
        config.shutdown_grace,
    )?
    .with_max_line_bytes(config.max_line_bytes);
    let endpoint = server.local_addr()?;

    info!(
        url = %format!("jsonrpc2://{endpoint}"),
        module = module.name,
        prefix = %config.stream_prefix,
        debug = config.debug,
        max_line_bytes = config.max_line_bytes,
        methods = %methods,
        "server starting"
    );

    let http_task = match config.http_socket()? {
        Some(addr) => {
            let registry = build_registry(module, &config.http_prefix, &shutdown);
            let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), config.debug));
            let path = config.http_path.clone();
            let shutdown = shutdown.clone();
            info!(%addr, path = %path, prefix = %config.http_prefix, "http variant enabled");
            Some(tokio::spawn(async move {
                http::serve(addr, &path, AppState::new(dispatcher), shutdown).await
            }))
        }
        None => None,
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger("interrupt");
            }
        });
    }

    let served = server.run().await;
    // The stream server can also fail without `stop`; make sure HTTP follows it down.
    shutdown.trigger("stream server finished");

    if let Some(task) = http_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "http variant failed"),
            Err(err) => error!(error = %err, "http variant task failed"),
        }
    }

    served?;
    info!("server terminated");
    Ok(())
}
