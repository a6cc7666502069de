use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spacebrush_server::{Scene, messages::SERVER_VERSION, server};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period for the browser-facing listener on shutdown.
const WEB_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
struct Args {
    /// Primary service port.
    #[clap(long, default_value_t = 8402)]
    port: u16,
    /// Browser-facing port serving the same service.
    #[clap(long, default_value_t = 8401)]
    web_port: u16,
    /// Enable per-message debug logging.
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}={default_level},tower_http=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let scene = Arc::new(Scene::new());
    let app = server(Arc::clone(&scene)).layer(TraceLayer::new_for_http());

    let web_listener = tokio::net::TcpListener::bind(("0.0.0.0", args.web_port))
        .await
        .expect("Unable to bind web port");
    info!(
        "Web server v{SERVER_VERSION} listening at {}",
        web_listener.local_addr().expect("Listener has no address")
    );
    let web_server = tokio::spawn(
        axum::serve(web_listener, app.clone())
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.expect("Listen to ctrlc");
            })
            .into_future(),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .expect("Unable to bind to host");
    info!(
        "Server v{SERVER_VERSION} listening at {}",
        listener.local_addr().expect("Listener has no address")
    );
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let scene = Arc::clone(&scene);
            async move {
                tokio::signal::ctrl_c().await.expect("Listen to ctrlc");
                info!("Received stop signal...");
                // Draining the scene ends every listen worker, which closes
                // the open sockets this server is waiting on.
                scene.shut_down().await;
            }
        })
        .await
        .unwrap();

    let _ = tokio::time::timeout(WEB_SHUTDOWN_GRACE, web_server).await;
    info!("Shut down complete");
}
