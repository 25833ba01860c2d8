use clap::Parser;
use common::{get_tcp_listener, init_tracing, Options};
use speed::Application;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let options = Options::parse();
    let listener = get_tcp_listener(options.address()).await?;
    Application::new(listener).run_until(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down."),
        Err(err) => {
            error!("Could not listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        },
    }
}
