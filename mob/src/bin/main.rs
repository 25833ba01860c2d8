use clap::Parser;
use common::{get_tcp_listener, init_tracing, run};
use mob::{Arguments, Spoofer};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let arguments = Arguments::parse();
    let spoofer = Arc::new(Spoofer::new()?);
    let upstream: Arc<str> = arguments.upstream.into();
    info!("Relaying to {upstream}.");
    let listener = get_tcp_listener(arguments.options.address()).await?;
    run(listener, move |stream| mob::handle_stream(stream, upstream.clone(), spoofer.clone())).await;
    Ok(())
}
