use clap::Parser;
use common::{get_tcp_listener, init_tracing, run, Options};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let options = Options::parse();
    let listener = get_tcp_listener(options.address()).await?;
    run(listener, prime_time::handle_stream).await;
    Ok(())
}
