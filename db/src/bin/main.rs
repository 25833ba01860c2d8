use clap::Parser;
use common::{get_udp_socket, init_tracing, Options};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let options = Options::parse();
    let socket = get_udp_socket(options.address()).await?;
    db::serve(socket).await?;
    Ok(())
}
