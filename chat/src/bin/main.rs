use clap::Parser;
use common::{get_tcp_listener, init_tracing, run, Options};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let options = Options::parse();
    let listener = get_tcp_listener(options.address()).await?;
    let room = chat::spawn_room();
    run(listener, move |stream| chat::handle_stream(stream, room.clone())).await;
    Ok(())
}
