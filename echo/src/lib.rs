use common::BUFFER_SIZE;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

// Smoke Test (Echo Server)
pub async fn handle_stream(mut stream: TcpStream) -> io::Result<()> {
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        match stream.read(&mut buffer).await? {
            0 => break,
            n => {
                trace!("Echoing {n} bytes.");
                stream.write_all(&buffer[..n]).await?;
            },
        }
    }
    stream.shutdown().await
}
