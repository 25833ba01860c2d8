use std::fmt::Display;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{info, info_span, warn, Instrument};

pub async fn get_tcp_listener(address: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(address).await?;
    info!("Listening to TCP connections on {}...", listener.local_addr()?);
    Ok(listener)
}

pub async fn get_udp_socket(address: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(address).await?;
    info!("Listening to UDP datagrams on {}...", socket.local_addr()?);
    Ok(socket)
}

/// Accepts connections forever, running `stream_handler` on its own task for each one.
pub async fn run<F, Fut, E>(listener: TcpListener, stream_handler: F)
where
    F: Fn(TcpStream) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let span = info_span!("connection", %addr);
                let handler = stream_handler(stream);
                tokio::spawn(
                    async move {
                        info!("Accepted connection.");
                        match handler.await {
                            Ok(()) => info!("Connection closed."),
                            Err(err) => warn!("Connection closed with error: {err}"),
                        }
                    }
                    .instrument(span),
                );
            },
            Err(err) => warn!("Incoming TCP connection errored... {err:?}"),
        }
    }
}
