use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod server;

pub use server::{get_tcp_listener, get_udp_socket, run};

pub const ASCII_NEWLINE: u8 = b'\n';
pub const BUFFER_SIZE: usize = 4096;
pub const DEFAULT_PORT: u16 = 8096;
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Listening address shared by every server binary.
#[derive(Debug, Clone, Parser)]
pub struct Options {
    /// Interface to bind to.
    #[arg(long, env = "HOST", default_value_t = DEFAULT_HOST)]
    pub host: IpAddr,
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
impl Options {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub fn u8s_to_hex_str(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_all_interfaces() {
        let options = Options::parse_from(["server"]);
        assert_eq!(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)), options.address());
    }

    #[test]
    fn options_from_arguments() {
        let options = Options::parse_from(["server", "--host", "127.0.0.1", "-p", "9000"]);
        assert_eq!(SocketAddr::from(([127, 0, 0, 1], 9000)), options.address());
    }

    #[test]
    fn hex_dump() {
        assert_eq!("41 0a ff", u8s_to_hex_str(&[0x41, 0x0a, 0xff]));
        assert_eq!("", u8s_to_hex_str(&[]));
    }
}
