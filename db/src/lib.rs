use std::collections::HashMap;
use std::io;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Requests and responses must be shorter than this.
pub const MAX_DATAGRAM_SIZE: usize = 1_000;
pub const VERSION_KEY: &[u8] = b"version";
pub const VERSION_STRING: &[u8] = concat!("Unusual Database Program ", env!("CARGO_PKG_VERSION")).as_bytes();

#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    Insert { key: &'a [u8], value: &'a [u8] },
    Query { key: &'a [u8] },
}
impl<'a> Request<'a> {
    /// Everything before the first `=` is the key; the rest, `=`s included, is the value.
    pub fn parse(datagram: &'a [u8]) -> Self {
        match datagram.iter().position(|&byte| byte == b'=') {
            Some(position) => Self::Insert {
                key: &datagram[..position],
                value: &datagram[position + 1..],
            },
            None => Self::Query { key: datagram },
        }
    }
}

#[derive(Debug, Default)]
pub struct Database {
    items: HashMap<Vec<u8>, Vec<u8>>,
}
impl Database {
    /// Applies a request, returning the datagram to reply with (if any).
    pub fn handle(&mut self, request: Request) -> Option<Vec<u8>> {
        match request {
            Request::Insert { key, value } => {
                self.insert(key, value);
                None
            },
            Request::Query { key } => self.query(key).map(|value| [key, b"=", value].concat()),
        }
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) {
        if key == VERSION_KEY {
            return;
        }
        self.items.insert(key.to_vec(), value.to_vec());
    }

    fn query(&self, key: &[u8]) -> Option<&[u8]> {
        if key == VERSION_KEY {
            return Some(VERSION_STRING);
        }
        self.items.get(key).map(Vec::as_slice)
    }
}

// Unusual Database Program
pub async fn serve(socket: UdpSocket) -> io::Result<()> {
    let mut database = Database::default();
    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (length, source) = match socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(err) => {
                warn!("Could not receive datagram: {err}");
                continue;
            },
        };
        if length >= MAX_DATAGRAM_SIZE {
            debug!(%source, "Ignoring oversized datagram.");
            continue;
        }
        let request = Request::parse(&buffer[..length]);
        debug!(%source, ?request, "Received request.");
        if let Some(response) = database.handle(request) {
            if response.len() >= MAX_DATAGRAM_SIZE {
                debug!(%source, "Response would be oversized, not sending.");
                continue;
            }
            socket.send_to(&response, source).await?;
        }
    }
}
