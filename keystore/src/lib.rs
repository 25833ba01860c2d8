use common::BUFFER_SIZE;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub const MESSAGE_LENGTH: usize = 9;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized message type {0:#04x}")]
    UnrecognizedMessageType(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    Insert { timestamp: i32, price: i32 },
    Query { min: i32, max: i32 },
}
impl Request {
    pub fn from_bytes(bytes: &[u8; MESSAGE_LENGTH]) -> Result<Self, Error> {
        let first = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let second = i32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        match bytes[0] {
            b'I' => Ok(Self::Insert { timestamp: first, price: second }),
            b'Q' => Ok(Self::Query { min: first, max: second }),
            other => Err(Error::UnrecognizedMessageType(other)),
        }
    }
}

/// Prices inserted during one session, keyed by timestamp.
#[derive(Debug, Default)]
pub struct PriceHistory {
    prices: BTreeMap<i32, i32>,
}
impl PriceHistory {
    /// A repeated timestamp overwrites the earlier price.
    pub fn insert(&mut self, timestamp: i32, price: i32) {
        self.prices.insert(timestamp, price);
    }

    /// Mean price within `min..=max`, rounded down; zero when nothing matches.
    pub fn mean(&self, min: i32, max: i32) -> i32 {
        if min > max {
            return 0;
        }
        let (count, total) = self
            .prices
            .range(min..=max)
            .fold((0i64, 0i64), |(count, total), (_, &price)| (count + 1, total + price as i64));
        match count {
            0 => 0,
            count => total.div_euclid(count) as i32,
        }
    }
}

// Means to an End
pub async fn handle_stream(mut stream: TcpStream) -> Result<(), Error> {
    let mut history = PriceHistory::default();
    let mut queue: Vec<u8> = Vec::with_capacity(BUFFER_SIZE);
    let mut buffer = [0u8; BUFFER_SIZE];
    let result = 'connected: loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break Ok(()),
            Ok(length) => queue.extend_from_slice(&buffer[..length]),
            Err(err) => break Err(err.into()),
        }
        let mut consumed = 0;
        while let Some(message) = queue.get(consumed..consumed + MESSAGE_LENGTH) {
            consumed += MESSAGE_LENGTH;
            let mut bytes = [0u8; MESSAGE_LENGTH];
            bytes.copy_from_slice(message);
            match Request::from_bytes(&bytes) {
                Ok(Request::Insert { timestamp, price }) => history.insert(timestamp, price),
                Ok(Request::Query { min, max }) => {
                    let mean = history.mean(min, max);
                    debug!("Mean between {min} and {max} is {mean}");
                    if let Err(err) = stream.write_all(&mean.to_be_bytes()).await {
                        break 'connected Err(err.into());
                    }
                },
                Err(err) => break 'connected Err(err),
            }
        }
        queue.drain(..consumed);
    };
    stream.shutdown().await.unwrap_or_default();
    result
}
