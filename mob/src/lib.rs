use clap::Parser;
use common::{Options, ASCII_NEWLINE};
use regex::bytes::Regex;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

pub const DEFAULT_UPSTREAM: &str = "chat.protohackers.com:16963";
pub const TONY_BOGUSCOIN_ADDRESS: &[u8] = b"7YWHMfk9JZe0LM0g1ZauHuiSxhI";
const BOGUSCOIN_MATCHER: &str = "^7[a-zA-Z0-9]{25,34}$";

#[derive(Debug, Clone, Parser)]
pub struct Arguments {
    #[command(flatten)]
    pub options: Options,
    /// Chat server to relay to.
    #[arg(long, env = "UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    pub upstream: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not reach upstream: {0}")]
    Upstream(io::Error),
    #[error("invalid address pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Spoofer {
    re: Regex,
}
impl Spoofer {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            re: Regex::new(BOGUSCOIN_MATCHER)?,
        })
    }

    /// Rewrites every space-delimited Boguscoin address in a line (newline excluded).
    pub fn replace(&self, line: &[u8]) -> Vec<u8> {
        // The regex crate has no lookaround, so words are matched one at a time.
        line.split(|&byte| byte == b' ')
            .map(|word| match self.re.is_match(word) {
                true => TONY_BOGUSCOIN_ADDRESS,
                false => word,
            })
            .collect::<Vec<&[u8]>>()
            .join(&b' ')
    }
}

/// Copies complete lines from `reader` to `writer`, rewriting each one.
async fn relay(reader: OwnedReadHalf, mut writer: OwnedWriteHalf, spoofer: &Spoofer) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();
    loop {
        line.clear();
        reader.read_until(ASCII_NEWLINE, &mut line).await?;
        if line.pop() != Some(ASCII_NEWLINE) {
            break;
        }
        let mut spoofed = spoofer.replace(&line);
        spoofed.push(ASCII_NEWLINE);
        writer.write_all(&spoofed).await?;
    }
    writer.shutdown().await
}

// Mob in the Middle
pub async fn handle_stream(victim: TcpStream, upstream: Arc<str>, spoofer: Arc<Spoofer>) -> Result<(), Error> {
    let upstream = TcpStream::connect(upstream.as_ref()).await.map_err(Error::Upstream)?;
    debug!(upstream = ?upstream.peer_addr(), "Connected upstream.");
    let (victim_reader, victim_writer) = victim.into_split();
    let (upstream_reader, upstream_writer) = upstream.into_split();

    // Whichever side finishes first drops the other direction, closing both sockets.
    let result = tokio::select! {
        result = relay(victim_reader, upstream_writer, &spoofer) => {
            info!("Victim disconnected.");
            result
        },
        result = relay(upstream_reader, victim_writer, &spoofer) => {
            info!("Upstream disconnected.");
            result
        },
    };
    Ok(result?)
}
