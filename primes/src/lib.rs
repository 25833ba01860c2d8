use common::ASCII_NEWLINE;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

const METHOD: &str = "isPrime";
const MALFORMED_RESPONSE: &[u8] = b"malformed\n";

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported method {0:?}")]
    UnsupportedMethod(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Deserialize, Debug)]
struct PrimeRequest {
    method: String,
    number: Number,
}

#[derive(Serialize, Debug)]
struct PrimeResponse {
    method: &'static str,
    prime: bool,
}

/// Only non-negative integers written without a fraction or exponent can be prime.
fn is_prime(number: &Number) -> bool {
    number.as_u64().map_or(false, primes::is_prime)
}

/// Answers one request line (newline included), or explains why it was malformed.
pub fn process_json(json: &[u8]) -> Result<Vec<u8>, Error> {
    let request: PrimeRequest = serde_json::from_slice(json)?;
    if request.method != METHOD {
        return Err(Error::UnsupportedMethod(request.method));
    }
    let response = PrimeResponse {
        method: METHOD,
        prime: is_prime(&request.number),
    };
    let mut response = serde_json::to_vec(&response)?;
    response.push(ASCII_NEWLINE);
    Ok(response)
}

// Prime Time
pub async fn handle_stream(stream: TcpStream) -> Result<(), Error> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();
    loop {
        line.clear();
        if reader.read_until(ASCII_NEWLINE, &mut line).await? == 0 || line.last() != Some(&ASCII_NEWLINE) {
            // Closed, possibly mid-line.
            break;
        }
        match process_json(&line) {
            Ok(response) => {
                debug!("Answered {}", String::from_utf8_lossy(&response).trim_end());
                writer.write_all(&response).await?;
            },
            Err(err) => {
                writer.write_all(MALFORMED_RESPONSE).await?;
                writer.shutdown().await?;
                return Err(err);
            },
        }
    }
    writer.shutdown().await?;
    Ok(())
}
