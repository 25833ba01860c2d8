use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub use common::u8s_to_hex_str;
pub use tokio;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Binds to an ephemeral localhost port, returning the listener and the port it got.
pub async fn listen_on_available_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("Could not bind to an available port.");
    let port = listener
        .local_addr()
        .expect("Could not read bound address.")
        .port();
    (listener, port)
}

pub async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("Could not connect to integration server.")
}

/// Parses a hex dump such as `"80 01 a7"`; anything that isn't a hex digit is ignored.
pub fn hex_str_to_u8s(hex: &str) -> Option<Vec<u8>> {
    let stripped = hex
        .chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<Vec<char>>();
    if stripped.len() % 2 != 0 {
        return None;
    }
    stripped
        .chunks(2)
        .map(|double_hex| double_hex.iter().collect::<String>())
        .map(|hex_string| u8::from_str_radix(&hex_string, 16).ok())
        .collect()
}

/// Reads exactly `length` bytes, panicking if they don't all arrive within `wait`.
pub async fn read_exactly<R: AsyncRead + Unpin>(reader: &mut R, length: usize, wait: Duration) -> Vec<u8> {
    let mut buffer = vec![0u8; length];
    match timeout(wait, reader.read_exact(&mut buffer)).await {
        Err(_) => panic!("Timed out waiting for {length} bytes."),
        Ok(Err(e)) => panic!("Client connection errored: {e:?}"),
        Ok(Ok(_)) => buffer,
    }
}

/// Returns whatever arrives within `wait`: `None` if nothing did, `Some(vec![])` if the peer closed.
pub async fn read_within<R: AsyncRead + Unpin>(reader: &mut R, wait: Duration) -> Option<Vec<u8>> {
    let mut buffer = [0u8; 1024];
    match timeout(wait, reader.read(&mut buffer)).await {
        Err(_) => None,
        Ok(Err(_)) => Some(Vec::new()),
        Ok(Ok(n)) => Some(buffer[..n].to_vec()),
    }
}

/// Drains the stream until the peer closes it, panicking if that takes longer than `wait`.
pub async fn read_until_closed<R: AsyncRead + Unpin>(reader: &mut R, wait: Duration) -> Vec<u8> {
    let mut buffer = Vec::new();
    match timeout(wait, reader.read_to_end(&mut buffer)).await {
        Err(_) => panic!("Connection was not closed within {wait:?}."),
        // A reset after the server's last write still counts as closed.
        Ok(_) => buffer,
    }
}

#[macro_export]
macro_rules! send_bytes_from {
    ($s:expr, $h:expr) => {{
        use $crate::tokio::io::AsyncWriteExt;
        $s.write_all(
            &$crate::hex_str_to_u8s($h).expect("Invalid hex code provided for integration test."),
        )
        .await
        .expect("Could not write to integration server.");
    }};
}

#[macro_export]
macro_rules! assert_client_receives_bytes (
    ($s:expr, $h:expr, $d:expr) => {{
        let bytes = $crate::hex_str_to_u8s($h).expect("Invalid hex code provided for integration test.");
        let received = $crate::read_exactly(&mut $s, bytes.len(), $d).await;
        assert_eq!($crate::u8s_to_hex_str(&bytes), $crate::u8s_to_hex_str(&received));
    }};
    ($s:expr, $h:expr) => {
        $crate::assert_client_receives_bytes!($s, $h, $crate::DEFAULT_TIMEOUT)
    };
);

#[macro_export]
macro_rules! assert_client_not_receives_bytes (
    ($s:expr, $d:expr) => {{
        if let Some(received) = $crate::read_within(&mut $s, $d).await {
            panic!("Expected silence, received [{}].", $crate::u8s_to_hex_str(&received));
        }
    }};
    ($s:expr) => {
        $crate::assert_client_not_receives_bytes!($s, $crate::DEFAULT_TIMEOUT)
    };
);

#[cfg(test)]
mod tests {
    use super::hex_str_to_u8s;

    #[test]
    fn hex_with_spacing() {
        assert_eq!(Some(vec![0x80, 0x01, 0xa7, 0x22]), hex_str_to_u8s("80 01 a7 22"));
        assert_eq!(Some(vec![0x80, 0x01]), hex_str_to_u8s("8001"));
    }

    #[test]
    fn hex_odd_length() {
        assert_eq!(None, hex_str_to_u8s("80 0"));
    }
}
