use common::ASCII_NEWLINE;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver};
use uuid::Uuid;

mod room;

pub use room::{Command, Room};

pub const WELCOME_MESSAGE: &str = "Welcome to budgetchat! What shall I call you?\n";
pub const INVALID_NAME_MESSAGE: &str = "* Names must be 1 to 16 letters or digits.\n";
pub const MAX_NAME_LENGTH: usize = 16;
const COMMAND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("chat room has closed")]
    RoomClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn validate_name(line: &[u8]) -> Result<String, Error> {
    let valid = !line.is_empty() && line.len() <= MAX_NAME_LENGTH && line.iter().all(u8::is_ascii_alphanumeric);
    let name = String::from_utf8_lossy(line).into_owned();
    match valid {
        true => Ok(name),
        false => Err(Error::InvalidName(name)),
    }
}

/// Starts the room actor, returning the channel every connection joins through.
pub fn spawn_room() -> Sender<Command> {
    let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_SIZE);
    tokio::spawn(Room::default().run(receiver));
    commands
}

/// Reads one line without its newline. Returns false once the peer has closed,
/// including when it closed partway through a line.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<bool> {
    line.clear();
    reader.read_until(ASCII_NEWLINE, line).await?;
    Ok(line.pop() == Some(ASCII_NEWLINE))
}

// Budget Chat
pub async fn handle_stream(stream: TcpStream, room: Sender<Command>) -> Result<(), Error> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();

    writer.write_all(WELCOME_MESSAGE.as_bytes()).await?;
    if !read_line(&mut reader, &mut line).await? {
        return Ok(());
    }
    let name = match validate_name(&line) {
        Ok(name) => name,
        Err(err) => {
            writer.write_all(INVALID_NAME_MESSAGE.as_bytes()).await?;
            writer.shutdown().await?;
            return Err(err);
        },
    };

    let id = Uuid::new_v4();
    let (outbound, inbound) = mpsc::unbounded_channel();
    room.send(Command::Join { id, name, outbound })
        .await
        .map_err(|_| Error::RoomClosed)?;

    let relay = async {
        let result = loop {
            match read_line(&mut reader, &mut line).await {
                Ok(true) => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    if room.send(Command::Message { id, text }).await.is_err() {
                        break Err(Error::RoomClosed);
                    }
                },
                Ok(false) => break Ok(()),
                Err(err) => break Err(err.into()),
            }
        };
        // Leaving drops the member's queue, which ends the writer.
        _ = room.send(Command::Leave(id)).await;
        result
    };
    let (relayed, written) = tokio::join!(relay, write_outbound(inbound, writer));
    relayed.and(written.map_err(Error::from))
}

async fn write_outbound(mut inbound: UnboundedReceiver<String>, mut writer: OwnedWriteHalf) -> io::Result<()> {
    while let Some(message) = inbound.recv().await {
        writer.write_all(message.as_bytes()).await?;
    }
    writer.shutdown().await
}
