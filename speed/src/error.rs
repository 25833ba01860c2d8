use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized message type")]
    UnrecognizedMessageType(u8),
    #[error("malformed message")]
    Malformed(u8),
    #[error("already defined its type, cannot redefine")]
    AlreadyIdentified,
    #[error("already sent a heartbeat request")]
    AlreadyBeating,
    #[error("only camera should report plates")]
    NotACamera,
    #[error("string of {0} bytes cannot be length-prefixed")]
    StringTooLong(usize),
    #[error("client {0} is no longer connected")]
    ClientGone(Uuid),
    #[error("ticketing server stopped")]
    TicketingServerStopped,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
impl Error {
    /// Whether the client caused this, and so should be told about it before being disconnected.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedMessageType(_)
                | Self::Malformed(_)
                | Self::AlreadyIdentified
                | Self::AlreadyBeating
                | Self::NotACamera
        )
    }
}
