use crate::error::Error;
use crate::models::{Camera, Ticket};
use crate::{
    ByteString, HeartbeatInterval, PlateNumber, RoadId, Timestamp, MESSAGE_TYPE_AM_CAMERA, MESSAGE_TYPE_AM_DISPATCHER,
    MESSAGE_TYPE_ERROR, MESSAGE_TYPE_HEARTBEAT, MESSAGE_TYPE_PLATE, MESSAGE_TYPE_TICKET, MESSAGE_TYPE_WANT_HEARTBEAT,
};

/// Messages sent from cameras and dispatchers to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    Plate(PlateNumber, Timestamp),
    WantHeartbeat(HeartbeatInterval),
    IAmCamera(Camera),
    IAmDispatcher(Vec<RoadId>),
}
impl ClientInput {
    pub fn to_bytes(&self) -> Result<ByteString, Error> {
        let mut output: ByteString = Vec::new();
        match self {
            Self::Plate(plate, timestamp) => {
                output.push(MESSAGE_TYPE_PLATE);
                push_str(&mut output, plate)?;
                output.extend_from_slice(&timestamp.to_be_bytes());
            },
            Self::WantHeartbeat(interval) => {
                output.push(MESSAGE_TYPE_WANT_HEARTBEAT);
                output.extend_from_slice(&interval.to_be_bytes());
            },
            Self::IAmCamera(camera) => {
                output.push(MESSAGE_TYPE_AM_CAMERA);
                output.extend_from_slice(&camera.road.to_be_bytes());
                output.extend_from_slice(&camera.mile.to_be_bytes());
                output.extend_from_slice(&camera.limit.to_be_bytes());
            },
            Self::IAmDispatcher(roads) => {
                output.push(MESSAGE_TYPE_AM_DISPATCHER);
                output.push(length_prefix(roads.len())?);
                for road in roads {
                    output.extend_from_slice(&road.to_be_bytes());
                }
            },
        }
        Ok(output)
    }
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOutput {
    Error(String),
    Ticket(Ticket),
    Heartbeat,
}
impl ServerOutput {
    pub fn to_bytes(&self) -> Result<ByteString, Error> {
        let mut output: ByteString = Vec::new();
        match self {
            Self::Heartbeat => output.push(MESSAGE_TYPE_HEARTBEAT),
            Self::Ticket(ticket) => {
                output.push(MESSAGE_TYPE_TICKET);
                push_str(&mut output, &ticket.plate)?;
                output.extend_from_slice(&ticket.road.to_be_bytes());
                output.extend_from_slice(&ticket.mile1.to_be_bytes());
                output.extend_from_slice(&ticket.timestamp1.to_be_bytes());
                output.extend_from_slice(&ticket.mile2.to_be_bytes());
                output.extend_from_slice(&ticket.timestamp2.to_be_bytes());
                output.extend_from_slice(&ticket.speed.to_be_bytes());
            },
            Self::Error(message) => {
                output.push(MESSAGE_TYPE_ERROR);
                push_str(&mut output, message)?;
            },
        }
        Ok(output)
    }
}
impl From<&Error> for ServerOutput {
    fn from(error: &Error) -> Self {
        Self::Error(error.to_string())
    }
}

fn length_prefix(length: usize) -> Result<u8, Error> {
    u8::try_from(length).map_err(|_| Error::StringTooLong(length))
}

fn push_str(output: &mut ByteString, value: &str) -> Result<(), Error> {
    output.push(length_prefix(value.len())?);
    output.extend_from_slice(value.as_bytes());
    Ok(())
}
