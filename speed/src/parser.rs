use crate::error::Error;
use crate::models::io::{ClientInput, ServerOutput};
use crate::models::{Camera, Ticket};
use crate::{
    PlateNumber, MESSAGE_TYPE_AM_CAMERA, MESSAGE_TYPE_AM_DISPATCHER, MESSAGE_TYPE_ERROR, MESSAGE_TYPE_HEARTBEAT,
    MESSAGE_TYPE_PLATE, MESSAGE_TYPE_TICKET, MESSAGE_TYPE_WANT_HEARTBEAT,
};
use nom::{
    branch::alt,
    bytes::streaming::tag,
    combinator::{map, map_res},
    multi::{length_count, length_data},
    number::streaming::{be_u16, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

const CLIENT_MESSAGE_TYPES: [u8; 4] = [
    MESSAGE_TYPE_PLATE,
    MESSAGE_TYPE_WANT_HEARTBEAT,
    MESSAGE_TYPE_AM_CAMERA,
    MESSAGE_TYPE_AM_DISPATCHER,
];
const SERVER_MESSAGE_TYPES: [u8; 3] = [MESSAGE_TYPE_ERROR, MESSAGE_TYPE_TICKET, MESSAGE_TYPE_HEARTBEAT];

fn nom_u16_arr(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    length_count(be_u8, be_u16)(input)
}

fn nom_str(input: &[u8]) -> IResult<&[u8], PlateNumber> {
    map_res(length_data(be_u8), |bytes: &[u8]| match bytes.is_ascii() {
        true => Ok(bytes.iter().map(|&byte| char::from(byte)).collect()),
        false => Err(()),
    })(input)
}

fn nom_plate(input: &[u8]) -> IResult<&[u8], ClientInput> {
    map(tuple((tag([MESSAGE_TYPE_PLATE]), nom_str, be_u32)), |(_, plate, timestamp)| {
        ClientInput::Plate(plate, timestamp)
    })(input)
}

fn nom_want_heartbeat(input: &[u8]) -> IResult<&[u8], ClientInput> {
    map(tuple((tag([MESSAGE_TYPE_WANT_HEARTBEAT]), be_u32)), |(_, interval)| {
        ClientInput::WantHeartbeat(interval)
    })(input)
}

fn nom_camera(input: &[u8]) -> IResult<&[u8], ClientInput> {
    map(tuple((tag([MESSAGE_TYPE_AM_CAMERA]), be_u16, be_u16, be_u16)), |(_, road, mile, limit)| {
        ClientInput::IAmCamera(Camera { road, mile, limit })
    })(input)
}

fn nom_dispatcher(input: &[u8]) -> IResult<&[u8], ClientInput> {
    map(tuple((tag([MESSAGE_TYPE_AM_DISPATCHER]), nom_u16_arr)), |(_, roads)| {
        ClientInput::IAmDispatcher(roads)
    })(input)
}

fn nom_error(input: &[u8]) -> IResult<&[u8], ServerOutput> {
    map(tuple((tag([MESSAGE_TYPE_ERROR]), nom_str)), |(_, message)| ServerOutput::Error(message))(input)
}

fn nom_ticket(input: &[u8]) -> IResult<&[u8], ServerOutput> {
    map(
        tuple((tag([MESSAGE_TYPE_TICKET]), nom_str, be_u16, be_u16, be_u32, be_u16, be_u32, be_u16)),
        |(_, plate, road, mile1, timestamp1, mile2, timestamp2, speed)| {
            ServerOutput::Ticket(Ticket {
                plate,
                road,
                mile1,
                timestamp1,
                mile2,
                timestamp2,
                speed,
            })
        },
    )(input)
}

fn nom_heartbeat(input: &[u8]) -> IResult<&[u8], ServerOutput> {
    map(tag([MESSAGE_TYPE_HEARTBEAT]), |_| ServerOutput::Heartbeat)(input)
}

/// A decoded message and the number of bytes it took up, `None` if the buffer holds only part of one.
pub type InputBufferMatch<T> = Result<Option<(T, usize)>, Error>;

fn complete<T>(input: &[u8], known: &[u8], result: IResult<&[u8], T>) -> InputBufferMatch<T> {
    match result {
        Ok((remainder, message)) => Ok(Some((message, input.len() - remainder.len()))),
        // Not enough data has been received by the TCP stream, go back and fetch more.
        Err(nom::Err::Incomplete(_)) => Ok(None),
        Err(_) => Err(match input.first() {
            Some(&kind) if known.contains(&kind) => Error::Malformed(kind),
            Some(&kind) => Error::UnrecognizedMessageType(kind),
            None => Error::Malformed(0),
        }),
    }
}

/// Decodes the first message a camera or dispatcher sent.
pub fn client_message(input: &[u8]) -> InputBufferMatch<ClientInput> {
    complete(input, &CLIENT_MESSAGE_TYPES, alt((nom_plate, nom_camera, nom_dispatcher, nom_want_heartbeat))(input))
}

/// Decodes the first message the server sent.
pub fn server_message(input: &[u8]) -> InputBufferMatch<ServerOutput> {
    complete(input, &SERVER_MESSAGE_TYPES, alt((nom_ticket, nom_error, nom_heartbeat))(input))
}
