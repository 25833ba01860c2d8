//! Speed Daemon: cameras report plate sightings, the server works out who was speeding
//! and hands tickets to whichever dispatcher looks after that road.

use crate::server::{Event, TicketingServer};
use std::future::{pending, Future};
use tokio::net::TcpListener;
use tokio::sync::mpsc::channel;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

mod connection;
mod error;
pub mod models;
pub mod parser;
mod server;

pub use error::Error;
pub use models::io::{ClientInput, ServerOutput};

const DAY_IN_SECONDS: u32 = 86_400;
const EVENT_QUEUE_SIZE: usize = 64;
const OUTBOUND_QUEUE_SIZE: usize = 16;

pub(crate) const MESSAGE_TYPE_ERROR: u8 = 0x10;
pub(crate) const MESSAGE_TYPE_PLATE: u8 = 0x20;
pub(crate) const MESSAGE_TYPE_TICKET: u8 = 0x21;
pub(crate) const MESSAGE_TYPE_WANT_HEARTBEAT: u8 = 0x40;
pub(crate) const MESSAGE_TYPE_HEARTBEAT: u8 = 0x41;
pub(crate) const MESSAGE_TYPE_AM_CAMERA: u8 = 0x80;
pub(crate) const MESSAGE_TYPE_AM_DISPATCHER: u8 = 0x81;

pub type ByteString = Vec<u8>;

pub type RoadId = u16;
pub type MileMarker = u16;
pub type SpeedLimit = u16;
pub type RecordedSpeed = u16;
pub type SpeedMph = f64;
pub type Timestamp = u32;
pub type Day = u32;
pub type PlateNumber = String;
pub type HeartbeatInterval = u32;

pub struct Application {
    listener: TcpListener,
}
impl Application {
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Serves until the ticketing server stops, which is always an error.
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(pending()).await
    }

    /// Serves until `shutdown` resolves, then drops every connection and lets the ticketing server drain.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let (events, receive_events) = channel::<Event>(EVENT_QUEUE_SIZE);
        let mut ticketing = tokio::spawn(TicketingServer::default().run(receive_events));
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let id = Uuid::new_v4();
                        info!("Accepting new connection {id} from {addr}...");
                        let span = info_span!("connection", %id);
                        connections.spawn(connection::handle(id, stream, events.clone()).instrument(span));
                    },
                    Err(err) => warn!("Incoming TCP connection errored... {err:?}"),
                },
                Some(finished) = connections.join_next() => {
                    if let Err(err) = finished {
                        error!("Connection task failed: {err}");
                    }
                },
                stopped = &mut ticketing => {
                    error!("Ticketing server exited unexpectedly: {stopped:?}");
                    connections.shutdown().await;
                    return Err(Error::TicketingServerStopped);
                },
                () = &mut shutdown => break,
            }
        }

        info!("Shutting down {} connections...", connections.len());
        connections.shutdown().await;
        drop(events);
        ticketing.await.map_err(|err| {
            error!("Ticketing server failed while draining: {err}");
            Error::TicketingServerStopped
        })
    }
}
