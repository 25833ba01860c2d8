use crate::error::Error;
use crate::models::io::{ClientInput, ServerOutput};
use crate::models::{Camera, Dispatcher, Role};
use crate::server::{ClientHandle, Event};
use crate::{parser, HeartbeatInterval, PlateNumber, Timestamp, OUTBOUND_QUEUE_SIZE};
use common::{u8s_to_hex_str, BUFFER_SIZE};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// What an accepted message asks the connection to do next.
#[derive(Debug, PartialEq)]
pub(crate) enum Effect {
    Identified(Role),
    Observed {
        plate: PlateNumber,
        timestamp: Timestamp,
        camera: Camera,
    },
    StartHeartbeat(Duration),
    Nothing,
}

/// Per-connection protocol state: who the client is and whether it asked for heartbeats.
#[derive(Debug, Default)]
pub(crate) struct Session {
    role: Role,
    heartbeat: Option<HeartbeatInterval>,
}
impl Session {
    pub(crate) fn apply(&mut self, input: ClientInput) -> Result<Effect, Error> {
        match input {
            ClientInput::Plate(plate, timestamp) => match &self.role {
                Role::Camera(camera) => Ok(Effect::Observed {
                    plate,
                    timestamp,
                    camera: *camera,
                }),
                _ => Err(Error::NotACamera),
            },
            ClientInput::WantHeartbeat(deciseconds) => {
                if self.heartbeat.is_some() {
                    return Err(Error::AlreadyBeating);
                }
                self.heartbeat = Some(deciseconds);
                Ok(match deciseconds {
                    0 => Effect::Nothing,
                    deciseconds => Effect::StartHeartbeat(Duration::from_millis(u64::from(deciseconds) * 100)),
                })
            },
            ClientInput::IAmCamera(camera) => self.identify(Role::Camera(camera)),
            ClientInput::IAmDispatcher(roads) => self.identify(Role::Dispatcher(Dispatcher::new(roads))),
        }
    }

    fn identify(&mut self, role: Role) -> Result<Effect, Error> {
        if self.role != Role::Unidentified {
            return Err(Error::AlreadyIdentified);
        }
        self.role = role.clone();
        Ok(Effect::Identified(role))
    }
}

/// Runs one client connection until both its inbound and outbound halves have finished.
pub(crate) async fn handle(id: Uuid, stream: TcpStream, events: Sender<Event>) {
    let (read_stream, write_stream) = stream.into_split();
    let (outbound, queue) = channel(OUTBOUND_QUEUE_SIZE);
    let writer = write_outbound(write_stream, queue, events.clone());
    let inbound = Inbound {
        id,
        events,
        outbound,
        session: Session::default(),
        heartbeat: None,
    };
    tokio::join!(inbound.run(read_stream), writer);
}

struct Inbound {
    id: Uuid,
    events: Sender<Event>,
    outbound: Sender<ServerOutput>,
    session: Session,
    heartbeat: Option<JoinHandle<()>>,
}
impl Inbound {
    async fn run(mut self, mut stream: OwnedReadHalf) {
        match self.read(&mut stream).await {
            Ok(()) => info!("Client closed the connection."),
            Err(err) if err.is_client_error() => {
                warn!("Disconnecting misbehaving client: {err}.");
                // A client that stopped reading must not keep us from reporting the disconnect.
                if let Err(TrySendError::Full(_)) = self.outbound.try_send(ServerOutput::from(&err)) {
                    warn!("Outbound queue is full, dropping error frame.");
                }
            },
            Err(err) => warn!("Connection failed: {err}."),
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if self.events.send(Event::Disconnect(self.id)).await.is_err() {
            warn!("Ticketing server is gone, could not report disconnect.");
        }
        // Dropping our outbound sender lets the writer finish once the server drops its copy.
    }

    async fn read(&mut self, stream: &mut OwnedReadHalf) -> Result<(), Error> {
        let mut buffer = [0u8; BUFFER_SIZE];
        let mut queue: Vec<u8> = Vec::new();
        loop {
            let n = stream.read(&mut buffer).await?;
            // See https://doc.rust-lang.org/std/io/trait.Read.html#tymethod.read
            if n == 0 {
                return Ok(());
            }
            trace!("<<< {}", u8s_to_hex_str(&buffer[..n]));
            queue.extend_from_slice(&buffer[..n]);
            while let Some((input, length)) = parser::client_message(&queue)? {
                queue.drain(..length);
                self.apply(input).await?;
            }
        }
    }

    async fn apply(&mut self, input: ClientInput) -> Result<(), Error> {
        debug!("Received {input:?}.");
        match self.session.apply(input)? {
            Effect::Identified(role) => {
                info!("Client identified as {role:?}.");
                let client = ClientHandle::new(self.id, role, self.outbound.clone());
                self.publish(Event::Connect(client)).await
            },
            Effect::Observed { plate, timestamp, camera } => {
                self.publish(Event::PlateObserved { plate, timestamp, camera }).await
            },
            Effect::StartHeartbeat(period) => {
                debug!("Sending heartbeats every {period:?}.");
                self.heartbeat = Some(tokio::spawn(heartbeat(period, self.outbound.clone())));
                Ok(())
            },
            Effect::Nothing => Ok(()),
        }
    }

    async fn publish(&self, event: Event) -> Result<(), Error> {
        self.events
            .send(event)
            .await
            .map_err(|_| Error::TicketingServerStopped)
    }
}

async fn heartbeat(period: Duration, outbound: Sender<ServerOutput>) {
    let mut ticks = interval_at(Instant::now() + period, period);
    loop {
        ticks.tick().await;
        if outbound.send(ServerOutput::Heartbeat).await.is_err() {
            break;
        }
    }
}

/// Writes queued messages in order; stops after an error message, a failed write, or once every sender is gone.
/// Tickets that never made it onto the wire are handed back to the ticketing server.
async fn write_outbound(mut stream: OwnedWriteHalf, mut queue: Receiver<ServerOutput>, events: Sender<Event>) {
    let mut unsent: Vec<ServerOutput> = Vec::new();
    while let Some(output) = queue.recv().await {
        let bytes = match output.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Could not encode {output:?}: {err}.");
                continue;
            },
        };
        trace!(">>> {}", u8s_to_hex_str(&bytes));
        if let Err(err) = stream.write_all(&bytes).await {
            warn!("Shutting down connection due to write error: {err}.");
            unsent.push(output);
            break;
        }
        if let ServerOutput::Error(_) = output {
            break;
        }
    }
    _ = stream.shutdown().await;

    queue.close();
    while let Ok(output) = queue.try_recv() {
        unsent.push(output);
    }
    for output in unsent {
        if let ServerOutput::Ticket(ticket) = output {
            if events.send(Event::Undelivered(ticket)).await.is_err() {
                warn!("Ticketing server is gone, could not return undelivered ticket.");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::TicketingServer;
    use testing::{connect, listen_on_available_port, read_until_closed, DEFAULT_TIMEOUT};
    use tokio::time::timeout;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let (listener, port) = listen_on_available_port().await;
        let client = connect(port).await;
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn dispatcher_of(road: u16, outbound: Sender<ServerOutput>) -> ClientHandle {
        ClientHandle::new(Uuid::new_v4(), Role::Dispatcher(Dispatcher::new([road])), outbound)
    }

    fn sighting(timestamp: Timestamp, mile: u16) -> Event {
        Event::PlateObserved {
            plate: "UN1X".to_string(),
            timestamp,
            camera: Camera { road: 123, mile, limit: 60 },
        }
    }

    fn camera() -> Camera {
        Camera {
            road: 123,
            mile: 8,
            limit: 60,
        }
    }

    #[test]
    fn camera_reports_plates() {
        let mut session = Session::default();
        assert_eq!(
            Effect::Identified(Role::Camera(camera())),
            session.apply(ClientInput::IAmCamera(camera())).unwrap()
        );
        assert_eq!(
            Effect::Observed {
                plate: "UN1X".to_string(),
                timestamp: 45,
                camera: camera(),
            },
            session.apply(ClientInput::Plate("UN1X".to_string(), 45)).unwrap()
        );
    }

    #[test]
    fn role_cannot_be_redefined() {
        let mut session = Session::default();
        session.apply(ClientInput::IAmCamera(camera())).unwrap();
        assert!(matches!(
            session.apply(ClientInput::IAmDispatcher(vec![123])),
            Err(Error::AlreadyIdentified)
        ));

        let mut session = Session::default();
        session.apply(ClientInput::IAmDispatcher(vec![1])).unwrap();
        assert!(matches!(
            session.apply(ClientInput::IAmDispatcher(vec![2])),
            Err(Error::AlreadyIdentified)
        ));
    }

    #[test]
    fn only_cameras_report_plates() {
        let mut session = Session::default();
        assert!(matches!(
            session.apply(ClientInput::Plate("UN1X".to_string(), 0)),
            Err(Error::NotACamera)
        ));

        let mut session = Session::default();
        session.apply(ClientInput::IAmDispatcher(vec![123])).unwrap();
        assert!(matches!(
            session.apply(ClientInput::Plate("UN1X".to_string(), 0)),
            Err(Error::NotACamera)
        ));
    }

    #[test]
    fn heartbeat_requested_once() {
        let mut session = Session::default();
        assert_eq!(
            Effect::StartHeartbeat(Duration::from_secs(1)),
            session.apply(ClientInput::WantHeartbeat(10)).unwrap()
        );
        assert!(matches!(session.apply(ClientInput::WantHeartbeat(10)), Err(Error::AlreadyBeating)));
    }

    #[test]
    fn zero_heartbeat_still_counts_as_requested() {
        let mut session = Session::default();
        assert_eq!(Effect::Nothing, session.apply(ClientInput::WantHeartbeat(0)).unwrap());
        assert!(matches!(session.apply(ClientInput::WantHeartbeat(25)), Err(Error::AlreadyBeating)));
    }

    #[test]
    fn heartbeat_is_independent_of_role() {
        let mut session = Session::default();
        session.apply(ClientInput::WantHeartbeat(5)).unwrap();
        assert_eq!(
            Effect::Identified(Role::Dispatcher(Dispatcher::new([7]))),
            session.apply(ClientInput::IAmDispatcher(vec![7])).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ticks_every_period() {
        let (outbound, mut queue) = channel(OUTBOUND_QUEUE_SIZE);
        let started = Instant::now();
        let task = tokio::spawn(heartbeat(Duration::from_millis(2_500), outbound));
        for beat in 1..=3u32 {
            assert_eq!(Some(ServerOutput::Heartbeat), queue.recv().await);
            assert_eq!(Duration::from_millis(2_500) * beat, started.elapsed());
        }
        task.abort();
    }

    #[tokio::test]
    async fn heartbeat_stops_when_queue_closes() {
        let (outbound, queue) = channel(OUTBOUND_QUEUE_SIZE);
        drop(queue);
        heartbeat(Duration::from_millis(1), outbound).await;
    }

    #[tokio::test]
    async fn ticket_queued_behind_an_error_goes_to_the_next_dispatcher() {
        let (mut client, socket) = socket_pair().await;
        let (_read_half, write_half) = socket.into_split();
        let mut server = TicketingServer::default();

        // The error is queued before the disconnect reaches the server, which still routes a ticket here.
        let (outbound, queue) = channel(OUTBOUND_QUEUE_SIZE);
        let first = dispatcher_of(123, outbound.clone());
        let first_id = first.id;
        server.handle(Event::Connect(first)).await.unwrap();
        outbound.send(ServerOutput::from(&Error::AlreadyIdentified)).await.unwrap();
        server.handle(sighting(0, 8)).await.unwrap();
        server.handle(sighting(45, 9)).await.unwrap();
        drop(outbound);

        let (events, mut returned) = channel(8);
        write_outbound(write_half, queue, events).await;
        let error_frame = ServerOutput::from(&Error::AlreadyIdentified).to_bytes().unwrap();
        assert_eq!(error_frame, read_until_closed(&mut client, DEFAULT_TIMEOUT).await);

        let undelivered = returned.recv().await.unwrap();
        assert!(matches!(&undelivered, Event::Undelivered(ticket) if ticket.plate == "UN1X"));
        // The first dispatcher's queue is gone, so the server drops it and keeps the ticket.
        assert!(matches!(server.handle(undelivered).await, Err(Error::ClientGone(id)) if id == first_id));
        server.handle(Event::Disconnect(first_id)).await.unwrap();

        let (outbound, mut second) = channel(OUTBOUND_QUEUE_SIZE);
        server.handle(Event::Connect(dispatcher_of(123, outbound))).await.unwrap();
        assert!(matches!(
            second.try_recv(),
            Ok(ServerOutput::Ticket(ticket)) if ticket.speed == 8000 && ticket.timestamp2 == 45
        ));
        assert!(second.try_recv().is_err());
    }

    #[tokio::test]
    async fn writer_returns_nothing_when_everything_was_written() {
        let (mut client, socket) = socket_pair().await;
        let (_read_half, write_half) = socket.into_split();
        let (outbound, queue) = channel(OUTBOUND_QUEUE_SIZE);
        outbound.send(ServerOutput::Heartbeat).await.unwrap();
        drop(outbound);

        let (events, mut returned) = channel(8);
        write_outbound(write_half, queue, events).await;
        assert_eq!(vec![0x41], read_until_closed(&mut client, DEFAULT_TIMEOUT).await);
        assert!(returned.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_does_not_hold_up_disconnect() {
        let (mut client, socket) = socket_pair().await;
        let (read_half, _write_half) = socket.into_split();
        let (outbound, _queue) = channel(1);
        outbound.send(ServerOutput::Heartbeat).await.unwrap();
        let (events, mut received) = channel(8);
        let id = Uuid::new_v4();
        let inbound = Inbound {
            id,
            events,
            outbound,
            session: Session::default(),
            heartbeat: None,
        };

        client.write_all(&[0xff]).await.unwrap();
        timeout(DEFAULT_TIMEOUT, inbound.run(read_half))
            .await
            .expect("Inbound loop blocked on a full outbound queue.");
        assert!(matches!(received.recv().await, Some(Event::Disconnect(gone)) if gone == id));
    }
}
