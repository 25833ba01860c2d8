use crate::error::Error;
use crate::models::io::ServerOutput;
use crate::models::{Camera, Observation, Role, Ticket};
use crate::{Day, PlateNumber, RoadId, Timestamp};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{error::SendError, Receiver, Sender};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything a connection can tell the ticketing server.
#[derive(Debug)]
pub(crate) enum Event {
    Connect(ClientHandle),
    Disconnect(Uuid),
    PlateObserved {
        plate: PlateNumber,
        timestamp: Timestamp,
        camera: Camera,
    },
    /// A ticket that was queued for a dispatcher whose connection closed before writing it.
    Undelivered(Ticket),
}

/// An identified client, and the outbound queue its connection drains.
#[derive(Debug, Clone)]
pub(crate) struct ClientHandle {
    pub(crate) id: Uuid,
    pub(crate) role: Role,
    outbound: Sender<ServerOutput>,
}
impl ClientHandle {
    pub(crate) fn new(id: Uuid, role: Role, outbound: Sender<ServerOutput>) -> Self {
        Self { id, role, outbound }
    }

    async fn send(&self, output: ServerOutput) -> Result<(), SendError<ServerOutput>> {
        self.outbound.send(output).await
    }
}

/// Owns all ticketing state. Only ever reached through the event channel, one event at a time.
#[derive(Default)]
pub(crate) struct TicketingServer {
    clients: HashMap<Uuid, ClientHandle>,
    // Dispatchers per road, in the order they connected.
    subscriptions: HashMap<RoadId, Vec<Uuid>>,
    observations: HashMap<(PlateNumber, RoadId), Vec<Observation>>,
    issued: HashMap<PlateNumber, HashSet<Day>>,
    pending: Vec<Ticket>,
}
impl TicketingServer {
    pub(crate) async fn run(mut self, mut events: Receiver<Event>) {
        info!("Ticketing server started.");
        while let Some(event) = events.recv().await {
            if let Err(err) = self.handle(event).await {
                warn!("Failed to handle event: {err}");
            }
        }
        info!(
            "Event channel closed, ticketing server stopping with {} tickets undelivered.",
            self.pending.len()
        );
    }

    pub(crate) async fn handle(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::Connect(client) => self.register(client),
            Event::Disconnect(id) => self.unregister(&id),
            Event::PlateObserved { plate, timestamp, camera } => self.observe(plate, timestamp, camera),
            Event::Undelivered(ticket) => {
                info!("Ticket for {} came back undelivered, re-queueing.", ticket.plate);
                self.pending.push(ticket);
            },
        }
        self.dispatch_pending().await
    }

    fn register(&mut self, client: ClientHandle) {
        debug!("Registering client {} as {:?}.", client.id, client.role);
        if let Role::Dispatcher(dispatcher) = &client.role {
            for road in &dispatcher.roads {
                self.subscriptions.entry(*road).or_default().push(client.id);
            }
        }
        self.clients.insert(client.id, client);
    }

    fn unregister(&mut self, id: &Uuid) {
        let Some(client) = self.clients.remove(id) else {
            return;
        };
        debug!("Unregistered client {id}.");
        if let Role::Dispatcher(dispatcher) = &client.role {
            for road in &dispatcher.roads {
                if let Some(subscribers) = self.subscriptions.get_mut(road) {
                    subscribers.retain(|subscriber| subscriber != id);
                    if subscribers.is_empty() {
                        self.subscriptions.remove(road);
                    }
                }
            }
        }
    }

    fn observe(&mut self, plate: PlateNumber, timestamp: Timestamp, camera: Camera) {
        let observation = Observation {
            timestamp,
            mile: camera.mile,
        };
        let observations = self.observations.entry((plate.clone(), camera.road)).or_default();
        // Equal timestamps go after the ones already recorded.
        let index = observations.partition_point(|existing| existing.timestamp <= timestamp);
        observations.insert(index, observation);

        let previous = index.checked_sub(1).map(|previous| observations[previous]);
        let next = observations.get(index + 1).copied();
        for neighbour in previous.into_iter().chain(next) {
            self.evaluate(&plate, camera, neighbour, observation);
        }
    }

    fn evaluate(&mut self, plate: &str, camera: Camera, a: Observation, b: Observation) {
        let Some(speed) = a.average_speed(&b) else {
            return;
        };
        if speed <= f64::from(camera.limit) {
            return;
        }
        let ticket = Ticket::from_observations(plate.to_owned(), camera.road, a, b, speed);
        let issued = self.issued.entry(ticket.plate.clone()).or_default();
        if ticket.days().iter().any(|day| issued.contains(day)) {
            debug!("{plate} already ticketed for a day in {:?}, skipping {speed:.2}mph.", ticket.days());
            return;
        }
        issued.extend(ticket.days());
        info!("Ticketing {plate} for {speed:.2}mph on road {}.", ticket.road);
        self.pending.push(ticket);
    }

    fn dispatcher_for(&self, road: RoadId) -> Option<&ClientHandle> {
        self.subscriptions
            .get(&road)
            .and_then(|subscribers| subscribers.first())
            .and_then(|id| self.clients.get(id))
    }

    /// Hands every pending ticket to a dispatcher for its road, keeping the rest in order.
    async fn dispatch_pending(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        for ticket in std::mem::take(&mut self.pending) {
            let Some(dispatcher) = self.dispatcher_for(ticket.road).cloned() else {
                self.pending.push(ticket);
                continue;
            };
            match dispatcher.send(ServerOutput::Ticket(ticket)).await {
                Ok(()) => debug!("Delivered ticket to dispatcher {}.", dispatcher.id),
                Err(SendError(output)) => {
                    // Its connection is closing; hold the ticket for the next dispatcher.
                    if let ServerOutput::Ticket(ticket) = output {
                        self.pending.push(ticket);
                    }
                    self.unregister(&dispatcher.id);
                    result = Err(Error::ClientGone(dispatcher.id));
                },
            }
        }
        result
    }

    #[cfg(test)]
    fn observations_of(&self, plate: &str, road: RoadId) -> Vec<Observation> {
        self.observations
            .get(&(plate.to_owned(), road))
            .cloned()
            .unwrap_or_default()
    }
}
