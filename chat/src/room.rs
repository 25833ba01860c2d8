use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
pub enum Command {
    Join {
        id: Uuid,
        name: String,
        outbound: UnboundedSender<String>,
    },
    Message {
        id: Uuid,
        text: String,
    },
    Leave(Uuid),
}

#[derive(Debug)]
struct Member {
    id: Uuid,
    name: String,
    outbound: UnboundedSender<String>,
}

/// Joined members, in the order they joined.
#[derive(Debug, Default)]
pub struct Room {
    members: Vec<Member>,
}
impl Room {
    pub async fn run(mut self, mut commands: Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        info!("Chat room closed.");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Join { id, name, outbound } => {
                let names = self
                    .members
                    .iter()
                    .map(|member| member.name.as_str())
                    .collect::<Vec<&str>>()
                    .join(", ");
                _ = outbound.send(format!("* The room contains: {names}\n"));
                self.broadcast(id, &format!("* {name} has entered the room\n"));
                info!(%id, %name, "Joined the room.");
                self.members.push(Member { id, name, outbound });
            },
            Command::Message { id, text } => {
                if let Some(member) = self.members.iter().find(|member| member.id == id) {
                    let message = format!("[{}] {text}\n", member.name);
                    self.broadcast(id, &message);
                }
            },
            Command::Leave(id) => {
                if let Some(position) = self.members.iter().position(|member| member.id == id) {
                    let member = self.members.remove(position);
                    info!(%id, name = %member.name, "Left the room.");
                    self.broadcast(id, &format!("* {} has left the room\n", member.name));
                }
            },
        }
    }

    fn broadcast(&self, from: Uuid, message: &str) {
        for member in self.members.iter().filter(|member| member.id != from) {
            if member.outbound.send(message.to_owned()).is_err() {
                debug!(id = %member.id, "Member's connection is already gone.");
            }
        }
    }
}
