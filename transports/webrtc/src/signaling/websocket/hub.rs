//! Relay client registry and message routing

use crate::signaling::protocol::{Envelope, JoinRoomPayload, MessageType, UserEntry};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MAX_NAME_CHARS: usize = 20;

struct Client {
    name: Option<String>,
    tx: mpsc::Sender<String>,
}

/// Connected relay clients, keyed by assigned id
pub struct Hub {
    clients: Mutex<HashMap<String, Client>>,
    send_queue: usize,
}

impl Hub {
    pub fn new(send_queue: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            send_queue: send_queue.max(1),
        }
    }

    /// Admit a client: assign an id and queue the `connected` handshake
    pub fn register(&self) -> (String, mpsc::Receiver<String>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.send_queue);

        let mut clients = self.clients.lock();
        clients.insert(id.clone(), Client { name: None, tx });
        Self::deliver(
            &clients,
            &id,
            &Envelope::new(MessageType::Connected, json!({ "id": id })),
        );
        info!(client_id = %id, clients = clients.len(), "Relay client registered");

        (id, rx)
    }

    /// Remove a client, announcing its departure if it had joined
    pub fn unregister(&self, id: &str) {
        let mut clients = self.clients.lock();
        let Some(client) = clients.remove(id) else {
            return;
        };
        if client.name.is_some() {
            Self::broadcast_except(
                &clients,
                id,
                &Envelope::new(MessageType::UserLeft, json!(id)),
            );
        }
        info!(client_id = %id, clients = clients.len(), "Relay client unregistered");
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Route one text frame from client `id`
    pub fn handle_text(&self, id: &str, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(client_id = %id, "Malformed frame: {}", e);
                self.send_error(id, "invalid message");
                return;
            }
        };

        match envelope.message_type() {
            Some(MessageType::GetOnlineUsers) => self.online_users(id),
            Some(MessageType::JoinRoom) => self.join(id, &envelope),
            Some(MessageType::LeaveRoom) => self.leave(id),
            Some(MessageType::Offer) | Some(MessageType::Answer) | Some(MessageType::IceCandidate) => {
                self.forward(id, envelope)
            }
            _ => {
                debug!(client_id = %id, message_type = %envelope.kind, "Unknown type");
                self.send_error(id, "unknown type");
            }
        }
    }

    fn online_users(&self, id: &str) {
        let clients = self.clients.lock();
        let users = Self::named(&clients, None);
        Self::deliver(
            &clients,
            id,
            &Envelope::new(MessageType::OnlineUsersList, json!(users)),
        );
    }

    fn join(&self, id: &str, envelope: &Envelope) {
        let name = match envelope.decode::<JoinRoomPayload>() {
            Ok(p) => p.user_name.trim().to_string(),
            Err(_) => {
                self.send_error(id, "invalid join-room payload");
                return;
            }
        };
        if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
            self.send_error(id, "invalid user name");
            return;
        }

        let mut clients = self.clients.lock();
        match clients.get_mut(id) {
            Some(client) => client.name = Some(name.clone()),
            None => return,
        }

        let joined = UserEntry {
            user_id: id.to_string(),
            user_name: name,
        };
        Self::broadcast_except(
            &clients,
            id,
            &Envelope::new(MessageType::UserJoined, json!(joined)),
        );

        let others = Self::named(&clients, Some(id));
        info!(client_id = %id, others = others.len(), "Client joined the room");
        Self::deliver(
            &clients,
            id,
            &Envelope::new(MessageType::CurrentUsers, json!(others)),
        );
    }

    fn leave(&self, id: &str) {
        let mut clients = self.clients.lock();
        let was_named = match clients.get_mut(id) {
            Some(client) => client.name.take().is_some(),
            None => false,
        };
        if was_named {
            info!(client_id = %id, "Client left the room");
            Self::broadcast_except(
                &clients,
                id,
                &Envelope::new(MessageType::UserLeft, json!(id)),
            );
        }
    }

    fn forward(&self, id: &str, envelope: Envelope) {
        let Value::Object(mut payload) = envelope.payload else {
            self.send_error(id, "missing target");
            return;
        };
        let target = match payload.remove("target") {
            Some(Value::String(target)) => target,
            _ => {
                self.send_error(id, "missing target");
                return;
            }
        };

        let clients = self.clients.lock();
        if !clients.contains_key(&target) {
            drop(clients);
            self.send_error(id, "target not online");
            return;
        }

        payload.insert("sender".to_string(), Value::String(id.to_string()));
        debug!(from = %id, to = %target, message_type = %envelope.kind, "Forwarding");
        Self::deliver(
            &clients,
            &target,
            &Envelope {
                kind: envelope.kind,
                payload: Value::Object(payload),
            },
        );
    }

    fn send_error(&self, id: &str, message: &str) {
        let clients = self.clients.lock();
        Self::deliver(
            &clients,
            id,
            &Envelope::new(MessageType::Error, json!({ "message": message })),
        );
    }

    fn named(clients: &HashMap<String, Client>, except: Option<&str>) -> Vec<UserEntry> {
        let mut users: Vec<UserEntry> = clients
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != except)
            .filter_map(|(id, c)| {
                c.name.as_ref().map(|name| UserEntry {
                    user_id: id.clone(),
                    user_name: name.clone(),
                })
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    fn broadcast_except(clients: &HashMap<String, Client>, except: &str, envelope: &Envelope) {
        for id in clients.keys().filter(|id| id.as_str() != except) {
            Self::deliver(clients, id, envelope);
        }
    }

    fn deliver(clients: &HashMap<String, Client>, id: &str, envelope: &Envelope) {
        let Some(client) = clients.get(id) else {
            return;
        };
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode relay frame: {}", e);
                return;
            }
        };
        if let Err(e) = client.tx.try_send(text) {
            warn!(client_id = %id, message_type = %envelope.kind, "Dropping frame: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv(rx: &mut mpsc::Receiver<String>) -> Envelope {
        Envelope::from_json(&rx.try_recv().unwrap()).unwrap()
    }

    fn join(hub: &Hub, id: &str, name: &str) {
        let frame = Envelope::new(MessageType::JoinRoom, json!({ "userName": name }));
        hub.handle_text(id, &frame.to_json().unwrap());
    }

    #[test]
    fn test_register_sends_handshake_first() {
        let hub = Hub::new(16);
        let (id, mut rx) = hub.register();
        let first = recv(&mut rx);
        assert_eq!(first.message_type(), Some(MessageType::Connected));
        assert_eq!(first.payload["id"], id.as_str());
    }

    #[test]
    fn test_join_announces_and_snapshots() {
        let hub = Hub::new(16);
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        recv(&mut rx_a);
        recv(&mut rx_b);

        join(&hub, &a, "Alice");
        let snapshot = recv(&mut rx_a);
        assert_eq!(snapshot.message_type(), Some(MessageType::CurrentUsers));
        assert_eq!(snapshot.payload, json!([]));
        let announced = recv(&mut rx_b);
        assert_eq!(announced.message_type(), Some(MessageType::UserJoined));
        assert_eq!(announced.payload["userName"], "Alice");

        join(&hub, &b, "Bob");
        let snapshot = recv(&mut rx_b);
        assert_eq!(snapshot.payload, json!([{ "userId": a.as_str(), "userName": "Alice" }]));
    }

    #[test]
    fn test_join_rejects_invalid_name() {
        let hub = Hub::new(16);
        let (a, mut rx) = hub.register();
        recv(&mut rx);

        join(&hub, &a, "   ");
        let err = recv(&mut rx);
        assert_eq!(err.message_type(), Some(MessageType::Error));

        join(&hub, &a, &"x".repeat(21));
        assert_eq!(recv(&mut rx).payload["message"], "invalid user name");
    }

    #[test]
    fn test_forward_replaces_target_with_sender() {
        let hub = Hub::new(16);
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        recv(&mut rx_a);
        recv(&mut rx_b);

        let offer = Envelope::new(
            MessageType::Offer,
            json!({ "target": b, "offer": { "type": "offer", "sdp": "v=0" } }),
        );
        hub.handle_text(&a, &offer.to_json().unwrap());

        let forwarded = recv(&mut rx_b);
        assert_eq!(forwarded.message_type(), Some(MessageType::Offer));
        assert_eq!(forwarded.payload["sender"], a.as_str());
        assert!(forwarded.payload.get("target").is_none());
        assert_eq!(forwarded.payload["offer"]["sdp"], "v=0");
    }

    #[test]
    fn test_forward_to_unknown_target() {
        let hub = Hub::new(16);
        let (a, mut rx) = hub.register();
        recv(&mut rx);

        let answer = Envelope::new(MessageType::Answer, json!({ "target": "ghost" }));
        hub.handle_text(&a, &answer.to_json().unwrap());
        assert_eq!(recv(&mut rx).payload["message"], "target not online");
    }

    #[test]
    fn test_unknown_type_is_error() {
        let hub = Hub::new(16);
        let (a, mut rx) = hub.register();
        recv(&mut rx);

        hub.handle_text(&a, r#"{"type":"dance","payload":null}"#);
        assert_eq!(recv(&mut rx).payload["message"], "unknown type");
    }

    #[test]
    fn test_leave_and_disconnect_announce_departure() {
        let hub = Hub::new(16);
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        recv(&mut rx_a);
        recv(&mut rx_b);

        join(&hub, &a, "Alice");
        recv(&mut rx_a);
        recv(&mut rx_b);

        hub.handle_text(&a, r#"{"type":"leave-room"}"#);
        let left = recv(&mut rx_b);
        assert_eq!(left.message_type(), Some(MessageType::UserLeft));
        assert_eq!(left.payload, json!(a.as_str()));

        // Observers leave silently
        hub.unregister(&a);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn test_full_queue_drops_frames() {
        let hub = Hub::new(1);
        let (a, mut rx) = hub.register();
        hub.handle_text(&a, r#"{"type":"get-online-users"}"#);

        assert_eq!(recv(&mut rx).message_type(), Some(MessageType::Connected));
        assert!(rx.try_recv().is_err());
    }
}
