//! Realtime gateway
//!
//! Tracks live client connections and their subject rooms, and fans out bus
//! events to them. A client is `Connected` until it joins a subject room, then
//! `Joined` until it disconnects; disconnecting removes it from every room.
//!
//! Delivery is best effort with no replay buffer: a client that is not
//! connected (or not yet joined) when an event arrives never receives it.
//! Each client has a bounded frame queue; frames for a client whose queue is
//! full are dropped and counted.

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;
use wardline_kv::{EventBus, Subscription};

use crate::error::Result;
use crate::model::{AlertEvent, Audience, Notification};

/// Bus topic for alert events
pub const ALERTS_TOPIC: &str = "alerts";
/// Bus topic for per-subject notifications
pub const NOTIFICATIONS_TOPIC: &str = "notifications";

/// Frames buffered per client before further frames are dropped
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

pub type ClientId = String;

/// Room name for a subject
pub fn room_for(subject_id: &str) -> String {
    format!("subject:{}", subject_id)
}

/// Frames pushed to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Joined { room: String },
    Alert { payload: AlertEvent },
    Notification { payload: Notification },
}

/// Frames sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        #[serde(rename = "subjectId")]
        subject_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Joined(String),
}

struct ClientHandle {
    state: ClientState,
    tx: mpsc::Sender<ServerFrame>,
}

pub struct RealtimeGateway {
    clients: DashMap<ClientId, ClientHandle>,
    rooms: DashMap<String, DashSet<ClientId>>,
    queue_capacity: usize,
    broadcasts: AtomicU64,
    dropped_frames: AtomicU64,
}

impl Default for RealtimeGateway {
    fn default() -> Self {
        Self::with_queue_capacity(CLIENT_QUEUE_CAPACITY)
    }
}

impl RealtimeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
            broadcasts: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Register a connection; frames for it arrive on the returned receiver
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<ServerFrame>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.clients.insert(
            id.clone(),
            ClientHandle {
                state: ClientState::Connected,
                tx,
            },
        );
        debug!(client_id = %id, "Client connected");
        (id, rx)
    }

    /// Join a subject room, leaving any previous one
    ///
    /// Returns the room name, or `None` if the client is unknown.
    pub fn join(&self, client_id: &str, subject_id: &str) -> Option<String> {
        let room = room_for(subject_id);
        let previous = {
            let mut client = self.clients.get_mut(client_id)?;
            let previous = std::mem::replace(&mut client.state, ClientState::Joined(room.clone()));
            if client.tx.try_send(ServerFrame::Joined { room: room.clone() }).is_err() {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            }
            previous
        };

        if let ClientState::Joined(old) = previous {
            self.leave_room(&old, client_id);
        }
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(client_id.to_string());

        // a disconnect may have run between the state change and the insert
        if !self.clients.contains_key(client_id) {
            self.leave_room(&room, client_id);
            return None;
        }

        info!(client_id = %client_id, room = %room, "Client joined room");
        Some(room)
    }

    /// Drop a connection and its room membership
    pub fn disconnect(&self, client_id: &str) {
        if let Some((_, client)) = self.clients.remove(client_id) {
            if let ClientState::Joined(room) = client.state {
                self.leave_room(&room, client_id);
            }
            debug!(client_id = %client_id, "Client disconnected");
        }
    }

    fn leave_room(&self, room: &str, client_id: &str) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(client_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    pub fn state(&self, client_id: &str) -> Option<ClientState> {
        self.clients.get(client_id).map(|c| c.state.clone())
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Events this gateway has fanned out
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Frames discarded because a client's queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Fan an alert out per its audience; returns the clients reached
    pub fn dispatch_alert(&self, alert: AlertEvent) -> usize {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let reached = match alert.audience() {
            Audience::Everyone => {
                let targets: Vec<ClientId> = self.clients.iter().map(|c| c.key().clone()).collect();
                self.send_to(&targets, ServerFrame::Alert { payload: alert.clone() })
            }
            Audience::Subjects(subjects) => {
                let targets = self.members_of(subjects.iter().map(|s| room_for(s)));
                self.send_to(&targets, ServerFrame::Alert { payload: alert.clone() })
            }
        };

        debug!(alert_id = %alert.id, severity = %alert.severity, reached = reached, "Alert dispatched");
        reached
    }

    /// Deliver a notification to its subject's room only
    pub fn deliver_notification(&self, notification: Notification) -> usize {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        let targets = self.members_of(std::iter::once(room_for(&notification.subject_id)));
        self.send_to(&targets, ServerFrame::Notification { payload: notification })
    }

    fn members_of(&self, rooms: impl Iterator<Item = String>) -> Vec<ClientId> {
        let mut targets: Vec<ClientId> = Vec::new();
        for room in rooms {
            if let Some(members) = self.rooms.get(&room) {
                for id in members.iter() {
                    if !targets.contains(&*id) {
                        targets.push(id.clone());
                    }
                }
            }
        }
        targets
    }

    fn send_to(&self, targets: &[ClientId], frame: ServerFrame) -> usize {
        let mut reached = 0;
        let mut closed = Vec::new();

        for id in targets {
            let Some(client) = self.clients.get(id) else {
                continue;
            };
            match client.tx.try_send(frame.clone()) {
                Ok(()) => reached += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    warn!(client_id = %id, "Client queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id.clone()),
            }
        }

        for id in closed {
            warn!(client_id = %id, "Dropping closed client");
            self.disconnect(&id);
        }
        reached
    }

    /// Subscribe this gateway to the alert and notification topics
    ///
    /// The gateway stays attached while the returned subscriptions live.
    pub async fn attach(self: &Arc<Self>, bus: &EventBus) -> Result<Vec<Subscription>> {
        let alerts = {
            let gateway = Arc::clone(self);
            bus.subscribe(ALERTS_TOPIC, move |alert: AlertEvent| {
                gateway.dispatch_alert(alert);
            })
            .await?
        };

        let notifications = {
            let gateway = Arc::clone(self);
            bus.subscribe(NOTIFICATIONS_TOPIC, move |n: Notification| {
                gateway.deliver_notification(n);
            })
            .await?
        };

        info!("Gateway attached to event bus");
        Ok(vec![alerts, notifications])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    #[test]
    fn test_frame_wire_format() {
        let joined = serde_json::to_value(ServerFrame::Joined {
            room: "subject:42".into(),
        })
        .unwrap();
        assert_eq!(joined, serde_json::json!({"type": "joined", "room": "subject:42"}));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"join","subjectId":"42"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Join {
                subject_id: "42".into()
            }
        );

        let alert = AlertEvent::new(Severity::Critical, "Code blue", "Room 4");
        let json = serde_json::to_value(ServerFrame::Alert { payload: alert }).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["payload"]["severity"], "critical");
    }

    #[test]
    fn test_join_state_machine() {
        let gateway = RealtimeGateway::new();
        let (id, mut rx) = gateway.connect();
        assert_eq!(gateway.state(&id), Some(ClientState::Connected));

        assert_eq!(gateway.join(&id, "42").as_deref(), Some("subject:42"));
        assert_eq!(gateway.state(&id), Some(ClientState::Joined("subject:42".into())));
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerFrame::Joined {
                room: "subject:42".into()
            }
        );

        gateway.join(&id, "7");
        assert_eq!(gateway.room_size("subject:42"), 0);
        assert_eq!(gateway.room_size("subject:7"), 1);

        gateway.disconnect(&id);
        assert_eq!(gateway.state(&id), None);
        assert_eq!(gateway.room_size("subject:7"), 0);
        assert_eq!(gateway.connected_clients(), 0);

        assert!(gateway.join("unknown", "1").is_none());
    }

    #[test]
    fn test_critical_alert_reaches_everyone() {
        let gateway = RealtimeGateway::new();
        let (_a, mut rx_a) = gateway.connect();
        let (b, mut rx_b) = gateway.connect();
        gateway.join(&b, "42");
        let _ = rx_b.try_recv();

        let alert = AlertEvent::new(Severity::Critical, "Code blue", "Room 4").to_recipient("42");
        assert_eq!(gateway.dispatch_alert(alert), 2);
        assert!(matches!(rx_a.try_recv(), Ok(ServerFrame::Alert { .. })));
        assert!(matches!(rx_b.try_recv(), Ok(ServerFrame::Alert { .. })));
    }

    #[test]
    fn test_targeted_alert_reaches_room_only() {
        let gateway = RealtimeGateway::new();
        let (a, mut rx_a) = gateway.connect();
        let (b, mut rx_b) = gateway.connect();
        gateway.join(&a, "42");
        gateway.join(&b, "7");
        let _ = rx_a.try_recv();
        let _ = rx_b.try_recv();

        let alert = AlertEvent::new(Severity::High, "Fall risk", "Room 101").to_recipient("42");
        assert_eq!(gateway.dispatch_alert(alert.clone()), 1);
        assert_eq!(rx_a.try_recv().unwrap(), ServerFrame::Alert { payload: alert });
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_notification_goes_to_subject_room() {
        let gateway = RealtimeGateway::new();
        let (a, mut rx_a) = gateway.connect();
        let (_b, mut rx_b) = gateway.connect();
        gateway.join(&a, "1");
        let _ = rx_a.try_recv();

        let notification = Notification {
            subject_id: "1".into(),
            title: "Task".into(),
            message: "Complete onboarding module".into(),
            created_at: chrono::Utc::now(),
        };
        assert_eq!(gateway.deliver_notification(notification), 1);
        assert!(matches!(rx_a.try_recv(), Ok(ServerFrame::Notification { .. })));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_closed_client_is_dropped() {
        let gateway = RealtimeGateway::new();
        let (id, rx) = gateway.connect();
        gateway.join(&id, "42");
        drop(rx);

        let alert = AlertEvent::new(Severity::Critical, "Code blue", "Room 4");
        assert_eq!(gateway.dispatch_alert(alert), 0);
        assert_eq!(gateway.connected_clients(), 0);
        assert_eq!(gateway.room_size("subject:42"), 0);
    }

    #[test]
    fn test_stalled_client_queue_is_bounded() {
        let gateway = RealtimeGateway::with_queue_capacity(4);
        let (_stalled, mut rx) = gateway.connect();

        let reached: usize = (0..10)
            .map(|i| {
                let alert = AlertEvent::new(Severity::Critical, "Code blue", format!("Room {}", i));
                gateway.dispatch_alert(alert)
            })
            .sum();
        assert_eq!(reached, 4);
        assert_eq!(gateway.dropped_frames(), 6);
        assert_eq!(gateway.connected_clients(), 1);

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 4);

        // draining frees the queue again
        let alert = AlertEvent::new(Severity::Critical, "Code blue", "Room 11");
        assert_eq!(gateway.dispatch_alert(alert), 1);
    }

    #[test]
    fn test_join_after_disconnect_leaves_no_member() {
        let gateway = RealtimeGateway::new();
        let (id, _rx) = gateway.connect();
        gateway.disconnect(&id);

        assert!(gateway.join(&id, "42").is_none());
        assert_eq!(gateway.room_size("subject:42"), 0);
    }
}
