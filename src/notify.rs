use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::AppointmentState;

const CHANNEL_CAPACITY: usize = 256;

/// What a client (or the follow-up consumer) hears about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// An appointment of yours changed state.
    AppointmentState {
        appointment_id: Ulid,
        state: AppointmentState,
    },
    /// A slot freed up and is yours to claim first.
    OfferIssued {
        offer_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        service_ids: Vec<Ulid>,
    },
    /// A completed appointment is ready for post-service follow-ups.
    /// Consumed by the external routine subsystem.
    FollowUpDue {
        appointment_id: Ulid,
        client_id: Ulid,
        service_ids: Vec<Ulid>,
    },
}

impl Notice {
    /// JSON payload as delivered on a LISTEN channel.
    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Broadcast hub: one channel per client, plus a salon-wide follow-up
/// channel for the external routine subsystem.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
    follow_ups: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            follow_ups: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one client's notices. Creates the channel if needed.
    pub fn subscribe(&self, client_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(client_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice to a client. No-op if nobody is listening.
    pub fn send(&self, client_id: Ulid, notice: Notice) {
        if let Some(sender) = self.channels.get(&client_id) {
            let _ = sender.send(notice);
        }
    }

    /// Subscribe to completion follow-ups (external collaborator).
    pub fn subscribe_follow_ups(&self) -> broadcast::Receiver<Notice> {
        self.follow_ups.subscribe()
    }

    /// Fire-and-forget: completion never fails on a missing consumer.
    pub fn send_follow_up(&self, notice: Notice) {
        let _ = self.follow_ups.send(notice);
    }

    /// Remove a client's channel.
    pub fn remove(&self, client_id: &Ulid) {
        self.channels.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let client = Ulid::new();
        let mut rx = hub.subscribe(client);

        let notice = Notice::AppointmentState {
            appointment_id: Ulid::new(),
            state: AppointmentState::Confirmed,
        };
        hub.send(client, notice.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, notice);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(
            Ulid::new(),
            Notice::AppointmentState {
                appointment_id: Ulid::new(),
                state: AppointmentState::Cancelled,
            },
        );
        hub.send_follow_up(Notice::FollowUpDue {
            appointment_id: Ulid::new(),
            client_id: Ulid::new(),
            service_ids: vec![],
        });
    }

    #[tokio::test]
    async fn follow_up_channel_is_shared() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe_follow_ups();
        let notice = Notice::FollowUpDue {
            appointment_id: Ulid::new(),
            client_id: Ulid::new(),
            service_ids: vec![Ulid::new()],
        };
        hub.send_follow_up(notice.clone());
        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[test]
    fn payload_is_json() {
        let notice = Notice::OfferIssued {
            offer_id: Ulid::new(),
            date: chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            service_ids: vec![],
        };
        let payload = notice.to_payload();
        assert!(payload.contains("\"kind\":\"offer_issued\""));
        assert!(payload.contains("2026-03-02"));
    }
}
