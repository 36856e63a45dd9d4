use serde::Serialize;
use std::sync::{
    mpsc::{channel, Receiver, Sender},
    Mutex, PoisonError,
};

/// A named notification for the picker. `payload` is JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: String,
}

/// Notifications produced off the caller's path (session exits, auto-refresh)
/// wait here until the picker polls for them.
#[derive(Debug)]
pub struct EventQueue {
    tx: Sender<Event>,
    rx: Mutex<Receiver<Event>>,
}

impl Default for EventQueue {
    fn default() -> Self {
        let (tx, rx) = channel::<Event>();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl EventQueue {
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    pub fn notify_named<N: Into<String>, P: Into<String>>(&self, name: N, payload: P) -> bool {
        self.sender().notify_named(name, payload)
    }

    pub fn pop_all(&self) -> Vec<Event> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        rx.try_iter().collect()
    }
}

/// Cloneable producer half, for tasks that outlive a borrow of the queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    pub fn notify_named<N: Into<String>, P: Into<String>>(&self, name: N, payload: P) -> bool {
        self.tx
            .send(Event {
                name: name.into(),
                payload: payload.into(),
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_all_drains_in_order() {
        let queue = EventQueue::default();
        let sender = queue.sender();
        assert!(queue.notify_named("pods", "{}"));
        assert!(sender.notify_named("log_session", r#"{"id":1}"#));

        let events = queue.pop_all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "pods");
        assert_eq!(events[1].payload, r#"{"id":1}"#);
        assert!(queue.pop_all().is_empty());
    }
}
