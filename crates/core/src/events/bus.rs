//! Group-based publish/subscribe registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::JobEvent;

/// Receiving half handed to a connection.
pub type EventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Sending half registered in a topic.
pub type EventSender = mpsc::UnboundedSender<JobEvent>;

type Registry = HashMap<String, HashMap<String, EventSender>>;

/// In-process event bus.
///
/// Topics map connection ids to their channel. All operations go through a
/// single lock and sends happen while it is held, so two publishers never
/// interleave and each connection sees events in publish order. Cloning is
/// cheap and every clone shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    groups: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a connection to a topic. Re-adding replaces the sender.
    pub fn group_add(&self, topic: &str, connection_id: &str, sender: EventSender) {
        let mut groups = self.lock();
        groups
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id.to_string(), sender);
        debug!(topic, connection_id, "Joined topic");
    }

    /// Remove a connection from a topic. No-op if it is not a member.
    pub fn group_discard(&self, topic: &str, connection_id: &str) {
        let mut groups = self.lock();
        if let Some(members) = groups.get_mut(topic) {
            members.remove(connection_id);
            if members.is_empty() {
                groups.remove(topic);
            }
        }
    }

    /// Remove a connection from every topic. Returns how many it left.
    pub fn discard_all(&self, connection_id: &str) -> usize {
        let mut groups = self.lock();
        let mut left = 0;
        groups.retain(|_, members| {
            if members.remove(connection_id).is_some() {
                left += 1;
            }
            !members.is_empty()
        });
        left
    }

    /// Send an event to every member of a topic.
    ///
    /// Returns the number of connections the event was handed to. Members
    /// whose receiver is gone are pruned.
    pub fn group_send(&self, topic: &str, event: JobEvent) -> usize {
        self.multicast(&[topic], event)
    }

    /// Send an event to the members of several topics at once.
    ///
    /// A connection that belongs to more than one of the topics receives the
    /// event once.
    pub fn multicast(&self, topics: &[&str], event: JobEvent) -> usize {
        let mut groups = self.lock();
        let mut seen = HashSet::new();
        let mut delivered = 0;

        for topic in topics {
            let Some(members) = groups.get_mut(*topic) else {
                continue;
            };

            members.retain(|connection_id, sender| {
                if seen.contains(connection_id) {
                    return true;
                }
                if sender.send(event.clone()).is_ok() {
                    seen.insert(connection_id.clone());
                    delivered += 1;
                    true
                } else {
                    trace!(topic, connection_id, "Pruning closed connection");
                    false
                }
            });

            if members.is_empty() {
                groups.remove(*topic);
            }
        }

        delivered
    }

    /// Number of connections in a topic.
    pub fn group_size(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, HashMap::len)
    }

    /// Topics a connection currently belongs to, sorted.
    pub fn topics_of(&self, connection_id: &str) -> Vec<String> {
        let groups = self.lock();
        let mut topics: Vec<String> = groups
            .iter()
            .filter(|(_, members)| members.contains_key(connection_id))
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }
}
