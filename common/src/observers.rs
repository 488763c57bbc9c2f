use std::collections::BTreeMap;

use crate::hub::HubEvent;

/// One connected observer, addressed by transport session id.
pub trait ObserverSink {
    /// Delivers one text frame. Returns `false` once the observer is unreachable.
    fn deliver(&mut self, text: &str) -> bool;
}

/// Membership change queued by the transport for the control loop.
#[derive(Debug)]
pub enum ObserverRequest<S> {
    Attach { session: i32, sink: S },
    Detach { session: i32 },
}

/// Observer table owned by the control loop. Transport callbacks never touch
/// it directly; they queue attach/detach requests instead.
#[derive(Debug)]
pub struct ObserverSet<S> {
    sinks: BTreeMap<i32, S>,
}

impl<S> Default for ObserverSet<S> {
    fn default() -> Self {
        Self {
            sinks: BTreeMap::new(),
        }
    }
}

impl<S: ObserverSink> ObserverSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the session was not already attached.
    pub fn attach(&mut self, session: i32, sink: S) -> bool {
        self.sinks.insert(session, sink).is_none()
    }

    /// Returns `true` when the session was still attached.
    pub fn detach(&mut self, session: i32) -> bool {
        self.sinks.remove(&session).is_some()
    }

    /// Applies a queued membership change and returns the hub event it implies.
    pub fn apply(&mut self, request: ObserverRequest<S>) -> Option<HubEvent> {
        match request {
            ObserverRequest::Attach { session, sink } => self
                .attach(session, sink)
                .then_some(HubEvent::ObserverJoined),
            ObserverRequest::Detach { session } => {
                self.detach(session).then_some(HubEvent::ObserverLeft)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Best-effort fan-out. Unreachable observers are dropped; their sessions are returned.
    pub fn broadcast(&mut self, text: &str) -> Vec<i32> {
        let mut dropped = Vec::new();
        self.sinks.retain(|session, sink| {
            let delivered = sink.deliver(text);
            if !delivered {
                dropped.push(*session);
            }
            delivered
        });
        dropped
    }
}
