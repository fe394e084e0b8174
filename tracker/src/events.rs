// SPDX-License-Identifier: Apache-2.0

//! Outbound observer fan-out (spec.md §6): `ADDED`, `REMOVED`,
//! `HOP_ENABLED`, `HOP_DISABLED`, `CHANNELLIST_CHANGED`,
//! `HOP_DWELL_CHANGED`, each carrying the affected source's id.
//!
//! §5 rules out cross-thread shared state, so this is synchronous
//! callback dispatch rather than the teacher's `tokio::sync::broadcast`
//! channel — see DESIGN.md's note on the actor-model deviation.

use crate::source::SourceId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Added(SourceId),
    Removed(SourceId),
    HopEnabled(SourceId),
    HopDisabled(SourceId),
    ChannelListChanged(SourceId),
    HopDwellChanged(SourceId),
}

impl Event {
    #[must_use]
    pub fn source_id(&self) -> SourceId {
        match *self {
            Event::Added(id)
            | Event::Removed(id)
            | Event::HopEnabled(id)
            | Event::HopDisabled(id)
            | Event::ChannelListChanged(id)
            | Event::HopDwellChanged(id) => id,
        }
    }
}

/// A registry of observer callbacks, fired in registration order.
#[derive(Default)]
pub struct Observers {
    callbacks: Vec<Box<dyn FnMut(&Event)>>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.callbacks.len())
            .finish()
    }
}

impl Observers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: impl FnMut(&Event) + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn fire(&mut self, event: &Event) {
        for callback in &mut self.callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn callbacks_fire_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut observers = Observers::new();
        for tag in 0..3 {
            let seen = Rc::clone(&seen);
            observers.register(move |_event| seen.borrow_mut().push(tag));
        }
        observers.fire(&Event::Added(SourceId::new(1)));
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }
}
