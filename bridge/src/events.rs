//! Typed publish/subscribe ports, one broadcast channel per event kind.
//!
//! Sending never blocks and never fails the bridge: with no subscribers the
//! event is dropped, and slow subscribers lose the oldest events.

use rlbridge_shared::protocol::ControllerCommand;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandChanged {
    pub index: usize,
    pub command: ControllerCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterChanged<H> {
    pub entity: H,
    pub index: usize,
    pub enabled: bool,
}

pub struct EventPorts<H> {
    connectivity: broadcast::Sender<bool>,
    command_changed: broadcast::Sender<CommandChanged>,
    filter_changed: broadcast::Sender<FilterChanged<H>>,
}

impl<H: Clone> EventPorts<H> {
    pub fn new(capacity: usize) -> Self {
        let (connectivity, _) = broadcast::channel(capacity);
        let (command_changed, _) = broadcast::channel(capacity);
        let (filter_changed, _) = broadcast::channel(capacity);
        Self {
            connectivity,
            command_changed,
            filter_changed,
        }
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<bool> {
        self.connectivity.subscribe()
    }

    pub fn subscribe_command_changed(&self) -> broadcast::Receiver<CommandChanged> {
        self.command_changed.subscribe()
    }

    pub fn subscribe_filter_changed(&self) -> broadcast::Receiver<FilterChanged<H>> {
        self.filter_changed.subscribe()
    }

    pub(crate) fn publish_connectivity(&self, connected: bool) {
        let _ = self.connectivity.send(connected);
    }

    pub(crate) fn publish_command_changed(&self, event: CommandChanged) {
        let _ = self.command_changed.send(event);
    }

    pub(crate) fn publish_filter_changed(&self, event: FilterChanged<H>) {
        let _ = self.filter_changed.send(event);
    }
}
