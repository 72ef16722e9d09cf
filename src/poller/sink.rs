use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::ticket::{Ticket, TicketId, TicketStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The ticket reached a terminal status.
    Settled,
    /// The selection was cleared or replaced.
    Cancelled,
}

/// Structured record of what the poller did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Started {
        id: TicketId,
        status: TicketStatus,
    },
    /// The backend reported a different status than the local snapshot.
    /// Observers treat this as "the list needs a refresh".
    StatusChanged {
        id: TicketId,
        previous: TicketStatus,
        ticket: Ticket,
    },
    FetchFailed {
        id: TicketId,
        error: String,
    },
    Stopped {
        id: TicketId,
        status: TicketStatus,
        reason: StopReason,
    },
}

/// Receives poller events.
///
/// `record` runs while the poller holds its selection lock, so events for a
/// selection always arrive before that selection's `Stopped{Cancelled}`.
/// Implementations must not call back into the poller.
pub trait PollSink: Send + Sync {
    fn record(&self, event: PollEvent);
}

pub struct TracingSink;

impl PollSink for TracingSink {
    fn record(&self, event: PollEvent) {
        match event {
            PollEvent::Started { id, status } => {
                tracing::info!(ticket = %id, %status, "starting status polling");
            }
            PollEvent::StatusChanged {
                id,
                previous,
                ticket,
            } => {
                tracing::info!(
                    ticket = %id,
                    old_status = %previous,
                    new_status = %ticket.status,
                    "ticket status changed"
                );
            }
            PollEvent::FetchFailed { id, error } => {
                tracing::warn!(ticket = %id, %error, "error polling ticket status");
            }
            PollEvent::Stopped { id, status, reason } => {
                tracing::info!(ticket = %id, %status, ?reason, "stopping status polling");
            }
        }
    }
}

/// Forwards events to an unbounded channel. Events are dropped once the
/// receiver is gone.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<PollEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PollSink for ChannelSink {
    fn record(&self, event: PollEvent) {
        let _ = self.sender.send(event);
    }
}

pub struct FanoutSink {
    sinks: Vec<Arc<dyn PollSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn PollSink>>) -> Self {
        Self { sinks }
    }
}

impl PollSink for FanoutSink {
    fn record(&self, event: PollEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}
