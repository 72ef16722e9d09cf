//! Status polling for the selected ticket.
//!
//! A [`StatusPoller`] owns at most one background task, bound to the current
//! selection. Selecting a ticket fetches it once right away and, while its
//! status is pending, keeps fetching on a fixed interval until the backend
//! reports a terminal status. Replacing or clearing the selection aborts the
//! task before anything starts for the next selection.

pub mod sink;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::domain::ticket::{Ticket, TicketEdits, TicketId, TicketStatus};
use crate::error::AppResult;
use crate::services::TicketBackend;

pub use sink::{ChannelSink, FanoutSink, PollEvent, PollSink, StopReason, TracingSink};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Ticks are skipped while this many fetches are still outstanding.
pub const MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Nothing selected.
    Idle,
    /// A timer is armed for the selected ticket.
    Polling,
    /// The selected ticket is terminal; no further fetches are scheduled.
    Settled,
}

struct Selection {
    generation: u64,
    ticket: Option<Ticket>,
    phase: PollPhase,
}

/// State shared between the poller handle and its worker task.
#[derive(Clone)]
struct Shared {
    backend: Arc<dyn TicketBackend>,
    sink: Arc<dyn PollSink>,
    interval: Duration,
    selection: Arc<Mutex<Selection>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Selection> {
        // A panicking sink must not wedge the poller.
        self.selection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `event` only while `generation` still owns the selection.
    ///
    /// The lock is held across the sink call so a cancelled worker can never
    /// report after `select` has moved on.
    fn record(&self, generation: u64, event: PollEvent) -> bool {
        let selection = self.lock();
        if selection.generation != generation {
            return false;
        }
        self.sink.record(event);
        true
    }

    /// Replace the snapshot when `fetched` carries a different status and
    /// report the change. Returns the freshest known status, or `None` once
    /// `generation` no longer owns the selection.
    fn apply(&self, generation: u64, fetched: Ticket) -> Option<TicketStatus> {
        let mut selection = self.lock();
        if selection.generation != generation {
            return None;
        }
        let current = selection.ticket.as_mut()?;
        if current.id != fetched.id || current.status == fetched.status {
            return Some(current.status.clone());
        }
        let status = fetched.status.clone();
        let previous = std::mem::replace(current, fetched.clone()).status;
        self.sink.record(PollEvent::StatusChanged {
            id: fetched.id.clone(),
            previous,
            ticket: fetched,
        });
        Some(status)
    }

    /// Move to `phase` and report `event` in one step.
    fn transition(&self, generation: u64, phase: PollPhase, event: Option<PollEvent>) -> bool {
        let mut selection = self.lock();
        if selection.generation != generation {
            return false;
        }
        selection.phase = phase;
        if let Some(event) = event {
            self.sink.record(event);
        }
        true
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

pub struct StatusPoller {
    shared: Shared,
    worker: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn TicketBackend>,
        sink: Arc<dyn PollSink>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Shared {
                backend,
                sink,
                interval,
                selection: Arc::new(Mutex::new(Selection {
                    generation: 0,
                    ticket: None,
                    phase: PollPhase::Idle,
                })),
            },
            worker: None,
        }
    }

    /// Make `ticket` the current selection.
    ///
    /// Any work for the previous selection is cancelled first. Must be called
    /// from within a tokio runtime.
    pub fn select(&mut self, ticket: Option<Ticket>) {
        self.start(ticket, true);
    }

    /// Select a ticket that was just read from the backend. The immediate
    /// fetch is skipped; a pending ticket is next fetched one interval later.
    pub fn select_fresh(&mut self, ticket: Ticket) {
        self.start(Some(ticket), false);
    }

    pub fn clear(&mut self) {
        self.select(None);
    }

    pub fn snapshot(&self) -> Option<Ticket> {
        self.shared.lock().ticket.clone()
    }

    pub fn phase(&self) -> PollPhase {
        self.shared.lock().phase
    }

    /// Fold locally persisted edits into the snapshot without restarting
    /// the poll. Returns `false` when nothing is selected.
    pub fn merge_local(&self, edits: &TicketEdits) -> bool {
        match self.shared.lock().ticket.as_mut() {
            Some(ticket) => {
                ticket.apply_edits(edits);
                true
            }
            None => false,
        }
    }

    fn start(&mut self, ticket: Option<Ticket>, fetch_now: bool) {
        self.cancel_current();

        let generation = {
            let mut selection = self.shared.lock();
            selection.generation += 1;
            selection.phase = match &ticket {
                Some(ticket) if ticket.status.is_pending() => PollPhase::Polling,
                Some(_) => PollPhase::Settled,
                None => PollPhase::Idle,
            };
            selection.ticket = ticket.clone();
            if let Some(ticket) = ticket.as_ref().filter(|ticket| ticket.status.is_pending()) {
                self.shared.sink.record(PollEvent::Started {
                    id: ticket.id.clone(),
                    status: ticket.status.clone(),
                });
            }
            selection.generation
        };

        let Some(ticket) = ticket else {
            return;
        };
        if !fetch_now && !ticket.status.is_pending() {
            return;
        }
        self.worker = Some(tokio::spawn(run_worker(
            self.shared.clone(),
            generation,
            ticket.id,
            ticket.status,
            fetch_now,
        )));
    }

    fn cancel_current(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }

        let mut selection = self.shared.lock();
        // Bumping the generation fences off a worker that is mid-poll on
        // another thread and has not observed the abort yet.
        selection.generation += 1;
        let was_polling = selection.phase == PollPhase::Polling;
        selection.phase = PollPhase::Idle;
        if let (Some(ticket), true) = (&selection.ticket, was_polling) {
            self.shared.sink.record(PollEvent::Stopped {
                id: ticket.id.clone(),
                status: ticket.status.clone(),
                reason: StopReason::Cancelled,
            });
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn fetch(
    backend: Arc<dyn TicketBackend>,
    id: TicketId,
    seq: u64,
) -> (u64, AppResult<Ticket>) {
    (seq, backend.get_ticket(&id).await)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_worker(
    shared: Shared,
    generation: u64,
    id: TicketId,
    status: TicketStatus,
    fetch_now: bool,
) {
    let mut in_flight = FuturesUnordered::new();
    let mut next_seq = 0u64;
    let mut last_applied: Option<u64> = None;
    let mut ticker = status.is_pending().then(|| shared.ticker());

    if fetch_now {
        in_flight.push(fetch(Arc::clone(&shared.backend), id.clone(), next_seq));
        next_seq += 1;
    }

    loop {
        tokio::select! {
            _ = next_tick(&mut ticker), if ticker.is_some() => {
                if in_flight.len() >= MAX_IN_FLIGHT {
                    tracing::debug!(ticket = %id, "skipping poll tick; backend is not keeping up");
                    continue;
                }
                in_flight.push(fetch(Arc::clone(&shared.backend), id.clone(), next_seq));
                next_seq += 1;
            }
            Some((seq, result)) = in_flight.next() => {
                let fetched = match result {
                    Ok(fetched) => fetched,
                    Err(err) => {
                        let event = PollEvent::FetchFailed {
                            id: id.clone(),
                            error: err.to_string(),
                        };
                        if !shared.record(generation, event) {
                            return;
                        }
                        continue;
                    }
                };

                if last_applied.is_some_and(|applied| seq <= applied) {
                    tracing::debug!(ticket = %id, seq, "discarding out-of-date poll response");
                    continue;
                }
                last_applied = Some(seq);

                let Some(latest) = shared.apply(generation, fetched) else {
                    return;
                };

                match (latest.is_pending(), ticker.is_some()) {
                    (true, false) => {
                        let started = PollEvent::Started {
                            id: id.clone(),
                            status: latest,
                        };
                        if !shared.transition(generation, PollPhase::Polling, Some(started)) {
                            return;
                        }
                        ticker = Some(shared.ticker());
                    }
                    (false, true) => {
                        let stopped = PollEvent::Stopped {
                            id: id.clone(),
                            status: latest,
                            reason: StopReason::Settled,
                        };
                        shared.transition(generation, PollPhase::Settled, Some(stopped));
                        return;
                    }
                    _ => {}
                }
            }
            else => break,
        }
    }

    shared.transition(generation, PollPhase::Settled, None);
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::advance;

    use super::*;
    use crate::domain::ticket::sample;
    use crate::testing::{FakeBackend, settle};

    fn poller_with(backend: Arc<FakeBackend>) -> (StatusPoller, UnboundedReceiver<PollEvent>) {
        let (sink, events) = ChannelSink::new();
        let poller = StatusPoller::new(backend, Arc::new(sink), DEFAULT_POLL_INTERVAL);
        (poller, events)
    }

    fn drain(events: &mut UnboundedReceiver<PollEvent>) -> Vec<PollEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn status_changes(events: &[PollEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, PollEvent::StatusChanged { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn pending_selection_fetches_immediately_and_on_interval() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        assert_eq!(backend.fetch_count("a"), 1);
        assert_eq!(poller.phase(), PollPhase::Polling);

        advance(Duration::from_millis(1999)).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 1);

        advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 2);

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 3);

        let events = drain(&mut events);
        assert_eq!(
            events,
            vec![PollEvent::Started {
                id: TicketId::new("a"),
                status: TicketStatus::New,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_selection_fetches_exactly_once() {
        let backend = FakeBackend::with_tickets(vec![sample("done", TicketStatus::Completed)]);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("done", TicketStatus::Completed)));
        settle().await;
        advance(DEFAULT_POLL_INTERVAL * 5).await;
        settle().await;

        assert_eq!(backend.fetch_count("done"), 1);
        assert_eq!(poller.phase(), PollPhase::Settled);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_selection_cancels_previous_timer() {
        let backend = FakeBackend::with_tickets(vec![
            sample("a", TicketStatus::InProgress),
            sample("b", TicketStatus::New),
        ]);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::InProgress)));
        settle().await;
        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 2);

        poller.select(Some(sample("b", TicketStatus::New)));
        settle().await;
        for _ in 0..3 {
            advance(DEFAULT_POLL_INTERVAL).await;
            settle().await;
        }

        assert_eq!(backend.fetch_count("a"), 2);
        assert_eq!(backend.fetch_count("b"), 4);

        let stops = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, PollEvent::Stopped { .. }))
            .collect::<Vec<_>>();
        assert_eq!(
            stops,
            vec![PollEvent::Stopped {
                id: TicketId::new("a"),
                status: TicketStatus::InProgress,
                reason: StopReason::Cancelled,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_selection_goes_idle() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        let (mut poller, _events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        poller.clear();
        advance(DEFAULT_POLL_INTERVAL * 3).await;
        settle().await;

        assert_eq!(backend.fetch_count("a"), 1);
        assert_eq!(poller.phase(), PollPhase::Idle);
        assert_eq!(poller.snapshot(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn status_progression_updates_snapshot_and_stops() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        backend.script_status("a", TicketStatus::New);
        backend.script_status("a", TicketStatus::InProgress);
        backend.script_status("a", TicketStatus::Completed);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        assert_eq!(backend.fetch_count("a"), 1);
        assert_eq!(status_changes(&drain(&mut events)), 0);

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 2);
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.status),
            Some(TicketStatus::InProgress)
        );
        assert_eq!(status_changes(&drain(&mut events)), 1);
        assert_eq!(poller.phase(), PollPhase::Polling);

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 3);
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.status),
            Some(TicketStatus::Completed)
        );
        let events_after_completion = drain(&mut events);
        assert_eq!(status_changes(&events_after_completion), 1);
        assert!(events_after_completion.contains(&PollEvent::Stopped {
            id: TicketId::new("a"),
            status: TicketStatus::Completed,
            reason: StopReason::Settled,
        }));
        assert_eq!(poller.phase(), PollPhase::Settled);

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_keeps_timer_and_snapshot() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        backend.script_failure("a", "connection reset");
        backend.script_failure("a", "connection reset");
        backend.script_status("a", TicketStatus::Failed);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;

        assert_eq!(backend.fetch_count("a"), 2);
        assert_eq!(poller.phase(), PollPhase::Polling);
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.status),
            Some(TicketStatus::New)
        );
        let failures = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, PollEvent::FetchFailed { .. }))
            .count();
        assert_eq!(failures, 2);

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(poller.phase(), PollPhase::Settled);
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.status),
            Some(TicketStatus::Failed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_response_does_not_block_ticks_and_stale_result_is_dropped() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        backend.script_status("a", TicketStatus::New);
        // Issued at t=2000, answers at t=7000 with an outdated status.
        backend.script_delayed("a", Duration::from_millis(5000), TicketStatus::New);
        // Issued at t=4000, answers immediately.
        backend.script_status("a", TicketStatus::InProgress);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 3);
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.status),
            Some(TicketStatus::InProgress)
        );

        advance(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.status),
            Some(TicketStatus::InProgress)
        );
        assert_eq!(status_changes(&drain(&mut events)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_selection_resumes_polling_when_backend_reports_pending() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::Failed)]);
        backend.script_status("a", TicketStatus::InProgress);
        backend.script_status("a", TicketStatus::Completed);
        let (mut poller, _events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::Failed)));
        settle().await;
        assert_eq!(poller.phase(), PollPhase::Polling);

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 2);
        assert_eq!(poller.phase(), PollPhase::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn merge_local_keeps_polling() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        let (mut poller, _events) = poller_with(Arc::clone(&backend));

        assert!(!poller.merge_local(&TicketEdits::default()));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        let edits = TicketEdits {
            description: "updated".to_string(),
            generated_code: Some("code".to_string()),
            test_cases: None,
        };
        assert!(poller.merge_local(&edits));
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.description),
            Some("updated".to_string())
        );

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_selection_reports_polling_before_first_fetch() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));

        assert_eq!(poller.phase(), PollPhase::Polling);
        assert_eq!(
            events.try_recv().ok(),
            Some(PollEvent::Started {
                id: TicketId::new("a"),
                status: TicketStatus::New,
            })
        );
        assert_eq!(backend.fetch_count("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_caps_outstanding_fetches() {
        let backend = FakeBackend::with_tickets(vec![sample("a", TicketStatus::New)]);
        for _ in 0..10 {
            backend.script_delayed("a", Duration::from_secs(61), TicketStatus::New);
        }
        let (mut poller, _events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        for _ in 0..30 {
            advance(DEFAULT_POLL_INTERVAL).await;
            settle().await;
        }
        assert_eq!(backend.fetch_count("a"), MAX_IN_FLIGHT);

        // The first response lands at t=61s and frees one slot for t=62s.
        advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), MAX_IN_FLIGHT);
        advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), MAX_IN_FLIGHT + 1);
        assert_eq!(poller.phase(), PollPhase::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_selection_skips_immediate_fetch() {
        let backend = FakeBackend::with_tickets(vec![
            sample("a", TicketStatus::InProgress),
            sample("done", TicketStatus::Completed),
        ]);
        let (mut poller, _events) = poller_with(Arc::clone(&backend));

        poller.select_fresh(sample("a", TicketStatus::InProgress));
        settle().await;
        assert_eq!(backend.fetch_count("a"), 0);
        assert_eq!(poller.phase(), PollPhase::Polling);

        advance(DEFAULT_POLL_INTERVAL).await;
        settle().await;
        assert_eq!(backend.fetch_count("a"), 1);

        poller.select_fresh(sample("done", TicketStatus::Completed));
        advance(DEFAULT_POLL_INTERVAL * 3).await;
        settle().await;
        assert_eq!(backend.fetch_count("done"), 0);
        assert_eq!(backend.fetch_count("a"), 1);
        assert_eq!(poller.phase(), PollPhase::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_selection_reports_nothing_after_cancel() {
        let backend = FakeBackend::with_tickets(vec![
            sample("a", TicketStatus::New),
            sample("b", TicketStatus::New),
        ]);
        backend.script_delayed("a", Duration::from_millis(500), TicketStatus::Completed);
        let (mut poller, mut events) = poller_with(Arc::clone(&backend));

        poller.select(Some(sample("a", TicketStatus::New)));
        settle().await;
        let stale_generation = poller.shared.lock().generation;
        poller.select(Some(sample("b", TicketStatus::New)));
        advance(Duration::from_millis(500)).await;
        settle().await;

        // A worker that missed the abort is fenced off by its generation.
        assert_eq!(
            poller
                .shared
                .apply(stale_generation, sample("a", TicketStatus::Completed)),
            None
        );
        assert!(!poller.shared.record(
            stale_generation,
            PollEvent::FetchFailed {
                id: TicketId::new("a"),
                error: "late".to_string(),
            },
        ));

        let events = drain(&mut events);
        let cancelled = events
            .iter()
            .position(|event| {
                matches!(
                    event,
                    PollEvent::Stopped {
                        reason: StopReason::Cancelled,
                        ..
                    }
                )
            })
            .unwrap();
        assert!(events[cancelled + 1..].iter().all(|event| match event {
            PollEvent::Started { id, .. }
            | PollEvent::StatusChanged { id, .. }
            | PollEvent::FetchFailed { id, .. }
            | PollEvent::Stopped { id, .. } => id.as_str() == "b",
        }));
        assert_eq!(
            poller.snapshot().map(|ticket| ticket.id),
            Some(TicketId::new("b"))
        );
    }
}
