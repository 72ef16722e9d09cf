use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::ticket::{Ticket, TicketDraft, TicketEdits, TicketId, TicketStatus};
use crate::error::{AppError, AppResult};
use crate::poller::{PollEvent, PollPhase, PollSink, StatusPoller};
use crate::services::{Confirm, TicketBackend};

pub const DELETE_QUESTION: &str = "Are you sure you want to delete this ticket?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskMode {
    View,
    Create,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(TicketId),
    Declined,
}

/// Bumps the list refresh counter whenever the poller sees a status change,
/// then forwards the event.
struct RefreshSink {
    refresh: Arc<watch::Sender<u64>>,
    inner: Arc<dyn PollSink>,
}

impl PollSink for RefreshSink {
    fn record(&self, event: PollEvent) {
        if matches!(event, PollEvent::StatusChanged { .. }) {
            bump(&self.refresh);
        }
        self.inner.record(event);
    }
}

fn bump(refresh: &watch::Sender<u64>) {
    refresh.send_modify(|generation| *generation += 1);
}

/// Controller for the ticket page: selection, detail-pane mode, search
/// filter and the list refresh counter.
pub struct TicketDesk {
    backend: Arc<dyn TicketBackend>,
    poller: StatusPoller,
    mode: DeskMode,
    search: String,
    refresh: Arc<watch::Sender<u64>>,
}

impl TicketDesk {
    pub fn new(
        backend: Arc<dyn TicketBackend>,
        sink: Arc<dyn PollSink>,
        poll_interval: Duration,
    ) -> Self {
        let (refresh, _) = watch::channel(0);
        let refresh = Arc::new(refresh);
        let sink = Arc::new(RefreshSink {
            refresh: Arc::clone(&refresh),
            inner: sink,
        });
        Self {
            poller: StatusPoller::new(Arc::clone(&backend), sink, poll_interval),
            backend,
            mode: DeskMode::View,
            search: String::new(),
            refresh,
        }
    }

    pub fn mode(&self) -> DeskMode {
        self.mode
    }

    pub fn selected(&self) -> Option<Ticket> {
        self.poller.snapshot()
    }

    pub fn poll_phase(&self) -> PollPhase {
        self.poller.phase()
    }

    pub fn select(&mut self, ticket: Option<Ticket>) {
        self.poller.select(ticket);
    }

    /// Select a ticket the caller just read from the backend.
    pub fn select_fresh(&mut self, ticket: Ticket) {
        self.poller.select_fresh(ticket);
    }

    /// Read `id` once and select it without a second immediate fetch.
    pub async fn open(&mut self, id: &TicketId) -> AppResult<Ticket> {
        let ticket = self.backend.get_ticket(id).await?;
        self.poller.select_fresh(ticket.clone());
        Ok(ticket)
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
    }

    pub fn subscribe_refresh(&self) -> watch::Receiver<u64> {
        self.refresh.subscribe()
    }

    pub fn refresh_generation(&self) -> u64 {
        *self.refresh.borrow()
    }

    /// Tickets from the backend that match the current search.
    pub async fn list(&self) -> AppResult<Vec<Ticket>> {
        let tickets = self.backend.list_tickets().await?;
        Ok(tickets
            .into_iter()
            .filter(|ticket| ticket.matches_search(&self.search))
            .collect())
    }

    pub fn start_create(&mut self) {
        self.poller.clear();
        self.mode = DeskMode::Create;
    }

    pub async fn create(&mut self, draft: TicketDraft) -> AppResult<Ticket> {
        let ticket = self.backend.create_ticket(&draft).await?;
        self.mode = DeskMode::View;
        bump(&self.refresh);
        self.poller.select(Some(ticket.clone()));
        Ok(ticket)
    }

    pub fn start_edit(&mut self) -> AppResult<()> {
        self.require_selection()?;
        self.mode = DeskMode::Edit;
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.mode = DeskMode::View;
    }

    /// Persist edits for the selected ticket and fold them into the local
    /// copy. Polling carries on undisturbed.
    pub async fn save_edits(&mut self, edits: TicketEdits) -> AppResult<()> {
        let ticket = self.require_selection()?;
        self.backend.update_ticket(&ticket.id, &edits).await?;
        self.poller.merge_local(&edits);
        self.mode = DeskMode::View;
        bump(&self.refresh);
        Ok(())
    }

    /// Record a status the detail pane learned about locally. The selection
    /// is restarted so polling follows the new status.
    pub fn set_local_status(&mut self, status: TicketStatus) -> AppResult<()> {
        let mut ticket = self.require_selection()?;
        ticket.status = status;
        self.poller.select(Some(ticket));
        Ok(())
    }

    pub async fn delete(&mut self, confirm: &dyn Confirm) -> AppResult<DeleteOutcome> {
        let ticket = self.require_selection()?;
        if !confirm.confirm(DELETE_QUESTION) {
            return Ok(DeleteOutcome::Declined);
        }

        if let Err(err) = self.backend.delete_ticket(&ticket.id).await {
            tracing::error!(ticket = %ticket.id, error = %err, "failed to delete ticket");
            return Err(err);
        }

        self.poller.clear();
        bump(&self.refresh);
        Ok(DeleteOutcome::Deleted(ticket.id))
    }

    pub async fn approve(&mut self) -> AppResult<Ticket> {
        let ticket = self.require_selection()?;
        let approved = self.backend.approve_ticket(&ticket.id).await?;
        self.poller.select(Some(approved.clone()));
        bump(&self.refresh);
        Ok(approved)
    }

    fn require_selection(&self) -> AppResult<Ticket> {
        self.poller
            .snapshot()
            .ok_or_else(|| AppError::InvalidState("no ticket selected".to_string()))
    }
}
