use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ticket::{Ticket, TicketDraft, TicketEdits, TicketId, TicketStatus};
use crate::error::{AppError, AppResult};
use crate::services::{Confirm, TicketBackend};

struct ScriptedFetch {
    delay: Duration,
    result: Result<TicketStatus, String>,
}

#[derive(Default)]
struct FakeState {
    tickets: HashMap<TicketId, Ticket>,
    scripted: HashMap<TicketId, VecDeque<ScriptedFetch>>,
    fetches: Vec<TicketId>,
    updates: Vec<(TicketId, TicketEdits)>,
    deleted: Vec<TicketId>,
    fail_deletes: bool,
    next_id: u32,
}

/// In-memory backend with scriptable `get_ticket` responses.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn with_tickets(tickets: Vec<Ticket>) -> Arc<Self> {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            for ticket in tickets {
                state.tickets.insert(ticket.id.clone(), ticket);
            }
        }
        Arc::new(backend)
    }

    /// Queue the status returned by the next unscripted fetch of `id`.
    pub fn script_status(&self, id: &str, status: TicketStatus) {
        self.script(id, Duration::ZERO, Ok(status));
    }

    pub fn script_delayed(&self, id: &str, delay: Duration, status: TicketStatus) {
        self.script(id, delay, Ok(status));
    }

    pub fn script_failure(&self, id: &str, message: &str) {
        self.script(id, Duration::ZERO, Err(message.to_string()));
    }

    fn script(&self, id: &str, delay: Duration, result: Result<TicketStatus, String>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(TicketId::new(id))
            .or_default()
            .push_back(ScriptedFetch { delay, result });
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        let id = TicketId::new(id);
        self.state
            .lock()
            .unwrap()
            .fetches
            .iter()
            .filter(|fetched| **fetched == id)
            .count()
    }

    pub fn updates(&self) -> Vec<(TicketId, TicketEdits)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn deleted(&self) -> Vec<TicketId> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl TicketBackend for FakeBackend {
    async fn list_tickets(&self) -> AppResult<Vec<Ticket>> {
        let state = self.state.lock().unwrap();
        let mut tickets = state.tickets.values().cloned().collect::<Vec<_>>();
        tickets.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(tickets)
    }

    async fn get_ticket(&self, id: &TicketId) -> AppResult<Ticket> {
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            state.fetches.push(id.clone());
            let scripted = state.scripted.get_mut(id).and_then(VecDeque::pop_front);
            match (scripted, state.tickets.get_mut(id)) {
                (Some(fetch), Some(ticket)) => match fetch.result {
                    Ok(status) => {
                        ticket.status = status;
                        (fetch.delay, Ok(ticket.clone()))
                    }
                    Err(message) => (fetch.delay, Err(AppError::Network(message))),
                },
                (None, Some(ticket)) => (Duration::ZERO, Ok(ticket.clone())),
                (_, None) => (Duration::ZERO, Err(AppError::NotFound(id.to_string()))),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn create_ticket(&self, draft: &TicketDraft) -> AppResult<Ticket> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let ticket = Ticket {
            id: TicketId::new(format!("created-{}", state.next_id)),
            status: TicketStatus::New,
            title: Some(draft.title.clone()),
            description: draft.description.clone(),
            generated_code: None,
            test_cases: None,
        };
        state.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn update_ticket(&self, id: &TicketId, edits: &TicketEdits) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let ticket = state
            .tickets
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        ticket.apply_edits(edits);
        state.updates.push((id.clone(), edits.clone()));
        Ok(())
    }

    async fn delete_ticket(&self, id: &TicketId) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(AppError::Backend("delete rejected".to_string()));
        }
        state.tickets.remove(id);
        state.deleted.push(id.clone());
        Ok(())
    }

    async fn approve_ticket(&self, id: &TicketId) -> AppResult<Ticket> {
        let mut state = self.state.lock().unwrap();
        let ticket = state
            .tickets
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        ticket.status = TicketStatus::InProgress;
        Ok(ticket.clone())
    }
}

/// Records every question and answers with a fixed value.
pub struct RecordingConfirm {
    answer: bool,
    pub questions: Mutex<Vec<String>>,
}

impl RecordingConfirm {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            questions: Mutex::new(Vec::new()),
        }
    }
}

impl Confirm for RecordingConfirm {
    fn confirm(&self, question: &str) -> bool {
        self.questions.lock().unwrap().push(question.to_string());
        self.answer
    }
}

/// Let spawned tasks run on the paused test clock without moving time.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
