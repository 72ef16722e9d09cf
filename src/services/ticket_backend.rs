use async_trait::async_trait;

use crate::domain::ticket::{Ticket, TicketDraft, TicketEdits, TicketId};
use crate::error::AppResult;

/// Remote source of truth for tickets.
#[async_trait]
pub trait TicketBackend: Send + Sync {
    async fn list_tickets(&self) -> AppResult<Vec<Ticket>>;
    async fn get_ticket(&self, id: &TicketId) -> AppResult<Ticket>;
    async fn create_ticket(&self, draft: &TicketDraft) -> AppResult<Ticket>;
    async fn update_ticket(&self, id: &TicketId, edits: &TicketEdits) -> AppResult<()>;
    async fn delete_ticket(&self, id: &TicketId) -> AppResult<()>;
    async fn approve_ticket(&self, id: &TicketId) -> AppResult<Ticket>;
}
