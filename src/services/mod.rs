pub mod confirm;
pub mod ticket_backend;

pub use confirm::{AutoConfirm, Confirm};
pub use ticket_backend::TicketBackend;
