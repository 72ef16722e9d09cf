use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub String);

impl TicketId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state reported by the backend.
///
/// Values the client does not know about are kept verbatim in `Other` and
/// treated as terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketStatus {
    New,
    InProgress,
    Completed,
    Failed,
    Other(String),
}

impl TicketStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Completed => "completed",
            TicketStatus::Failed => "failed",
            TicketStatus::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "new" => TicketStatus::New,
            "in_progress" => TicketStatus::InProgress,
            "completed" => TicketStatus::Completed,
            "failed" => TicketStatus::Failed,
            other => TicketStatus::Other(other.to_string()),
        }
    }

    /// Pending statuses keep the poller running.
    pub fn is_pending(&self) -> bool {
        matches!(self, TicketStatus::New | TicketStatus::InProgress)
    }
}

impl From<String> for TicketStatus {
    fn from(value: String) -> Self {
        TicketStatus::parse(&value)
    }
}

impl From<TicketStatus> for String {
    fn from(status: TicketStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    #[serde(rename = "_id")]
    pub id: TicketId,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_cases: Option<String>,
}

impl Ticket {
    pub fn apply_edits(&mut self, edits: &TicketEdits) {
        self.description = edits.description.clone();
        self.generated_code = edits.generated_code.clone();
        self.test_cases = edits.test_cases.clone();
    }

    /// Case-insensitive substring match over id, title and description.
    pub fn matches_search(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let title = self.title.as_deref().unwrap_or_default();
        [self.id.as_str(), title, self.description.as_str()]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => self
                .description
                .lines()
                .next()
                .filter(|line| !line.trim().is_empty())
                .unwrap_or("(untitled)"),
        }
    }
}

/// Fields persisted by `updateTicket`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketEdits {
    pub description: String,
    pub generated_code: Option<String>,
    pub test_cases: Option<String>,
}

impl TicketEdits {
    pub fn from_ticket(ticket: &Ticket) -> Self {
        Self {
            description: ticket.description.clone(),
            generated_code: ticket.generated_code.clone(),
            test_cases: ticket.test_cases.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketDraft {
    pub title: String,
    pub description: String,
}

#[cfg(test)]
pub(crate) fn sample(id: &str, status: TicketStatus) -> Ticket {
    Ticket {
        id: TicketId::new(id),
        status,
        title: Some(format!("Ticket {id}")),
        description: String::new(),
        generated_code: None,
        test_cases: None,
    }
}
