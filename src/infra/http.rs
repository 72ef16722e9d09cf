use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION},
};
use serde::de::DeserializeOwned;

use crate::domain::ticket::{Ticket, TicketDraft, TicketEdits, TicketId};
use crate::error::{AppError, AppResult};
use crate::services::TicketBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuth {
    None,
    Bearer(String),
    Basic { user: String, token: String },
}

impl ApiAuth {
    pub fn from_parts(user: Option<String>, token: Option<String>) -> Self {
        match (user, token) {
            (Some(user), Some(token)) => ApiAuth::Basic { user, token },
            (None, Some(token)) => ApiAuth::Bearer(token),
            _ => ApiAuth::None,
        }
    }

    fn header_value(&self) -> Option<String> {
        match self {
            ApiAuth::None => None,
            ApiAuth::Bearer(token) => Some(format!("Bearer {token}")),
            ApiAuth::Basic { user, token } => {
                let encoded = BASE64_STANDARD.encode(format!("{user}:{token}"));
                Some(format!("Basic {encoded}"))
            }
        }
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for the ticket backend.
pub struct TicketApiClient {
    http: Client,
    base_url: Option<String>,
    auth: ApiAuth,
}

impl TicketApiClient {
    pub fn new(base_url: Option<String>, auth: ApiAuth) -> AppResult<Self> {
        Self::with_timeouts(base_url, auth, REQUEST_TIMEOUT, CONNECT_TIMEOUT)
    }

    /// A hung request fails with a network error once `request` elapses, so
    /// the poller never waits on it forever.
    pub fn with_timeouts(
        base_url: Option<String>,
        auth: ApiAuth,
        request: Duration,
        connect: Duration,
    ) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(request)
            .connect_timeout(connect)
            .build()
            .map_err(|err| AppError::Configuration(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    fn base_url(&self) -> AppResult<&str> {
        self.base_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::Configuration("ticket API base URL not configured".to_string()))
    }

    fn collection_endpoint(base_url: &str) -> String {
        format!("{base_url}/api/tickets")
    }

    fn ticket_endpoint(base_url: &str, id: &TicketId) -> String {
        format!("{base_url}/api/tickets/{}", id.as_str())
    }

    fn approve_endpoint(base_url: &str, id: &TicketId) -> String {
        format!("{}/approve", Self::ticket_endpoint(base_url, id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match self.auth.header_value() {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, id: Option<&TicketId>) -> AppResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| AppError::Network(format!("failed to reach ticket API: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read response>".to_string());
        Err(classify_failure(status, &body, id))
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> AppResult<T> {
        response
            .json()
            .await
            .map_err(|err| AppError::Backend(format!("failed to parse ticket API response: {err}")))
    }
}

fn classify_failure(status: StatusCode, body: &str, id: Option<&TicketId>) -> AppError {
    match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => AppError::NotFound(id.to_string()),
        _ => AppError::Backend(format!("ticket API responded with {status}: {body}")),
    }
}

#[async_trait]
impl TicketBackend for TicketApiClient {
    async fn list_tickets(&self) -> AppResult<Vec<Ticket>> {
        let base_url = self.base_url()?;
        let request = self.http.get(Self::collection_endpoint(base_url));
        let response = self.send(request, None).await?;
        Self::parse(response).await
    }

    async fn get_ticket(&self, id: &TicketId) -> AppResult<Ticket> {
        let base_url = self.base_url()?;
        let request = self.http.get(Self::ticket_endpoint(base_url, id));
        let response = self.send(request, Some(id)).await?;
        Self::parse(response).await
    }

    async fn create_ticket(&self, draft: &TicketDraft) -> AppResult<Ticket> {
        if draft.description.trim().is_empty() {
            return Err(AppError::InvalidState(
                "ticket description must not be empty".to_string(),
            ));
        }
        let base_url = self.base_url()?;
        let request = self
            .http
            .post(Self::collection_endpoint(base_url))
            .json(draft);
        let response = self.send(request, None).await?;
        let ticket: Ticket = Self::parse(response).await?;
        tracing::info!(ticket = %ticket.id, "created ticket");
        Ok(ticket)
    }

    async fn update_ticket(&self, id: &TicketId, edits: &TicketEdits) -> AppResult<()> {
        let base_url = self.base_url()?;
        let request = self.http.put(Self::ticket_endpoint(base_url, id)).json(edits);
        self.send(request, Some(id)).await?;
        tracing::info!(ticket = %id, "updated ticket");
        Ok(())
    }

    async fn delete_ticket(&self, id: &TicketId) -> AppResult<()> {
        let base_url = self.base_url()?;
        let request = self.http.delete(Self::ticket_endpoint(base_url, id));
        self.send(request, Some(id)).await?;
        tracing::info!(ticket = %id, "deleted ticket");
        Ok(())
    }

    async fn approve_ticket(&self, id: &TicketId) -> AppResult<Ticket> {
        let base_url = self.base_url()?;
        let request = self.http.post(Self::approve_endpoint(base_url, id));
        let response = self.send(request, Some(id)).await?;
        Self::parse(response).await
    }
}
