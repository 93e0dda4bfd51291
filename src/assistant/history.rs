//! Conversation history of requests and assistant responses.
//!
//! One request is processed at a time. While it is, a placeholder response
//! stands in for the reply. Completing the request swaps the placeholder for
//! a new reply response, failing it only removes the placeholder.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Request id the welcome response is attached to.
pub const WELCOME_REQUEST_ID: &str = "welcome";

const WELCOME_TEXT: &str = "Hello, I'm your AI assistant. I can help you browse the web, shop online, schedule meetings, and much more. What would you like me to do for you today?";

const PROCESSING_TEXT: &str = "I'm working on this for you...";

/// Shown to the user when a request could not be answered.
pub const PROCESSING_ERROR: &str = "Sorry, I couldn't process your request. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Text,
}

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub id: String,
    pub text: String,
    pub timestamp: String, // RFC 3339
    pub status: RequestStatus,
}

/// Something the assistant said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub id: String,
    pub request_id: String,
    pub text: String,
    pub timestamp: String, // RFC 3339
    #[serde(rename = "type")]
    pub kind: ResponseKind,
}

/// Bounded log of request/response exchanges.
#[derive(Debug, Serialize)]
pub struct History {
    requests: VecDeque<ActionRequest>,
    responses: Vec<ActionResponse>,
    #[serde(skip)]
    max_exchanges: usize,
    #[serde(skip)]
    processing: Option<String>, // Request awaiting a reply
}

impl History {
    /// Start a history that keeps at most `max_exchanges` requests.
    pub fn new(max_exchanges: usize) -> Self {
        let mut history = Self { requests: VecDeque::new(), responses: Vec::new(), max_exchanges: max_exchanges.max(1), processing: None };
        history.respond(WELCOME_REQUEST_ID, WELCOME_TEXT);
        history
    }

    /// The welcome message shown when a conversation starts.
    pub fn welcome(&self) -> Option<&ActionResponse> {
        self.responses.iter().find(|r| r.request_id == WELCOME_REQUEST_ID)
    }

    /// Record a new request and its placeholder response.
    ///
    /// Returns `None` for blank text or while another request is processing.
    pub fn submit(&mut self, text: &str) -> Option<ActionRequest> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(ref busy) = self.processing {
            debug!("Ignoring request while {} is processing", busy);
            return None;
        }

        let request = ActionRequest { id: new_id(), text: text.to_string(), timestamp: now(), status: RequestStatus::Pending };
        self.respond(&request.id, PROCESSING_TEXT);
        self.requests.push_back(request.clone());
        self.processing = Some(request.id.clone());

        debug!("Request {} submitted", request.id);
        Some(request)
    }

    /// Drop the placeholder of `request_id` and append the assistant's reply.
    pub fn complete(&mut self, request_id: &str, reply: &str) -> bool {
        if !self.finish(request_id, RequestStatus::Completed) {
            return false;
        }

        self.remove_placeholder(request_id);
        self.respond(request_id, reply);
        self.enforce_limit();
        true
    }

    /// Mark `request_id` as failed and drop its placeholder.
    pub fn fail(&mut self, request_id: &str) -> bool {
        if !self.finish(request_id, RequestStatus::Error) {
            return false;
        }

        self.remove_placeholder(request_id);
        self.enforce_limit();
        true
    }

    pub fn is_processing(&self) -> bool {
        self.processing.is_some()
    }

    pub fn requests(&self) -> impl Iterator<Item = &ActionRequest> {
        self.requests.iter()
    }

    /// Responses belonging to one request.
    pub fn responses_for<'a>(&'a self, request_id: &'a str) -> impl Iterator<Item = &'a ActionResponse> {
        self.responses.iter().filter(move |r| r.request_id == request_id)
    }

    /// Serialize the whole history as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize history")
    }

    /// Write the history as JSON to `path`.
    pub fn export(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).with_context(|| format!("Failed to write history to {}", path.display()))?;
        info!("💾 History saved to {}", path.display());
        Ok(())
    }

    fn finish(&mut self, request_id: &str, status: RequestStatus) -> bool {
        if self.processing.as_deref() != Some(request_id) {
            warn!("Request {} is not being processed", request_id);
            return false;
        }
        self.processing = None;

        if let Some(request) = self.requests.iter_mut().find(|r| r.id == request_id) {
            request.status = status;
        }
        true
    }

    fn respond(&mut self, request_id: &str, text: &str) {
        self.responses.push(ActionResponse { id: new_id(), request_id: request_id.to_string(), text: text.to_string(), timestamp: now(), kind: ResponseKind::Text });
    }

    fn remove_placeholder(&mut self, request_id: &str) {
        self.responses.retain(|r| !(r.request_id == request_id && r.text == PROCESSING_TEXT));
    }

    fn enforce_limit(&mut self) {
        while self.requests.len() > self.max_exchanges {
            let Some(oldest) = self.requests.pop_front() else {
                break;
            };
            self.responses.retain(|r| r.request_id != oldest.id);
            debug!("Dropped request {} from history", oldest.id);
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn now() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_welcome() {
        let history = History::new(10);
        assert_eq!(history.responses.len(), 1);
        assert_eq!(history.welcome().map(|r| r.text.as_str()), Some(WELCOME_TEXT));
        assert_eq!(history.requests().count(), 0);
    }

    #[test]
    fn test_blank_request_ignored() {
        let mut history = History::new(10);
        assert!(history.submit("   ").is_none());
        assert!(!history.is_processing());
    }

    #[test]
    fn test_one_request_at_a_time() {
        let mut history = History::new(10);
        let first = history.submit("check the weather").unwrap();
        assert_eq!(first.status, RequestStatus::Pending);
        assert!(history.submit("book a flight").is_none());

        assert!(history.complete(&first.id, "Sunny."));
        assert!(history.submit("book a flight").is_some());
    }

    #[test]
    fn test_complete_replaces_placeholder() {
        let mut history = History::new(10);
        let request = history.submit("check the weather").unwrap();

        let pending: Vec<_> = history.responses_for(&request.id).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, PROCESSING_TEXT);

        let placeholder_id = pending[0].id.clone();

        assert!(history.complete(&request.id, "Sunny."));
        let done: Vec<_> = history.responses_for(&request.id).collect();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].text, "Sunny.");
        assert_eq!(done[0].kind, ResponseKind::Text);
        assert_ne!(done[0].id, placeholder_id);
        assert_eq!(history.responses.last().map(|r| r.text.as_str()), Some("Sunny."));
        assert_eq!(history.requests().next().map(|r| r.status), Some(RequestStatus::Completed));
        assert!(!history.complete(&request.id, "again"));
    }

    #[test]
    fn test_fail_removes_placeholder() {
        let mut history = History::new(10);
        let request = history.submit("check the weather").unwrap();

        assert!(history.fail(&request.id));
        assert_eq!(history.responses_for(&request.id).count(), 0);
        assert_eq!(history.requests().next().map(|r| r.status), Some(RequestStatus::Error));
        assert!(!history.is_processing());
    }

    #[test]
    fn test_oldest_exchanges_are_dropped() {
        let mut history = History::new(2);
        for text in ["one", "two", "three"] {
            let request = history.submit(text).unwrap();
            history.complete(&request.id, "ok");
        }

        let texts: Vec<_> = history.requests().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(history.responses.len(), 3);
        assert!(history.welcome().is_some());
    }

    #[test]
    fn test_json_export_shape() {
        let mut history = History::new(10);
        let request = history.submit("buy headphones").unwrap();
        history.complete(&request.id, "Here are some options.");

        let value: serde_json::Value = serde_json::from_str(&history.to_json().unwrap()).unwrap();
        assert_eq!(value["requests"][0]["status"], "completed");
        assert_eq!(value["responses"][0]["requestId"], WELCOME_REQUEST_ID);
        assert_eq!(value["responses"][1]["type"], "text");
        assert_eq!(value["responses"][1]["text"], "Here are some options.");
        assert!(value.get("maxExchanges").is_none());
    }

    #[test]
    fn test_ids_are_unique_across_histories() {
        let mut first = History::new(10);
        let mut second = History::new(10);
        let a = first.submit("check the weather").unwrap();
        let b = second.submit("check the weather").unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(first.welcome().map(|r| &r.id), second.welcome().map(|r| &r.id));
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert!(history_ids(&first).iter().all(|id| Uuid::parse_str(id).is_ok()));
    }

    fn history_ids(history: &History) -> Vec<String> {
        history.requests().map(|r| r.id.clone()).chain(history.responses.iter().map(|r| r.id.clone())).collect()
    }
}
