//! Confirmation handshake for destructive tool calls.
//!
//! A tool that needs consent asks [`ConfirmationFlow::request`], which sends a
//! question plus a typed form schema through an [`Elicitor`] and waits for the
//! first of: the client's answer, the deadline, or cancellation. Whichever
//! completes first wins; the losers are dropped without side effects.
//!
//! At most one confirmation is outstanding per invocation. The pending slot is
//! an RAII guard, so it is released on every exit path, including when the
//! waiting future itself is dropped.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ids::InvocationId;

// ============================================================================
// Wire Types
// ============================================================================

/// Action taken by the user in response to an elicitation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ElicitationAction {
    Accept,
    #[default]
    Decline,
    /// Dismissed without an explicit choice.
    Cancel,
}

/// Answer from the party being asked.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct ElicitationResponse {
    pub action: ElicitationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ElicitationResponse {
    pub fn accept(content: Value) -> Self {
        Self {
            action: ElicitationAction::Accept,
            content: Some(content),
        }
    }

    pub fn decline() -> Self {
        Self::default()
    }

    pub fn cancel() -> Self {
        Self {
            action: ElicitationAction::Cancel,
            content: None,
        }
    }
}

// ============================================================================
// Form Schema
// ============================================================================

/// Type and default of one form field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Boolean { default: Option<bool> },
    String { default: Option<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ElicitationField {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Flat form schema: typed, optionally defaulted fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElicitationSchema {
    fields: Vec<ElicitationField>,
}

impl ElicitationSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a boolean field.
    pub fn boolean(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        default: Option<bool>,
        required: bool,
    ) -> Self {
        self.fields.push(ElicitationField {
            name: name.into(),
            description: description.into(),
            kind: FieldKind::Boolean { default },
            required,
        });
        self
    }

    /// Add a string field.
    pub fn string(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        default: Option<String>,
        required: bool,
    ) -> Self {
        self.fields.push(ElicitationField {
            name: name.into(),
            description: description.into(),
            kind: FieldKind::String { default },
            required,
        });
        self
    }

    pub fn fields(&self) -> &[ElicitationField] {
        &self.fields
    }

    /// Render as a JSON Schema object.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            match &field.kind {
                FieldKind::Boolean { default } => {
                    prop.insert("type".into(), json!("boolean"));
                    if let Some(d) = default {
                        prop.insert("default".into(), json!(d));
                    }
                }
                FieldKind::String { default } => {
                    prop.insert("type".into(), json!("string"));
                    if let Some(d) = default {
                        prop.insert("default".into(), json!(d));
                    }
                }
            }
            prop.insert("description".into(), json!(field.description));
            properties.insert(field.name.clone(), Value::Object(prop));
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// ============================================================================
// Elicitors
// ============================================================================

/// Error type for confirmation requests.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ElicitationError {
    /// A confirmation for this invocation is already outstanding.
    #[error("already awaiting confirmation for invocation {0}")]
    AlreadyAwaitingConfirmation(InvocationId),

    /// The question could not be delivered, or the answer could not be read.
    #[error("elicitation transport failed: {0}")]
    Transport(String),
}

/// Something that can put a question to the user.
#[async_trait]
pub trait Elicitor: Send + Sync {
    async fn elicit(
        &self,
        question: &str,
        schema: &ElicitationSchema,
    ) -> Result<ElicitationResponse, ElicitationError>;
}

/// Elicitor for callers that cannot ask anyone. Always declines.
#[derive(Debug, Clone, Default)]
pub struct DeclineElicitor;

#[async_trait]
impl Elicitor for DeclineElicitor {
    async fn elicit(
        &self,
        question: &str,
        _schema: &ElicitationSchema,
    ) -> Result<ElicitationResponse, ElicitationError> {
        debug!(question = %question, "no elicitation channel, declining");
        Ok(ElicitationResponse::decline())
    }
}

/// Elicitor that answers every question with the same response.
#[derive(Debug, Clone)]
pub struct FixedElicitor {
    response: ElicitationResponse,
}

impl FixedElicitor {
    pub fn new(response: ElicitationResponse) -> Self {
        Self { response }
    }
}

#[async_trait]
impl Elicitor for FixedElicitor {
    async fn elicit(
        &self,
        _question: &str,
        _schema: &ElicitationSchema,
    ) -> Result<ElicitationResponse, ElicitationError> {
        Ok(self.response.clone())
    }
}

/// A question waiting for an answer on the far side of a [`ChannelElicitor`].
#[derive(Debug)]
pub struct ElicitationTicket {
    pub question: String,
    pub schema: ElicitationSchema,
    responder: oneshot::Sender<ElicitationResponse>,
}

impl ElicitationTicket {
    /// Answer the question. Returns false if the asker stopped waiting.
    pub fn respond(self, response: ElicitationResponse) -> bool {
        self.responder.send(response).is_ok()
    }
}

/// Elicitor that hands questions out as [`ElicitationTicket`]s over a channel.
///
/// Dropping a ticket without answering counts as a decline.
#[derive(Debug, Clone)]
pub struct ChannelElicitor {
    tx: mpsc::UnboundedSender<ElicitationTicket>,
}

impl ChannelElicitor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ElicitationTicket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Elicitor for ChannelElicitor {
    async fn elicit(
        &self,
        question: &str,
        schema: &ElicitationSchema,
    ) -> Result<ElicitationResponse, ElicitationError> {
        let (responder, response_rx) = oneshot::channel();
        let ticket = ElicitationTicket {
            question: question.to_string(),
            schema: schema.clone(),
            responder,
        };
        self.tx
            .send(ticket)
            .map_err(|_| ElicitationError::Transport("elicitation channel closed".into()))?;

        match response_rx.await {
            Ok(response) => Ok(response),
            Err(_) => {
                warn!(question = %question, "elicitation ticket dropped, declining");
                Ok(ElicitationResponse::decline())
            }
        }
    }
}

// ============================================================================
// Confirmation Flow
// ============================================================================

/// What a destructive tool wants to ask.
#[derive(Clone, Debug)]
pub struct ConfirmationRequest {
    /// Short description of the proposed action, for logs and inspection.
    pub action: String,
    pub question: String,
    pub schema: ElicitationSchema,
}

/// How a confirmation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfirmationOutcome {
    /// Accepted with a truthy `confirm`; carries the submitted form.
    Accepted(Map<String, Value>),
    /// Declined, dismissed, or accepted without a truthy `confirm`.
    Declined,
    /// Deadline passed before an answer arrived.
    TimedOut,
    /// The invocation was cancelled while waiting.
    Cancelled,
}

impl ConfirmationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConfirmationOutcome::Accepted(_))
    }
}

impl fmt::Display for ConfirmationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationOutcome::Accepted(_) => f.write_str("accepted"),
            ConfirmationOutcome::Declined => f.write_str("declined"),
            ConfirmationOutcome::TimedOut => f.write_str("timed out"),
            ConfirmationOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Read-only view of an outstanding confirmation.
#[derive(Clone, Debug)]
pub struct PendingInfo {
    pub id: InvocationId,
    pub action: String,
    pub question: String,
    pub schema: ElicitationSchema,
    pub deadline: Instant,
}

#[derive(Debug)]
struct PendingConfirmation {
    action: String,
    question: String,
    schema: ElicitationSchema,
    deadline: Instant,
    cancel: CancellationToken,
}

/// Tracks outstanding confirmations, keyed by invocation.
#[derive(Debug, Default)]
pub struct ConfirmationFlow {
    pending: DashMap<InvocationId, PendingConfirmation>,
}

/// Removes the pending slot when dropped.
struct SlotGuard<'a> {
    pending: &'a DashMap<InvocationId, PendingConfirmation>,
    id: InvocationId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Whether a form value counts as "yes".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

/// Map a raw answer onto an outcome. Accept needs a truthy `confirm`.
fn interpret(response: ElicitationResponse) -> ConfirmationOutcome {
    match response.action {
        ElicitationAction::Accept => match response.content {
            Some(Value::Object(form)) if form.get("confirm").is_some_and(is_truthy) => {
                ConfirmationOutcome::Accepted(form)
            }
            _ => ConfirmationOutcome::Declined,
        },
        ElicitationAction::Decline | ElicitationAction::Cancel => ConfirmationOutcome::Declined,
    }
}

impl ConfirmationFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for confirmation and wait for an answer, the deadline, or
    /// cancellation, whichever comes first.
    pub async fn request(
        &self,
        id: InvocationId,
        request: ConfirmationRequest,
        deadline: Instant,
        elicitor: &dyn Elicitor,
        cancel: &CancellationToken,
    ) -> Result<ConfirmationOutcome, ElicitationError> {
        let slot_cancel = cancel.child_token();
        match self.pending.entry(id) {
            Entry::Occupied(_) => return Err(ElicitationError::AlreadyAwaitingConfirmation(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingConfirmation {
                    action: request.action.clone(),
                    question: request.question.clone(),
                    schema: request.schema.clone(),
                    deadline,
                    cancel: slot_cancel.clone(),
                });
            }
        }
        let _guard = SlotGuard {
            pending: &self.pending,
            id,
        };

        info!(invocation = %id, action = %request.action, "awaiting confirmation");

        let outcome = tokio::select! {
            biased;
            response = elicitor.elicit(&request.question, &request.schema) => interpret(response?),
            _ = tokio::time::sleep_until(deadline) => {
                warn!(invocation = %id, "confirmation timed out");
                ConfirmationOutcome::TimedOut
            }
            _ = slot_cancel.cancelled() => ConfirmationOutcome::Cancelled,
        };

        debug!(invocation = %id, outcome = %outcome, "confirmation resolved");
        Ok(outcome)
    }

    /// Cancel the outstanding confirmation for `id`, if any.
    pub fn cancel(&self, id: InvocationId) -> bool {
        match self.pending.get(&id) {
            Some(pending) => {
                pending.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: InvocationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of every outstanding confirmation.
    pub fn pending(&self) -> Vec<PendingInfo> {
        self.pending
            .iter()
            .map(|entry| PendingInfo {
                id: *entry.key(),
                action: entry.action.clone(),
                question: entry.question.clone(),
                schema: entry.schema.clone(),
                deadline: entry.deadline,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn confirm_request() -> ConfirmationRequest {
        ConfirmationRequest {
            action: "delete /etc/config".into(),
            question: "Delete /etc/config?".into(),
            schema: ElicitationSchema::new()
                .boolean("confirm", "Confirm deletion", None, true)
                .boolean("createBackup", "Back up first", Some(false), false),
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_action_strings() {
        assert_eq!(ElicitationAction::Accept.to_string(), "accept");
        assert_eq!("decline".parse::<ElicitationAction>().unwrap(), ElicitationAction::Decline);
        assert_eq!(ElicitationAction::default(), ElicitationAction::Decline);
    }

    #[test]
    fn test_schema_json() {
        let schema = confirm_request().schema.to_json();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["confirm"]["type"], "boolean");
        assert_eq!(schema["properties"]["createBackup"]["default"], false);
        assert_eq!(schema["required"], json!(["confirm"]));
    }

    #[test]
    fn test_accept_requires_truthy_confirm() {
        let accepted = interpret(ElicitationResponse::accept(json!({"confirm": true})));
        assert!(accepted.is_accepted());
        assert_eq!(
            interpret(ElicitationResponse::accept(json!({"confirm": false}))),
            ConfirmationOutcome::Declined
        );
        assert_eq!(
            interpret(ElicitationResponse::accept(json!({"createBackup": true}))),
            ConfirmationOutcome::Declined
        );
        assert_eq!(
            interpret(ElicitationResponse {
                action: ElicitationAction::Accept,
                content: None,
            }),
            ConfirmationOutcome::Declined
        );
        assert!(interpret(ElicitationResponse::accept(json!({"confirm": "true"}))).is_accepted());
    }

    #[tokio::test]
    async fn test_fixed_accept() {
        let flow = ConfirmationFlow::new();
        let elicitor = FixedElicitor::new(ElicitationResponse::accept(json!({"confirm": true})));
        let outcome = flow
            .request(
                InvocationId::new(),
                confirm_request(),
                far_deadline(),
                &elicitor,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(flow.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_slot() {
        let flow = ConfirmationFlow::new();
        let (elicitor, _tickets) = ChannelElicitor::new();
        let id = InvocationId::new();
        let outcome = flow
            .request(
                id,
                confirm_request(),
                Instant::now() + Duration::from_secs(5),
                &elicitor,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmationOutcome::TimedOut);
        assert!(!flow.is_pending(id));
    }

    #[tokio::test]
    async fn test_second_request_for_same_id_is_rejected() {
        let flow = Arc::new(ConfirmationFlow::new());
        let (elicitor, mut tickets) = ChannelElicitor::new();
        let id = InvocationId::new();

        let first = {
            let flow = flow.clone();
            let elicitor = elicitor.clone();
            tokio::spawn(async move {
                flow.request(id, confirm_request(), far_deadline(), &elicitor, &CancellationToken::new())
                    .await
            })
        };

        let ticket = tickets.recv().await.unwrap();
        assert!(flow.is_pending(id));
        assert_eq!(flow.pending()[0].question, "Delete /etc/config?");

        let second = flow
            .request(id, confirm_request(), far_deadline(), &elicitor, &CancellationToken::new())
            .await;
        assert!(matches!(
            second,
            Err(ElicitationError::AlreadyAwaitingConfirmation(other)) if other == id
        ));

        ticket.respond(ElicitationResponse::decline());
        assert_eq!(first.await.unwrap().unwrap(), ConfirmationOutcome::Declined);
        assert!(!flow.is_pending(id));
    }

    #[tokio::test]
    async fn test_cancel_by_id() {
        let flow = Arc::new(ConfirmationFlow::new());
        let (elicitor, mut tickets) = ChannelElicitor::new();
        let id = InvocationId::new();

        let waiting = {
            let flow = flow.clone();
            tokio::spawn(async move {
                flow.request(id, confirm_request(), far_deadline(), &elicitor, &CancellationToken::new())
                    .await
            })
        };

        let _ticket = tickets.recv().await.unwrap();
        assert!(flow.cancel(id));
        assert_eq!(waiting.await.unwrap().unwrap(), ConfirmationOutcome::Cancelled);
        assert_eq!(flow.pending_count(), 0);
        assert!(!flow.cancel(id));
    }

    #[tokio::test]
    async fn test_dropped_future_releases_slot() {
        let flow = Arc::new(ConfirmationFlow::new());
        let (elicitor, mut tickets) = ChannelElicitor::new();
        let id = InvocationId::new();

        let waiting = {
            let flow = flow.clone();
            tokio::spawn(async move {
                flow.request(id, confirm_request(), far_deadline(), &elicitor, &CancellationToken::new())
                    .await
            })
        };
        let _ticket = tickets.recv().await.unwrap();
        waiting.abort();
        let _ = waiting.await;
        assert!(!flow.is_pending(id));
    }

    #[tokio::test]
    async fn test_dropped_ticket_declines() {
        let flow = ConfirmationFlow::new();
        let (elicitor, mut tickets) = ChannelElicitor::new();
        let answer = tokio::spawn(async move {
            drop(tickets.recv().await);
        });
        let outcome = flow
            .request(
                InvocationId::new(),
                confirm_request(),
                far_deadline(),
                &elicitor,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        answer.await.unwrap();
        assert_eq!(outcome, ConfirmationOutcome::Declined);
    }

    #[tokio::test]
    async fn test_closed_channel_is_transport_error() {
        let flow = ConfirmationFlow::new();
        let (elicitor, tickets) = ChannelElicitor::new();
        drop(tickets);
        let result = flow
            .request(
                InvocationId::new(),
                confirm_request(),
                far_deadline(),
                &elicitor,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ElicitationError::Transport(_))));
        assert_eq!(flow.pending_count(), 0);
    }
}
