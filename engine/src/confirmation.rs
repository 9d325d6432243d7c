//! Collaborators that resolve approval prompts and external edits.

use std::future::Future;
use std::pin::Pin;

use anvil_tools::ToolError;
use anvil_types::{ConfirmationDetails, ConfirmationOutcome};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

pub type ConfirmFut<'a> = Pin<Box<dyn Future<Output = ConfirmationOutcome> + Send + 'a>>;
pub type EditFut<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// Everything a confirming party sees for one pending call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub details: ConfirmationDetails,
}

/// Resolves approval prompts.
///
/// Several calls may await confirmation at once; implementations that need
/// one prompt at a time must serialize on their own.
pub trait ConfirmationHandler: Send + Sync {
    fn confirm(&self, request: ConfirmationRequest) -> ConfirmFut<'_>;
}

/// Answers every prompt with the same outcome.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmation(pub ConfirmationOutcome);

impl ConfirmationHandler for StaticConfirmation {
    fn confirm(&self, _request: ConfirmationRequest) -> ConfirmFut<'_> {
        let outcome = self.0;
        Box::pin(async move { outcome })
    }
}

/// A prompt waiting for an answer from whoever drains the channel.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub request: ConfirmationRequest,
    responder: oneshot::Sender<ConfirmationOutcome>,
}

impl PendingConfirmation {
    /// Deliver the decision. A dropped `PendingConfirmation` counts as `Cancel`.
    pub fn respond(self, outcome: ConfirmationOutcome) {
        if self.responder.send(outcome).is_err() {
            tracing::debug!(call_id = %self.request.call_id, "confirmation no longer awaited");
        }
    }
}

/// Forwards prompts over a channel so a UI task can answer them.
#[derive(Debug, Clone)]
pub struct ChannelConfirmationHandler {
    tx: mpsc::Sender<PendingConfirmation>,
}

impl ChannelConfirmationHandler {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingConfirmation>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ConfirmationHandler for ChannelConfirmationHandler {
    fn confirm(&self, request: ConfirmationRequest) -> ConfirmFut<'_> {
        Box::pin(async move {
            let (responder, response) = oneshot::channel();
            let call_id = request.call_id.clone();
            if self
                .tx
                .send(PendingConfirmation { request, responder })
                .await
                .is_err()
            {
                tracing::warn!(%call_id, "confirmation channel closed; cancelling call");
                return ConfirmationOutcome::Cancel;
            }
            response.await.unwrap_or(ConfirmationOutcome::Cancel)
        })
    }
}

/// Lets a user revise a call's arguments outside the agent (e.g. in `$EDITOR`).
pub trait ExternalEditor: Send + Sync {
    /// Return the revised arguments for `request`.
    fn edit<'a>(
        &'a self,
        request: &'a ConfirmationRequest,
        details: &'a ConfirmationDetails,
    ) -> EditFut<'a>;
}
