//! Kernel collaborators backed by the connected MCP client.
//!
//! Confirmation questions go out as `elicitation/create`; text generation
//! goes out as `sampling/createMessage`. Both check the capabilities the
//! client declared at initialize before sending anything.

use async_trait::async_trait;
use rmcp::{
    Peer, RoleServer,
    model::{CreateElicitationRequestParams, CreateMessageRequestParams},
};
use serde_json::{Value, json};
use tracing::debug;

use strata_kernel::{
    ElicitationError, ElicitationResponse, ElicitationSchema, Elicitor, GenerationError,
    GenerationRequest, GenerationResponse, TextGenerator,
};

use crate::helpers::{client_supports, elicitation_response, sampled_text};

fn client_info(peer: &Peer<RoleServer>) -> Option<Value> {
    peer.peer_info().and_then(|info| serde_json::to_value(&*info).ok())
}

/// Asks the client's user through form elicitation.
#[derive(Clone)]
pub struct PeerElicitor {
    peer: Peer<RoleServer>,
}

impl PeerElicitor {
    pub fn new(peer: Peer<RoleServer>) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl Elicitor for PeerElicitor {
    async fn elicit(
        &self,
        question: &str,
        schema: &ElicitationSchema,
    ) -> Result<ElicitationResponse, ElicitationError> {
        if !client_supports(client_info(&self.peer), "elicitation") {
            return Err(ElicitationError::Transport(
                "client does not support elicitation".into(),
            ));
        }

        let params: CreateElicitationRequestParams = serde_json::from_value(json!({
            "mode": "form",
            "message": question,
            "requestedSchema": schema.to_json(),
        }))
        .map_err(|e| ElicitationError::Transport(format!("building elicitation: {e}")))?;

        debug!(question = %question, "sending elicitation");
        let result = self
            .peer
            .create_elicitation(params)
            .await
            .map_err(|e| ElicitationError::Transport(e.to_string()))?;

        let value = serde_json::to_value(&result)
            .map_err(|e| ElicitationError::Transport(format!("reading elicitation result: {e}")))?;
        Ok(elicitation_response(value))
    }
}

/// Generates text with the client's model through sampling.
#[derive(Clone)]
pub struct SamplingGenerator {
    peer: Peer<RoleServer>,
}

impl SamplingGenerator {
    pub fn new(peer: Peer<RoleServer>) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl TextGenerator for SamplingGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        if !client_supports(client_info(&self.peer), "sampling") {
            return Err(GenerationError::Unavailable(
                "client does not support sampling".into(),
            ));
        }

        let params: CreateMessageRequestParams = serde_json::from_value(json!({
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": request.prompt},
            }],
            "maxTokens": request.max_output_tokens,
            "temperature": request.temperature,
            "includeContext": "none",
        }))
        .map_err(|e| GenerationError::Failed(format!("building sampling request: {e}")))?;

        debug!(max_tokens = request.max_output_tokens, "sampling from client");
        let result = self
            .peer
            .create_message(params)
            .await
            .map_err(|e| GenerationError::Failed(e.to_string()))?;

        let value = serde_json::to_value(&result)
            .map_err(|e| GenerationError::Failed(format!("reading sampling result: {e}")))?;
        let text = sampled_text(&value)
            .ok_or_else(|| GenerationError::Failed("sampling result had no text content".into()))?;
        Ok(GenerationResponse { text })
    }
}
