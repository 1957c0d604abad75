use async_trait::async_trait;
use recall_sampling::{SampleRequest, Sampler, SamplingError};
use rmcp::model::{Content, CreateMessageRequestParam, Role, SamplingMessage};
use rmcp::service::{Peer, RoleServer, ServiceError};
use std::sync::{PoisonError, RwLock};

/// Error code clients use when the user declines a sampling request.
const USER_REJECTED_CODE: i32 = -1;

/// Samples through the connected MCP client (`sampling/createMessage`).
///
/// The peer is only known once the client has initialized; until then every request fails
/// with a transport error.
#[derive(Default)]
pub struct PeerSampler {
    peer: RwLock<Option<Peer<RoleServer>>>,
}

impl PeerSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, peer: Peer<RoleServer>) {
        *self.peer.write().unwrap_or_else(PoisonError::into_inner) = Some(peer);
    }

    fn peer(&self) -> Option<Peer<RoleServer>> {
        self.peer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sampler for PeerSampler {
    async fn sample(&self, request: SampleRequest) -> recall_sampling::Result<String> {
        let peer = self
            .peer()
            .ok_or_else(|| SamplingError::Transport("MCP client is not connected".to_string()))?;

        let result = peer
            .create_message(CreateMessageRequestParam {
                messages: vec![SamplingMessage {
                    role: Role::User,
                    content: Content::text(request.prompt),
                }],
                model_preferences: None,
                system_prompt: None,
                include_context: None,
                temperature: None,
                max_tokens: request.max_tokens,
                stop_sequences: None,
                metadata: None,
            })
            .await
            .map_err(map_service_error)?;

        result
            .message
            .content
            .as_text()
            .map(|text| text.text.clone())
            .ok_or(SamplingError::NonTextResponse)
    }
}

fn map_service_error(err: ServiceError) -> SamplingError {
    match err {
        ServiceError::McpError(data)
            if data.code.0 == USER_REJECTED_CODE || data.message.contains("rejected") =>
        {
            SamplingError::PermissionDenied(data.message.to_string())
        }
        other => SamplingError::Transport(other.to_string()),
    }
}
