use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod flow;
pub mod plan;
pub use flow::CallFlow;
pub use flow::CallFlowRef;
pub use flow::FlowPhase;
pub use flow::FlowState;
pub use plan::MenuPlan;

/// Identifiers of one established call leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallConnection {
    pub call_connection_id: crate::CallConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PromptSource {
    Url {
        url: String,
    },
    Tts {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeOptions {
    pub target: String,
    pub prompt: PromptSource,
    pub max_tones: usize,
    #[serde(default)]
    pub stop_tones: Vec<String>,
    /// Platform-side silence window before it reports a failed recognize.
    pub initial_silence_timeout_ms: u64,
    pub inter_tone_timeout_ms: u64,
    #[serde(default)]
    pub interrupt_prompt: bool,
    pub operation_context: crate::OperationContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HangupReason {
    ByCaller,
    BySystem,
    NoAnswer,
    MaxRetries,
    Failed(String),
}

/// The call-control side of the communications platform. Every operation
/// returns quickly; completion arrives later as a webhook event tagged with
/// the operation context passed in.
#[async_trait]
pub trait CallControl: Send + Sync {
    async fn answer_call(
        &self,
        incoming_call_context: &str,
        callback_url: &str,
    ) -> Result<CallConnection>;

    async fn create_call(
        &self,
        target: &str,
        caller_id: Option<&str>,
        callback_url: &str,
    ) -> Result<CallConnection>;

    async fn play_prompt(
        &self,
        call: &CallConnection,
        prompt: &PromptSource,
        operation_context: &str,
    ) -> Result<()>;

    async fn play_and_recognize(
        &self,
        call: &CallConnection,
        options: RecognizeOptions,
    ) -> Result<()>;

    async fn add_participant(
        &self,
        call: &CallConnection,
        participant: &str,
        operation_context: &str,
    ) -> Result<()>;

    async fn transfer_call(
        &self,
        call: &CallConnection,
        target: &str,
        operation_context: &str,
    ) -> Result<()>;

    async fn hang_up(&self, call: &CallConnection) -> Result<()>;

    /// Returns the platform recording id used by the pause/resume/stop calls.
    async fn start_recording(&self, server_call_id: &str) -> Result<String>;

    async fn pause_recording(&self, recording_id: &str) -> Result<()>;

    async fn resume_recording(&self, recording_id: &str) -> Result<()>;

    async fn stop_recording(&self, recording_id: &str) -> Result<()>;
}
