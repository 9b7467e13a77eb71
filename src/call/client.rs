use super::{CallConnection, CallControl, PromptSource, RecognizeOptions};
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Stand-in [`CallControl`] used by the shipped binary and the handler tests.
/// It logs every operation and fabricates identifiers; deployments replace it
/// with a binding to their platform SDK.
#[derive(Default)]
pub struct LoggingCallControl;

#[async_trait]
impl CallControl for LoggingCallControl {
    async fn answer_call(
        &self,
        incoming_call_context: &str,
        callback_url: &str,
    ) -> Result<CallConnection> {
        let call = CallConnection {
            call_connection_id: Uuid::new_v4().to_string(),
            server_call_id: Some(Uuid::new_v4().to_string()),
        };
        info!(
            call_connection_id = %call.call_connection_id,
            callback_url,
            context_len = incoming_call_context.len(),
            "answer call"
        );
        Ok(call)
    }

    async fn create_call(
        &self,
        target: &str,
        caller_id: Option<&str>,
        callback_url: &str,
    ) -> Result<CallConnection> {
        let call = CallConnection {
            call_connection_id: Uuid::new_v4().to_string(),
            server_call_id: Some(Uuid::new_v4().to_string()),
        };
        info!(
            call_connection_id = %call.call_connection_id,
            target,
            caller_id = caller_id.unwrap_or(""),
            callback_url,
            "create call"
        );
        Ok(call)
    }

    async fn play_prompt(
        &self,
        call: &CallConnection,
        prompt: &PromptSource,
        operation_context: &str,
    ) -> Result<()> {
        info!(
            call_connection_id = %call.call_connection_id,
            operation_context,
            "play prompt: {:?}", prompt
        );
        Ok(())
    }

    async fn play_and_recognize(
        &self,
        call: &CallConnection,
        options: RecognizeOptions,
    ) -> Result<()> {
        info!(
            call_connection_id = %call.call_connection_id,
            operation_context = %options.operation_context,
            max_tones = options.max_tones,
            "play and recognize"
        );
        Ok(())
    }

    async fn add_participant(
        &self,
        call: &CallConnection,
        participant: &str,
        operation_context: &str,
    ) -> Result<()> {
        info!(
            call_connection_id = %call.call_connection_id,
            participant,
            operation_context,
            "add participant"
        );
        Ok(())
    }

    async fn transfer_call(
        &self,
        call: &CallConnection,
        target: &str,
        operation_context: &str,
    ) -> Result<()> {
        info!(
            call_connection_id = %call.call_connection_id,
            transfer_target = target,
            operation_context,
            "transfer call"
        );
        Ok(())
    }

    async fn hang_up(&self, call: &CallConnection) -> Result<()> {
        info!(call_connection_id = %call.call_connection_id, "hang up");
        Ok(())
    }

    async fn start_recording(&self, server_call_id: &str) -> Result<String> {
        let recording_id = Uuid::new_v4().to_string();
        info!(server_call_id, recording_id = %recording_id, "start recording");
        Ok(recording_id)
    }

    async fn pause_recording(&self, recording_id: &str) -> Result<()> {
        info!(recording_id, "pause recording");
        Ok(())
    }

    async fn resume_recording(&self, recording_id: &str) -> Result<()> {
        info!(recording_id, "resume recording");
        Ok(())
    }

    async fn stop_recording(&self, recording_id: &str) -> Result<()> {
        info!(recording_id, "stop recording");
        Ok(())
    }
}
