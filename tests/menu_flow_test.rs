use anyhow::Result;
use async_trait::async_trait;
use callflow::call::plan::{MenuAction, MenuChoice, MenuNode, MenuPlan};
use callflow::call::{
    CallConnection, CallControl, CallFlow, HangupReason, PromptSource, RecognizeOptions,
};
use callflow::dispatcher::EventDispatcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Platform stand-in that only records issued operations; the test plays the
/// platform's part by feeding raw webhook payloads into the dispatcher.
struct RecordingClient {
    dispatcher: Arc<EventDispatcher>,
    recognize_contexts: Mutex<Vec<String>>,
    played: Mutex<Vec<PromptSource>>,
}

impl RecordingClient {
    fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            dispatcher,
            recognize_contexts: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
        }
    }

    fn last_recognize_context(&self) -> Option<String> {
        self.recognize_contexts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CallControl for RecordingClient {
    async fn answer_call(&self, _context: &str, _callback_url: &str) -> Result<CallConnection> {
        unimplemented!("not used by this test")
    }

    async fn create_call(
        &self,
        _target: &str,
        _caller_id: Option<&str>,
        _callback_url: &str,
    ) -> Result<CallConnection> {
        unimplemented!("not used by this test")
    }

    async fn play_prompt(
        &self,
        call: &CallConnection,
        prompt: &PromptSource,
        operation_context: &str,
    ) -> Result<()> {
        self.played.lock().unwrap().push(prompt.clone());
        let raw = format!(
            r#"[{{"type": "PlaySucceeded", "callConnectionId": "{}", "operationContext": "{}"}}]"#,
            call.call_connection_id, operation_context
        );
        self.dispatcher.publish(&raw);
        Ok(())
    }

    async fn play_and_recognize(
        &self,
        _call: &CallConnection,
        options: RecognizeOptions,
    ) -> Result<()> {
        self.recognize_contexts
            .lock()
            .unwrap()
            .push(options.operation_context);
        Ok(())
    }

    async fn add_participant(
        &self,
        _call: &CallConnection,
        _participant: &str,
        _operation_context: &str,
    ) -> Result<()> {
        unimplemented!("not used by this test")
    }

    async fn transfer_call(
        &self,
        _call: &CallConnection,
        _target: &str,
        _operation_context: &str,
    ) -> Result<()> {
        unimplemented!("not used by this test")
    }

    async fn hang_up(&self, call: &CallConnection) -> Result<()> {
        let raw = format!(
            r#"[{{"type": "Disconnected", "callConnectionId": "{}"}}]"#,
            call.call_connection_id
        );
        self.dispatcher.publish(&raw);
        Ok(())
    }

    async fn start_recording(&self, _server_call_id: &str) -> Result<String> {
        Ok("rec-1".to_string())
    }

    async fn pause_recording(&self, _recording_id: &str) -> Result<()> {
        Ok(())
    }

    async fn resume_recording(&self, _recording_id: &str) -> Result<()> {
        Ok(())
    }

    async fn stop_recording(&self, _recording_id: &str) -> Result<()> {
        Ok(())
    }
}

fn tts(text: &str) -> PromptSource {
    PromptSource::Tts {
        text: text.to_string(),
        voice: None,
    }
}

fn sample_plan() -> MenuPlan {
    let mut nodes = HashMap::new();
    nodes.insert(
        "main".to_string(),
        MenuNode {
            prompt: tts("main menu"),
            choices: vec![MenuChoice {
                tone: "1".to_string(),
                goto: None,
                action: Some(MenuAction::Playback {
                    prompt: tts("sales"),
                }),
            }],
        },
    );
    MenuPlan {
        entry_node: "main".to_string(),
        nodes,
        max_retries: 3,
        retry_prompt: tts("try again"),
        goodbye_prompt: tts("goodbye"),
        connect_timeout_ms: 2_000,
        recognize_timeout_ms: 2_000,
        event_timeout_ms: 1_000,
        silence_timeout_ms: 500,
    }
}

async fn wait_for<T>(mut condition: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(value) = condition() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn webhook_driven_menu_session() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let client = Arc::new(RecordingClient::new(dispatcher.clone()));
    let call = CallConnection {
        call_connection_id: "call-77".to_string(),
        server_call_id: Some("server-77".to_string()),
    };
    let flow = Arc::new(
        CallFlow::new(
            call,
            "+15550123".to_string(),
            sample_plan(),
            dispatcher.clone(),
            client.clone(),
            false,
        )
        .unwrap(),
    );

    let handle = tokio::spawn({
        let flow = flow.clone();
        async move { flow.run().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // noise on the endpoint must never disturb the session
    dispatcher.publish("not json at all");
    dispatcher.publish(r#"[{"type": "FutureEvent", "callConnectionId": "call-77"}]"#);

    dispatcher.publish(r#"[{"type": "Connected", "callConnectionId": "call-77"}]"#);

    let context = wait_for(|| client.last_recognize_context()).await;
    // two tones collected, only the first one may be used for branching
    let raw = format!(
        r#"[{{"type": "RecognizeSucceeded", "callConnectionId": "call-77",
             "operationContext": "{}", "tones": ["1", "5"]}}]"#,
        context
    );
    dispatcher.publish(&raw);

    let reason = handle.await.unwrap();
    assert_eq!(reason, HangupReason::BySystem);
    assert_eq!(client.played.lock().unwrap().clone(), vec![tts("sales")]);
    assert_eq!(client.recognize_contexts.lock().unwrap().len(), 1);
    assert_eq!(flow.state_snapshot().collected, vec!["1"]);
}
