use super::{
    plan::{MenuAction, MenuNode, MenuPlan, Transition},
    CallConnection, CallControl, HangupReason, PromptSource, RecognizeOptions,
};
use crate::dispatcher::{EventDispatcher, EventWaiter, WaitOutcome};
use crate::event::{EventDetail, EventKind};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type CallFlowRef = Arc<CallFlow>;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    AwaitingConnect,
    MenuPrompt,
    AwaitingInput,
    Branch,
    Terminated,
}

/// Per-call session state. Owned exclusively by the flow task; the lock only
/// lets the HTTP listing read a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FlowState {
    pub phase: FlowPhase,
    pub node: String,
    pub attempts: u32,
    pub collected: Vec<String>,
    pub target: String,
}

/// Drives one call's interactive menu to completion, using the
/// [`EventDispatcher`] as its only way of awaiting asynchronous results.
pub struct CallFlow {
    pub call: CallConnection,
    pub started_at: DateTime<Utc>,
    pub cancel_token: CancellationToken,
    state: RwLock<FlowState>,
    plan: MenuPlan,
    dispatcher: Arc<EventDispatcher>,
    client: Arc<dyn CallControl>,
    record_call: bool,
    recording_id: Mutex<Option<String>>,
}

enum CycleOutcome {
    Input(String),
    NoInput,
    Cancelled,
}

impl CallFlow {
    pub fn new(
        call: CallConnection,
        target: String,
        plan: MenuPlan,
        dispatcher: Arc<EventDispatcher>,
        client: Arc<dyn CallControl>,
        record_call: bool,
    ) -> Result<Self> {
        plan.validate()?;
        let state = FlowState {
            phase: FlowPhase::AwaitingConnect,
            node: plan.entry_node.clone(),
            attempts: 0,
            collected: Vec::new(),
            target,
        };
        Ok(Self {
            call,
            started_at: Utc::now(),
            cancel_token: CancellationToken::new(),
            state: RwLock::new(state),
            plan,
            dispatcher,
            client,
            record_call,
            recording_id: Mutex::new(None),
        })
    }

    pub fn state_snapshot(&self) -> FlowState {
        self.state.read().unwrap().clone()
    }

    pub fn target(&self) -> String {
        self.state.read().unwrap().target.clone()
    }

    pub fn recording_id(&self) -> Option<String> {
        self.recording_id.lock().unwrap().clone()
    }

    fn update_state(&self, f: impl FnOnce(&mut FlowState)) {
        f(&mut self.state.write().unwrap());
    }

    /// Runs the menu session to completion and reports why it ended.
    /// Never leaves subscriptions behind.
    pub async fn run(&self) -> HangupReason {
        let call_id = self.call.call_connection_id.clone();

        // call teardown cancels the flow wherever it happens to be waiting
        let token = self.cancel_token.clone();
        let watching = self.dispatcher.subscribe(
            EventKind::Disconnected,
            call_id.as_str(),
            Box::new(move |_| token.cancel()),
        );
        if !watching {
            warn!(
                call_connection_id = %call_id,
                "another flow already watches this call, refusing to start"
            );
            self.update_state(|s| s.phase = FlowPhase::Terminated);
            return HangupReason::Failed("duplicate call flow".to_string());
        }

        let reason = match self.drive().await {
            Ok(reason) => reason,
            Err(err) => {
                // synchronous operation errors mean the connection is not
                // usable, so no hangup attempt is made
                error!(call_connection_id = %call_id, "call flow failed: {:#}", err);
                HangupReason::Failed(err.to_string())
            }
        };

        self.dispatcher.unsubscribe(EventKind::Disconnected, &call_id);
        self.update_state(|s| s.phase = FlowPhase::Terminated);
        info!(call_connection_id = %call_id, reason = ?reason, "call flow terminated");
        reason
    }

    async fn drive(&self) -> Result<HangupReason> {
        if !self.await_connected().await {
            if self.cancel_token.is_cancelled() {
                return Ok(HangupReason::ByCaller);
            }
            return Ok(HangupReason::NoAnswer);
        }
        info!(call_connection_id = %self.call.call_connection_id, "call connected");

        if self.record_call {
            self.start_recording().await;
        }
        let reason = self.menu_loop().await;
        self.stop_recording().await;
        reason
    }

    async fn await_connected(&self) -> bool {
        let waiter = match self
            .dispatcher
            .clone()
            .wait_first_of(&[EventKind::Connected], &self.call.call_connection_id)
        {
            Ok(waiter) => waiter,
            Err(err) => {
                warn!("connect wait rejected: {:#}", err);
                return false;
            }
        };
        let timeout = Duration::from_millis(self.plan.connect_timeout_ms);
        select! {
            _ = self.cancel_token.cancelled() => false,
            outcome = waiter.wait(timeout) => match outcome {
                WaitOutcome::Event(_) => true,
                WaitOutcome::Timeout => {
                    warn!(
                        call_connection_id = %self.call.call_connection_id,
                        "no connect event within {}ms", self.plan.connect_timeout_ms
                    );
                    false
                }
            },
        }
    }

    async fn menu_loop(&self) -> Result<HangupReason> {
        let mut node_id = self.plan.entry_node.clone();
        let mut attempts: u32 = 0;
        loop {
            if self.cancel_token.is_cancelled() {
                return Ok(HangupReason::ByCaller);
            }
            let node = self.plan.node(&node_id)?;
            self.update_state(|s| {
                s.phase = FlowPhase::MenuPrompt;
                s.node = node_id.clone();
                s.attempts = attempts;
            });

            match self.run_cycle(node).await? {
                CycleOutcome::Input(tone) => {
                    self.update_state(|s| s.collected.push(tone.clone()));
                    match node.choice(&tone) {
                        Some(choice) => match choice.resolve()? {
                            Transition::Node(next) => {
                                debug!(tone, next, "menu branch taken");
                                node_id = next;
                                attempts = 0;
                            }
                            Transition::Action(action) => {
                                self.update_state(|s| s.phase = FlowPhase::Branch);
                                return self.execute_action(&action).await;
                            }
                        },
                        None => {
                            debug!(tone, node = node_id, "input matched no choice");
                            attempts += 1;
                            if attempts >= self.plan.max_retries {
                                return self.finish_with_goodbye(HangupReason::MaxRetries).await;
                            }
                            self.play_ack(&self.plan.retry_prompt).await;
                        }
                    }
                }
                CycleOutcome::NoInput => {
                    attempts += 1;
                    if attempts >= self.plan.max_retries {
                        return self.finish_with_goodbye(HangupReason::MaxRetries).await;
                    }
                    self.play_ack(&self.plan.retry_prompt).await;
                }
                CycleOutcome::Cancelled => return Ok(HangupReason::ByCaller),
            }
        }
    }

    /// One prompt-and-collect cycle with a fresh operation context, so a
    /// stale result from an earlier cycle can never satisfy this one.
    async fn run_cycle(&self, node: &MenuNode) -> Result<CycleOutcome> {
        let operation_context = Uuid::new_v4().to_string();
        let waiter = self.dispatcher.clone().wait_first_of(
            &[EventKind::RecognizeSucceeded, EventKind::RecognizeFailed],
            &operation_context,
        )?;
        let options = RecognizeOptions {
            target: self.target(),
            prompt: node.prompt.clone(),
            max_tones: 1,
            stop_tones: vec!["#".to_string()],
            initial_silence_timeout_ms: self.plan.silence_timeout_ms,
            inter_tone_timeout_ms: self.plan.silence_timeout_ms,
            interrupt_prompt: true,
            operation_context: operation_context.clone(),
        };
        self.client.play_and_recognize(&self.call, options).await?;
        self.update_state(|s| s.phase = FlowPhase::AwaitingInput);

        let timeout = Duration::from_millis(self.plan.recognize_timeout_ms);
        let outcome = select! {
            _ = self.cancel_token.cancelled() => return Ok(CycleOutcome::Cancelled),
            outcome = waiter.wait(timeout) => outcome,
        };
        match outcome {
            WaitOutcome::Event(event) => match event.detail {
                EventDetail::RecognizeSucceeded { tones } => {
                    // only the first recognized tone counts, trailing input
                    // is discarded
                    match tones.into_iter().next() {
                        Some(tone) => Ok(CycleOutcome::Input(tone)),
                        None => Ok(CycleOutcome::NoInput),
                    }
                }
                EventDetail::RecognizeFailed {
                    result_code,
                    message,
                } => {
                    debug!(
                        operation_context,
                        ?result_code,
                        "recognize failed: {}",
                        message.unwrap_or_default()
                    );
                    Ok(CycleOutcome::NoInput)
                }
                other => {
                    warn!(operation_context, kind = ?other.kind(), "unexpected recognize result");
                    Ok(CycleOutcome::NoInput)
                }
            },
            WaitOutcome::Timeout => {
                debug!(
                    operation_context,
                    "no recognize result within {}ms", self.plan.recognize_timeout_ms
                );
                Ok(CycleOutcome::NoInput)
            }
        }
    }

    async fn execute_action(&self, action: &MenuAction) -> Result<HangupReason> {
        match action {
            MenuAction::Hangup => {
                self.hang_up().await;
                Ok(HangupReason::BySystem)
            }
            MenuAction::Playback { prompt } => {
                self.play_ack(prompt).await;
                self.hang_up().await;
                Ok(HangupReason::BySystem)
            }
            MenuAction::Transfer { target } => {
                let operation_context = Uuid::new_v4().to_string();
                let waiter = self.dispatcher.clone().wait_first_of(
                    &[EventKind::TransferSucceeded, EventKind::TransferFailed],
                    &operation_context,
                )?;
                self.client
                    .transfer_call(&self.call, target, &operation_context)
                    .await?;
                if !self
                    .await_operation(waiter, EventKind::TransferSucceeded)
                    .await
                {
                    warn!(transfer_target = %target, "transfer did not complete");
                }
                // a failed transfer still ends the call, never back into
                // the menu
                self.hang_up().await;
                Ok(HangupReason::BySystem)
            }
            MenuAction::AddParticipant { participant } => {
                let operation_context = Uuid::new_v4().to_string();
                let waiter = self.dispatcher.clone().wait_first_of(
                    &[
                        EventKind::AddParticipantSucceeded,
                        EventKind::AddParticipantFailed,
                    ],
                    &operation_context,
                )?;
                self.client
                    .add_participant(&self.call, participant, &operation_context)
                    .await?;
                if !self
                    .await_operation(waiter, EventKind::AddParticipantSucceeded)
                    .await
                {
                    warn!(participant = %participant, "add participant did not complete");
                }
                self.hang_up().await;
                Ok(HangupReason::BySystem)
            }
        }
    }

    async fn finish_with_goodbye(&self, reason: HangupReason) -> Result<HangupReason> {
        self.play_ack(&self.plan.goodbye_prompt).await;
        self.hang_up().await;
        Ok(reason)
    }

    /// Plays a prompt and waits for its result. Playback failures are logged
    /// and tolerated: the flow is already on its way out of the menu.
    async fn play_ack(&self, prompt: &PromptSource) {
        let operation_context = Uuid::new_v4().to_string();
        let waiter = match self.dispatcher.clone().wait_first_of(
            &[EventKind::PlaySucceeded, EventKind::PlayFailed],
            &operation_context,
        ) {
            Ok(waiter) => waiter,
            Err(err) => {
                warn!("play wait rejected: {:#}", err);
                return;
            }
        };
        if let Err(err) = self
            .client
            .play_prompt(&self.call, prompt, &operation_context)
            .await
        {
            warn!("play prompt failed: {:#}", err);
            return;
        }
        if !self.await_operation(waiter, EventKind::PlaySucceeded).await {
            debug!(operation_context, "prompt playback did not complete");
        }
    }

    async fn await_operation(&self, waiter: EventWaiter, success: EventKind) -> bool {
        let timeout = Duration::from_millis(self.plan.event_timeout_ms);
        let outcome = select! {
            _ = self.cancel_token.cancelled() => return false,
            outcome = waiter.wait(timeout) => outcome,
        };
        match outcome {
            WaitOutcome::Event(event) => event.kind() == success,
            WaitOutcome::Timeout => false,
        }
    }

    async fn hang_up(&self) {
        if self.cancel_token.is_cancelled() {
            // the platform already tore the call down
            return;
        }
        if let Err(err) = self.client.hang_up(&self.call).await {
            warn!(
                call_connection_id = %self.call.call_connection_id,
                "hangup failed: {:#}", err
            );
            return;
        }
        // the standing Disconnected subscription cancels the token; bounded
        // grace so the task never outlives a platform that forgot the event
        let grace = Duration::from_millis(self.plan.event_timeout_ms);
        let _ = tokio::time::timeout(grace, self.cancel_token.cancelled()).await;
    }

    async fn start_recording(&self) {
        let Some(server_call_id) = self.call.server_call_id.as_deref() else {
            warn!(
                call_connection_id = %self.call.call_connection_id,
                "recording enabled but the call has no server call id"
            );
            return;
        };
        match self.client.start_recording(server_call_id).await {
            Ok(id) => {
                info!(recording_id = %id, "recording started");
                *self.recording_id.lock().unwrap() = Some(id);
            }
            Err(err) => warn!("failed to start recording: {:#}", err),
        }
    }

    async fn stop_recording(&self) {
        let recording_id = self.recording_id.lock().unwrap().clone();
        if let Some(id) = recording_id {
            if let Err(err) = self.client.stop_recording(&id).await {
                warn!(recording_id = %id, "failed to stop recording: {:#}", err);
            }
        }
    }
}
