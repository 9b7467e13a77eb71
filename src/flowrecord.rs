use crate::call::HangupReason;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::{fs::File, io::AsyncWriteExt, select};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub type FlowRecordSender = tokio::sync::mpsc::UnboundedSender<FlowRecord>;
pub type FlowRecordReceiver = tokio::sync::mpsc::UnboundedReceiver<FlowRecord>;

/// Summary of one completed call flow, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub call_id: String,
    pub target: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub hangup_reason: HangupReason,
    pub selections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_id: Option<String>,
}

pub struct FlowRecordManager {
    pub sender: FlowRecordSender,
    receiver: FlowRecordReceiver,
    root: String,
    cancel_token: CancellationToken,
}

pub struct FlowRecordManagerBuilder {
    root: Option<String>,
    cancel_token: Option<CancellationToken>,
}

impl FlowRecordManagerBuilder {
    pub fn new() -> Self {
        Self {
            root: None,
            cancel_token: None,
        }
    }

    pub fn with_root(mut self, root: String) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    pub fn build(self) -> FlowRecordManager {
        let root = self.root.unwrap_or_else(|| "/tmp/flowrecords".to_string());
        let cancel_token = self.cancel_token.unwrap_or_default();
        if !Path::new(&root).exists() {
            match std::fs::create_dir_all(&root) {
                Ok(_) => {
                    info!("FlowRecordManager created directory: {}", root);
                }
                Err(e) => {
                    error!("FlowRecordManager failed to create directory: {}", e);
                }
            }
        }
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        FlowRecordManager {
            sender,
            receiver,
            root,
            cancel_token,
        }
    }
}

impl FlowRecordManager {
    pub async fn serve(&mut self) {
        loop {
            select! {
                _ = self.cancel_token.cancelled() => break,
                record = self.receiver.recv() => match record {
                    Some(record) => {
                        if let Err(e) = Self::save(&self.root, &record).await {
                            error!(call_id = %record.call_id, "failed to save flow record: {:#}", e);
                        }
                    }
                    None => break,
                },
            }
        }
    }

    async fn save(root: &str, record: &FlowRecord) -> Result<()> {
        let path = Path::new(root).join(format!("{}.json", record.call_id));
        let mut file = File::create(&path).await?;
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())
            .await?;
        info!(call_id = %record.call_id, "flow record saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_record(call_id: &str) -> FlowRecord {
        FlowRecord {
            call_id: call_id.to_string(),
            target: "+15550199".to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            hangup_reason: HangupReason::BySystem,
            selections: vec!["1".to_string()],
            recording_id: None,
        }
    }

    #[tokio::test]
    async fn records_are_written_as_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let mut manager = FlowRecordManagerBuilder::new()
            .with_root(dir.path().to_string_lossy().to_string())
            .with_cancel_token(token.clone())
            .build();
        let sender = manager.sender.clone();
        let handle = tokio::spawn(async move { manager.serve().await });

        sender.send(sample_record("call-42")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        let path = dir.path().join("call-42.json");
        let contents = std::fs::read_to_string(path).unwrap();
        let record: FlowRecord = serde_json::from_str(&contents).unwrap();
        assert_eq!(record.call_id, "call-42");
        assert_eq!(record.hangup_reason, HangupReason::BySystem);
        assert_eq!(record.selections, vec!["1".to_string()]);
    }
}
