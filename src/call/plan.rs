use super::PromptSource;
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Interactive menu definition driven by a [`super::CallFlow`]. Supplied as
/// static configuration and read once at flow start.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MenuPlan {
    pub entry_node: String,
    pub nodes: HashMap<String, MenuNode>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub retry_prompt: PromptSource,
    pub goodbye_prompt: PromptSource,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Application-level wait for a recognize result, independent of the
    /// platform's own silence timeout.
    #[serde(default = "default_recognize_timeout_ms")]
    pub recognize_timeout_ms: u64,
    /// Wait for any other operation result (play, transfer, add participant).
    #[serde(default = "default_event_timeout_ms")]
    pub event_timeout_ms: u64,
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,
}

const DEFAULT_MAX_RETRIES: u32 = 3;

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_recognize_timeout_ms() -> u64 {
    30_000
}

fn default_event_timeout_ms() -> u64 {
    15_000
}

fn default_silence_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MenuNode {
    pub prompt: PromptSource,
    #[serde(default)]
    pub choices: Vec<MenuChoice>,
}

impl MenuNode {
    pub fn choice(&self, tone: &str) -> Option<&MenuChoice> {
        self.choices.iter().find(|choice| choice.tone == tone)
    }
}

/// One DTMF selection: either a jump to another node or a terminal action.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MenuChoice {
    pub tone: String,
    #[serde(default)]
    pub goto: Option<String>,
    #[serde(default)]
    pub action: Option<MenuAction>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MenuAction {
    Playback { prompt: PromptSource },
    Transfer { target: String },
    AddParticipant { participant: String },
    Hangup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Node(String),
    Action(MenuAction),
}

impl MenuChoice {
    pub fn resolve(&self) -> Result<Transition> {
        match (&self.goto, &self.action) {
            (Some(_), Some(_)) => bail!("choice '{}' has both goto and action", self.tone),
            (Some(node), None) => Ok(Transition::Node(node.clone())),
            (None, Some(action)) => Ok(Transition::Action(action.clone())),
            (None, None) => bail!("choice '{}' has neither goto nor action", self.tone),
        }
    }
}

impl MenuPlan {
    pub fn validate(&self) -> Result<()> {
        if !self.nodes.contains_key(&self.entry_node) {
            bail!("entry node '{}' not found in menu plan", self.entry_node);
        }
        for (id, node) in &self.nodes {
            for choice in &node.choices {
                let transition = choice
                    .resolve()
                    .map_err(|err| anyhow!("node '{}': {}", id, err))?;
                if let Transition::Node(next) = transition {
                    if !self.nodes.contains_key(&next) {
                        bail!(
                            "node '{}' choice '{}' points to unknown node '{}'",
                            id,
                            choice.tone,
                            next
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Result<&MenuNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| anyhow!("node '{}' not found in menu plan", id))
    }
}
