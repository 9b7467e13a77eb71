use crate::call::plan::{MenuAction, MenuChoice, MenuNode, MenuPlan};
use crate::call::PromptSource;
use anyhow::Error;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Parser, Debug)]
#[command(
    version = crate::version::get_short_version(),
    long_version = crate::version::get_version_info()
)]
pub struct Cli {
    #[clap(long, default_value = "callflow.toml")]
    pub conf: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Base URL the platform posts webhook callbacks to.
    pub callback_url: String,
    pub caller_id: Option<String>,
    #[serde(default)]
    pub record_calls: bool,
    pub recordings_path: String,
    pub flowrecord_path: String,
    pub menu: MenuPlan,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            callback_url: "http://localhost:8080".to_string(),
            caller_id: None,
            record_calls: false,
            #[cfg(target_os = "windows")]
            recordings_path: "./recordings".to_string(),
            #[cfg(not(target_os = "windows"))]
            recordings_path: "/tmp/recordings".to_string(),
            #[cfg(target_os = "windows")]
            flowrecord_path: "./flowrecords".to_string(),
            #[cfg(not(target_os = "windows"))]
            flowrecord_path: "/tmp/flowrecords".to_string(),
            menu: default_menu(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }
}

fn tts(text: &str) -> PromptSource {
    PromptSource::Tts {
        text: text.to_string(),
        voice: None,
    }
}

/// Built-in demo menu: sales message, support message, operator transfer.
fn default_menu() -> MenuPlan {
    let mut nodes = HashMap::new();
    nodes.insert(
        "main".to_string(),
        MenuNode {
            prompt: tts("Welcome. Press one for sales, two for support, or zero for an operator."),
            choices: vec![
                MenuChoice {
                    tone: "1".to_string(),
                    goto: None,
                    action: Some(MenuAction::Playback {
                        prompt: tts("Thank you for calling sales. We will call you back shortly."),
                    }),
                },
                MenuChoice {
                    tone: "2".to_string(),
                    goto: None,
                    action: Some(MenuAction::Playback {
                        prompt: tts("Our support portal is available around the clock."),
                    }),
                },
                MenuChoice {
                    tone: "0".to_string(),
                    goto: None,
                    action: Some(MenuAction::Transfer {
                        target: "sip:operator@example.com".to_string(),
                    }),
                },
            ],
        },
    );
    MenuPlan {
        entry_node: "main".to_string(),
        nodes,
        max_retries: 3,
        retry_prompt: tts("Sorry, I did not get that. Please try again."),
        goodbye_prompt: tts("Goodbye."),
        connect_timeout_ms: 30_000,
        recognize_timeout_ms: 30_000,
        event_timeout_ms: 15_000,
        silence_timeout_ms: 5_000,
    }
}
