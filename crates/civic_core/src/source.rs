//! Source adapters: one per government body, each producing meeting records or failing.

use crate::config::{AdapterConfig, SourceConfig};
use crate::meeting::derive_id;
use crate::schema::MeetingRecord;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Scrapes the source. Must not persist anything.
    async fn scrape(&self) -> Result<Vec<MeetingRecord>>;
}

pub fn from_config(config: &SourceConfig) -> Arc<dyn SourceAdapter> {
    match &config.adapter {
        AdapterConfig::File { path } => Arc::new(FileSource::new(&config.name, path.clone())),
        AdapterConfig::Command { program, args } => {
            Arc::new(CommandSource::new(&config.name, program, args.clone()))
        }
    }
}

/// Reads meetings a scraper already wrote to disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
        }
    }
}

#[async_trait]
impl SourceAdapter for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape(&self) -> Result<Vec<MeetingRecord>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| anyhow!("reading {}: {err}", self.path.display()))?;
        parse_meetings(&raw, &self.name)
    }
}

/// Runs an external scraper and parses the JSON it prints on stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(name: &str, program: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args,
        }
    }
}

#[async_trait]
impl SourceAdapter for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape(&self) -> Result<Vec<MeetingRecord>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| anyhow!("spawning {}: {err}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(anyhow!("{} exited with {}: {tail}", self.program, output.status));
        }
        let stdout = String::from_utf8(output.stdout)?;
        parse_meetings(&stdout, &self.name)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScrapePayload {
    List(Vec<MeetingRecord>),
    Document { meetings: Vec<MeetingRecord> },
}

/// Accepts either a bare meeting array or a `{ "meetings": [...] }` document.
/// Records without an id get one derived from source, org, date and title.
pub fn parse_meetings(raw: &str, source: &str) -> Result<Vec<MeetingRecord>> {
    let payload: ScrapePayload = serde_json::from_str(raw)
        .map_err(|err| anyhow!("{source}: unrecognized scrape output: {err}"))?;
    let mut meetings = match payload {
        ScrapePayload::List(meetings) => meetings,
        ScrapePayload::Document { meetings } => meetings,
    };
    for m in &mut meetings {
        if m.id.trim().is_empty() && !m.org.is_empty() && !m.date.is_empty() {
            m.id = derive_id(source, &m.org, &m.date, Some(&m.title));
        }
    }
    Ok(meetings)
}
