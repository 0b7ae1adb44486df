// src/burst/stacking.rs - Hand-off of a finished burst to an external focus-stacking job
use crate::config::StackingConfig;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum StackingError {
    #[error("Failed to start stacking command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Stacking command exited with status {0:?}")]
    Failed(Option<i32>),
}

/// Consumes a directory of captured frames. Failures are reported to the
/// caller and never touch the frames themselves.
#[async_trait]
pub trait PostProcessor: Send + Sync + 'static {
    async fn process(&self, directory: &Path) -> Result<(), StackingError>;
}

/// Runs `command args... <directory>`.
#[derive(Debug, Clone)]
pub struct StackingJob {
    command: String,
    args: Vec<String>,
}

impl StackingJob {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self { command: command.into(), args }
    }

    pub fn from_config(config: &StackingConfig) -> Option<Self> {
        config
            .command
            .as_ref()
            .map(|command| Self::new(command.clone(), config.args.clone()))
    }
}

#[async_trait]
impl PostProcessor for StackingJob {
    async fn process(&self, directory: &Path) -> Result<(), StackingError> {
        tracing::info!("Starting focus stacking: {} {:?} {}", self.command, self.args, directory.display());
        let status = Command::new(&self.command)
            .args(&self.args)
            .arg(directory)
            .kill_on_drop(true)
            .status()
            .await?;
        if status.success() {
            tracing::info!("Focus stacking finished for {}", directory.display());
            Ok(())
        } else {
            Err(StackingError::Failed(status.code()))
        }
    }
}
