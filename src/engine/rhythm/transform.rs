// ── Rhythm: Transformation Engine ──────────────────────────────────────────
//
// The scheduler only knows "run the models behind this selector". The shipped
// implementation shells out to dbt; tests plug in scripted engines.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::TransformConfig;
use async_trait::async_trait;
use log::{debug, info};
use std::process::Stdio;
use tokio::process::Command;

/// Bytes of process output kept in error messages.
const OUTPUT_TAIL_CHARS: usize = 2_000;

#[async_trait]
pub trait TransformationEngine: Send + Sync {
    /// Run every model matched by `selector`. Must be cancel-safe: the
    /// scheduler drops the future on timeout or shutdown.
    async fn run(&self, selector: &str) -> EngineResult<()>;
}

/// Runs `<program> <args…> <selector>` as a child process.
pub struct CommandEngine {
    config: TransformConfig,
}

impl CommandEngine {
    pub fn new(config: TransformConfig) -> Self {
        CommandEngine { config }
    }

    fn command(&self, selector: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(selector)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.project_dir {
            cmd.current_dir(dir);
        }
        if let Some(dir) = &self.config.profiles_dir {
            cmd.env("DBT_PROFILES_DIR", dir);
        }
        cmd
    }
}

#[async_trait]
impl TransformationEngine for CommandEngine {
    async fn run(&self, selector: &str) -> EngineResult<()> {
        debug!("[rhythm:transform] {} {:?} {}", self.config.program, self.config.args, selector);
        let output = self.command(selector).output().await?;

        if output.status.success() {
            info!("[rhythm:transform] {} completed", selector);
            return Ok(());
        }

        // dbt reports model failures on stdout, the shell on stderr.
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(EngineError::Process(format!(
            "{} {} exited with {}: {}",
            self.config.program,
            selector,
            output.status,
            tail(detail.trim(), OUTPUT_TAIL_CHARS)
        )))
    }
}

/// Last `max` characters of `s`.
fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
