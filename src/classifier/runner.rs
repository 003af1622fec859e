//! Runs the external text-completion command.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::classifier::prompt::truncate_chars;
use crate::config::ClassifierConfig;
use crate::error::{AllocatorError, Result};

/// Placeholder replaced with the path of a temporary file holding the prompt
pub const PROMPT_FILE_PLACEHOLDER: &str = "{{prompt_file}}";
/// Placeholder replaced with the prompt text itself
pub const PROMPT_PLACEHOLDER: &str = "{{prompt}}";

/// Prompts longer than this are awkward as a command-line argument
const LONG_INLINE_PROMPT_CHARS: usize = 2000;

/// Text-in, text-out completion backend
#[async_trait]
pub trait CompletionRunner: Send + Sync {
    /// Send `prompt` and return the trimmed response text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Escape text for use inside a double-quoted POSIX shell string
#[must_use]
pub fn escape_double_quoted(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// How the prompt reaches the command
enum PromptDelivery {
    File(tempfile::NamedTempFile),
    Inline,
    Stdin,
}

/// [`CompletionRunner`] backed by a shell command template
#[derive(Debug, Clone)]
pub struct CommandRunner {
    command_template: String,
    timeout: Duration,
    max_output_bytes: usize,
}

impl CommandRunner {
    /// Runner with a 300 s timeout and a 10 MiB output cap
    pub fn new(command_template: impl Into<String>) -> Self {
        Self {
            command_template: command_template.into(),
            timeout: Duration::from_secs(300),
            max_output_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.command_template.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_max_output_bytes(usize::try_from(config.max_output_bytes).unwrap_or(usize::MAX))
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Expand the template; the returned delivery must outlive the child process
    fn prepare(&self, prompt: &str) -> Result<(String, PromptDelivery)> {
        if self.command_template.contains(PROMPT_FILE_PLACEHOLDER) {
            let mut file = tempfile::Builder::new()
                .prefix("ai_prompt_")
                .suffix(".txt")
                .tempfile()?;
            file.write_all(prompt.as_bytes())?;
            file.flush()?;

            let path = file.path().to_string_lossy().into_owned();
            debug!(path = %path, "Using file-based prompt");
            let command = self.command_template.replace(PROMPT_FILE_PLACEHOLDER, &path);
            Ok((command, PromptDelivery::File(file)))
        } else if self.command_template.contains(PROMPT_PLACEHOLDER) {
            if prompt.chars().count() > LONG_INLINE_PROMPT_CHARS {
                warn!(
                    length = prompt.len(),
                    "Prompt is long for a command-line argument; consider {{{{prompt_file}}}} or stdin"
                );
            }
            let command = self
                .command_template
                .replace(PROMPT_PLACEHOLDER, &escape_double_quoted(prompt));
            Ok((command, PromptDelivery::Inline))
        } else {
            debug!(length = prompt.len(), "No placeholder found, using stdin for prompt");
            Ok((self.command_template.clone(), PromptDelivery::Stdin))
        }
    }

    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    async fn run(&self, command: &str, stdin_prompt: Option<&str>) -> Result<String> {
        let mut child = Self::shell(command)
            .stdin(if stdin_prompt.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AllocatorError::ExternalInvocation(format!("failed to start command: {e}")))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AllocatorError::ExternalInvocation("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AllocatorError::ExternalInvocation("stderr not captured".into()))?;

        let feed_stdin = async move {
            if let (Some(mut pipe), Some(prompt)) = (stdin, stdin_prompt) {
                // A command that exits without reading stdin closes the pipe early
                if let Err(e) = pipe.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "Could not write prompt to stdin");
                }
                drop(pipe);
            }
        };

        let (_, stdout, stderr) = tokio::join!(
            feed_stdin,
            read_capped(stdout, self.max_output_bytes),
            read_capped(stderr, self.max_output_bytes)
        );
        let stdout = stdout?;
        let stderr = String::from_utf8_lossy(&stderr.unwrap_or_default()).trim().to_string();

        let status = child
            .wait()
            .await
            .map_err(|e| AllocatorError::ExternalInvocation(format!("failed to wait for command: {e}")))?;

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            return Err(AllocatorError::ExternalInvocation(format!(
                "command exited with code {exit_code}: {}",
                truncate_chars(&stderr, 500)
            )));
        }

        if !stderr.is_empty() {
            warn!(stderr = %truncate_chars(&stderr, 500), "Completion command wrote to stderr");
        }

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

/// Read a stream to the end, failing once it exceeds `cap` bytes
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        if buf.len() + n > cap {
            return Err(AllocatorError::ExternalInvocation(format!(
                "command output exceeded {cap} bytes"
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[async_trait]
impl CompletionRunner for CommandRunner {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let (command, delivery) = self.prepare(prompt)?;
        let stdin_prompt = matches!(delivery, PromptDelivery::Stdin).then_some(prompt);
        info!(timeout_secs = self.timeout.as_secs(), "Running completion command");

        let result = tokio::time::timeout(self.timeout, self.run(&command, stdin_prompt))
            .await
            .map_err(|_| {
                AllocatorError::ExternalInvocation(format!(
                    "command timed out after {} s",
                    self.timeout.as_secs()
                ))
            })?;

        // Keeps the prompt file until the command has finished
        drop(delivery);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_double_quoted() {
        assert_eq!(escape_double_quoted(r#"say "hi" $HOME `id` \n"#), r#"say \"hi\" \$HOME \`id\` \\n"#);
    }

    #[test]
    fn test_prepare_picks_delivery() {
        let (cmd, delivery) = CommandRunner::new("tool --file {{prompt_file}}").prepare("p").unwrap();
        assert!(matches!(delivery, PromptDelivery::File(_)));
        assert!(!cmd.contains(PROMPT_FILE_PLACEHOLDER));

        let (cmd, delivery) = CommandRunner::new("tool \"{{prompt}}\"").prepare("a \"b\"").unwrap();
        assert!(matches!(delivery, PromptDelivery::Inline));
        assert_eq!(cmd, r#"tool "a \"b\"""#);

        let (_, delivery) = CommandRunner::new("tool -p").prepare("p").unwrap();
        assert!(matches!(delivery, PromptDelivery::Stdin));
    }
}
