//! Signature by external program.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use danmu_core::error::SignError;
use danmu_core::signer::Signer;

/// Runs a program per signature: the stub goes to stdin, the signature is
/// read from stdout (surrounding whitespace trimmed).
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSigner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, input: &str) -> Result<String, SignError> {
        let unavailable = |e: std::io::Error| SignError::Unavailable(format!("{}: {e}", self.program));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(unavailable)?;

        if let Some(mut stdin) = child.stdin.take() {
            // a program that ignores its input may exit before we finish writing
            match stdin.write_all(input.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(unavailable(e)),
                _ => {}
            }
        }

        let output = child.wait_with_output().await.map_err(unavailable)?;
        if !output.status.success() {
            return Err(SignError::Unavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let signature = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if signature.is_empty() {
            return Err(SignError::Empty);
        }
        Ok(signature)
    }
}

#[async_trait]
impl Signer for CommandSigner {
    async fn sign(&self, input: &str) -> Result<String, SignError> {
        match tokio::time::timeout(self.timeout, self.run(input)).await {
            Ok(result) => result,
            Err(_) => Err(SignError::Unavailable(format!(
                "{} timed out after {}ms",
                self.program,
                self.timeout.as_millis()
            ))),
        }
    }
}
