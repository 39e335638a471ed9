use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use cameradar_core::engine::{AttackOptions, Dictionary, DiscoverOptions, Engine};
use cameradar_core::errors::EngineError;
use cameradar_core::stream::Stream;

const STDERR_TAIL_BYTES: usize = 2_000;

/// One engine call, written as JSON to the engine's stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
enum EngineCall<'a> {
    Discover {
        target: &'a str,
        ports: &'a [u16],
        speed: u8,
        logging: bool,
    },
    #[serde(rename_all = "camelCase")]
    Attack {
        streams: &'a [Stream],
        dictionary: &'a Dictionary,
        timeout_ms: u64,
        logging: bool,
    },
}

impl EngineCall<'_> {
    fn operation(&self) -> &'static str {
        match self {
            Self::Discover { .. } => "discover",
            Self::Attack { .. } => "attack",
        }
    }

    fn logging(&self) -> bool {
        match self {
            Self::Discover { logging, .. } | Self::Attack { logging, .. } => *logging,
        }
    }
}

/// The engine's single JSON reply on stdout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EngineReply {
    streams: Vec<Stream>,
    error: Option<String>,
}

/// Drives an external engine program, one process per call.
///
/// The program receives the call on stdin and answers on stdout. With logging
/// enabled its stderr is passed through to ours.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn invoke(&self, call: &EngineCall<'_>) -> Result<Vec<Stream>, EngineError> {
        let payload = serde_json::to_vec(call)
            .map_err(|e| EngineError::Protocol(format!("failed to encode call: {e}")))?;

        let stderr = if call.logging() {
            Stdio::inherit()
        } else {
            Stdio::piped()
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Process(format!("failed to spawn {}: {e}", self.program)))?;

        // Feed stdin while collecting output, so an engine that writes before
        // it has read the whole call cannot fill a pipe and stall us.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The engine may exit before reading its input; its reply decides.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!(program = %self.program, error = %e, "engine closed stdin early");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output
            .map_err(|e| EngineError::Process(format!("failed to wait for {}: {e}", self.program)))?;

        tracing::debug!(
            program = %self.program,
            operation = call.operation(),
            status = %output.status,
            stdout_len = output.stdout.len(),
            "engine call finished"
        );

        parse_reply(call.operation(), output.status, &output.stdout, &output.stderr)
    }
}

fn parse_reply(
    operation: &str,
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Vec<Stream>, EngineError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();

    if text.is_empty() {
        if status.success() {
            return Err(EngineError::Protocol(format!("{operation}: engine sent no reply")));
        }
        return Err(EngineError::Process(format!(
            "{operation}: engine exited with {status}: {}",
            stderr_tail(stderr)
        )));
    }

    let reply: EngineReply = serde_json::from_str(text)
        .map_err(|e| EngineError::Protocol(format!("{operation}: invalid reply: {e}")))?;

    match reply.error {
        Some(message) if operation == "discover" => Err(EngineError::Discovery(message)),
        Some(message) => Err(EngineError::Attack(message)),
        None => Ok(reply.streams),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() > STDERR_TAIL_BYTES {
        let mut start = text.len() - STDERR_TAIL_BYTES;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        format!("...{}", &text[start..])
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Engine for CommandEngine {
    fn name(&self) -> &str {
        &self.program
    }

    async fn discover(
        &self,
        target: &str,
        ports: &[u16],
        options: &DiscoverOptions,
    ) -> Result<Vec<Stream>, EngineError> {
        self.invoke(&EngineCall::Discover {
            target,
            ports,
            speed: options.speed,
            logging: options.logging,
        })
        .await
    }

    async fn attack(
        &self,
        streams: Vec<Stream>,
        dictionary: &Dictionary,
        options: &AttackOptions,
    ) -> Result<Vec<Stream>, EngineError> {
        self.invoke(&EngineCall::Attack {
            streams: &streams,
            dictionary,
            timeout_ms: u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
            logging: options.logging,
        })
        .await
    }
}
