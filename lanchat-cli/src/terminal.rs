//! Terminal front end: username prompt, stdin lines out, transcript lines in.

use anyhow::{bail, Context, Result};
use chrono::Local;
use lanchat_core::{ChatMessage, ChatNode, MAX_TEXT_CHARS};
use tokio::io::{
    self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PROMPT: &str = "> ";

/// Line-oriented front end over any reader/writer pair; stdin/stdout by default.
pub struct Terminal<R = Stdin, W = Stdout> {
    lines: Lines<BufReader<R>>,
    out: W,
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal {
    pub fn new() -> Self {
        Self::with_io(io::stdin(), io::stdout())
    }
}

impl<R, W> Terminal<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn with_io(input: R, out: W) -> Self {
        Self {
            lines: BufReader::new(input).lines(),
            out,
        }
    }

    /// Ask for a display name. EOF or a blank answer is fatal.
    pub async fn ask_username(&mut self) -> Result<String> {
        self.write("Enter your username: ").await?;
        let line = self
            .lines
            .next_line()
            .await
            .context("read username")?
            .unwrap_or_default();
        let name = line.trim();
        if name.is_empty() {
            bail!("username must not be empty");
        }
        Ok(name.to_string())
    }

    /// Pump stdin to `node` and incoming messages to stdout until EOF or `shutdown`.
    pub async fn run(
        mut self,
        node: &ChatNode,
        mut incoming: UnboundedReceiver<ChatMessage>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.write(&banner(node.username(), node.port())).await?;
        self.write(PROMPT).await?;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                line = self.lines.next_line() => {
                    let Some(line) = line.context("read stdin")? else {
                        debug!("stdin closed");
                        break;
                    };
                    if let Some(text) = outgoing_text(&line) {
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break,
                            report = node.broadcast(&text) => debug!(
                                id = %report.message_id,
                                queued = report.queued,
                                failed = report.failed.len(),
                                "sent"
                            ),
                        }
                    }
                    self.write(PROMPT).await?;
                }
                msg = incoming.recv() => {
                    let Some(msg) = msg else { break };
                    self.write(&format!("\r{}\n{PROMPT}", transcript_line(&msg))).await?;
                }
            }
        }
        self.write("\n").await?;
        Ok(())
    }

    async fn write(&mut self, s: &str) -> Result<()> {
        self.out.write_all(s.as_bytes()).await.context("write stdout")?;
        self.out.flush().await.context("flush stdout")?;
        Ok(())
    }
}

fn banner(username: &str, port: u16) -> String {
    format!(
        "Welcome, {username}! Listening on port {port}.\n\
         Type a message and press Enter to send it to everyone on the network. Ctrl+C quits.\n"
    )
}

/// `[HH:MM] username: text`, stamped in local time.
fn transcript_line(msg: &ChatMessage) -> String {
    format!(
        "[{}] {}: {}",
        msg.timestamp().with_timezone(&Local).format("%H:%M"),
        msg.username(),
        msg.text()
    )
}

/// Blank lines are not sent; long ones are cut to `MAX_TEXT_CHARS` characters.
fn outgoing_text(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_TEXT_CHARS).collect())
}
