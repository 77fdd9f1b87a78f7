//! Line input for the send loop.
//!
//! Reading stdin blocks, so [`StdinLines`] does it on a dedicated OS thread
//! and hands lines over a channel. Awaiting the next line is then an
//! ordinary cancellable suspension point.

use std::io::BufRead;
use std::thread;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A source of input lines. `None` means end of input.
#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self) -> Option<String>;
}

/// Lines fed through a channel. Dropping every sender is end of input.
#[derive(Debug)]
pub struct ChannelLines {
    rx: mpsc::Receiver<String>,
}

impl ChannelLines {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// A source plus the sender that feeds it.
    pub fn pair(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl LineSource for ChannelLines {
    async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Standard input, read line by line on a background thread.
///
/// The reader thread lives until stdin closes or this source is dropped and
/// the next line is read.
#[derive(Debug)]
pub struct StdinLines {
    inner: ChannelLines,
}

impl StdinLines {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, inner) = ChannelLines::pair(16);

        thread::Builder::new()
            .name("stdin-lines".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.blocking_send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "stdin read failed");
                            break;
                        }
                    }
                }
                debug!("stdin reader finished");
            })?;

        Ok(Self { inner })
    }
}

#[async_trait]
impl LineSource for StdinLines {
    async fn next_line(&mut self) -> Option<String> {
        self.inner.next_line().await
    }
}

/// A fixed list of lines, then end of input.
#[derive(Debug, Default)]
pub struct ScriptedLines {
    lines: std::collections::VecDeque<String>,
}

impl ScriptedLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Never yields and never ends. For runs driven only by the timer or the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

#[async_trait]
impl LineSource for NoInput {
    async fn next_line(&mut self) -> Option<String> {
        std::future::pending().await
    }
}
