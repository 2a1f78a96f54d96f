//! Console output capture for hidden-console bots.
//!
//! Each piped stream gets one background reader task. Lines are trimmed,
//! blank lines skipped, the rest timestamped and pushed into the bot's
//! bounded buffer and live delivery channel. A reader dying never takes
//! the bot or the supervisor with it.

use std::sync::Arc;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::ProcessRegistry;

pub struct OutputCapture {
    registry: Arc<ProcessRegistry>,
}

impl OutputCapture {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }

    /// Start a reader task for each piped stream the launch produced.
    /// Both streams feed the same buffer and channel, so stderr
    /// interleaves with stdout as one console history.
    pub fn attach(&self, bot: &str, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
        if let Some(stdout) = stdout {
            spawn_reader(Arc::clone(&self.registry), bot.to_string(), stdout);
        }
        if let Some(stderr) = stderr {
            spawn_reader(Arc::clone(&self.registry), bot.to_string(), stderr);
        }
    }
}

/// Read lines until EOF or error, stamping each as `[HH:MM:SS] text`.
pub(crate) fn spawn_reader<R>(
    registry: Arc<ProcessRegistry>,
    bot: String,
    stream: R,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let stamped = format!("[{}] {}", Local::now().format("%H:%M:%S"), text);
                    registry.with_entry(&bot, |state| state.push_line(stamped));
                }
                Ok(None) => {
                    debug!(bot = %bot, "Output stream closed");
                    break;
                }
                Err(e) => {
                    warn!(bot = %bot, error = %e, "Output read failed, stopping capture");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_reader_stamps_and_buffers_lines() {
        let registry = Arc::new(ProcessRegistry::new());
        registry.upsert("alpha", |_| {});

        let (mut writer, reader) = tokio::io::duplex(1024);
        let handle = spawn_reader(Arc::clone(&registry), "alpha".to_string(), reader);

        writer.write_all(b"hello\n  spaced  \n\nworld\n").await.unwrap();
        drop(writer);
        handle.await.unwrap();

        let snap = registry.get("alpha").unwrap();
        assert_eq!(snap.output_buffer.len(), 3);
        assert!(snap.output_buffer[0].ends_with("] hello"));
        assert!(snap.output_buffer[1].ends_with("] spaced"));
        assert!(snap.output_buffer[2].ends_with("] world"));
        // "[HH:MM:SS] " prefix is 11 chars.
        assert_eq!(&snap.output_buffer[0][..1], "[");
        assert_eq!(&snap.output_buffer[0][9..11], "] ");
    }

    #[tokio::test]
    async fn test_reader_respects_buffer_cap() {
        let registry = Arc::new(ProcessRegistry::new());
        registry.upsert("alpha", |_| {});

        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let handle = spawn_reader(Arc::clone(&registry), "alpha".to_string(), reader);

        let mut payload = String::new();
        for i in 0..250 {
            payload.push_str(&format!("line {i}\n"));
        }
        writer.write_all(payload.as_bytes()).await.unwrap();
        drop(writer);
        handle.await.unwrap();

        let snap = registry.get("alpha").unwrap();
        assert_eq!(
            snap.output_buffer.len(),
            SupervisorConfig::OUTPUT_BUFFER_LINES
        );
        assert!(snap.output_buffer.last().unwrap().ends_with("] line 249"));
        assert!(snap.output_buffer.first().unwrap().ends_with("] line 150"));
    }

    #[tokio::test]
    async fn test_reader_feeds_live_channel_without_blocking() {
        let registry = Arc::new(ProcessRegistry::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(SupervisorConfig::OUTPUT_QUEUE_CAPACITY);
        registry.upsert("alpha", |state| state.output_tx = Some(tx));

        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let handle = spawn_reader(Arc::clone(&registry), "alpha".to_string(), reader);

        // Nobody drains the channel; the reader must still finish.
        let mut payload = String::new();
        for i in 0..200 {
            payload.push_str(&format!("line {i}\n"));
        }
        writer.write_all(payload.as_bytes()).await.unwrap();
        drop(writer);
        handle.await.unwrap();

        // The channel holds the first 50 lines, the rest were dropped.
        let mut received = Vec::new();
        while let Ok(line) = rx.try_recv() {
            received.push(line);
        }
        assert_eq!(received.len(), SupervisorConfig::OUTPUT_QUEUE_CAPACITY);
        assert!(received[0].ends_with("] line 0"));
    }

    #[tokio::test]
    async fn test_reader_for_untracked_bot_discards_quietly() {
        let registry = Arc::new(ProcessRegistry::new());
        let (mut writer, reader) = tokio::io::duplex(1024);
        let handle = spawn_reader(Arc::clone(&registry), "ghost".to_string(), reader);

        writer.write_all(b"orphan line\n").await.unwrap();
        drop(writer);
        handle.await.unwrap();

        assert!(registry.get("ghost").is_none());
    }
}
