//! Live events read as JSON lines.
//!
//! Each non-empty line is one [`SourceEvent`], e.g.
//!
//! ```json
//! {"type":"member_joined","userId":"42","username":"ada","guildId":"7"}
//! ```

use anyhow::Context;
use guildstream_kafka_producer::SourceEvent;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines, Stdin};
use tracing::warn;

pub struct JsonlEventSource<R> {
    lines: Lines<BufReader<R>>,
    line_count: u64,
    malformed: u64,
}

impl JsonlEventSource<File> {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open event file {path:?}"))?;
        Ok(Self::new(file))
    }
}

impl JsonlEventSource<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin> JsonlEventSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_count: 0,
            malformed: 0,
        }
    }

    /// The next event, or `None` at end of input.
    ///
    /// Lines that are not valid events are logged and skipped; only read
    /// errors are returned.
    pub async fn next_event(&mut self) -> anyhow::Result<Option<SourceEvent>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .with_context(|| format!("Failed to read line {}", self.line_count + 1))?
        {
            self.line_count += 1;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<SourceEvent>(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    self.malformed += 1;
                    warn!("Skipping malformed event at line {}: {}", self.line_count, e);
                }
            }
        }
        Ok(None)
    }

    /// Lines skipped because they did not parse.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}
