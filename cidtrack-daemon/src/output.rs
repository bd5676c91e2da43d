//! Record output -- renders each [`CidRecord`] as one stdout line.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use cidtrack_core::record::CidRecord;

/// How records are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// `[RFC3339] CID:<cid> FILE:<basename>`
    Structured,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Structured => "structured",
        }
    }

    /// Render one record without the trailing newline.
    pub fn render(&self, record: &CidRecord) -> serde_json::Result<String> {
        match self {
            Self::Json => serde_json::to_string(record),
            Self::Structured => Ok(record.to_structured_line()),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "structured" => Ok(Self::Structured),
            other => Err(anyhow::anyhow!(
                "unknown output format '{}', expected 'json' or 'structured'",
                other
            )),
        }
    }
}

/// Drain `rx` into `out`, one flushed line per record.
///
/// Returns the number of records written once every sender is gone.
/// A write failure (closed stdout) ends the loop with an error.
pub async fn write_records<W>(
    mut rx: mpsc::Receiver<CidRecord>,
    mut out: W,
    format: OutputFormat,
) -> anyhow::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    while let Some(record) = rx.recv().await {
        let mut line = format.render(&record)?;
        line.push('\n');
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("failed to write record: {}", e))?;
        out.flush().await?;
        written += 1;
    }

    out.flush().await?;
    Ok(written)
}
