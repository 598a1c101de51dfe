use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use store_api::Fields;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// One document tagged with its collection, as imported or exported.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Record {
    pub collection: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub fields: Fields,
}

/// Read the next line-delimited JSON record, skipping blank lines.
/// Returns `None` at end of input.
pub async fn read_record<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Record>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid record: {trimmed}"))?;
        return Ok(Some(record));
    }
}

/// Write a value as a single line of JSON.
pub async fn write_line<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let s = serde_json::to_string(value)?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
