use serde::Deserialize;
use thiserror::Error;

use crate::{
    models::{Chunk, Completion},
    relay::framer::FramedRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Chunk(Chunk),
    Skip,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed upstream record ({reason}): {raw}")]
pub struct DecodeError {
    pub raw: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    model: Option<String>,
}

pub fn decode(record: &FramedRecord) -> Result<Decoded, DecodeError> {
    let text = record.to_text_lossy();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Decoded::Skip);
    }

    let wire = parse(trimmed)?;
    Ok(Decoded::Chunk(Chunk {
        text: wire.response.unwrap_or_default(),
        done: wire.done.unwrap_or(false),
    }))
}

/// Parses a complete non-streaming backend body.
pub fn decode_body(body: &[u8]) -> Result<Completion, DecodeError> {
    let text = String::from_utf8_lossy(body);
    let wire = parse(text.trim())?;
    Ok(Completion {
        text: wire.response.unwrap_or_default(),
        model: wire.model,
        done: wire.done.unwrap_or(false),
    })
}

fn parse(text: &str) -> Result<WireRecord, DecodeError> {
    serde_json::from_str(text).map_err(|error| DecodeError {
        raw: text.chars().take(400).collect(),
        reason: error.to_string(),
    })
}
