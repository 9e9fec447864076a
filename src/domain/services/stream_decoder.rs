#[cfg(test)]
#[path = "stream_decoder_test.rs"]
mod tests;

use anyhow::anyhow;
use anyhow::Result;
use encoding_rs::CoderResult;
use encoding_rs::Decoder;
use encoding_rs::UTF_8;
use futures::StreamExt;
use serde_derive::Deserialize;

use crate::domain::models::ByteStream;
use crate::domain::models::Usage;

const DONE_SENTINEL: &str = "[DONE]";

/// Incremental UTF-8 decoder. A multi-byte code point split across chunks is
/// held back until the rest of it arrives; invalid sequences become U+FFFD.
pub struct Utf8StreamDecoder {
    decoder: Decoder,
}

impl Default for Utf8StreamDecoder {
    fn default() -> Utf8StreamDecoder {
        return Utf8StreamDecoder {
            decoder: UTF_8.new_decoder_without_bom_handling(),
        };
    }
}

impl Utf8StreamDecoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        return self.decode_inner(chunk, false);
    }

    /// Drains any buffered partial sequence. The decoder is reset afterwards
    /// and can be reused for a new stream.
    pub fn finish(&mut self) -> String {
        let res = self.decode_inner(&[], true);
        self.decoder = UTF_8.new_decoder_without_bom_handling();
        return res;
    }

    fn decode_inner(&mut self, chunk: &[u8], last: bool) -> String {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(chunk.len())
            .unwrap_or(chunk.len() * 3 + 4);
        let mut out = String::with_capacity(capacity);
        let mut consumed = 0;

        loop {
            let (result, read, _) =
                self.decoder
                    .decode_to_string(&chunk[consumed..], &mut out, last);
            consumed += read;
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => out.reserve(capacity.max(4)),
            }
        }

        return out;
    }
}

#[derive(Default, Debug, Deserialize)]
struct ChunkContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Default, Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkContent>,
    #[serde(default)]
    message: Option<ChunkContent>,
}

#[derive(Default, Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl CompletionChunk {
    fn text(self) -> Option<String> {
        let choice = self.choices.into_iter().next()?;
        if let Some(content) = choice.delta.and_then(|delta| return delta.content) {
            return Some(content);
        }

        return choice.message.and_then(|message| return message.content);
    }
}

/// Decodes a line oriented `data: {json}` event stream from a chat completion
/// API into plain text increments.
#[derive(Default)]
pub struct EventStreamDecoder {
    utf8: Utf8StreamDecoder,
    buffer: String,
    usage: Option<Usage>,
}

impl EventStreamDecoder {
    /// Feeds raw bytes, returning the increments of every line completed by
    /// this chunk. A malformed data payload fails the whole stream.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        let text = self.utf8.decode(chunk);
        self.buffer.push_str(&text);
        return self.drain_lines(false);
    }

    /// Processes whatever is left once the upstream body has ended.
    pub fn finish(&mut self) -> Result<Vec<String>> {
        let text = self.utf8.finish();
        self.buffer.push_str(&text);
        return self.drain_lines(true);
    }

    /// Usage reported by the upstream, last report wins.
    pub fn usage(&self) -> Option<&Usage> {
        return self.usage.as_ref();
    }

    fn drain_lines(&mut self, flush: bool) -> Result<Vec<String>> {
        let mut increments = vec![];
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer.drain(..=pos).collect::<String>();
            if let Some(text) = self.process_line(line.trim())? {
                increments.push(text);
            }
        }

        if flush && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(text) = self.process_line(line.trim())? {
                increments.push(text);
            }
        }

        return Ok(increments);
    }

    fn process_line(&mut self, line: &str) -> Result<Option<String>> {
        if line.is_empty() {
            return Ok(None);
        }

        let data = match line.strip_prefix("data:") {
            Some(rest) => rest.trim(),
            None => return Ok(None),
        };
        if data.is_empty() || data == DONE_SENTINEL {
            return Ok(None);
        }

        let chunk = serde_json::from_str::<CompletionChunk>(data)
            .map_err(|err| return anyhow!("Failed to parse streaming chunk: {err}"))?;
        tracing::debug!(body = ?chunk, "Completion chunk");

        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        return Ok(chunk.text().filter(|text| return !text.is_empty()));
    }
}

/// Drains a provider byte stream into a single string.
pub async fn read_to_string(mut stream: ByteStream) -> Result<String> {
    let mut decoder = Utf8StreamDecoder::default();
    let mut out = "".to_string();
    while let Some(chunk) = stream.next().await {
        out += &decoder.decode(&chunk?);
    }
    out += &decoder.finish();

    return Ok(out);
}
