//! Per-stream translation state
//!
//! Provider lines are translated one at a time by the dialect modules. This
//! wrapper assigns stable client block indexes across lines and keeps the
//! block lifecycle well formed: every started block is stopped before the
//! closing `message_delta` / `message_stop`, and nothing follows `message_stop`.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};

use super::{Dialect, StreamEvent, canonical, encode_events, stream_line_events};

/// Block index of the text block opened by the preamble
const TEXT_BLOCK: usize = 0;

#[derive(Debug)]
pub struct StreamTranslator {
    dialect: Dialect,
    /// Started and not yet stopped
    open: BTreeSet<usize>,
    /// Provider tool index -> client block index
    tool_blocks: HashMap<usize, usize>,
    next_block: usize,
    stopped: bool,
}

impl StreamTranslator {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            open: BTreeSet::new(),
            tool_blocks: HashMap::new(),
            next_block: TEXT_BLOCK + 1,
            stopped: false,
        }
    }

    /// Events a translated stream opens with, so the client sees a
    /// well-formed message before the first delta
    pub fn preamble(&mut self) -> Bytes {
        self.open.insert(TEXT_BLOCK);
        encode_events(&[
            StreamEvent::message_start(&canonical::new_message_id()),
            StreamEvent::text_block_start(TEXT_BLOCK),
        ])
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Canonical events for one provider line
    pub fn line_events(&mut self, line: &str) -> Vec<StreamEvent> {
        if self.stopped {
            return Vec::new();
        }
        // Gemini numbers function calls by their position inside one chunk
        if self.dialect == Dialect::Gemini {
            self.tool_blocks.clear();
        }

        let mut out = Vec::new();
        for mut event in stream_line_events(line, self.dialect) {
            match event.event.as_str() {
                "content_block_start" | "content_block_delta" => {
                    let index = self.client_index(&event);
                    event.data["index"] = index.into();
                    if event.event == "content_block_start" {
                        self.open.insert(index);
                    }
                    out.push(event);
                }
                "message_delta" => {
                    self.close_blocks(&mut out);
                    out.push(event);
                }
                "message_stop" => {
                    self.close_blocks(&mut out);
                    self.stopped = true;
                    out.push(event);
                    break;
                }
                _ => out.push(event),
            }
        }
        out
    }

    /// Encoded form of [`Self::line_events`], `None` when there is nothing to send
    pub fn translate_line(&mut self, line: &str) -> Option<Bytes> {
        let events = self.line_events(line);
        (!events.is_empty()).then(|| encode_events(&events))
    }

    /// Close whatever the upstream left open when it ended without a
    /// termination marker
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.stopped {
            return None;
        }
        let mut out = Vec::new();
        self.close_blocks(&mut out);
        out.push(StreamEvent::message_stop());
        self.stopped = true;
        Some(encode_events(&out))
    }

    fn client_index(&mut self, event: &StreamEvent) -> usize {
        let raw = event
            .data
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(TEXT_BLOCK);
        if raw == TEXT_BLOCK {
            return TEXT_BLOCK;
        }
        if let Some(index) = self.tool_blocks.get(&raw) {
            return *index;
        }
        let index = self.next_block;
        self.next_block += 1;
        self.tool_blocks.insert(raw, index);
        index
    }

    fn close_blocks(&mut self, out: &mut Vec<StreamEvent>) {
        for index in std::mem::take(&mut self.open) {
            out.push(StreamEvent::block_stop(index));
        }
    }
}
