// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming stored bytes out as a JSON string, without buffering them

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::cid::ContentId;
use crate::storage::{ByteStream, StoreError};

const REPLACEMENT: &str = "\u{FFFD}";

/// Decodes UTF-8 that arrives in arbitrary pieces into escaped JSON string contents.
///
/// Sequences split across pieces are held back until they're complete. Invalid sequences become
/// U+FFFD.
#[derive(Debug, Default)]
pub struct JsonTextEncoder {
    /// Start of a multi-byte sequence that hasn't been completed yet
    pending: Vec<u8>,
}

impl JsonTextEncoder {
    /// Escaped contents for everything decodable so far, without surrounding quotes.
    pub fn encode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut escaped = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    escape_into(&mut escaped, text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // from_utf8 already vouched for this prefix
                    escape_into(&mut escaped, std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            escaped.push_str(REPLACEMENT);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        escaped
    }

    /// Escaped contents for whatever is left once the input has ended.
    pub fn finish(self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            REPLACEMENT.to_owned()
        }
    }
}

fn escape_into(escaped: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    let quoted = serde_json::to_string(text).expect("strings always serialize to JSON");
    escaped.push_str(&quoted[1..quoted.len() - 1]);
}

enum Envelope {
    Text(ByteStream, JsonTextEncoder),
    Done,
}

/// `{"ok":true,"cid":...,"text":...}` with `text` decoded from `chunks` as they arrive.
///
/// A failure from `chunks` is passed along and ends the stream, leaving the JSON unterminated.
pub fn json_envelope(
    cid: &ContentId,
    chunks: ByteStream,
) -> impl Stream<Item = Result<Bytes, StoreError>> + Send + 'static {
    let opening = format!(r#"{{"ok":true,"cid":"{cid}","text":""#);
    let opening = futures::stream::iter([Ok(Bytes::from(opening))]);

    let text = futures::stream::unfold(
        Envelope::Text(chunks, JsonTextEncoder::default()),
        |state| async move {
            let Envelope::Text(mut chunks, mut encoder) = state else {
                return None;
            };
            Some(match chunks.next().await {
                Some(Ok(chunk)) => {
                    let escaped = encoder.encode(&chunk);
                    (Ok(Bytes::from(escaped)), Envelope::Text(chunks, encoder))
                }
                Some(Err(err)) => (Err(err), Envelope::Done),
                None => {
                    let closing = encoder.finish() + r#""}"#;
                    (Ok(Bytes::from(closing)), Envelope::Done)
                }
            })
        },
    );

    opening.chain(text)
}
