//! Folding streamed replies into the transcript
//!
//! Both backends end up as a [`ChunkStream`] of text fragments. Raw byte
//! bodies go through [`decode_text_stream`] first, which keeps multi-byte
//! characters that straddle a chunk boundary intact.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::transcript::Transcript;

/// Ordered text fragments of one assistant reply.
pub type ChunkStream = BoxStream<'static, Result<String, GenerationError>>;

/// Shown instead of a reply whose stream could not be opened or broke off.
pub const GENERATION_FALLBACK: &str = "Sorry, I couldn't connect to the server.";

/// A reply stream that failed part way through.
#[derive(Debug, thiserror::Error)]
#[error("{source} (after {} bytes of reply)", .partial.len())]
pub struct StreamFailure {
    /// Text received before the failure; never shown as a finished answer.
    pub partial: String,
    #[source]
    pub source: GenerationError,
}

/// Fold every chunk into the trailing assistant message.
///
/// The placeholder must already be in the transcript. Each chunk produces
/// exactly one `replace_last`, in arrival order. On error the partial reply
/// is swapped out for [`GENERATION_FALLBACK`] and handed back for logging.
pub async fn consume(mut chunks: ChunkStream, transcript: &Transcript) -> Result<String, StreamFailure> {
    let mut reply = String::new();
    let mut count = 0usize;

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(text) => {
                reply.push_str(&text);
                count += 1;
                transcript.replace_last(reply.clone());
            }
            Err(source) => {
                warn!(chunks = count, error = %source, "reply stream failed mid-flight");
                transcript.replace_last(GENERATION_FALLBACK);
                return Err(StreamFailure { partial: reply, source });
            }
        }
    }

    debug!(chunks = count, bytes = reply.len(), "reply stream finished");
    Ok(reply)
}

/// Incremental UTF-8 decoding across arbitrary chunk boundaries.
///
/// Incomplete sequences at the end of a chunk are held back until the next
/// one arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
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
        out
    }

    /// Flush at end of stream; a dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Turn a raw byte body into text fragments, one per byte chunk.
pub fn decode_text_stream<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(bytes), Utf8Decoder::default(), false);
    stream::unfold(state, |(mut bytes, mut decoder, done)| async move {
        if done {
            return None;
        }
        match bytes.next().await {
            Some(Ok(chunk)) => {
                let text = decoder.decode(chunk.as_ref());
                Some((Ok(text), (bytes, decoder, false)))
            }
            Some(Err(err)) => {
                let err = GenerationError::Interrupted(err.to_string());
                Some((Err(err), (bytes, decoder, true)))
            }
            None => {
                let tail = decoder.finish();
                if tail.is_empty() {
                    None
                } else {
                    Some((Ok(tail), (bytes, decoder, true)))
                }
            }
        }
    })
    .boxed()
}
