//! Newline-delimited JSON over a streamed HTTP body.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::RecordError;

/// Parse each line of the response body as one `T`. Blank lines are
/// skipped; the stream ends after the first read error.
pub(crate) fn records<T>(response: reqwest::Response) -> BoxStream<'static, Result<T, RecordError>>
where
    T: DeserializeOwned + Send + 'static,
{
    let lines = Lines::new(response.bytes_stream());
    stream::unfold(lines, |mut lines| async move {
        let line = lines.next_line().await?;
        let record = line
            .map_err(RecordError::from)
            .and_then(|line| serde_json::from_slice(&line).map_err(RecordError::from));
        Some((record, lines))
    })
    .boxed()
}

pub(crate) struct Lines<S> {
    body: std::pin::Pin<Box<S>>,
    buf: Vec<u8>,
    finished: bool,
}

impl<S, B, E> Lines<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    pub(crate) fn new(body: S) -> Self {
        Self { body: Box::pin(body), buf: Vec::new(), finished: false }
    }

    pub(crate) async fn next_line(&mut self) -> Option<Result<Vec<u8>, E>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some(Ok(line));
            }

            if self.finished {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                return Some(Ok(std::mem::take(&mut self.buf)));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    self.finished = true;
                    self.buf.clear();
                    return Some(Err(err));
                }
                None => self.finished = true,
            }
        }
    }
}
