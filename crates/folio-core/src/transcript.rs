//! Copy-on-write conversation transcript
//!
//! Every update builds a new message list and swaps it in whole, so a reader
//! holding a [`Snapshot`] never sees a half-applied change. Subscribers get
//! every published snapshot in order, nothing is coalesced.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::{ChatMessage, ChatRole};

/// An immutable view of the whole transcript at one point in time.
pub type Snapshot = Arc<Vec<ChatMessage>>;

#[derive(Clone, Default)]
pub struct Transcript {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    messages: Snapshot,
    watchers: Vec<mpsc::UnboundedSender<Snapshot>>,
}

impl Inner {
    fn publish(&mut self, next: Vec<ChatMessage>) {
        self.messages = Arc::new(next);
        let snapshot = self.messages.clone();
        self.watchers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

impl Transcript {
    /// Start a transcript with the assistant greeting as its first entry.
    pub fn with_greeting(greeting: impl Into<String>) -> Self {
        let transcript = Self::default();
        transcript.append(ChatMessage::assistant(greeting));
        transcript
    }

    pub fn append(&self, message: ChatMessage) {
        let mut inner = self.inner.lock();
        let mut next = Vec::with_capacity(inner.messages.len() + 1);
        next.extend(inner.messages.iter().cloned());
        next.push(message);
        inner.publish(next);
    }

    /// Overwrite the content of the trailing assistant message.
    ///
    /// Does nothing when the transcript is empty or ends with a non-assistant
    /// entry; neither can happen while a turn is streaming.
    pub fn replace_last(&self, content: impl Into<String>) {
        let mut inner = self.inner.lock();
        match inner.messages.last() {
            Some(last) if last.role == ChatRole::Assistant => {}
            Some(last) => {
                debug!(role = last.role.as_str(), "replace_last ignored, trailing entry is not an assistant reply");
                return;
            }
            None => return,
        }

        let mut next: Vec<ChatMessage> = inner.messages.as_ref().clone();
        if let Some(last) = next.last_mut() {
            last.content = content.into();
        }
        inner.publish(next);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Snapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().watchers.push(tx);
        rx
    }
}
