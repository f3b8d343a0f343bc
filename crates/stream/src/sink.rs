use snafu::ResultExt;

use crate::error::{PersistenceSnafu, StreamResult};
use crate::message::{AssembledMessage, MessageCommitter, MessageId, Role};
use crate::observer::StreamObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Committed,
    AlreadyFinalized,
}

/// Running buffer for one in-flight message.
#[derive(Debug)]
pub struct IncrementalSink {
    message: AssembledMessage,
    finalized: bool,
}

impl IncrementalSink {
    pub fn new(message_id: MessageId, role: Role) -> Self {
        Self {
            message: AssembledMessage::new(message_id, role),
            finalized: false,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message.id
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }

    pub fn message(&self) -> &AssembledMessage {
        &self.message
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Appends a delta and publishes the full running content.
    ///
    /// Returns `false` when the delta was rejected because the sink is finalized.
    pub fn push_delta<O>(&mut self, delta: &str, observer: &mut O) -> bool
    where
        O: StreamObserver + ?Sized,
    {
        if self.finalized {
            tracing::warn!(
                message_id = %self.message.id,
                "dropping delta for an already finalized message"
            );
            return false;
        }

        if delta.is_empty() {
            return true;
        }

        self.message.content.push_str(delta);
        observer.content_updated(self.message.id, &self.message.content);
        true
    }

    /// Commits the message exactly once.
    ///
    /// The sink stops accepting deltas before the commit is awaited, so a failed
    /// commit is not retried by a second call.
    pub async fn finalize<O>(
        &mut self,
        committer: &dyn MessageCommitter,
        observer: &mut O,
    ) -> StreamResult<FinalizeOutcome>
    where
        O: StreamObserver + ?Sized,
    {
        if self.finalized {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }
        self.finalized = true;

        committer
            .commit(&self.message)
            .await
            .context(PersistenceSnafu {
                stage: "finalize-commit",
                message_id: self.message.id,
            })?;

        observer.finalized(self.message.id, &self.message.content);
        Ok(FinalizeOutcome::Committed)
    }
}
