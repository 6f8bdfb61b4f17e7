//! Reorder buffer between the fetcher and the downstream consumer.
//!
//! Units arrive in any order, possibly duplicated. The sequencer awaits
//! `cursor + 1`, parks everything else in a map, and emits each contiguous
//! run as soon as its first height shows up. The cursor advances once per
//! emitted unit, after the consumer has accepted it.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use chainfeed_core::{BlockUnit, SharedCursor};

use crate::error::IngestError;

pub struct Sequencer {
    input: mpsc::Receiver<BlockUnit>,
    output: mpsc::Sender<BlockUnit>,
    cursor: SharedCursor,
    pending: HashMap<u64, BlockUnit>,
}

impl Sequencer {
    pub fn new(
        input: mpsc::Receiver<BlockUnit>,
        output: mpsc::Sender<BlockUnit>,
        cursor: SharedCursor,
    ) -> Self {
        Self {
            input,
            output,
            cursor,
            pending: HashMap::new(),
        }
    }

    /// Run until canceled (`Ok`) or until a channel closes (`ChannelClosed`).
    /// An input closed after cancellation counts as cancellation.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), IngestError> {
        let mut next = self.cursor.height() + 1;
        debug!(next, "sequencer started");

        loop {
            let unit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                received = self.input.recv() => match received {
                    Some(unit) => unit,
                    // The fetcher went away because the receiver is stopping.
                    None if cancel.is_cancelled() => return Ok(()),
                    None => {
                        error!(awaiting = next, buffered = self.pending.len(), "sequencer input closed");
                        return Err(IngestError::ChannelClosed { channel: "sequencer input" });
                    }
                },
            };

            if unit.height < next {
                trace!(height = unit.height, next, "dropping already emitted height");
                continue;
            }
            // A duplicate replaces the parked copy.
            self.pending.insert(unit.height, unit);

            while let Some(unit) = self.pending.remove(&next) {
                let hash = unit.hash().clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    sent = self.output.send(unit) => sent.map_err(|_| IngestError::ChannelClosed {
                        channel: "block output",
                    })?,
                }
                self.cursor.advance(next, hash);
                trace!(height = next, "emitted");
                next += 1;
            }
        }
    }
}
