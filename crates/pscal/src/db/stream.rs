//! One-at-a-time handoff of mapped rows from a store worker to its reader.

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::FeedError;

/// Capacity of the handoff between the store worker and the reader.
pub(crate) const HANDOFF_SLOTS: usize = 1;

/// A lazy, finite, non-restartable sequence of records produced by a query.
///
/// The producing worker blocks while the slot is full, so at most one record
/// is in flight. After an `Err` item the stream is finished. Dropping the
/// stream early makes the worker's next send fail, which ends the worker and
/// releases its statement and connection.
pub struct RowStream<T> {
    rx: mpsc::Receiver<Result<T, FeedError>>,
    finished: bool,
}

impl<T> RowStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<T, FeedError>>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Creates a connected sender/stream pair.
    pub(crate) fn channel() -> (mpsc::Sender<Result<T, FeedError>>, Self) {
        let (tx, rx) = mpsc::channel(HANDOFF_SLOTS);
        (tx, Self::new(rx))
    }

    /// Waits for the next record.
    ///
    /// Returns `None` once the producer has finished, either by exhausting
    /// the rows or after reporting a failure.
    pub async fn next(&mut self) -> Option<Result<T, FeedError>> {
        if self.finished {
            return None;
        }
        let item = self.rx.recv().await;
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
            self.rx.close();
        }
        item
    }

    /// Drains the stream into a vector, stopping at the first failure.
    pub async fn collect_all(mut self) -> Result<Vec<T>, FeedError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<T: Send + 'static> RowStream<T> {
    /// Adapts the stream to a `futures::Stream`, e.g. for a streamed response body.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, FeedError>> + Send {
        futures::stream::unfold(self, |mut rows| async move {
            rows.next().await.map(|item| (item, rows))
        })
    }
}
