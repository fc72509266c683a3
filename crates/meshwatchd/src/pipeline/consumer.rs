//! Consumer: applies the reader list to each record.
//!
//! Readers are synchronous and may block on the store, so the consumer runs
//! on the blocking thread pool and pulls batches with `blocking_recv`.

use super::RecordBatch;
use crate::readers::{self, RecordReader};
use meshwatch_common::NodeStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub fn run(
    mut rx: mpsc::Receiver<RecordBatch>,
    store: Arc<dyn NodeStore>,
    readers: Vec<Box<dyn RecordReader>>,
) -> u64 {
    let mut applied = 0;
    while let Some(batch) = rx.blocking_recv() {
        for record in &batch {
            readers::apply(&readers, store.as_ref(), record);
            applied += 1;
        }
    }
    debug!(records = applied, "Consumer finished");
    applied
}
