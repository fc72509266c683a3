//! Ingestion pipeline.
//!
//! ```text
//! enqueue -> [decompress] -> [decode] -> [consumer: readers in order]
//! ```
//!
//! Stages run as separate tasks joined by bounded queues. Closing the head
//! queue (dropping every [`PipelineSender`]) lets each stage drain and
//! finish, which closes the next queue in turn.

pub mod consumer;
pub mod decode;
pub mod decompress;

use crate::readers::RecordReader;
use meshwatch_common::{NodeStore, Record};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Capacity of each inter-stage queue.
pub const QUEUE_CAPACITY: usize = 1024;

/// Records decoded from one datagram, in envelope order.
pub type RecordBatch = Vec<Record>;

/// Raw response as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub source: SocketAddr,
    pub payload: Vec<u8>,
    /// Payload is still DEFLATE-compressed
    pub compressed: bool,
    /// A previous stage failed; carried on so it gets counted
    pub errored: bool,
}

impl Datagram {
    pub fn new(source: SocketAddr, payload: Vec<u8>, compressed: bool) -> Self {
        Self {
            source,
            payload,
            compressed,
            errored: false,
        }
    }
}

/// Cloneable handle to the head of the pipeline.
#[derive(Clone)]
pub struct PipelineSender {
    tx: mpsc::Sender<Datagram>,
}

impl PipelineSender {
    /// Queue a datagram; waits while the pipeline is saturated. Returns
    /// false once the pipeline has shut down.
    pub async fn enqueue(&self, datagram: Datagram) -> bool {
        self.tx.send(datagram).await.is_ok()
    }
}

impl From<mpsc::Sender<Datagram>> for PipelineSender {
    fn from(tx: mpsc::Sender<Datagram>) -> Self {
        Self { tx }
    }
}

pub struct Pipeline {
    head: PipelineSender,
    decompress: JoinHandle<()>,
    decode: JoinHandle<()>,
    consumer: JoinHandle<u64>,
}

impl Pipeline {
    /// Spawn all stages. Must be called from within a tokio runtime.
    pub fn start(store: Arc<dyn NodeStore>, readers: Vec<Box<dyn RecordReader>>) -> Self {
        let (head_tx, head_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (inflated_tx, inflated_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (records_tx, records_rx) = mpsc::channel(QUEUE_CAPACITY);

        let decompress = tokio::spawn(decompress::run(head_rx, inflated_tx));
        let decode = tokio::spawn(decode::run(inflated_rx, records_tx));
        let consumer =
            tokio::task::spawn_blocking(move || consumer::run(records_rx, store, readers));

        info!("Ingestion pipeline started");
        Self {
            head: PipelineSender { tx: head_tx },
            decompress,
            decode,
            consumer,
        }
    }

    pub fn sender(&self) -> PipelineSender {
        self.head.clone()
    }

    pub async fn enqueue(&self, datagram: Datagram) -> bool {
        self.head.enqueue(datagram).await
    }

    /// Close the head queue and wait until every queued message has been
    /// applied. Senders handed out by [`Pipeline::sender`] must be dropped
    /// first or this waits for them. Returns the number of records applied.
    pub async fn shutdown(self) -> u64 {
        drop(self.head);
        if let Err(e) = self.decompress.await {
            error!("Decompress stage panicked: {}", e);
        }
        if let Err(e) = self.decode.await {
            error!("Decode stage panicked: {}", e);
        }
        match self.consumer.await {
            Ok(applied) => {
                info!(records = applied, "Ingestion pipeline drained");
                applied
            }
            Err(e) => {
                error!("Consumer panicked: {}", e);
                0
            }
        }
    }
}
