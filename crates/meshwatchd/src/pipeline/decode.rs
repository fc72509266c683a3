//! Decode stage: JSON envelope to typed records.

use super::{Datagram, RecordBatch};
use meshwatch_common::{Envelope, Record};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Records contained in `datagram`, in envelope order. Errored input and
/// undecodable JSON both yield a single [`Record::Errored`].
pub fn decode(datagram: &Datagram) -> Vec<Record> {
    if datagram.errored {
        return vec![Record::Errored];
    }
    match serde_json::from_slice::<Envelope>(&datagram.payload) {
        Ok(envelope) => {
            let records = envelope.into_records();
            if records.is_empty() {
                debug!(source = %datagram.source, "Response without known sections");
            }
            records
        }
        Err(e) => {
            warn!(source = %datagram.source, "Failed to decode response: {}", e);
            vec![Record::Errored]
        }
    }
}

/// Stage loop. All records of one datagram travel together so that their
/// relative order is preserved.
pub async fn run(mut rx: mpsc::Receiver<Datagram>, tx: mpsc::Sender<RecordBatch>) {
    while let Some(datagram) = rx.recv().await {
        let records = decode(&datagram);
        if records.is_empty() {
            continue;
        }
        if tx.send(records).await.is_err() {
            warn!("Consumer is gone, stopping decoding");
            break;
        }
    }
    debug!("Decode stage finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwatch_common::RecordKind;

    fn datagram(payload: &[u8]) -> Datagram {
        Datagram::new("[fe80::1]:1001".parse().unwrap(), payload.to_vec(), false)
    }

    #[test]
    fn test_fan_out() {
        let records = decode(&datagram(
            br#"{"nodeinfo":{"node_id":"n1"},"neighbours":{"node_id":"n1","batadv":{}}}"#,
        ));
        let kinds: Vec<RecordKind> = records.iter().map(Record::kind).collect();
        assert_eq!(kinds, vec![RecordKind::NodeInfo, RecordKind::Neighbours]);
    }

    #[test]
    fn test_bad_json_is_single_errored_record() {
        assert_eq!(decode(&datagram(b"{not json")), vec![Record::Errored]);
    }

    #[test]
    fn test_errored_input_is_not_parsed() {
        let mut input = datagram(br#"{"nodeinfo":{"node_id":"n1"}}"#);
        input.errored = true;
        assert_eq!(decode(&input), vec![Record::Errored]);
    }

    #[test]
    fn test_unknown_sections_yield_nothing() {
        assert!(decode(&datagram(br#"{"wifi":{}}"#)).is_empty());
    }
}
