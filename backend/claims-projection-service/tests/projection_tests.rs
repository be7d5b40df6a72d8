//! End-to-end behaviour of the projection without a broker: envelopes go through
//! the materializer and are read back through the query service.

use claims_projection_service::services::cdc::{
    CatchUpTracker, ChangeEnvelope, EnvelopeHandler, Materializer, PartitionTarget,
};
use claims_projection_service::metrics::ProjectionMetrics;
use claims_projection_service::{ProjectionStore, QueryService};
use prometheus::Registry;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

fn row(id: &str, status: &str) -> Value {
    json!({
        "payload": {
            "before": null,
            "after": {
                "quoteid": id,
                "name": "Jane Doe",
                "email": "jane@example.com",
                "age": 34,
                "address": "1 Main St",
                "usstate": "CA",
                "licenseplate": "7ABC123",
                "descriptionofdamage": "Dent on rear bumper",
                "claimstatus": status,
                "claimcost": 1200
            },
            "op": "u"
        }
    })
}

struct Feed {
    offset: i64,
}

impl Feed {
    fn new() -> Self {
        Self { offset: 0 }
    }

    fn next(&mut self, key: &str, value: Option<Vec<u8>>) -> ChangeEnvelope {
        let envelope = ChangeEnvelope {
            key: Some(key.as_bytes().to_vec()),
            value,
            partition: 0,
            offset: self.offset,
        };
        self.offset += 1;
        envelope
    }

    fn upsert(&mut self, id: &str, status: &str) -> ChangeEnvelope {
        self.next(id, Some(serde_json::to_vec(&row(id, status)).unwrap()))
    }

    fn tombstone(&mut self, id: &str) -> ChangeEnvelope {
        self.next(id, None)
    }

    fn malformed(&mut self, id: &str) -> ChangeEnvelope {
        self.next(id, Some(b"\x00\x01 not a change event".to_vec()))
    }
}

fn projection() -> (Materializer, QueryService) {
    let store = Arc::new(ProjectionStore::new());
    (
        Materializer::new(Arc::clone(&store)),
        QueryService::detached(store),
    )
}

fn contents(query: &QueryService) -> BTreeMap<String, Value> {
    query
        .get_all()
        .into_iter()
        .map(|record| {
            (
                record.quote_id().unwrap(),
                serde_json::to_value(&*record).unwrap(),
            )
        })
        .collect()
}

#[test]
fn test_claim_closed_then_deleted() {
    let (materializer, query) = projection();
    let mut feed = Feed::new();

    materializer.apply(&feed.upsert("1", "OPEN")).unwrap();
    materializer.apply(&feed.upsert("1", "CLOSED")).unwrap();

    let record = query.get_by_key("1").unwrap();
    assert_eq!(record.claim_status(), Some(&json!("CLOSED")));
    assert_eq!(record.us_state(), Some("CA"));
    assert_eq!(record.claim_cost(), Some(&json!(1200)));

    materializer.apply(&feed.tombstone("1")).unwrap();
    assert!(query.get_by_key("1").is_none());
    assert!(query.get_all().is_empty());
}

#[test]
fn test_last_writer_wins_per_key() {
    let (materializer, query) = projection();
    let mut feed = Feed::new();

    for envelope in [
        feed.upsert("1", "OPEN"),
        feed.upsert("2", "OPEN"),
        feed.upsert("1", "INSPECTION"),
        feed.upsert("3", "OPEN"),
        feed.tombstone("2"),
        feed.upsert("1", "CLOSED"),
        feed.tombstone("9"),
    ] {
        materializer.apply(&envelope).unwrap();
    }

    assert_eq!(
        query.get_by_key("1").unwrap().claim_status(),
        Some(&json!("CLOSED"))
    );
    assert!(query.get_by_key("2").is_none());
    assert!(query.get_by_key("9").is_none());
    assert_eq!(query.get_all().len(), 2);
    assert_eq!(query.len(), 2);
}

#[test]
fn test_duplicate_delivery_is_idempotent() {
    let mut feed = Feed::new();
    let sequence = vec![
        feed.upsert("1", "OPEN"),
        feed.upsert("2", "OPEN"),
        feed.tombstone("2"),
        feed.upsert("1", "CLOSED"),
    ];

    let (once, once_query) = projection();
    for envelope in &sequence {
        once.apply(envelope).unwrap();
    }

    let (twice, twice_query) = projection();
    for envelope in sequence.iter().chain(sequence.iter()) {
        twice.apply(envelope).unwrap();
    }

    // Redelivering a single envelope right after itself
    let last = sequence.last().unwrap();
    twice.apply(last).unwrap();

    assert_eq!(contents(&once_query), contents(&twice_query));
}

#[test]
fn test_malformed_envelope_does_not_affect_final_value() {
    let (materializer, query) = projection();
    let mut feed = Feed::new();

    materializer.apply(&feed.upsert("1", "OPEN")).unwrap();
    assert!(materializer.apply(&feed.malformed("1")).is_err());
    materializer.apply(&feed.upsert("1", "CLOSED")).unwrap();

    assert_eq!(
        query.get_by_key("1").unwrap().claim_status(),
        Some(&json!("CLOSED"))
    );
    assert_eq!(query.len(), 1);
}

#[test]
fn test_debezium_json_keys() {
    let (materializer, query) = projection();
    let key = serde_json::to_vec(&json!({
        "schema": {"type": "struct"},
        "payload": {"quoteid": "42"}
    }))
    .unwrap();

    materializer
        .apply(&ChangeEnvelope {
            key: Some(key.clone()),
            value: Some(serde_json::to_vec(&row("42", "OPEN")).unwrap()),
            partition: 0,
            offset: 0,
        })
        .unwrap();
    assert!(query.get_by_key("42").is_some());

    materializer
        .apply(&ChangeEnvelope {
            key: Some(key),
            value: None,
            partition: 0,
            offset: 1,
        })
        .unwrap();
    assert!(query.is_empty());
}

#[test]
fn test_no_torn_reads_under_concurrent_updates() {
    let store = Arc::new(ProjectionStore::new());
    let materializer = Materializer::new(Arc::clone(&store));
    let query = QueryService::detached(store);
    let done = Arc::new(AtomicBool::new(false));

    let envelope = |version: u32| {
        let value = json!({"payload": {"after": {
            "quoteid": "1",
            "name": format!("v{}", version),
            "email": format!("v{}@example.com", version),
            "claimcost": version
        }}});
        ChangeEnvelope {
            key: Some(b"1".to_vec()),
            value: Some(serde_json::to_vec(&value).unwrap()),
            partition: 0,
            offset: version as i64,
        }
    };
    materializer.apply(&envelope(0)).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let query = query.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut reads = 0u64;
                while !done.load(Ordering::Relaxed) {
                    for record in query
                        .get_by_key("1")
                        .into_iter()
                        .chain(query.get_all())
                    {
                        let name = record.name().unwrap();
                        let version = &name[1..];
                        assert_eq!(record.email().unwrap(), format!("v{}@example.com", version));
                        assert_eq!(record.claim_cost(), Some(&json!(version.parse::<u32>().unwrap())));
                        reads += 1;
                    }
                }
                reads
            })
        })
        .collect();

    for version in 1..2_000 {
        materializer.apply(&envelope(version)).unwrap();
    }
    done.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(query.get_by_key("1").unwrap().name(), Some("v1999"));
}

#[tokio::test]
async fn test_ready_barrier_released_after_backlog() {
    let store = Arc::new(ProjectionStore::new());
    let (ready_tx, _) = watch::channel(false);
    let ready_tx = Arc::new(ready_tx);
    let query = QueryService::new(Arc::clone(&store), ready_tx.subscribe());
    let mut ready_rx = ready_tx.subscribe();

    let mut handler = EnvelopeHandler::new(
        Materializer::new(Arc::clone(&store)),
        CatchUpTracker::new(vec![
            PartitionTarget {
                partition: 0,
                low: 0,
                high: 2,
            },
            PartitionTarget {
                partition: 1,
                low: 0,
                high: 0,
            },
        ]),
        Arc::clone(&ready_tx),
        ProjectionMetrics::new(&Registry::new()),
    );

    let mut feed = Feed::new();
    handler.handle(&feed.upsert("1", "OPEN"));
    assert!(!query.is_ready());

    let waiter = tokio::spawn(async move {
        ready_rx.wait_for(|ready| *ready).await.is_ok()
    });

    handler.handle(&feed.upsert("2", "OPEN"));
    assert!(waiter.await.unwrap());
    assert!(query.is_ready());
    assert_eq!(query.len(), 2);

    // Updates after the barrier keep flowing
    handler.handle(&feed.upsert("1", "CLOSED"));
    assert_eq!(
        query.get_by_key("1").unwrap().claim_status(),
        Some(&json!("CLOSED"))
    );
}
