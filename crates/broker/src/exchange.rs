// Path: crates/broker/src/exchange.rs
//! The durable topic exchange.

use arca_types::config::BrokerConfig;
use arca_types::error::BrokerError;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Notify};

/// ---- Table definitions ----
/// Key = queue bytes, 0x00, seq_be(8). Value = bincode-encoded [`Record`].
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("MESSAGES");

fn k_message(queue: &str, seq: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(queue.len() + 9);
    k.extend_from_slice(queue.as_bytes());
    k.push(0);
    k.extend_from_slice(&seq.to_be_bytes());
    k
}

fn k_queue_range(queue: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(queue.len() + 1);
    start.extend_from_slice(queue.as_bytes());
    start.push(0);
    let mut end = Vec::with_capacity(queue.len() + 1);
    end.extend_from_slice(queue.as_bytes());
    end.push(1);
    (start, end)
}

fn seq_of_key(key: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    if key.len() >= 8 {
        a.copy_from_slice(&key[key.len() - 8..]);
    }
    u64::from_be_bytes(a)
}

/// One journaled message.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    correlation_id: String,
    body: Vec<u8>,
}

/// Per-queue in-memory delivery state. The journal row is the source of
/// truth; `ready` only orders what the pump hands out next.
#[derive(Default)]
struct QueueState {
    ready: BTreeSet<u64>,
}

struct BrokerInner {
    db: Database,
    next_seq: AtomicU64,
    /// (exchange, routing_key) -> bound queues.
    bindings: Mutex<HashMap<(String, String), Vec<String>>>,
    queues: Mutex<HashMap<String, Arc<QueueRuntime>>>,
    closed_tx: watch::Sender<bool>,
    prefetch: usize,
}

struct QueueRuntime {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl BrokerInner {
    fn queue_runtime(&self, queue: &str) -> Arc<QueueRuntime> {
        let mut queues = match self.queues.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        queues
            .entry(queue.to_owned())
            .or_insert_with(|| {
                Arc::new(QueueRuntime {
                    state: Mutex::new(QueueState::default()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    fn insert(&self, queue: &str, seq: u64, record: &Record) -> Result<(), BrokerError> {
        let bytes =
            bincode::serialize(record).map_err(|e| BrokerError::Encode(e.to_string()))?;
        let tx = self
            .db
            .begin_write()
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        {
            let mut table = tx
                .open_table(MESSAGES)
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
            table
                .insert(k_message(queue, seq).as_slice(), bytes.as_slice())
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
        }
        tx.commit().map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(())
    }

    fn load(&self, queue: &str, seq: u64) -> Result<Option<Record>, BrokerError> {
        let tx = self
            .db
            .begin_read()
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        let table = tx
            .open_table(MESSAGES)
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        let Some(guard) = table
            .get(k_message(queue, seq).as_slice())
            .map_err(|e| BrokerError::Backend(e.to_string()))?
        else {
            return Ok(None);
        };
        let record = bincode::deserialize(guard.value())
            .map_err(|e| BrokerError::Decode(e.to_string()))?;
        Ok(Some(record))
    }

    fn delete(&self, queue: &str, seq: u64) -> Result<(), BrokerError> {
        let tx = self
            .db
            .begin_write()
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        {
            let mut table = tx
                .open_table(MESSAGES)
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
            table
                .remove(k_message(queue, seq).as_slice())
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
        }
        tx.commit().map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Every journaled seq for a queue, lowest first.
    fn pending(&self, queue: &str) -> Result<Vec<u64>, BrokerError> {
        let tx = self
            .db
            .begin_read()
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        let table = tx
            .open_table(MESSAGES)
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        let (start, end) = k_queue_range(queue);
        let mut seqs = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(|e| BrokerError::Backend(e.to_string()))?
        {
            let (key, _) = entry.map_err(|e| BrokerError::Backend(e.to_string()))?;
            seqs.push(seq_of_key(key.value()));
        }
        Ok(seqs)
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }
}

/// A durable topic-exchange broker backed by a single journal file.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Opens (or creates) the journal and restores the highest sequence
    /// number so redeliveries keep their order.
    pub fn open(path: &Path, prefetch: usize) -> Result<Self, BrokerError> {
        let db = Database::create(path).map_err(|e| BrokerError::Backend(e.to_string()))?;
        {
            let tx = db
                .begin_write()
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
            tx.open_table(MESSAGES)
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
            tx.commit().map_err(|e| BrokerError::Backend(e.to_string()))?;
        }

        let mut max_seq = 0u64;
        {
            let tx = db
                .begin_read()
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
            let table = tx
                .open_table(MESSAGES)
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
            for entry in table
                .iter()
                .map_err(|e| BrokerError::Backend(e.to_string()))?
            {
                let (key, _) = entry.map_err(|e| BrokerError::Backend(e.to_string()))?;
                max_seq = max_seq.max(seq_of_key(key.value()));
            }
        }

        let (closed_tx, _) = watch::channel(false);
        Ok(Broker {
            inner: Arc::new(BrokerInner {
                db,
                next_seq: AtomicU64::new(max_seq + 1),
                bindings: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                closed_tx,
                prefetch: prefetch.max(1),
            }),
        })
    }

    /// Opens the journal named by the configuration section.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        Self::open(&config.journal, config.prefetch)
    }

    /// Routes `(exchange, routing_key)` to a queue. Bindings are declared by
    /// each service at startup.
    pub fn bind(&self, exchange: &str, routing_key: &str, queue: &str) {
        let mut bindings = match self.inner.bindings.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        bindings
            .entry((exchange.to_owned(), routing_key.to_owned()))
            .or_default()
            .push(queue.to_owned());
    }

    /// Journals `body` into every queue bound to `(exchange, routing_key)`,
    /// then wakes the consumers. Publishing to an unbound routing key drops
    /// the message.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        correlation_id: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        if self.inner.is_closed() {
            return Err(BrokerError::Closed);
        }
        let targets = {
            let bindings = match self.inner.bindings.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            bindings
                .get(&(exchange.to_owned(), routing_key.to_owned()))
                .cloned()
                .unwrap_or_default()
        };
        if targets.is_empty() {
            tracing::warn!(
                target: "broker",
                exchange,
                routing_key,
                "dropping message published to unbound routing key"
            );
            return Ok(());
        }

        let record = Record {
            correlation_id: correlation_id.to_owned(),
            body: body.to_vec(),
        };
        for queue in targets {
            let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(&queue, seq, &record)?;
            let runtime = self.inner.queue_runtime(&queue);
            if let Ok(mut state) = runtime.state.lock() {
                state.ready.insert(seq);
            }
            runtime.notify.notify_one();
        }
        Ok(())
    }

    /// Subscribes to a queue. Journaled messages — including deliveries a
    /// previous process never acked — are handed out lowest-sequence first
    /// over a channel bounded by the prefetch window.
    pub fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        if self.inner.is_closed() {
            return Err(BrokerError::Closed);
        }
        let runtime = self.inner.queue_runtime(queue);
        {
            let pending = self.inner.pending(queue)?;
            let mut state = match runtime.state.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.ready.extend(pending);
        }

        let (tx, rx) = mpsc::channel(self.inner.prefetch);
        let inner = self.inner.clone();
        let queue = queue.to_owned();
        let mut closed_rx = self.inner.closed_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let seq = loop {
                    if *closed_rx.borrow() {
                        return;
                    }
                    let popped = runtime
                        .state
                        .lock()
                        .ok()
                        .and_then(|mut s| s.ready.pop_first());
                    match popped {
                        Some(s) => break s,
                        None => {
                            tokio::select! {
                                _ = runtime.notify.notified() => {}
                                _ = closed_rx.changed() => {}
                            }
                        }
                    }
                };
                let record = match inner.load(&queue, seq) {
                    Ok(Some(r)) => r,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!(target: "broker", queue = %queue, seq, error = %e, "failed to load journaled message");
                        continue;
                    }
                };
                let delivery = Delivery {
                    correlation_id: record.correlation_id,
                    body: record.body,
                    inner: inner.clone(),
                    queue: queue.clone(),
                    seq,
                    settled: AtomicBool::new(false),
                };
                if tx.send(delivery).await.is_err() {
                    // Consumer went away; the journal row stays for the next
                    // subscription.
                    if let Ok(mut s) = runtime.state.lock() {
                        s.ready.insert(seq);
                    }
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Resolves with an error when the broker connection is lost.
    pub async fn connection_watcher(&self) -> BrokerError {
        eprintln!("DEBUG conn_watcher start");
        let mut rx = self.inner.closed_tx.subscribe();
        eprintln!("DEBUG conn_watcher subscribed, value={}", *rx.borrow());
        while !*rx.borrow() {
            eprintln!("DEBUG conn_watcher awaiting change");
            if rx.changed().await.is_err() {
                break;
            }
        }
        eprintln!("DEBUG conn_watcher done");
        BrokerError::Closed
    }

    /// Resolves with an error when the consumer channel is lost.
    pub async fn channel_watcher(&self) -> BrokerError {
        let mut rx = self.inner.closed_tx.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        BrokerError::ChannelClosed
    }

    /// Closes the broker: watchers resolve, pumps stop, further publishes
    /// and subscriptions fail.
    pub fn close(&self) {
        eprintln!("DEBUG close() called");
        let r = self.inner.closed_tx.send(true);
        eprintln!("DEBUG close() send result={:?}", r.is_ok());
        let queues = match self.inner.queues.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        for runtime in queues.values() {
            runtime.notify.notify_waiters();
        }
    }
}

/// One message handed to a consumer. The journal row survives until the
/// delivery is settled; dropping a delivery unsettled leaves it for
/// redelivery on the next subscription.
pub struct Delivery {
    /// Producer-chosen correlation id threading the work item.
    pub correlation_id: String,
    /// Raw UTF-8 JSON body.
    pub body: Vec<u8>,
    inner: Arc<BrokerInner>,
    queue: String,
    seq: u64,
    settled: AtomicBool,
}

impl Delivery {
    fn settle(&self) -> Result<(), BrokerError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadySettled);
        }
        Ok(())
    }

    /// Acknowledges the delivery, removing it from the journal.
    pub fn ack(&self) -> Result<(), BrokerError> {
        self.settle()?;
        self.inner.delete(&self.queue, self.seq)
    }

    /// Rejects the delivery. With `requeue` the message goes back to the
    /// front of the queue; without, it is dropped from the journal.
    pub fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.settle()?;
        if requeue {
            let runtime = self.inner.queue_runtime(&self.queue);
            if let Ok(mut state) = runtime.state.lock() {
                state.ready.insert(self.seq);
            }
            runtime.notify.notify_one();
            Ok(())
        } else {
            self.inner.delete(&self.queue, self.seq)
        }
    }
}
