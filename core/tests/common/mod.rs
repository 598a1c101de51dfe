#![allow(dead_code)]

use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use store_api::{
    DocRef, DocUpdate, Document, DocumentStore, Fields, Query, StoreError, StoreResult,
};
use sweepcore::{collections::unix_millis, config::SweeperConfig, MemoryStore};
use time::OffsetDateTime;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Sweeper settings for tests: no throttling, short deadline.
pub fn test_config() -> SweeperConfig {
    SweeperConfig {
        batch_delay: Duration::ZERO,
        store_timeout: Duration::from_secs(5),
        ..SweeperConfig::default()
    }
}

pub fn now_ms() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}

/// Unix milliseconds `days` away from now (negative is the past).
pub fn days_from_now(days: i64) -> i64 {
    now_ms() + days * DAY_MS
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("object expected, got {other}"),
    }
}

pub async fn put(store: &MemoryStore, collection: &str, id: &str, value: Value) {
    store
        .insert(collection, Some(id.to_string()), fields(value))
        .await
        .unwrap();
}

/// Wraps a store and remembers the size of every batched write.
pub struct RecordingStore {
    pub inner: Arc<MemoryStore>,
    pub deletes: Mutex<Vec<(String, usize)>>,
    pub updates: Mutex<Vec<(String, usize)>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            deletes: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        })
    }

    pub fn delete_batches(&self, collection: &str) -> Vec<usize> {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, n)| *n)
            .collect()
    }
}

fn batch_collection<'a>(mut names: impl Iterator<Item = &'a str>) -> String {
    names.next().unwrap_or_default().to_string()
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.inner.query(query).await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn count(&self, query: &Query) -> StoreResult<u64> {
        self.inner.count(query).await
    }

    async fn batch_delete(&self, refs: &[DocRef]) -> StoreResult<()> {
        let collection = batch_collection(refs.iter().map(|r| r.collection.as_str()));
        self.deletes.lock().unwrap().push((collection, refs.len()));
        self.inner.batch_delete(refs).await
    }

    async fn batch_update(&self, updates: &[DocUpdate]) -> StoreResult<()> {
        let collection = batch_collection(updates.iter().map(|u| u.target.collection.as_str()));
        self.updates.lock().unwrap().push((collection, updates.len()));
        self.inner.batch_update(updates).await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// How a [`FaultyStore`] misbehaves for its target collection.
#[derive(Clone, Copy)]
pub enum Fault {
    Unavailable,
    /// Reads of the collection never answer.
    Hang,
    Panic,
    /// Batched deletes touching the collection fail after `after` successes.
    DeleteFailsAfter(usize),
}

/// Injects a fault into every operation touching one collection.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    pub collection: &'static str,
    pub fault: Fault,
    deletes: Mutex<usize>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>, collection: &'static str, fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner,
            collection,
            fault,
            deletes: Mutex::new(0),
        })
    }

    async fn read_fault(&self, collection: &str) -> StoreResult<()> {
        if collection != self.collection {
            return Ok(());
        }
        match self.fault {
            Fault::Unavailable => Err(StoreError::Unavailable("injected".into())),
            Fault::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Ok(())
            }
            Fault::Panic => panic!("injected panic"),
            Fault::DeleteFailsAfter(_) => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.read_fault(&query.collection).await?;
        self.inner.query(query).await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.read_fault(collection).await?;
        self.inner.get(collection, id).await
    }

    async fn count(&self, query: &Query) -> StoreResult<u64> {
        self.read_fault(&query.collection).await?;
        self.inner.count(query).await
    }

    async fn batch_delete(&self, refs: &[DocRef]) -> StoreResult<()> {
        if let Fault::DeleteFailsAfter(after) = self.fault {
            if refs.iter().any(|r| r.collection == self.collection) {
                let mut done = self.deletes.lock().unwrap();
                if *done >= after {
                    return Err(StoreError::Transient("quota exceeded".into()));
                }
                *done += 1;
            }
        }
        self.inner.batch_delete(refs).await
    }

    async fn batch_update(&self, updates: &[DocUpdate]) -> StoreResult<()> {
        self.inner.batch_update(updates).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

struct LogWriter(Arc<Mutex<Vec<u8>>>);
impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
struct MakeLogWriter(Arc<Mutex<Vec<u8>>>);
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter;
    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

/// Captures log output of the current thread while the guard lives.
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    pub fn start() -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(MakeLogWriter(buf.clone()))
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self { buf, _guard: guard }
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.buf.lock().unwrap().clone()).unwrap()
    }
}
