use async_trait::async_trait;
use directories::ProjectDirs;
use std::{collections::BTreeMap, path::PathBuf};
use store_api::{
    DocRef, DocUpdate, Document, DocumentStore, Fields, Query, StoreError, StoreResult,
};
use tokio::{fs, sync::Mutex};
use uuid::Uuid;

/// Largest batch a single write may carry (Firestore's write-batch limit).
pub const MAX_BATCH_OPS: usize = 500;

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

/// Default location of the store snapshot.
pub fn default_data_file() -> PathBuf {
    match ProjectDirs::from("org", "sweepcore", "sweepcore") {
        Some(proj) => proj.data_dir().join("store.json"),
        None => PathBuf::from("./sweepcore_data/store.json"),
    }
}

/// Document store kept in memory and optionally mirrored to a JSON file
/// after every mutation.
pub struct MemoryStore {
    file: Option<PathBuf>,
    data: Mutex<Collections>,
    max_batch_ops: usize,
}

impl MemoryStore {
    /// Store without persistence.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            data: Mutex::new(BTreeMap::new()),
            max_batch_ops: MAX_BATCH_OPS,
        }
    }

    /// Open (or create) a store persisted at `file`.
    pub async fn open(file: PathBuf) -> StoreResult<Self> {
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).await?;
        }
        let data = match fs::read(&file).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => BTreeMap::new(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            file: Some(file),
            data: Mutex::new(data),
            max_batch_ops: MAX_BATCH_OPS,
        })
    }

    pub fn with_max_batch_ops(mut self, limit: usize) -> Self {
        self.max_batch_ops = limit;
        self
    }

    /// Insert or replace a document, generating an id when none is given.
    pub async fn insert(
        &self,
        collection: &str,
        id: Option<String>,
        fields: Fields,
    ) -> StoreResult<String> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut data = self.data.lock().await;
        data.entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        self.persist(&data).await?;
        Ok(id)
    }

    /// Insert a batch of `(collection, id, fields)` documents with a single
    /// snapshot write. Returns how many were inserted.
    pub async fn insert_many<I>(&self, docs: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = (String, Option<String>, Fields)>,
    {
        let mut data = self.data.lock().await;
        let mut inserted = 0;
        for (collection, id, fields) in docs {
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            data.entry(collection).or_default().insert(id, fields);
            inserted += 1;
        }
        self.persist(&data).await?;
        Ok(inserted)
    }

    pub async fn contains(&self, collection: &str, id: &str) -> bool {
        self.data
            .lock()
            .await
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id))
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.data
            .lock()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Every document, tagged with its collection.
    pub async fn export(&self) -> Vec<(String, Document)> {
        let data = self.data.lock().await;
        data.iter()
            .flat_map(|(collection, docs)| {
                docs.iter().map(move |(id, fields)| {
                    (collection.clone(), Document::new(id.clone(), fields.clone()))
                })
            })
            .collect()
    }

    fn check_batch(&self, size: usize) -> StoreResult<()> {
        if size > self.max_batch_ops {
            return Err(StoreError::BatchTooLarge {
                size,
                limit: self.max_batch_ops,
            });
        }
        Ok(())
    }

    async fn persist(&self, data: &Collections) -> StoreResult<()> {
        if let Some(file) = &self.file {
            let bytes = serde_json::to_vec(data)?;
            fs::write(file, bytes).await?;
        }
        Ok(())
    }
}

fn matching<'a>(data: &'a Collections, query: &'a Query) -> impl Iterator<Item = Document> + 'a {
    data.get(&query.collection)
        .into_iter()
        .flat_map(|docs| docs.iter())
        .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
        .filter(move |doc| query.matches(doc))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        query.validate()?;
        let data = self.data.lock().await;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching(&data, query).take(limit).collect())
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let data = self.data.lock().await;
        Ok(data
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn count(&self, query: &Query) -> StoreResult<u64> {
        query.validate()?;
        let data = self.data.lock().await;
        Ok(matching(&data, query).count() as u64)
    }

    async fn batch_delete(&self, refs: &[DocRef]) -> StoreResult<()> {
        self.check_batch(refs.len())?;
        let mut data = self.data.lock().await;
        for r in refs {
            if let Some(docs) = data.get_mut(&r.collection) {
                docs.remove(&r.id);
            }
        }
        self.persist(&data).await
    }

    async fn batch_update(&self, updates: &[DocUpdate]) -> StoreResult<()> {
        self.check_batch(updates.len())?;
        let mut data = self.data.lock().await;
        // validate every target before touching anything
        for update in updates {
            let target = &update.target;
            let exists = data
                .get(&target.collection)
                .is_some_and(|docs| docs.contains_key(&target.id));
            if !exists {
                return Err(StoreError::NotFound(target.clone()));
            }
        }
        for update in updates {
            let target = &update.target;
            if let Some(fields) = data
                .get_mut(&target.collection)
                .and_then(|docs| docs.get_mut(&target.id))
            {
                for change in &update.updates {
                    change.apply(fields);
                }
            }
        }
        self.persist(&data).await
    }

    fn backend_name(&self) -> &'static str {
        if self.file.is_some() {
            "json-file"
        } else {
            "memory"
        }
    }
}
