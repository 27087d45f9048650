use crate::fs_util::{exists, read_json_opt, write_json_atomic};
use crate::lock::{acquire_exclusive, try_claim, FileLock};
use crate::paths::{tmp_path, validate_id, CollectionPaths, METADATA_FILE};
use crate::types::{
    CollectionMetadata, CollectionSummary, DocumentMeta, NewDocument, SessionRecord,
    StoredDocument,
};
use crate::{KnowledgeError, Result};
use chrono::Utc;
use cycle_vector_store::{ChunkIndex, IndexBackend, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on `_<n>` suffixes tried for generated ids within one second
const MAX_ID_SUFFIX: usize = 10_000;

#[derive(Debug, Serialize, Deserialize)]
struct CurrentPointer {
    generation: String,
}

/// Filesystem-backed collections, documents and published indexes
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    root: PathBuf,
}

impl KnowledgeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, collection_id: &str) -> Result<CollectionPaths> {
        CollectionPaths::new(&self.root, collection_id)
    }

    /// Paths for an existing collection
    async fn existing(&self, collection_id: &str) -> Result<CollectionPaths> {
        let paths = self.paths(collection_id)?;
        if !exists(&paths.metadata()).await? {
            return Err(KnowledgeError::collection_not_found(collection_id));
        }
        Ok(paths)
    }

    /// Create a collection. It is assembled in a staging directory and renamed
    /// into place, so a failed create leaves nothing behind under `id`.
    pub async fn create_collection(
        &self,
        id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<CollectionMetadata> {
        let paths = self.paths(id)?;
        let already_exists = || KnowledgeError::AlreadyExists {
            kind: "collection",
            id: id.to_string(),
        };
        tokio::fs::create_dir_all(&self.root).await?;
        if exists(&paths.metadata()).await? {
            return Err(already_exists());
        }

        let metadata = CollectionMetadata::new(id, title, description);
        let staging = paths.staging(&staging_token());
        let staged = async {
            tokio::fs::create_dir(staging.root()).await?;
            tokio::fs::create_dir(staging.knowledge_base()).await?;
            write_json_atomic(&staging.metadata(), &metadata).await
        }
        .await;
        if let Err(err) = staged {
            remove_staging(staging.root()).await;
            return Err(err);
        }

        // Replaces an empty leftover directory; fails if `id` holds anything
        if let Err(err) = tokio::fs::rename(staging.root(), paths.root()).await {
            remove_staging(staging.root()).await;
            if exists(paths.root()).await? {
                return Err(already_exists());
            }
            return Err(err.into());
        }
        log::info!("Created collection '{title}' (id {id})");
        Ok(metadata)
    }

    pub async fn get_collection(&self, id: &str) -> Result<CollectionMetadata> {
        let paths = self.paths(id)?;
        read_json_opt(&paths.metadata())
            .await?
            .ok_or_else(|| KnowledgeError::collection_not_found(id))
    }

    /// All readable collections, sorted by id. Unreadable entries are skipped.
    pub async fn list_collections(&self) -> Result<Vec<CollectionSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // Staging directories of in-flight creates
            if validate_id("collection", &name).is_err() {
                continue;
            }
            let path = entry.path().join(METADATA_FILE);
            match read_json_opt::<CollectionMetadata>(&path).await {
                Ok(Some(metadata)) => summaries.push(metadata.summary()),
                Ok(None) => {}
                Err(err) => log::warn!("Skipping collection '{name}': {err}"),
            }
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    /// Register a session; `false` if it was already registered
    pub async fn add_session(
        &self,
        collection_id: &str,
        session_id: &str,
        info: Metadata,
    ) -> Result<bool> {
        validate_id("session", session_id)?;
        if let Some(key) = SessionRecord::RESERVED_KEYS
            .iter()
            .find(|key| info.contains_key(**key))
        {
            return Err(KnowledgeError::ReservedSessionKey((*key).to_string()));
        }
        let mut added = false;
        self.update_metadata(collection_id, |metadata| {
            if metadata
                .sessions
                .iter()
                .any(|s| s.session_id == session_id)
            {
                return;
            }
            metadata.sessions.push(SessionRecord {
                session_id: session_id.to_string(),
                added_at: Utc::now(),
                info,
            });
            added = true;
        })
        .await?;
        if added {
            log::info!("Added session '{session_id}' to collection '{collection_id}'");
        }
        Ok(added)
    }

    /// Store a document and mark the collection as needing a rebuild
    pub async fn add_document(&self, collection_id: &str, document: NewDocument) -> Result<String> {
        let paths = self.existing(collection_id).await?;
        tokio::fs::create_dir_all(paths.knowledge_base()).await?;

        let (document_id, text_tmp, _claim) = match &document.document_id {
            Some(id) => {
                validate_id("document", id)?;
                let (tmp, claim) = claim_document_id(&paths, id).await?.ok_or_else(|| {
                    KnowledgeError::DocumentExists {
                        collection_id: collection_id.to_string(),
                        document_id: id.clone(),
                    }
                })?;
                (id.clone(), tmp, claim)
            }
            None => generate_document_id(&paths).await?,
        };

        let meta = DocumentMeta {
            title: document
                .title
                .unwrap_or_else(|| format!("Document {document_id}")),
            id: document_id.clone(),
            added_at: Utc::now(),
            user_metadata: document.metadata,
        };

        let written = async {
            tokio::fs::write(&text_tmp, document.text.as_bytes()).await?;
            tokio::fs::rename(&text_tmp, paths.document_text(&document_id)).await?;
            write_json_atomic(&paths.document_meta(&document_id), &meta).await
        }
        .await;
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&text_tmp).await;
            let _ = tokio::fs::remove_file(paths.document_text(&document_id)).await;
            return Err(err);
        }

        let kb_dir = paths.knowledge_base();
        let _lock = acquire_exclusive(&paths.metadata_lock()).await?;
        let document_count = document_ids(&kb_dir).await?.len();
        self.write_metadata_locked(&paths, collection_id, |metadata| {
            metadata.knowledge_base.document_count = document_count;
            metadata.knowledge_base.last_updated = Some(Utc::now());
            metadata.knowledge_base.indexed = false;
        })
        .await?;

        log::info!(
            "Added document '{}' ({document_id}) to collection '{collection_id}'",
            meta.title
        );
        Ok(document_id)
    }

    /// Document records of a collection, sorted by id
    pub async fn list_documents(&self, collection_id: &str) -> Result<Vec<DocumentMeta>> {
        let paths = self.existing(collection_id).await?;
        let mut documents = Vec::new();
        for id in document_ids(&paths.knowledge_base()).await? {
            match read_json_opt::<DocumentMeta>(&paths.document_meta(&id)).await {
                Ok(Some(meta)) => documents.push(meta),
                Ok(None) => {}
                Err(err) => log::warn!("Skipping document '{id}' in '{collection_id}': {err}"),
            }
        }
        Ok(documents)
    }

    pub async fn get_document(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<StoredDocument> {
        let paths = self.existing(collection_id).await?;
        validate_id("document", document_id)?;
        let meta: DocumentMeta = read_json_opt(&paths.document_meta(document_id))
            .await?
            .ok_or_else(|| KnowledgeError::document_not_found(document_id))?;
        let text = match tokio::fs::read_to_string(paths.document_text(document_id)).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(KnowledgeError::document_not_found(document_id));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(StoredDocument { meta, text })
    }

    /// Every readable document with its text, sorted by id
    pub async fn load_documents(&self, collection_id: &str) -> Result<Vec<StoredDocument>> {
        let metas = self.list_documents(collection_id).await?;
        let paths = self.paths(collection_id)?;
        let mut documents = Vec::with_capacity(metas.len());
        for meta in metas {
            match tokio::fs::read_to_string(paths.document_text(&meta.id)).await {
                Ok(text) => documents.push(StoredDocument { meta, text }),
                Err(err) => log::warn!(
                    "Skipping document '{}' in '{collection_id}': {err}",
                    meta.id
                ),
            }
        }
        Ok(documents)
    }

    /// Ids of the document records currently on disk
    pub async fn document_ids(&self, collection_id: &str) -> Result<BTreeSet<String>> {
        let paths = self.existing(collection_id).await?;
        document_ids(&paths.knowledge_base()).await
    }

    /// Serialise index builds for one collection, across processes
    pub(crate) async fn lock_build(&self, collection_id: &str) -> Result<FileLock> {
        let paths = self.existing(collection_id).await?;
        acquire_exclusive(&paths.build_lock()).await
    }

    /// Read-modify-write `metadata.json` under the collection's metadata lock
    pub async fn update_metadata<F>(&self, collection_id: &str, update: F) -> Result<CollectionMetadata>
    where
        F: FnOnce(&mut CollectionMetadata) + Send,
    {
        let paths = self.existing(collection_id).await?;
        let _lock = acquire_exclusive(&paths.metadata_lock()).await?;
        self.write_metadata_locked(&paths, collection_id, update).await
    }

    /// Record a finished build. `indexed` is only set if no document appeared or
    /// vanished since `built_from` was read. Returns the stored flag.
    pub(crate) async fn record_build(
        &self,
        collection_id: &str,
        built_from: &BTreeSet<String>,
    ) -> Result<bool> {
        let paths = self.existing(collection_id).await?;
        let _lock = acquire_exclusive(&paths.metadata_lock()).await?;
        let current = document_ids(&paths.knowledge_base()).await?;
        let indexed = &current == built_from;
        if !indexed {
            log::warn!(
                "Documents changed during the build of '{collection_id}'; index left marked stale"
            );
        }
        self.write_metadata_locked(&paths, collection_id, |metadata| {
            metadata.knowledge_base.indexed = indexed;
            metadata.knowledge_base.document_count = current.len();
            metadata.knowledge_base.last_updated = Some(Utc::now());
        })
        .await?;
        Ok(indexed)
    }

    async fn write_metadata_locked<F>(
        &self,
        paths: &CollectionPaths,
        collection_id: &str,
        update: F,
    ) -> Result<CollectionMetadata>
    where
        F: FnOnce(&mut CollectionMetadata) + Send,
    {
        let mut metadata: CollectionMetadata = read_json_opt(&paths.metadata())
            .await?
            .ok_or_else(|| KnowledgeError::collection_not_found(collection_id))?;
        update(&mut metadata);
        write_json_atomic(&paths.metadata(), &metadata).await?;
        Ok(metadata)
    }

    /// Save `index` as a new generation and point `CURRENT` at it
    pub async fn publish_index(&self, collection_id: &str, index: &ChunkIndex) -> Result<String> {
        let paths = self.existing(collection_id).await?;
        let index_root = paths.index_root();
        tokio::fs::create_dir_all(&index_root).await?;

        let generation = reserve_generation(&paths).await?;
        index.save(paths.generation(&generation)).await?;

        let previous = read_current(&paths).await.ok().flatten();
        let pointer = CurrentPointer {
            generation: generation.clone(),
        };
        write_json_atomic(&paths.current_pointer(), &pointer).await?;
        log::info!(
            "Published index generation {generation} for '{collection_id}' ({} chunks)",
            index.len()
        );

        prune_generations(&index_root, &generation, previous.as_deref()).await;
        Ok(generation)
    }

    /// Currently published index, or `None` if the collection was never built
    pub async fn load_index(
        &self,
        collection_id: &str,
        backend: IndexBackend,
    ) -> Result<Option<ChunkIndex>> {
        let paths = self.existing(collection_id).await?;
        let Some(generation) = read_current(&paths).await? else {
            return Ok(None);
        };
        let index = ChunkIndex::load(paths.generation(&generation), backend).await?;
        Ok(Some(index))
    }
}

fn staging_token() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos}-{seq}", std::process::id())
}

async fn remove_staging(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => log::warn!("Failed to remove staging directory {}: {err}", dir.display()),
    }
}

async fn read_current(paths: &CollectionPaths) -> Result<Option<String>> {
    let Some(pointer) = read_json_opt::<CurrentPointer>(&paths.current_pointer()).await? else {
        return Ok(None);
    };
    validate_id("index generation", &pointer.generation)?;
    Ok(Some(pointer.generation))
}

/// Ids with both a `.txt` and a `.json` record
async fn document_ids(kb_dir: &Path) -> Result<BTreeSet<String>> {
    let mut entries = match tokio::fs::read_dir(kb_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(err.into()),
    };

    let mut ids = BTreeSet::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if validate_id("document", stem).is_err() {
            continue;
        }
        if exists(&kb_dir.join(format!("{stem}.txt"))).await? {
            ids.insert(stem.to_string());
        }
    }
    Ok(ids)
}

async fn document_taken(paths: &CollectionPaths, id: &str) -> Result<bool> {
    Ok(exists(&paths.document_text(id)).await? || exists(&paths.document_meta(id)).await?)
}

/// Reserve `id` by locking its text staging file. `None` if the id is taken
/// or another writer holds the claim. The claim lasts until the lock drops.
async fn claim_document_id(
    paths: &CollectionPaths,
    id: &str,
) -> Result<Option<(PathBuf, FileLock)>> {
    if document_taken(paths, id).await? {
        return Ok(None);
    }
    let tmp = tmp_path(&paths.document_text(id));
    let Some(claim) = try_claim(&tmp).await? else {
        return Ok(None);
    };
    // Another writer may have finished between the check and the lock
    if document_taken(paths, id).await? {
        return Ok(None);
    }
    Ok(Some((tmp, claim)))
}

/// `doc_<YYYYmmdd_HHMMSS>`, suffixed `_<n>` when taken
async fn generate_document_id(paths: &CollectionPaths) -> Result<(String, PathBuf, FileLock)> {
    let base = format!("doc_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    for n in 0..MAX_ID_SUFFIX {
        let candidate = if n == 0 {
            base.clone()
        } else {
            format!("{base}_{n}")
        };
        if let Some((tmp, claim)) = claim_document_id(paths, &candidate).await? {
            return Ok((candidate, tmp, claim));
        }
    }
    Err(KnowledgeError::Other(format!(
        "could not allocate a document id starting with {base}"
    )))
}

async fn reserve_generation(paths: &CollectionPaths) -> Result<String> {
    let base = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
    for n in 0..MAX_ID_SUFFIX {
        let candidate = if n == 0 {
            base.clone()
        } else {
            format!("{base}-{n}")
        };
        match tokio::fs::create_dir(paths.generation(&candidate)).await {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }
    }
    Err(KnowledgeError::Other(format!(
        "could not allocate an index generation starting with {base}"
    )))
}

/// Remove generation directories other than `current` and `previous`
async fn prune_generations(index_root: &Path, current: &str, previous: Option<&str>) {
    let mut entries = match tokio::fs::read_dir(index_root).await {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("Cannot list {} for pruning: {err}", index_root.display());
            return;
        }
    };
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                log::warn!("Stopped pruning {}: {err}", index_root.display());
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == current || Some(name.as_str()) == previous {
            continue;
        }
        if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => log::debug!("Pruned index generation {name}"),
            Err(err) => log::warn!("Failed to prune index generation {name}: {err}"),
        }
    }
}
