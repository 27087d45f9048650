use crate::{KnowledgeError, Result};
use std::path::{Path, PathBuf};

pub(crate) const METADATA_FILE: &str = "metadata.json";
const METADATA_LOCK_FILE: &str = "metadata.lock";
const BUILD_LOCK_FILE: &str = "build.lock";
const KNOWLEDGE_BASE_DIR: &str = "knowledge_base";
const INDEX_DIR: &str = "index";
const CURRENT_FILE: &str = "CURRENT";

/// Check that `id` can be used as a single path component
pub fn validate_id(kind: &'static str, id: &str) -> Result<()> {
    let invalid = |reason| KnowledgeError::InvalidId {
        kind,
        id: id.to_string(),
        reason,
    };
    if id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if id == "." || id == ".." {
        return Err(invalid("must not be '.' or '..'"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only ASCII letters, digits, '.', '_' and '-' are allowed"));
    }
    Ok(())
}

/// On-disk locations for one collection
#[derive(Debug, Clone)]
pub(crate) struct CollectionPaths {
    root: PathBuf,
}

impl CollectionPaths {
    pub(crate) fn new(data_dir: &Path, collection_id: &str) -> Result<Self> {
        validate_id("collection", collection_id)?;
        Ok(Self {
            root: data_dir.join(collection_id),
        })
    }

    /// Sibling directory a new collection is assembled in. The `~` keeps it
    /// from ever being a valid collection id.
    pub(crate) fn staging(&self, token: &str) -> Self {
        let mut root = self.root.as_os_str().to_owned();
        root.push(format!("~creating-{token}"));
        Self {
            root: PathBuf::from(root),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn metadata(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub(crate) fn metadata_lock(&self) -> PathBuf {
        self.root.join(METADATA_LOCK_FILE)
    }

    pub(crate) fn build_lock(&self) -> PathBuf {
        self.root.join(BUILD_LOCK_FILE)
    }

    pub(crate) fn knowledge_base(&self) -> PathBuf {
        self.root.join(KNOWLEDGE_BASE_DIR)
    }

    pub(crate) fn document_text(&self, document_id: &str) -> PathBuf {
        self.knowledge_base().join(format!("{document_id}.txt"))
    }

    pub(crate) fn document_meta(&self, document_id: &str) -> PathBuf {
        self.knowledge_base().join(format!("{document_id}.json"))
    }

    pub(crate) fn index_root(&self) -> PathBuf {
        self.knowledge_base().join(INDEX_DIR)
    }

    pub(crate) fn current_pointer(&self) -> PathBuf {
        self.index_root().join(CURRENT_FILE)
    }

    pub(crate) fn generation(&self, generation: &str) -> PathBuf {
        self.index_root().join(generation)
    }
}

/// `path` with `.tmp` appended to its full file name
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
