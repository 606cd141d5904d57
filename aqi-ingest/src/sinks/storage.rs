use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::PathBuf,
    sync::Mutex,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("series csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid stream id '{0}'")]
    InvalidStream(String),
}

/// Independent append-only byte logs keyed by stream id (one per sensor).
pub trait SeriesStorage {
    /// All streams currently present, sorted.
    fn stream_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Full contents of a stream, or `None` if it was never written.
    fn load(&self, stream: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Appends bytes to a stream, creating it if needed.
    fn append(&self, stream: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// One `<stream>.csv` file per stream inside a data directory.
#[derive(Debug, Clone)]
pub struct DirStorage {
    dir: PathBuf,
}

const SERIES_EXTENSION: &str = "csv";

impl DirStorage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, stream: &str) -> Result<PathBuf, StoreError> {
        if stream.is_empty()
            || stream.contains(['/', '\\'])
            || stream.starts_with('.')
        {
            return Err(StoreError::InvalidStream(stream.to_string()));
        }
        Ok(self.dir.join(format!("{stream}.{SERIES_EXTENSION}")))
    }
}

impl SeriesStorage for DirStorage {
    fn stream_ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SERIES_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load(&self, stream: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(stream)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn append(&self, stream: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(stream)?;
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }
}

/// In-process storage, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    streams: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a stream's contents.
    pub fn insert(&self, stream: &str, bytes: impl Into<Vec<u8>>) {
        self.lock().insert(stream.to_string(), bytes.into());
    }

    pub fn contents(&self, stream: &str) -> Option<Vec<u8>> {
        self.lock().get(stream).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.streams.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SeriesStorage for MemoryStorage {
    fn stream_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }

    fn load(&self, stream: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.contents(stream))
    }

    fn append(&self, stream: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.lock()
            .entry(stream.to_string())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }
}
