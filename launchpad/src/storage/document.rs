//! Single-writer JSON documents
//!
//! Every mutation reloads the full document from disk, applies the change and
//! atomically rewrites the file, all while holding the document's writer
//! lock. Two concurrent updates therefore never lose each other's keys.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::errors::LaunchpadError;
use crate::filesys::file::File;

/// A JSON document persisted in a single file
#[derive(Debug)]
pub struct JsonDocument<T> {
    file: File,
    writer: Mutex<()>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(file: File) -> Self {
        Self {
            file,
            writer: Mutex::new(()),
            _doc: PhantomData,
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Read the current snapshot; a missing file reads as the default document
    pub async fn load(&self) -> Result<T, LaunchpadError> {
        self.file.read_json_or_default().await
    }

    /// Reload, mutate and rewrite the document under the writer lock.
    ///
    /// Nothing is written when `mutate` returns an error.
    pub async fn update<R, F>(&self, mutate: F) -> Result<R, LaunchpadError>
    where
        F: FnOnce(&mut T) -> Result<R, LaunchpadError>,
    {
        let _guard = self.writer.lock().await;

        let mut doc = self.load().await?;
        let result = mutate(&mut doc)?;
        self.file.write_json(&doc).await?;
        Ok(result)
    }
}
