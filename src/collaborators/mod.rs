//! External collaborators the pipeline talks to.
//!
//! Each collaborator is an async trait so the pipeline can run against real
//! services in production and in-process fakes in tests:
//!
//! | Trait | Production implementation | Purpose |
//! |-------|---------------------------|---------|
//! | [`TextRecognizer`] | [`CloudVisionRecognizer`] | text + block geometry for a page |
//! | [`ModelClient`]    | [`LlmModelClient`]        | classification via an LLM / VLM |
//! | [`ArchiveStorage`] | [`LocalDirStorage`]       | persisting artifacts, public links |
//!
//! Handles are bundled in [`Collaborators`] and injected into
//! [`crate::process::Pipeline::new`]. Nothing here is global.

pub mod model;
pub mod recognizer;
pub mod storage;
pub mod vision;

pub use model::{LlmModelClient, ModelClient, ModelError, ModelRequest};
pub use recognizer::{NullRecognizer, RecognitionError, TextBlock, TextDetection, TextRecognizer};
pub use storage::{ArchiveStorage, LocalDirStorage, StorageError};
pub use vision::CloudVisionRecognizer;

use std::fmt;
use std::sync::Arc;

/// The set of collaborator handles one pipeline uses.
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn TextRecognizer>,
    pub model: Arc<dyn ModelClient>,
    pub storage: Arc<dyn ArchiveStorage>,
}

impl Collaborators {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        model: Arc<dyn ModelClient>,
        storage: Arc<dyn ArchiveStorage>,
    ) -> Self {
        Self {
            recognizer,
            model,
            storage,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("recognizer", &self.recognizer.name())
            .field("model", &self.model.name())
            .field("storage", &self.storage.name())
            .finish()
    }
}
