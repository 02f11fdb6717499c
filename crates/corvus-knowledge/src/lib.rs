pub mod chunking;
pub mod db;
pub mod embedder_client;
pub mod error;
pub mod indexer;
pub mod memory;
pub mod pool;
pub mod ranking;
pub mod search;
pub mod thai_tokenizer_client;
pub mod types;
pub mod vector_client;

pub use embedder_client::EmbedderClient;
pub use error::{KnowledgeError, Result};
pub use memory::{KnowledgeStore, LearnRequest};
pub use pool::KnowledgePool;
pub use search::{SearchEngine, SearchQuery};
pub use thai_tokenizer_client::ThaiTokenizerClient;
pub use types::{Chunk, Document, SearchFilter, SearchHit, SearchMode, SyncStatus};
pub use vector_client::VectorStoreClient;
