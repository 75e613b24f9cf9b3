//! Relevance Index: picks the tables a question is about by embedding
//! similarity, so the agent only sees the schema it needs.

pub mod embedder;
pub mod index;
pub mod registry;

pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use index::RelevantTables;
pub use registry::SchemaIndexRegistry;
