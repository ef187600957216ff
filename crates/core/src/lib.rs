pub mod assistant;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod traits;

pub use assistant::{DocumentAssistant, UploadReport, POPULAR_GENRES};
pub use chunking::{clean_text, normalize_whitespace, preview, split_chunks, ChunkingConfig};
pub use embeddings::{
    embed_bounded, CharacterNgramEmbedder, VectorProvider, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{AssistantError, ConfigError, IngestError, ProviderError};
pub use extractor::{extract_pdf_text, extract_text, FileKind};
pub use index::{build_index, cosine_similarity, BuiltIndex, DocumentIndex};
pub use models::{
    AssistantOptions, Chunk, DocumentRecord, Embedding, FallbackReason, IndexSummary, Retrieval,
    RetrievalOptions, ScoredChunk,
};
pub use orchestrator::RetrievalOrchestrator;
pub use providers::{OpenAiEmbedder, DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL};
pub use registry::{
    BuildGuard, EntryStats, EvictionPolicy, IndexRegistry, LruPolicy, TtlPolicy, Unbounded,
};
pub use traits::{
    BookRecommendation, ChatRole, ChatTurn, DocumentSummary, Recommender, Responder, Summarizer,
};
