pub mod openai;

pub use openai::{OpenAiEmbedder, DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL};
