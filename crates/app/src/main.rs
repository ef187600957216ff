use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use doc_retrieval_core::{
    clean_text, extract_text, preview, AssistantOptions, CharacterNgramEmbedder, IndexRegistry,
    IndexSummary, IngestError, LruPolicy, OpenAiEmbedder, RetrievalOptions, RetrievalOrchestrator,
    VectorProvider, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OPENAI_BASE_URL, POPULAR_GENRES,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Embedding backend
    #[arg(long, value_enum, env = "DOC_RETRIEVAL_PROVIDER", default_value = "ngram")]
    provider: ProviderKind,

    /// Chunk length in characters
    #[arg(long, env = "DOC_RETRIEVAL_CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "DOC_RETRIEVAL_CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    /// Embedding calls in flight per document
    #[arg(long, env = "DOC_RETRIEVAL_MAX_CONCURRENT_EMBEDDINGS", default_value = "4")]
    max_concurrent_embeddings: usize,

    /// Per-call embedding timeout in seconds
    #[arg(long, env = "DOC_RETRIEVAL_EMBED_TIMEOUT_SECS", default_value = "30")]
    embed_timeout_secs: u64,

    /// Input characters sent to the provider per call
    #[arg(long, env = "DOC_RETRIEVAL_MAX_INPUT_CHARS", default_value = "8000")]
    max_input_chars: usize,

    /// Keep at most this many document indexes, least recently used evicted first
    #[arg(long, env = "DOC_RETRIEVAL_MAX_INDEXES")]
    max_indexes: Option<usize>,

    /// Vector width of the local n-gram provider
    #[arg(long, env = "DOC_RETRIEVAL_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,

    /// API key for the openai provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Embedding model for the openai provider
    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    Ngram,
    Openai,
}

#[derive(Subcommand)]
enum Command {
    /// Extract and index one document.
    Index {
        /// PDF or text file.
        #[arg(long)]
        file: PathBuf,
    },
    /// Index one document and retrieve its passages most relevant to each query.
    Search {
        /// PDF or text file.
        #[arg(long)]
        file: PathBuf,
        /// Query text; repeat for several queries.
        #[arg(long, required = true)]
        query: Vec<String>,
        /// Number of passages per query.
        #[arg(long, default_value = "3")]
        top_k: usize,
        /// Print similarity scores.
        #[arg(long, default_value_t = false)]
        scores: bool,
    },
    /// List popular genres to draw recommendation interests from.
    Genres,
}

impl Cli {
    fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            max_concurrent_embeddings: self.max_concurrent_embeddings,
            embed_timeout: Duration::from_secs(self.embed_timeout_secs),
            max_input_chars: self.max_input_chars,
            ..Default::default()
        }
    }

    fn vector_provider(&self) -> anyhow::Result<Arc<dyn VectorProvider>> {
        let provider: Arc<dyn VectorProvider> = match self.provider {
            ProviderKind::Ngram => Arc::new(CharacterNgramEmbedder {
                dimensions: self.dimensions,
            }),
            ProviderKind::Openai => Arc::new(OpenAiEmbedder::new(
                &self.openai_base_url,
                self.embedding_model.as_str(),
                self.openai_api_key.clone(),
            )?),
        };
        Ok(provider)
    }

    fn registry(&self) -> IndexRegistry {
        match self.max_indexes {
            Some(capacity) => IndexRegistry::with_policy(LruPolicy::new(capacity)),
            None => IndexRegistry::new(),
        }
    }
}

struct LoadedDocument {
    id: String,
    text: String,
}

async fn load_document(path: &Path) -> anyhow::Result<LoadedDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let text = clean_text(&extract_text(&bytes, &filename)?);
    if text.is_empty() {
        return Err(IngestError::EmptyDocument(filename).into());
    }

    info!(file = %path.display(), bytes = bytes.len(), characters = text.chars().count(), "document loaded");
    Ok(LoadedDocument { id: filename, text })
}

fn print_summary(summary: &IndexSummary) {
    println!(
        "document={} chunks={} indexed={} failed={} blank={} dimension={}",
        summary.document_id,
        summary.total_chunks,
        summary.indexed_chunks,
        summary.failed_chunks,
        summary.skipped_blank,
        summary
            .dimension
            .map(|dimension| dimension.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let provider = cli.vector_provider()?;
    let orchestrator =
        RetrievalOrchestrator::with_registry(provider, cli.retrieval_options(), cli.registry())?;
    let defaults = AssistantOptions::default();

    info!(
        version = app_version,
        provider = orchestrator.provider().name(),
        eviction = orchestrator.registry().policy_name(),
        started_at = %Utc::now().to_rfc3339(),
        "doc-retrieval boot"
    );

    match &cli.command {
        Command::Genres => {
            for genre in POPULAR_GENRES {
                println!("{genre}");
            }
        }
        Command::Index { file } => {
            let document = load_document(file).await?;
            let summary = orchestrator
                .index_document(&document.id, &document.text)
                .await?;

            print_summary(&summary);
            println!("preview:\n{}", preview(&document.text, defaults.preview_chars));
        }
        Command::Search {
            file,
            query,
            top_k,
            scores,
        } => {
            let document = load_document(file).await?;
            let summary = orchestrator
                .index_document(&document.id, &document.text)
                .await?;
            print_summary(&summary);

            for question in query {
                println!("query: {question}");
                let retrieval = orchestrator
                    .retrieve_scored(&document.id, question, *top_k)
                    .await;

                if let Some(reason) = retrieval.fallback {
                    warn!(?reason, "retrieval returned no passages");
                    println!("no relevant passages ({reason:?}), using the document opening:");
                    println!(
                        "{}",
                        preview(&document.text, defaults.max_context_chars)
                    );
                    continue;
                }

                for (rank, hit) in retrieval.hits.iter().enumerate() {
                    if *scores {
                        println!(
                            "[{}] score={:.4} chunk={}",
                            rank + 1,
                            hit.score,
                            hit.chunk.index
                        );
                    } else {
                        println!("[{}] chunk={}", rank + 1, hit.chunk.index);
                    }
                    println!("{}", hit.chunk.text);
                }
            }
        }
    }

    Ok(())
}
