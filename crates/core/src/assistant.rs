use crate::chunking::{clean_text, preview, truncate_chars};
use crate::embeddings::VectorProvider;
use crate::error::{AssistantError, IngestError};
use crate::extractor::extract_text;
use crate::models::{AssistantOptions, DocumentRecord};
use crate::orchestrator::RetrievalOrchestrator;
use crate::traits::{
    BookRecommendation, ChatTurn, DocumentSummary, Recommender, Responder, Summarizer,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub const POPULAR_GENRES: [&str; 18] = [
    "Science Fiction",
    "Fantasy",
    "Mystery & Thriller",
    "Romance",
    "Historical Fiction",
    "Non-Fiction",
    "Biography & Memoir",
    "Self-Help & Personal Development",
    "Business & Economics",
    "Science & Technology",
    "Philosophy",
    "Psychology",
    "True Crime",
    "Horror",
    "Young Adult",
    "Literary Fiction",
    "Adventure",
    "Classics",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReport {
    pub document_id: String,
    pub filename: String,
    pub file_size: usize,
    pub checksum: String,
    pub total_chunks: usize,
    pub indexed_chunks: usize,
    pub preview: String,
}

/// Caller-side policy around the retrieval core: keeps uploaded document text, falls back to
/// the opening of the document when retrieval finds nothing, and forwards to the collaborators.
pub struct DocumentAssistant<P, S, R, C> {
    retrieval: RetrievalOrchestrator<P>,
    summarizer: S,
    responder: R,
    recommender: C,
    documents: RwLock<HashMap<String, DocumentRecord>>,
    options: AssistantOptions,
}

impl<P, S, R, C> DocumentAssistant<P, S, R, C>
where
    P: VectorProvider,
    S: Summarizer,
    R: Responder,
    C: Recommender,
{
    pub fn new(
        retrieval: RetrievalOrchestrator<P>,
        summarizer: S,
        responder: R,
        recommender: C,
        options: AssistantOptions,
    ) -> Self {
        Self {
            retrieval,
            summarizer,
            responder,
            recommender,
            documents: RwLock::new(HashMap::new()),
            options,
        }
    }

    pub fn retrieval(&self) -> &RetrievalOrchestrator<P> {
        &self.retrieval
    }

    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReport, AssistantError> {
        if bytes.is_empty() {
            return Err(AssistantError::InvalidRequest(format!("{filename} is empty")));
        }
        if bytes.len() > self.options.max_file_bytes {
            return Err(AssistantError::InvalidRequest(format!(
                "{filename} is {} bytes, the limit is {}",
                bytes.len(),
                self.options.max_file_bytes
            )));
        }

        let text = clean_text(&extract_text(bytes, filename)?);
        let length = text.chars().count();
        if length < self.options.min_document_chars {
            return Err(IngestError::ContentTooShort {
                length,
                minimum: self.options.min_document_chars,
            }
            .into());
        }

        let document_id = Uuid::new_v4().to_string();
        let summary = self
            .retrieval
            .index_document(&document_id, &text)
            .await
            .map_err(IngestError::from)?;

        let checksum = format!("{:x}", Sha256::digest(bytes));
        let report = UploadReport {
            document_id: document_id.clone(),
            filename: filename.to_string(),
            file_size: bytes.len(),
            checksum: checksum.clone(),
            total_chunks: summary.total_chunks,
            indexed_chunks: summary.indexed_chunks,
            preview: preview(&text, self.options.preview_chars),
        };

        let record = DocumentRecord {
            document_id: document_id.clone(),
            filename: filename.to_string(),
            text,
            checksum,
            file_size: bytes.len(),
            uploaded_at: Utc::now(),
            chunk_count: summary.total_chunks,
        };
        self.documents.write().await.insert(document_id.clone(), record);

        info!(
            document_id = %document_id,
            filename,
            characters = length,
            indexed = summary.indexed_chunks,
            "document uploaded"
        );
        Ok(report)
    }

    pub async fn document(&self, document_id: &str) -> Option<DocumentRecord> {
        self.documents.read().await.get(document_id).cloned()
    }

    pub async fn ask(
        &self,
        document_id: &str,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<String, AssistantError> {
        let question = question.trim();
        if question.chars().count() < self.options.min_question_chars {
            return Err(AssistantError::InvalidRequest(
                "question is too short".to_string(),
            ));
        }

        let text = self.document_text(document_id).await?;
        let passages = self
            .retrieval
            .retrieve(document_id, question, self.retrieval.options().top_k)
            .await;

        let context = if passages.is_empty() {
            warn!(document_id, "no relevant passages, using the document opening");
            truncate_chars(&text, self.options.max_context_chars).to_string()
        } else {
            truncate_chars(&passages.join("\n\n"), self.options.max_context_chars).to_string()
        };

        let answer = self.responder.answer(question, &context, history).await?;
        if answer.trim().is_empty() {
            return Err(anyhow::anyhow!("responder returned an empty answer").into());
        }
        Ok(answer)
    }

    pub async fn summarize(&self, document_id: &str) -> Result<DocumentSummary, AssistantError> {
        let text = self.document_text(document_id).await?;
        let input = truncate_chars(&text, self.options.summary_input_chars);
        Ok(self.summarizer.summarize(input).await?)
    }

    pub async fn recommend(
        &self,
        interests: &str,
        based_on: Option<&str>,
    ) -> Result<Vec<BookRecommendation>, AssistantError> {
        let interests = interests.trim();
        if interests.chars().count() < self.options.min_interest_chars {
            return Err(AssistantError::InvalidRequest(format!(
                "interests need at least {} characters",
                self.options.min_interest_chars
            )));
        }

        let mut context = None;
        if let Some(document_id) = based_on {
            match self.document_text(document_id).await {
                Ok(text) => {
                    context = Some(
                        truncate_chars(&text, self.options.recommendation_context_chars)
                            .to_string(),
                    );
                }
                Err(_) => warn!(document_id, "unknown document, recommending from interests only"),
            }
        }

        let recommendations: Vec<BookRecommendation> = self
            .recommender
            .recommend(interests, context.as_deref())
            .await?
            .into_iter()
            .filter(|recommendation| {
                let keep = !recommendation.title.trim().is_empty();
                if !keep {
                    warn!("dropping recommendation without a title");
                }
                keep
            })
            .collect();

        if recommendations.is_empty() {
            return Err(anyhow::anyhow!("no recommendations generated").into());
        }
        info!(count = recommendations.len(), "generated recommendations");
        Ok(recommendations)
    }

    pub async fn delete(&self, document_id: &str) {
        self.documents.write().await.remove(document_id);
        self.retrieval.delete(document_id).await;
    }

    async fn document_text(&self, document_id: &str) -> Result<String, AssistantError> {
        self.documents
            .read()
            .await
            .get(document_id)
            .map(|record| record.text.clone())
            .ok_or_else(|| AssistantError::NotFound(document_id.to_string()))
    }
}
