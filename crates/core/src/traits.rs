use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSummary {
    pub summary: String,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> anyhow::Result<DocumentSummary>;
}

#[async_trait]
pub trait Responder: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        context: &str,
        history: &[ChatTurn],
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookRecommendation {
    pub title: String,
    pub author: String,
    pub description: String,
    pub reason: String,
}

/// Suggests books from the reader's interests, optionally anchored on the opening of an
/// uploaded document.
#[async_trait]
pub trait Recommender: Send + Sync {
    async fn recommend(
        &self,
        interests: &str,
        based_on: Option<&str>,
    ) -> anyhow::Result<Vec<BookRecommendation>>;
}
