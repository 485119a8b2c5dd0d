//! Background fact extraction

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::db::FactStore;
use crate::llm::{ChatCompletion, CompletionRequest};
use crate::planner::{prompts, string_list};

/// How long shutdown waits for extraction tasks
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns fact extraction after each exchange and tracks the tasks
pub struct FactExtractor {
    chat: Arc<dyn ChatCompletion>,
    model: String,
    store: Arc<dyn FactStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl FactExtractor {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatCompletion>, model: impl Into<String>, store: Arc<dyn FactStore>) -> Self {
        Self {
            chat,
            model: model.into(),
            store,
            tasks: Vec::new(),
        }
    }

    /// Extract facts from one exchange without blocking the caller
    pub fn spawn(&mut self, user: &str, assistant: &str) {
        self.reap();

        let chat = Arc::clone(&self.chat);
        let store = Arc::clone(&self.store);
        let request = CompletionRequest::classifier(&self.model, prompts::fact_extraction(user, assistant))
            .with_max_tokens(200);

        self.tasks.push(tokio::spawn(async move {
            let reply = match chat.complete(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::debug!(error = %e, "fact extraction call failed");
                    return;
                }
            };

            let facts = string_list(&reply);
            if facts.is_empty() {
                return;
            }

            // The store is synchronous SQLite
            match tokio::task::spawn_blocking(move || store.append_facts(&facts)).await {
                Ok(Ok(added)) if added > 0 => tracing::info!(added, "facts remembered"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to store facts"),
                Err(e) => tracing::warn!(error = %e, "fact store task failed"),
            }
        }));
    }

    /// Drop handles of finished tasks
    pub fn reap(&mut self) {
        self.tasks.retain(|task| !task.is_finished());
    }

    /// Tasks still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Wait for outstanding tasks, aborting any still running at the deadline
    pub async fn shutdown(&mut self, timeout: Duration) {
        let tasks = std::mem::take(&mut self.tasks);
        if tasks.is_empty() {
            return;
        }

        let count = tasks.len();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(tasks)).await.is_err() {
            tracing::warn!(count, "fact extraction still running at shutdown, aborting");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::db::{FactRepo, init_memory};
    use crate::llm::TokenStream;
    use crate::{Error, Result};

    struct Slow(Duration, &'static str);

    #[async_trait]
    impl ChatCompletion for Slow {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok(self.1.to_string())
        }

        async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
            Err(Error::Llm("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn stores_extracted_facts() {
        let repo = Arc::new(FactRepo::new(init_memory().unwrap()));
        let mut extractor = FactExtractor::new(
            Arc::new(Slow(Duration::ZERO, r#"["Name is Sam", "Lives in Lisbon"]"#)),
            "small",
            repo.clone(),
        );

        extractor.spawn("I'm Sam, from Lisbon", "Nice to meet you, Sam!");
        extractor.shutdown(SHUTDOWN_JOIN_TIMEOUT).await;

        assert_eq!(repo.list_facts().unwrap(), vec!["Name is Sam", "Lives in Lisbon"]);
        assert_eq!(extractor.pending(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_bounded() {
        let repo = Arc::new(FactRepo::new(init_memory().unwrap()));
        let mut extractor = FactExtractor::new(
            Arc::new(Slow(Duration::from_secs(60), r#"["never"]"#)),
            "small",
            repo.clone(),
        );

        extractor.spawn("hi", "hello");
        let started = std::time::Instant::now();
        extractor.shutdown(Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(repo.list_facts().unwrap().is_empty());
    }
}
