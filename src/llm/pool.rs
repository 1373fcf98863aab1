//! Lazily built, shared LLM clients keyed by provider, model kind and temperature.

use super::openai_chat::OpenAiChat;
use super::rate_limit::{retry_rate_limited, RateLimiter};
use super::{CompletionRequest, LlmClient, ModelKind};
use crate::config::{LlmProvider, LlmSettings};
use crate::error::Result;
use crate::openai::{azure_config, create_client_with_timeout, openai_config};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Cache key for a pooled client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub provider: LlmProvider,
    pub kind: ModelKind,
    /// Temperature in hundredths, so the key stays hashable.
    pub temperature: u32,
}

impl PoolKey {
    pub fn new(provider: LlmProvider, kind: ModelKind, temperature: f32) -> Self {
        Self {
            provider,
            kind,
            temperature: (temperature.max(0.0) * 100.0).round() as u32,
        }
    }
}

type Factory = dyn Fn(&PoolKey) -> Result<Arc<dyn LlmClient>> + Send + Sync;

/// Routes completion requests to pooled clients, with rate limiting and
/// transparent rate-limit retries.
pub struct ClientPool {
    settings: LlmSettings,
    clients: Mutex<HashMap<PoolKey, Arc<dyn LlmClient>>>,
    factory: Box<Factory>,
    limiter: Arc<RateLimiter>,
}

impl ClientPool {
    /// Pool backed by the configured OpenAI-compatible provider.
    pub fn new(settings: LlmSettings) -> Self {
        let factory_settings = settings.clone();
        Self::with_factory(settings, move |key| build_client(&factory_settings, key.kind))
    }

    /// Pool with a custom client factory.
    pub fn with_factory(
        settings: LlmSettings,
        factory: impl Fn(&PoolKey) -> Result<Arc<dyn LlmClient>> + Send + Sync + 'static,
    ) -> Self {
        let limiter = RateLimiter::for_provider(settings.provider, settings.requests_per_minute);
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
            limiter,
        }
    }

    /// Get or build the client for a key. The lock is never held across an await.
    pub fn client(&self, key: PoolKey) -> Result<Arc<dyn LlmClient>> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        debug!("Building LLM client for {:?}", key);
        let client = (self.factory)(&key)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Number of distinct clients built so far.
    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn model_for(settings: &LlmSettings, kind: ModelKind) -> String {
    match kind {
        ModelKind::Writer => settings.model.clone(),
        ModelKind::Structured => settings.structured_model.clone(),
        ModelKind::Long => settings.long_model.clone(),
    }
}

fn build_client(settings: &LlmSettings, kind: ModelKind) -> Result<Arc<dyn LlmClient>> {
    let model = model_for(settings, kind);
    let timeout = Duration::from_secs(settings.timeout_secs);
    Ok(match settings.provider {
        LlmProvider::AzureOpenAi => {
            let client = create_client_with_timeout(azure_config(settings, &model)?, timeout)?;
            Arc::new(OpenAiChat::new(client, model))
        }
        _ => {
            let client = create_client_with_timeout(openai_config(settings)?, timeout)?;
            Arc::new(OpenAiChat::new(client, model))
        }
    })
}

#[async_trait]
impl LlmClient for ClientPool {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let key = PoolKey::new(self.settings.provider, request.kind, request.temperature);
        let client = self.client(key)?;
        retry_rate_limited(&request.tag, self.settings.rate_limit_retries, || {
            let client = client.clone();
            let limiter = self.limiter.clone();
            async move {
                limiter.acquire().await;
                client.complete(request).await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PanelistError;
    use crate::llm::ChatMessage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for Flaky {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PanelistError::RateLimited {
                    message: "try again in 1ms".to_string(),
                    retry_after: Some(Duration::from_millis(1)),
                })
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn request(kind: ModelKind, temperature: f32) -> CompletionRequest {
        CompletionRequest {
            tag: "test".to_string(),
            messages: vec![ChatMessage::user("hi")],
            kind,
            temperature,
            json_mode: false,
        }
    }

    #[tokio::test]
    async fn test_pool_reuses_clients_per_key() {
        let built = Arc::new(AtomicU32::new(0));
        let counter = built.clone();
        let settings = LlmSettings {
            provider: LlmProvider::Ollama,
            requests_per_minute: 0,
            ..Default::default()
        };
        let pool = ClientPool::with_factory(settings, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Flaky {
                calls: AtomicU32::new(1),
            }) as Arc<dyn LlmClient>)
        });

        pool.complete(&request(ModelKind::Writer, 0.7)).await.unwrap();
        pool.complete(&request(ModelKind::Writer, 0.7)).await.unwrap();
        pool.complete(&request(ModelKind::Structured, 0.2)).await.unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_pool_retries_rate_limits() {
        let settings = LlmSettings {
            provider: LlmProvider::Groq,
            requests_per_minute: 0,
            rate_limit_retries: 2,
            ..Default::default()
        };
        let pool = ClientPool::with_factory(settings, |_| {
            Ok(Arc::new(Flaky {
                calls: AtomicU32::new(0),
            }) as Arc<dyn LlmClient>)
        });
        let out = pool.complete(&request(ModelKind::Writer, 0.5)).await.unwrap();
        assert_eq!(out, "ok");
    }

    #[test]
    fn test_pool_key_quantizes_temperature() {
        let a = PoolKey::new(LlmProvider::OpenAi, ModelKind::Writer, 0.7);
        let b = PoolKey::new(LlmProvider::OpenAi, ModelKind::Writer, 0.70001);
        assert_eq!(a, b);
    }
}
