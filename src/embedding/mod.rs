//! 임베딩 모듈 - Ollama API를 통한 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더 인터페이스와
//! Ollama `/api/embed` 구현체입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let config = KnowledgeConfig::from_env()?;
//! let embedder = OllamaEmbedding::from_config(&config)?;
//! let vectors = embedder.embed(&["Hello, world!".to_string()]).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::KnowledgeConfig;
use crate::error::{DimensionMismatch, EmbeddingError};
use crate::knowledge::Embedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 반환 벡터는 입력 순서와 위치가 일치해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 배치 임베딩
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// 임베딩 차원 수 (설정이 유지되는 동안 고정)
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// 프로바이더 응답을 검증하여 `Embedding`으로 변환
///
/// 개수와 각 벡터의 차원이 모두 맞아야 합니다.
pub fn validate_embeddings(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Embedding>, EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }

    vectors
        .into_iter()
        .map(|v| {
            // NaN/Inf는 JSON으로 저장할 수 없음
            if let Some(position) = v.iter().position(|x| !x.is_finite()) {
                return Err(EmbeddingError::NonFinite { position });
            }
            Embedding::new(v, dimension).map_err(EmbeddingError::from)
        })
        .collect()
}

/// 단일 텍스트 임베딩 (검증 포함)
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Embedding, EmbeddingError> {
    let vectors = provider.embed(&[text.to_string()]).await?;
    let mut embeddings = validate_embeddings(vectors, 1, provider.dimension())?;
    embeddings
        .pop()
        .ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;

/// 차원 확인용 입력
const PROBE_TEXT: &str = "dimension probe";

/// Ollama 임베딩 구현체
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    dimension: usize,
    max_retries: u32,
    initial_backoff: Duration,
}

/// Ollama 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

/// Ollama 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    /// 새 Ollama 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - Ollama 서버 주소
    /// * `model` - 임베딩 모델 이름
    /// * `dimension` - 기대 임베딩 차원
    pub fn new(base_url: &Url, model: &str, dimension: usize) -> Result<Self, EmbeddingError> {
        Self::with_timeout(base_url, model, dimension, Duration::from_secs(30))
    }

    /// 요청 타임아웃을 지정하여 생성
    pub fn with_timeout(
        base_url: &Url,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Config(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::Config(
                "Embedding model name must not be empty".to_string(),
            ));
        }

        let endpoint = base_url
            .join("/api/embed")
            .map_err(|e| EmbeddingError::Config(format!("Invalid Ollama URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            dimension,
            max_retries: 3,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &KnowledgeConfig) -> Result<Self, EmbeddingError> {
        let base_url = config
            .ollama_url()
            .map_err(|e| EmbeddingError::Config(e.to_string()))?;

        Ok(Self::with_timeout(
            &base_url,
            &config.embedding_model,
            config.embedding_dimension,
            config.request_timeout,
        )?
        .with_retries(config.max_retries))
    }

    /// 최대 재시도 횟수 지정
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 초기 백오프 지정
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 모델이 실제로 내보내는 차원 확인
    ///
    /// 샘플 문장을 한 번 임베딩하여 벡터 길이를 반환합니다.
    pub async fn detect_dimension(&self) -> Result<usize, EmbeddingError> {
        let vectors = self.request(&[PROBE_TEXT.to_string()]).await?;
        vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| EmbeddingError::MalformedResponse("no embeddings returned".to_string()))
    }

    /// 설정된 차원과 모델 차원이 같은지 확인
    pub async fn verify_dimension(&self) -> Result<(), EmbeddingError> {
        let actual = self.detect_dimension().await?;
        if actual != self.dimension {
            return Err(DimensionMismatch {
                expected: self.dimension,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// 재시도 루프 (전송 실패, 429, 5xx에서 지수 백오프)
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbedRequest {
            model: &self.model,
            inputs: texts,
        };

        let mut last_error: Option<EmbeddingError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.initial_backoff * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    "Embedding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.max_retries
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self.client.post(self.endpoint.clone()).json(&body).send().await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(EmbeddingError::Transport(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(t) => t,
                Err(e) => {
                    last_error = Some(EmbeddingError::Transport(e.to_string()));
                    continue;
                }
            };

            if status.is_success() {
                let parsed: EmbedResponse = serde_json::from_str(&text)
                    .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;
                return Ok(parsed.embeddings);
            }

            let message = serde_json::from_str::<OllamaError>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            let error = EmbeddingError::Http {
                status: status.as_u16(),
                message,
            };

            // 429와 서버 에러만 재시도
            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(error);
                continue;
            }
            return Err(error);
        }

        Err(last_error.unwrap_or_else(|| {
            EmbeddingError::Transport(format!(
                "Embedding failed after {} retries",
                self.max_retries
            ))
        }))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            "Requesting {} embeddings from {} ({})",
            texts.len(),
            self.endpoint,
            self.model
        );

        let vectors = self.request(texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
