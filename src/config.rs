//! 설정 모듈
//!
//! 프로세스 시작 시 한 번 만들어 임베딩 프로바이더와 엔진 생성자에 넘깁니다.
//! 전역 상태는 두지 않습니다.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

/// 기본 임베딩 모델 (Ollama)
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// 기본 Ollama 서버 주소
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// 기본 임베딩 차원 (nomic-embed-text)
pub const DEFAULT_DIMENSION: usize = 768;

/// 질의당 반환할 문서 수
pub const DEFAULT_RESULT_LIMIT: usize = 5;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.docrag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docrag")
}

// ============================================================================
// KnowledgeConfig
// ============================================================================

/// 지식 엔진 설정
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// 임베딩 모델 이름
    pub embedding_model: String,
    /// Ollama 서버 주소
    pub ollama_url: String,
    /// 임베딩 차원 (저장소와 인덱스가 공유)
    pub embedding_dimension: usize,
    /// 데이터 저장 디렉토리
    pub data_dir: PathBuf,
    /// 질의 결과 개수
    pub result_limit: usize,
    /// 임베딩 요청 타임아웃
    pub request_timeout: Duration,
    /// 임베딩 요청 최대 재시도 횟수
    pub max_retries: u32,
    /// 인덱스 재구성 제한 시간 (None이면 무제한)
    pub index_timeout: Option<Duration>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_dimension: DEFAULT_DIMENSION,
            data_dir: get_data_dir(),
            result_limit: DEFAULT_RESULT_LIMIT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            index_timeout: None,
        }
    }
}

impl KnowledgeConfig {
    /// 기본값 위에 환경변수를 덮어써서 생성
    ///
    /// - `DOCRAG_EMBEDDING_MODEL`
    /// - `DOCRAG_OLLAMA_URL`
    /// - `DOCRAG_EMBEDDING_DIMENSION`
    /// - `DOCRAG_DATA_DIR`
    /// - `DOCRAG_RESULT_LIMIT`
    /// - `DOCRAG_INDEX_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 설정을 덮어씀
    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("DOCRAG_EMBEDDING_MODEL") {
            self.embedding_model = model;
        }

        if let Some(url) = get("DOCRAG_OLLAMA_URL") {
            self.ollama_url = url;
        }

        if let Some(dim) = get("DOCRAG_EMBEDDING_DIMENSION") {
            self.embedding_dimension = dim
                .parse()
                .with_context(|| format!("Invalid DOCRAG_EMBEDDING_DIMENSION: {}", dim))?;
        }

        if let Some(dir) = get("DOCRAG_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(limit) = get("DOCRAG_RESULT_LIMIT") {
            self.result_limit = limit
                .parse()
                .with_context(|| format!("Invalid DOCRAG_RESULT_LIMIT: {}", limit))?;
        }

        if let Some(secs) = get("DOCRAG_INDEX_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid DOCRAG_INDEX_TIMEOUT_SECS: {}", secs))?;
            self.index_timeout = Some(Duration::from_secs(secs));
        }

        self.validate()?;
        Ok(self)
    }

    /// 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            anyhow::bail!("Embedding dimension must be greater than 0");
        }
        if self.result_limit == 0 {
            anyhow::bail!("Result limit must be greater than 0");
        }
        if self.embedding_model.trim().is_empty() {
            anyhow::bail!("Embedding model name must not be empty");
        }
        self.ollama_url()?;
        Ok(())
    }

    /// 파싱된 Ollama 서버 주소
    pub fn ollama_url(&self) -> Result<Url> {
        Url::parse(&self.ollama_url)
            .with_context(|| format!("Invalid Ollama URL: {}", self.ollama_url))
    }

    /// 문서 DB 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }
}

// ============================================================================
// Tests
// ============================================================================
