//! 에러 타입 정의
//!
//! 저장소, 임베딩, 인덱스 단계별로 에러를 구분합니다.
//! 라이브러리 코드는 타입이 있는 에러를 반환하고,
//! CLI 계층에서만 anyhow로 감쌉니다.

use thiserror::Error;

use crate::knowledge::DocumentId;

// ============================================================================
// Dimension Mismatch
// ============================================================================

/// 벡터 차원 불일치
///
/// 저장소, 임베딩, 인덱스 에러가 공통으로 감싸는 값입니다.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("expected {expected} dimensions, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

// ============================================================================
// StorageError
// ============================================================================

/// 문서 저장소 에러
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Collection already exists: {name}")]
    CollectionExists { name: String },

    #[error("Collection not found: {name}")]
    CollectionNotFound { name: String },

    #[error("Document {id} not found in collection '{collection}'")]
    NotFound { collection: String, id: DocumentId },

    #[error("Failed to decode field '{field}' of document {id}: {message}")]
    Serialization {
        id: String,
        field: &'static str,
        message: String,
    },

    #[error("Embedding dimension mismatch: {0}")]
    Dimension(#[from] DimensionMismatch),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// id 조회 실패 여부 (제어 흐름용)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// ============================================================================
// EmbeddingError
// ============================================================================

/// 임베딩 프로바이더 에러
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding provider unreachable: {0}")]
    Transport(String),

    #[error("Embedding provider returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("Embedding count mismatch: sent {expected} inputs, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding dimension mismatch: {0}")]
    Dimension(#[from] DimensionMismatch),

    #[error("Embedding contains a non-finite value at position {position}")]
    NonFinite { position: usize },

    #[error("Invalid embedding configuration: {0}")]
    Config(String),
}

// ============================================================================
// IndexError
// ============================================================================

/// 벡터 인덱스 에러
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index has not been built yet")]
    NotBuilt,

    #[error("Invalid result count k={0}, must be at least 1")]
    InvalidK(usize),

    #[error("Vector dimension mismatch: {0}")]
    Dimension(#[from] DimensionMismatch),

    #[error("Index build timed out after {visited} documents")]
    Timeout { visited: usize },
}

// ============================================================================
// KnowledgeError
// ============================================================================

/// 엔진 수준 에러 (수집/검색 호출자에게 반환)
#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let err = EmbeddingError::from(DimensionMismatch {
            expected: 384,
            actual: 256,
        });
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 384 dimensions, got 256"
        );
    }

    #[test]
    fn test_knowledge_error_is_transparent() {
        let err = KnowledgeError::from(IndexError::NotBuilt);
        assert_eq!(err.to_string(), "Index has not been built yet");
    }

    #[test]
    fn test_not_found_flag() {
        let err = StorageError::NotFound {
            collection: "docs".to_string(),
            id: DocumentId::from("abc"),
        };
        assert!(err.is_not_found());
        assert!(!StorageError::LockPoisoned.is_not_found());
    }
}
