//! docrag - 문서 지식베이스 검색 엔진
//!
//! 파싱된 문서를 컬렉션 단위로 저장하고 콘텐츠 해시로 중복을 제거하며,
//! 임베딩 최근접 검색으로 질문에 맞는 문서를 찾습니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;

// Re-exports
pub use config::{get_data_dir, KnowledgeConfig};
pub use embedding::{EmbeddingProvider, OllamaEmbedding};
pub use error::{DimensionMismatch, EmbeddingError, IndexError, KnowledgeError, StorageError};
pub use knowledge::{
    content_hash, ContentHash, Document, DocumentId, DocumentStore, EngineOptions,
    IngestOutcome, IngestReport, KnowledgeEngine, NewDocument, RankedDocument,
    SqliteDocumentStore, VectorIndex,
};
