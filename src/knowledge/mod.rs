//! Knowledge 모듈 - 문서 지식베이스 검색 엔진
//!
//! - Hasher: 콘텐츠 해시로 컬렉션 내 중복 제거
//! - Store: 컬렉션 단위 문서 저장소 (SQLite)
//! - Vector: 인메모리 평면 L2 인덱스
//! - Engine: 수집/질의 오케스트레이션

mod document;
mod engine;
mod hasher;
mod store;
mod vector;

// Re-exports
pub use document::{Document, DocumentId, EmbeddedDocument, Embedding, NewDocument, RankedDocument};
pub use engine::{
    EngineOptions, EngineStats, IndexEntry, IngestOutcome, IngestReport, KnowledgeEngine,
};
pub use hasher::{content_hash, ContentHash, ParseHashError};
pub use store::{DocumentStore, SqliteDocumentStore, StoreStats};
pub use vector::{squared_l2, VectorIndex};
