//! Document Store - 컬렉션 단위 문서 저장소
//!
//! `DocumentStore` 트레이트는 엔진이 사용하는 저장소 인터페이스이고,
//! `SqliteDocumentStore`는 rusqlite 기반 기본 구현입니다.
//! 저장 위치: ~/.docrag/knowledge.db

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use crate::config::KnowledgeConfig;
use crate::error::{DimensionMismatch, StorageError};

use super::document::{Document, DocumentId, EmbeddedDocument, Embedding};
use super::hasher::ContentHash;

// ============================================================================
// Types
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub collection_count: usize,
    pub document_count: usize,
    pub db_path: Option<PathBuf>,
}

// ============================================================================
// DocumentStore Trait
// ============================================================================

/// 문서 저장소 트레이트
///
/// `insert`와 `create_collection`만 상태를 바꿉니다.
/// 동시 쓰기 보호는 호출자(엔진)가 담당합니다.
pub trait DocumentStore: Send + Sync {
    /// 저장소가 받는 임베딩 차원
    fn embedding_dimension(&self) -> usize;

    /// 컬렉션 존재 여부
    fn has_collection(&self, name: &str) -> Result<bool, StorageError>;

    /// 컬렉션 생성 (이미 있으면 `CollectionExists`)
    fn create_collection(&self, name: &str) -> Result<(), StorageError>;

    /// 문서 삽입 (컬렉션이 없으면 자동 생성)
    fn insert(&self, collection: &str, doc: &EmbeddedDocument)
        -> Result<DocumentId, StorageError>;

    /// 해시로 문서 조회 (중복 확인용)
    fn find_by_hash(
        &self,
        collection: &str,
        hash: &ContentHash,
    ) -> Result<Option<Document>, StorageError>;

    /// ID로 문서 조회 (없으면 `NotFound`)
    fn find_by_id(&self, collection: &str, id: &DocumentId) -> Result<Document, StorageError>;

    /// 컬렉션 이름 목록
    fn list_collections(&self) -> Result<Vec<String>, StorageError>;

    /// 컬렉션의 모든 문서 순회
    ///
    /// visitor가 `ControlFlow::Break`를 반환하면 즉시 멈춥니다.
    /// visitor 안에서 같은 저장소를 다시 호출하면 안 됩니다.
    fn for_each(
        &self,
        collection: &str,
        visitor: &mut dyn FnMut(Document) -> ControlFlow<()>,
    ) -> Result<(), StorageError>;

    /// 컬렉션의 문서 수
    fn count(&self, collection: &str) -> Result<usize, StorageError>;

    /// 저장소 통계
    fn stats(&self) -> Result<StoreStats, StorageError>;
}

// ============================================================================
// SqliteDocumentStore
// ============================================================================

const DOCUMENT_COLUMNS: &str =
    "collection, id, title, text, items, level, hash, embedding, created_at";

/// SQLite 문서 저장소
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    dimension: usize,
}

impl SqliteDocumentStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로
    /// * `dimension` - 저장할 임베딩 차원
    pub fn open(path: &Path, dimension: usize) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
            dimension,
        };

        store.initialize()?;
        Ok(store)
    }

    /// 메모리 DB로 열기 (테스트, 일회성 세션용)
    pub fn open_in_memory(dimension: usize) -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
            dimension,
        };

        store.initialize()?;
        Ok(store)
    }

    /// 설정의 데이터 디렉토리에서 열기
    pub fn open_default(config: &KnowledgeConfig) -> Result<Self, StorageError> {
        Self::open(&config.db_path(), config.embedding_dimension)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL REFERENCES collections(name),
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                items TEXT NOT NULL,
                level INTEGER NOT NULL,
                hash TEXT NOT NULL,
                embedding TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(collection, hash);
            "#,
        )?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    fn collection_exists(conn: &Connection, name: &str) -> Result<bool, StorageError> {
        let found = conn
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn create_collection_locked(conn: &Connection, name: &str) -> Result<(), StorageError> {
        if Self::collection_exists(conn, name)? {
            return Err(StorageError::CollectionExists {
                name: name.to_string(),
            });
        }

        conn.execute(
            "INSERT INTO collections (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;

        tracing::info!("Created collection '{}'", name);
        Ok(())
    }

    /// 행을 문서로 변환 (디코딩 실패는 `Serialization`)
    fn decode_row(&self, row: RawDocument) -> Result<Document, StorageError> {
        let RawDocument {
            collection,
            id,
            title,
            text,
            items,
            level,
            hash,
            embedding,
            created_at,
        } = row;

        let decode_err = |field: &'static str, message: String| StorageError::Serialization {
            id: id.clone(),
            field,
            message,
        };

        let items: Vec<String> =
            serde_json::from_str(&items).map_err(|e| decode_err("items", e.to_string()))?;

        let hash: ContentHash = hash
            .parse()
            .map_err(|e: super::hasher::ParseHashError| decode_err("hash", e.to_string()))?;

        let values: Vec<f32> = serde_json::from_str(&embedding)
            .map_err(|e| decode_err("embedding", e.to_string()))?;
        let embedding = Embedding::new(values, self.dimension)
            .map_err(|e| decode_err("embedding", e.to_string()))?;

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| decode_err("created_at", e.to_string()))?;

        Ok(Document {
            id: DocumentId::from(id),
            collection,
            title,
            text,
            items,
            level,
            hash,
            embedding,
            created_at,
        })
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn has_collection(&self, name: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        Self::collection_exists(&conn, name)
    }

    fn create_collection(&self, name: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        Self::create_collection_locked(&conn, name)
    }

    fn insert(
        &self,
        collection: &str,
        doc: &EmbeddedDocument,
    ) -> Result<DocumentId, StorageError> {
        if doc.embedding.dimension() != self.dimension {
            return Err(DimensionMismatch {
                expected: self.dimension,
                actual: doc.embedding.dimension(),
            }
            .into());
        }

        if let Some(position) = doc.embedding.as_slice().iter().position(|x| !x.is_finite()) {
            return Err(StorageError::Serialization {
                id: String::new(),
                field: "embedding",
                message: format!("non-finite value at position {}", position),
            });
        }

        let items = serde_json::to_string(&doc.content.items).map_err(|e| {
            StorageError::Serialization {
                id: String::new(),
                field: "items",
                message: e.to_string(),
            }
        })?;
        let embedding = serde_json::to_string(doc.embedding.as_slice()).map_err(|e| {
            StorageError::Serialization {
                id: String::new(),
                field: "embedding",
                message: e.to_string(),
            }
        })?;

        let conn = self.lock()?;

        if !Self::collection_exists(&conn, collection)? {
            Self::create_collection_locked(&conn, collection)?;
        }

        let id = DocumentId::generate();
        conn.execute(
            "INSERT INTO documents (collection, id, title, text, items, level, hash, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                collection,
                id.as_str(),
                doc.content.title,
                doc.content.text,
                items,
                doc.content.level,
                doc.hash.to_string(),
                embedding,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(id)
    }

    fn find_by_hash(
        &self,
        collection: &str,
        hash: &ContentHash,
    ) -> Result<Option<Document>, StorageError> {
        let raw = {
            let conn = self.lock()?;
            let sql = format!(
                "SELECT {} FROM documents WHERE collection = ?1 AND hash = ?2 LIMIT 1",
                DOCUMENT_COLUMNS
            );
            conn.query_row(&sql, params![collection, hash.to_string()], RawDocument::from_row)
                .optional()?
        };

        raw.map(|r| self.decode_row(r)).transpose()
    }

    fn find_by_id(&self, collection: &str, id: &DocumentId) -> Result<Document, StorageError> {
        let raw = {
            let conn = self.lock()?;
            let sql = format!(
                "SELECT {} FROM documents WHERE collection = ?1 AND id = ?2",
                DOCUMENT_COLUMNS
            );
            conn.query_row(&sql, params![collection, id.as_str()], RawDocument::from_row)
                .optional()?
        };

        match raw {
            Some(r) => self.decode_row(r),
            None => Err(StorageError::NotFound {
                collection: collection.to_string(),
                id: id.clone(),
            }),
        }
    }

    fn list_collections(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn for_each(
        &self,
        collection: &str,
        visitor: &mut dyn FnMut(Document) -> ControlFlow<()>,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;

        if !Self::collection_exists(&conn, collection)? {
            return Err(StorageError::CollectionNotFound {
                name: collection.to_string(),
            });
        }

        let sql = format!(
            "SELECT {} FROM documents WHERE collection = ?1 ORDER BY rowid",
            DOCUMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![collection])?;

        while let Some(row) = rows.next()? {
            let doc = self.decode_row(RawDocument::from_row(row)?)?;
            if visitor(doc).is_break() {
                break;
            }
        }

        Ok(())
    }

    fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        let conn = self.lock()?;

        let collections: i64 =
            conn.query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))?;
        let documents: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        Ok(StoreStats {
            collection_count: collections as usize,
            document_count: documents as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// 디코딩 전 행 값
struct RawDocument {
    collection: String,
    id: String,
    title: String,
    text: String,
    items: String,
    level: i64,
    hash: String,
    embedding: String,
    created_at: String,
}

impl RawDocument {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            collection: row.get(0)?,
            id: row.get(1)?,
            title: row.get(2)?,
            text: row.get(3)?,
            items: row.get(4)?,
            level: row.get(5)?,
            hash: row.get(6)?,
            embedding: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::NewDocument;
    use crate::knowledge::hasher::content_hash;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn create_test_store() -> (TempDir, SqliteDocumentStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteDocumentStore::open(&db_path, DIM).unwrap();
        (dir, store)
    }

    fn embedded(title: &str, fill: f32) -> EmbeddedDocument {
        let content = NewDocument::new(title, format!("{} body", title))
            .with_items(["one", "two"])
            .with_level(2);
        EmbeddedDocument {
            hash: content_hash(&content),
            content,
            embedding: Embedding::new(vec![fill; DIM], DIM).unwrap(),
        }
    }

    #[test]
    fn test_create_collection() {
        let (_dir, store) = create_test_store();

        assert!(!store.has_collection("docs").unwrap());
        store.create_collection("docs").unwrap();
        assert!(store.has_collection("docs").unwrap());

        let err = store.create_collection("docs").unwrap_err();
        assert!(matches!(err, StorageError::CollectionExists { .. }));
    }

    #[test]
    fn test_insert_and_find_by_id() {
        let (_dir, store) = create_test_store();
        let doc = embedded("Intro", 0.5);

        let id = store.insert("docs", &doc).unwrap();
        let found = store.find_by_id("docs", &id).unwrap();

        assert_eq!(found.id, id);
        assert_eq!(found.collection, "docs");
        assert_eq!(found.content(), doc.content);
        assert_eq!(found.hash, doc.hash);
        assert_eq!(found.embedding, doc.embedding);
    }

    #[test]
    fn test_insert_creates_collection() {
        let (_dir, store) = create_test_store();
        store.insert("auto", &embedded("A", 0.1)).unwrap();
        assert!(store.has_collection("auto").unwrap());
    }

    #[test]
    fn test_find_by_id_missing() {
        let (_dir, store) = create_test_store();
        store.create_collection("docs").unwrap();

        let err = store
            .find_by_id("docs", &DocumentId::from("missing"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ids_are_scoped_to_collection() {
        let (_dir, store) = create_test_store();
        let id = store.insert("a", &embedded("A", 0.1)).unwrap();
        store.create_collection("b").unwrap();

        assert!(store.find_by_id("b", &id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_find_by_hash() {
        let (_dir, store) = create_test_store();
        let doc = embedded("Intro", 0.5);
        store.insert("docs", &doc).unwrap();

        assert!(store.find_by_hash("docs", &doc.hash).unwrap().is_some());
        // 다른 컬렉션에서는 중복 키가 아님
        assert!(store.find_by_hash("other", &doc.hash).unwrap().is_none());
    }

    #[test]
    fn test_list_collections() {
        let (_dir, store) = create_test_store();
        store.create_collection("b").unwrap();
        store.create_collection("a").unwrap();

        assert_eq!(store.list_collections().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_for_each_visits_all_and_stops_early() {
        let (_dir, store) = create_test_store();
        for i in 0..5 {
            store
                .insert("docs", &embedded(&format!("Doc {}", i), i as f32))
                .unwrap();
        }

        let mut titles = Vec::new();
        store
            .for_each("docs", &mut |doc| {
                titles.push(doc.title);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(titles, vec!["Doc 0", "Doc 1", "Doc 2", "Doc 3", "Doc 4"]);

        let mut seen = 0;
        store
            .for_each("docs", &mut |_| {
                seen += 1;
                if seen == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_for_each_unknown_collection() {
        let (_dir, store) = create_test_store();
        let err = store
            .for_each("nope", &mut |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, StorageError::CollectionNotFound { .. }));
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() {
        let (_dir, store) = create_test_store();
        let mut doc = embedded("Intro", 0.5);
        doc.embedding = Embedding::new(vec![0.0; DIM + 1], DIM + 1).unwrap();

        let err = store.insert("docs", &doc).unwrap_err();
        assert!(matches!(err, StorageError::Dimension(_)));
        assert_eq!(store.count("docs").unwrap(), 0);
    }

    #[test]
    fn test_insert_rejects_non_finite_embedding() {
        let (_dir, store) = create_test_store();
        let mut doc = embedded("Bad", 0.5);
        doc.embedding = Embedding::new(vec![0.0, f32::NAN, 0.0, 0.0], DIM).unwrap();

        let err = store.insert("docs", &doc).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Serialization {
                field: "embedding",
                ..
            }
        ));
        assert_eq!(store.count("docs").unwrap(), 0);
        assert!(store.find_by_hash("docs", &doc.hash).unwrap().is_none());
    }

    #[test]
    fn test_malformed_embedding_is_an_error() {
        let (_dir, store) = create_test_store();
        let id = store.insert("docs", &embedded("Intro", 0.5)).unwrap();

        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE documents SET embedding = '[\"x\", 1]' WHERE id = ?1",
                params![id.as_str()],
            )
            .unwrap();
        }

        let err = store.find_by_id("docs", &id).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Serialization {
                field: "embedding",
                ..
            }
        ));
    }

    #[test]
    fn test_stored_embedding_with_wrong_length_is_an_error() {
        let (_dir, store) = create_test_store();
        let id = store.insert("docs", &embedded("Intro", 0.5)).unwrap();

        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE documents SET embedding = '[0.1, 0.2]' WHERE id = ?1",
                params![id.as_str()],
            )
            .unwrap();
        }

        let result = store.for_each("docs", &mut |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(StorageError::Serialization { .. })));
    }

    #[test]
    fn test_reopen_keeps_documents() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("knowledge.db");

        let id = {
            let store = SqliteDocumentStore::open(&db_path, DIM).unwrap();
            store.insert("docs", &embedded("Intro", 0.5)).unwrap()
        };

        let store = SqliteDocumentStore::open(&db_path, DIM).unwrap();
        assert_eq!(store.find_by_id("docs", &id).unwrap().title, "Intro");
    }

    #[test]
    fn test_stats() {
        let store = SqliteDocumentStore::open_in_memory(DIM).unwrap();
        store.insert("a", &embedded("A", 0.1)).unwrap();
        store.insert("b", &embedded("B", 0.2)).unwrap();
        store.insert("b", &embedded("C", 0.3)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.collection_count, 2);
        assert_eq!(stats.document_count, 3);
        assert!(stats.db_path.is_none());
        assert_eq!(store.count("b").unwrap(), 2);
    }
}
