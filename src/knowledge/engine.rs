//! Knowledge Engine - 수집과 질의 오케스트레이션
//!
//! 수집: 콘텐츠 → 해시 → 중복 확인 → 임베딩(새 문서만) → 저장
//! 질의: 인덱스 재구성 → 질문 임베딩 → 최근접 검색 → 문서 조회 → 거리순 정렬
//!
//! 저장소 접근은 엔진 내부 RwLock으로 직렬화합니다.
//! - 쓰기 잠금: 컬렉션 생성, 문서 삽입
//! - 읽기 잠금: 인덱스 재구성부터 검색 결과 조회까지

use std::ops::ControlFlow;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::KnowledgeConfig;
use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::{DimensionMismatch, EmbeddingError, IndexError, KnowledgeError, StorageError};

use super::document::{DocumentId, EmbeddedDocument, NewDocument, RankedDocument};
use super::hasher::{content_hash, ContentHash};
use super::store::{DocumentStore, StoreStats};
use super::vector::VectorIndex;

// ============================================================================
// Types
// ============================================================================

/// 엔진 옵션
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 질의 결과 개수
    pub result_limit: usize,
    /// 인덱스 재구성 제한 시간
    pub index_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            result_limit: crate::config::DEFAULT_RESULT_LIMIT,
            index_timeout: None,
        }
    }
}

impl From<&KnowledgeConfig> for EngineOptions {
    fn from(config: &KnowledgeConfig) -> Self {
        Self {
            result_limit: config.result_limit,
            index_timeout: config.index_timeout,
        }
    }
}

/// 수집 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 새로 저장됨
    Inserted { id: DocumentId, hash: ContentHash },
    /// 같은 해시의 문서가 이미 있음 (아무 것도 하지 않음)
    AlreadyPresent { id: DocumentId, hash: ContentHash },
}

impl IngestOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }

    pub fn hash(&self) -> &ContentHash {
        match self {
            Self::Inserted { hash, .. } | Self::AlreadyPresent { hash, .. } => hash,
        }
    }
}

/// 배치 수집의 문서별 결과
#[derive(Debug)]
pub struct IngestReport {
    /// 배치 내 위치
    pub index: usize,
    pub title: String,
    pub result: Result<IngestOutcome, KnowledgeError>,
}

/// 인덱스 위치가 가리키는 문서
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub collection: String,
    pub id: DocumentId,
}

/// 한 번의 빌드로 만들어진 인덱스와 위치 매핑
#[derive(Debug)]
struct IndexSnapshot {
    index: VectorIndex,
    entries: Vec<IndexEntry>,
}

/// 엔진 통계
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub store: StoreStats,
    pub indexed_vectors: usize,
    pub embedding_dimension: usize,
    pub provider: String,
}

// ============================================================================
// KnowledgeEngine
// ============================================================================

/// 지식 검색 엔진
pub struct KnowledgeEngine {
    store: Box<dyn DocumentStore>,
    embedder: Box<dyn EmbeddingProvider>,
    options: EngineOptions,
    store_lock: RwLock<()>,
    snapshot: StdRwLock<Option<Arc<IndexSnapshot>>>,
}

impl KnowledgeEngine {
    /// 새 엔진 생성
    ///
    /// 저장소와 프로바이더의 임베딩 차원이 다르면 실패합니다.
    pub fn new(
        store: Box<dyn DocumentStore>,
        embedder: Box<dyn EmbeddingProvider>,
        options: EngineOptions,
    ) -> Result<Self, KnowledgeError> {
        if store.embedding_dimension() != embedder.dimension() {
            return Err(EmbeddingError::from(DimensionMismatch {
                expected: store.embedding_dimension(),
                actual: embedder.dimension(),
            })
            .into());
        }

        Ok(Self {
            store,
            embedder,
            options,
            store_lock: RwLock::new(()),
            snapshot: StdRwLock::new(None),
        })
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// 문서 수집
    ///
    /// 같은 컬렉션에 같은 해시가 있으면 `AlreadyPresent`를 반환하고 끝냅니다.
    /// 어떤 단계에서 실패해도 문서 일부가 저장되지 않습니다.
    pub async fn ingest(
        &self,
        collection: &str,
        doc: NewDocument,
    ) -> Result<IngestOutcome, KnowledgeError> {
        // 1. 컬렉션 확인
        {
            let _guard = self.store_lock.write().await;
            if !self.store.has_collection(collection)? {
                self.store.create_collection(collection)?;
            }
        }

        // 2. 해시 계산
        let hash = content_hash(&doc);

        // 3. 중복 확인
        if let Some(existing) = self.store.find_by_hash(collection, &hash)? {
            tracing::info!(
                "found document '{}': {} {}",
                doc.title,
                existing.id,
                hash
            );
            return Ok(IngestOutcome::AlreadyPresent {
                id: existing.id,
                hash,
            });
        }

        // 4. 임베딩 (검증 포함)
        let embedding = embed_one(self.embedder.as_ref(), &doc.embedding_text()).await?;

        // 5. 저장 (쓰기 잠금 안에서 중복 재확인)
        let _guard = self.store_lock.write().await;
        if let Some(existing) = self.store.find_by_hash(collection, &hash)? {
            tracing::info!(
                "found document '{}': {} {}",
                doc.title,
                existing.id,
                hash
            );
            return Ok(IngestOutcome::AlreadyPresent {
                id: existing.id,
                hash,
            });
        }

        let title = doc.title.clone();
        let id = self.store.insert(
            collection,
            &EmbeddedDocument {
                content: doc,
                hash,
                embedding,
            },
        )?;

        tracing::info!("added '{}' with id: {} sum: {}", title, id, hash);
        Ok(IngestOutcome::Inserted { id, hash })
    }

    /// 배치 수집
    ///
    /// 문서마다 독립적으로 처리하며 한 문서의 실패가 나머지를 막지 않습니다.
    pub async fn ingest_batch(
        &self,
        collection: &str,
        docs: Vec<NewDocument>,
    ) -> Vec<IngestReport> {
        let mut reports = Vec::with_capacity(docs.len());

        for (index, doc) in docs.into_iter().enumerate() {
            let title = doc.title.clone();
            let result = self.ingest(collection, doc).await;

            if let Err(ref e) = result {
                tracing::warn!("Failed to ingest '{}' into '{}': {}", title, collection, e);
            }

            reports.push(IngestReport {
                index,
                title,
                result,
            });
        }

        reports
    }

    /// 인덱스 재구성
    ///
    /// `collections`가 비어 있으면 모든 컬렉션을 대상으로 합니다.
    /// 실패하면 이전 인덱스가 그대로 유지됩니다.
    ///
    /// # Returns
    /// 인덱스에 들어간 벡터 수
    pub async fn refresh_index(&self, collections: &[String]) -> Result<usize, KnowledgeError> {
        let _guard = self.store_lock.read().await;
        let snapshot = self.rebuild(collections)?;
        Ok(snapshot.index.len())
    }

    /// 질의
    ///
    /// # Returns
    /// 거리 오름차순으로 정렬된 문서 (가까운 문서가 먼저)
    pub async fn query(
        &self,
        question: &str,
        collections: &[String],
    ) -> Result<Vec<RankedDocument>, KnowledgeError> {
        let _guard = self.store_lock.read().await;

        // 1. 인덱스 재구성
        let snapshot = self.rebuild(collections)?;
        if snapshot.index.is_empty() {
            tracing::debug!("Index is empty, nothing to search");
            return Ok(Vec::new());
        }

        // 2. 질문 임베딩
        let query_vector = embed_one(self.embedder.as_ref(), question).await?;

        // 3-5. 검색 및 문서 조회
        self.resolve(&snapshot, query_vector.as_slice(), self.options.result_limit)
    }

    /// 현재 인덱스로만 검색 (재구성 없음)
    ///
    /// 한 번도 빌드하지 않았으면 `IndexError::NotBuilt`.
    pub async fn search_indexed(
        &self,
        question: &str,
        k: usize,
    ) -> Result<Vec<RankedDocument>, KnowledgeError> {
        let _guard = self.store_lock.read().await;

        let snapshot = self.current_snapshot()?.ok_or(IndexError::NotBuilt)?;
        let query_vector = embed_one(self.embedder.as_ref(), question).await?;
        self.resolve(&snapshot, query_vector.as_slice(), k)
    }

    /// 현재 인덱스의 벡터 수 (빌드 전이면 None)
    pub fn indexed_len(&self) -> Option<usize> {
        self.current_snapshot()
            .ok()
            .flatten()
            .map(|s| s.index.len())
    }

    /// 엔진 통계
    pub fn stats(&self) -> Result<EngineStats, KnowledgeError> {
        Ok(EngineStats {
            store: self.store.stats()?,
            indexed_vectors: self.indexed_len().unwrap_or(0),
            embedding_dimension: self.embedder.dimension(),
            provider: self.embedder.name().to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn current_snapshot(&self) -> Result<Option<Arc<IndexSnapshot>>, StorageError> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|_| StorageError::LockPoisoned)
    }

    /// 새 인덱스를 만들고 성공하면 현재 스냅샷을 교체
    ///
    /// 호출자가 저장소 읽기 잠금을 잡고 있어야 합니다.
    fn rebuild(&self, collections: &[String]) -> Result<Arc<IndexSnapshot>, KnowledgeError> {
        let targets = if collections.is_empty() {
            self.store.list_collections()?
        } else {
            collections.to_vec()
        };

        let started = Instant::now();
        let deadline = self.options.index_timeout.map(|t| started + t);

        let mut index = VectorIndex::new(self.embedder.dimension());
        let mut entries = Vec::new();

        for collection in &targets {
            let mut failure: Option<IndexError> = None;

            self.store.for_each(collection, &mut |doc| {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    failure = Some(IndexError::Timeout {
                        visited: entries.len(),
                    });
                    return ControlFlow::Break(());
                }

                match index.add(doc.embedding.as_slice()) {
                    Ok(_) => {
                        entries.push(IndexEntry {
                            collection: doc.collection,
                            id: doc.id,
                        });
                        ControlFlow::Continue(())
                    }
                    Err(e) => {
                        failure = Some(e);
                        ControlFlow::Break(())
                    }
                }
            })?;

            if let Some(e) = failure {
                tracing::warn!("Index rebuild aborted in '{}': {}", collection, e);
                return Err(e.into());
            }
        }

        tracing::debug!(
            "Rebuilt index over {} collection(s): {} vectors in {:?}",
            targets.len(),
            entries.len(),
            started.elapsed()
        );

        let snapshot = Arc::new(IndexSnapshot { index, entries });
        let mut current = self
            .snapshot
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *current = Some(Arc::clone(&snapshot));

        Ok(snapshot)
    }

    /// 검색 후 위치를 문서로 변환
    ///
    /// 위치 매핑에 소속 컬렉션이 함께 기록되어 있어
    /// 여러 컬렉션에 걸친 질의에서도 ID가 모호하지 않습니다.
    fn resolve(
        &self,
        snapshot: &IndexSnapshot,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RankedDocument>, KnowledgeError> {
        let hits = snapshot.index.search(query_vector, k)?;

        let mut results = Vec::with_capacity(hits.len());
        for (dist, position) in hits {
            let Some(entry) = snapshot.entries.get(position) else {
                continue;
            };

            let document = self.store.find_by_id(&entry.collection, &entry.id)?;
            results.push(RankedDocument { document, dist });
        }

        results.sort_by(|a, b| a.dist.total_cmp(&b.dist));
        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================
