//! 문서 타입
//!
//! 파싱된 콘텐츠(`NewDocument`)와 저장된 레코드(`Document`),
//! 그리고 차원이 검증된 임베딩 벡터를 정의합니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DimensionMismatch;

use super::hasher::ContentHash;

// ============================================================================
// DocumentId
// ============================================================================

/// 저장소가 삽입 시 부여하는 문서 ID
///
/// 컬렉션 안에서만 유일합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// 새 ID 생성 (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Embedding
// ============================================================================

/// 차원이 검증된 임베딩 벡터
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// 기대 차원과 길이가 같을 때만 생성
    pub fn new(values: Vec<f32>, dimension: usize) -> Result<Self, DimensionMismatch> {
        if values.len() != dimension {
            return Err(DimensionMismatch {
                expected: dimension,
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

// ============================================================================
// Documents
// ============================================================================

/// 파서가 만들어 넘기는 문서 콘텐츠
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub items: Vec<String>,
    /// 문서 구조상 깊이 (섹션 레벨)
    #[serde(default)]
    pub level: i64,
}

impl NewDocument {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            items: Vec::new(),
            level: 0,
        }
    }

    pub fn with_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_level(mut self, level: i64) -> Self {
        self.level = level;
        self
    }

    /// 임베딩 모델에 보낼 텍스트
    ///
    /// 제목, 본문, 항목 목록을 한 덩어리로 이어 붙입니다.
    pub fn embedding_text(&self) -> String {
        let mut out = String::with_capacity(self.title.len() + self.text.len() + 2);
        out.push_str(&self.title);
        if !self.text.is_empty() {
            out.push_str("\n\n");
            out.push_str(&self.text);
        }
        for item in &self.items {
            out.push_str("\n- ");
            out.push_str(item);
        }
        out
    }
}

/// 해시와 임베딩이 붙어 삽입 준비가 끝난 문서
#[derive(Debug, Clone)]
pub struct EmbeddedDocument {
    pub content: NewDocument,
    pub hash: ContentHash,
    pub embedding: Embedding,
}

/// 저장된 문서
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub collection: String,
    pub title: String,
    pub text: String,
    pub items: Vec<String>,
    pub level: i64,
    pub hash: ContentHash,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// 콘텐츠 부분만 꺼냄
    pub fn content(&self) -> NewDocument {
        NewDocument {
            title: self.title.clone(),
            text: self.text.clone(),
            items: self.items.clone(),
            level: self.level,
        }
    }
}

/// 질의 결과 문서 (거리 포함)
///
/// `dist`는 질의 시점에만 존재하며 저장되지 않습니다.
#[derive(Debug, Clone)]
pub struct RankedDocument {
    pub document: Document,
    /// 제곱 유클리드 거리 (작을수록 관련도 높음)
    pub dist: f32,
}
