//! Vector Index - 인메모리 평면(brute-force) 벡터 인덱스
//!
//! 모든 벡터를 한 줄로 이어진 버퍼에 담고, 검색 시 전부와 거리를 비교합니다.
//! 질의마다 새로 만들어지므로 증분 갱신이나 영속화는 하지 않습니다.
//!
//! 빌드(`add` 반복)가 끝난 뒤에만 `search`를 호출해야 합니다.

use std::cmp::Ordering;

use crate::error::{DimensionMismatch, IndexError};

// ============================================================================
// Distance
// ============================================================================

/// 제곱 유클리드(L2) 거리
///
/// 제곱근을 생략해도 순서는 같으므로 그대로 거리로 씁니다.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 평면 L2 인덱스
///
/// 위치(position)는 삽입 순서대로 0부터 연속으로 부여됩니다.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 추가된 벡터 수
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 벡터 추가
    ///
    /// # Returns
    /// 부여된 위치 (0-based)
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, IndexError> {
        self.check_dimension(vector)?;
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// 최근접 이웃 검색
    ///
    /// # Returns
    /// `(거리, 위치)` 목록. 거리 오름차순, 같은 거리는 위치 오름차순.
    /// 길이는 `min(k, len())`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK(k));
        }
        self.check_dimension(query)?;

        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| (squared_l2(query, vector), position))
            .collect();

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare_hits);
            scored.truncate(k);
        }
        scored.sort_by(compare_hits);

        Ok(scored)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            }
            .into());
        }
        Ok(())
    }
}

fn compare_hits(a: &(f32, usize), b: &(f32, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(vectors: &[[f32; 2]]) -> VectorIndex {
        let mut index = VectorIndex::new(2);
        for v in vectors {
            index.add(v).unwrap();
        }
        index
    }

    #[test]
    fn test_squared_l2() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_l2(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_positions_are_contiguous() {
        let mut index = VectorIndex::new(2);
        assert_eq!(index.add(&[0.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[1.0, 0.0]).unwrap(), 1);
        assert_eq!(index.add(&[2.0, 0.0]).unwrap(), 2);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_search_returns_nearest_first() {
        // e1, e2, e3 중 질의는 e2에 가장 가까움
        let index = index_of(&[[0.0, 0.0], [5.0, 5.0], [10.0, 10.0]]);

        let hits = index.search(&[6.0, 5.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], (1.0, 1));
        assert_eq!(hits[1].1, 2);
        assert!(hits[0].0 <= hits[1].0);
    }

    #[test]
    fn test_search_length_is_min_of_k_and_len() {
        let index = index_of(&[[0.0, 0.0], [1.0, 1.0]]);
        assert_eq!(index.search(&[0.0, 0.0], 10).unwrap().len(), 2);
        assert_eq!(index.search(&[0.0, 0.0], 1).unwrap().len(), 1);
    }

    #[test]
    fn test_search_is_sorted() {
        let vectors: Vec<[f32; 2]> = (0..50)
            .map(|i| [((i * 37) % 50) as f32, ((i * 11) % 7) as f32])
            .collect();
        let index = index_of(&vectors);

        let hits = index.search(&[20.0, 3.0], 12).unwrap();
        assert_eq!(hits.len(), 12);
        assert!(hits.windows(2).all(|w| w[0].0 <= w[1].0));

        // 첫 결과는 전체 중 최소 거리
        let best = vectors
            .iter()
            .map(|v| squared_l2(&[20.0, 3.0], v))
            .fold(f32::INFINITY, f32::min);
        assert_eq!(hits[0].0, best);
    }

    #[test]
    fn test_ties_break_by_position() {
        let index = index_of(&[[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0]]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.1).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_k() {
        let index = index_of(&[[0.0, 0.0]]);
        assert!(matches!(
            index.search(&[0.0, 0.0], 0),
            Err(IndexError::InvalidK(0))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        assert!(matches!(
            index.add(&[1.0, 2.0]),
            Err(IndexError::Dimension(DimensionMismatch {
                expected: 3,
                actual: 2
            }))
        ));
        assert!(index.is_empty());

        index.add(&[1.0, 2.0, 3.0]).unwrap();
        assert!(index.search(&[1.0], 1).is_err());
    }
}
