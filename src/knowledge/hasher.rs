//! 콘텐츠 해시 - 문서 중복 제거 키
//!
//! 제목, 본문, 항목(순서 유지), 레벨만으로 SHA-256을 계산합니다.
//! 필드마다 길이를 앞에 붙여 경계가 모호하지 않게 합니다.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use super::document::NewDocument;

/// 32바이트 콘텐츠 지문 (16진수 64자로 표시)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// 16진수 해시 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash '{0}'")]
pub struct ParseHashError(String);

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseHashError(s.to_string()));
        }

        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseHashError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

/// 문서 콘텐츠 해시 계산
///
/// 같은 콘텐츠는 실행이 달라도 항상 같은 해시가 나옵니다.
pub fn content_hash(doc: &NewDocument) -> ContentHash {
    let mut hasher = Sha256::new();

    write_field(&mut hasher, doc.title.as_bytes());
    write_field(&mut hasher, doc.text.as_bytes());

    hasher.update((doc.items.len() as u64).to_le_bytes());
    for item in &doc.items {
        write_field(&mut hasher, item.as_bytes());
    }

    hasher.update(doc.level.to_le_bytes());

    ContentHash(hasher.finalize().into())
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewDocument {
        NewDocument::new("Intro", "Getting started with zypper")
            .with_items(["install", "update"])
            .with_level(1)
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(content_hash(&sample()), content_hash(&sample()));
    }

    #[test]
    fn test_hash_changes_with_every_field() {
        let base = content_hash(&sample());

        let mut doc = sample();
        doc.title.push('!');
        assert_ne!(content_hash(&doc), base);

        let mut doc = sample();
        doc.text.push('!');
        assert_ne!(content_hash(&doc), base);

        let mut doc = sample();
        doc.items.reverse();
        assert_ne!(content_hash(&doc), base);

        let mut doc = sample();
        doc.level = 2;
        assert_ne!(content_hash(&doc), base);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = NewDocument::new("ab", "c");
        let b = NewDocument::new("a", "bc");
        assert_ne!(content_hash(&a), content_hash(&b));

        let a = NewDocument::new("t", "").with_items(["x", "y"]);
        let b = NewDocument::new("t", "").with_items(["xy"]);
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = content_hash(&sample());
        let hex = hash.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.parse::<ContentHash>().unwrap(), hash);
    }

    #[test]
    fn test_parse_invalid_hex() {
        assert!("abc".parse::<ContentHash>().is_err());
        assert!("zz".repeat(32).parse::<ContentHash>().is_err());
        assert!("+a".repeat(32).parse::<ContentHash>().is_err());
    }
}
