//! CLI 모듈
//!
//! docrag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::KnowledgeConfig;
use crate::embedding::OllamaEmbedding;
use crate::knowledge::{
    DocumentStore, EngineOptions, IngestOutcome, KnowledgeEngine, NewDocument,
    SqliteDocumentStore,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docrag")]
#[command(version, about = "문서 지식베이스 검색 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파싱된 문서를 컬렉션에 추가
    Ingest {
        /// 대상 컬렉션
        #[arg(short, long)]
        collection: String,

        /// 문서 JSON 파일 (객체 하나 또는 배열)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 문서 제목
        #[arg(short, long)]
        title: Option<String>,

        /// 문서 본문
        #[arg(long)]
        text: Option<String>,

        /// 항목 (여러 번 지정 가능)
        #[arg(short, long = "item")]
        items: Vec<String>,

        /// 구조상 깊이
        #[arg(short, long, default_value = "0")]
        level: i64,
    },

    /// 지식베이스 검색
    Query {
        /// 질문
        question: String,

        /// 검색할 컬렉션 (생략하면 전체)
        #[arg(short, long = "collection")]
        collections: Vec<String>,

        /// 결과 개수 (기본: 설정값)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 컬렉션 목록
    Collections,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = KnowledgeConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest {
            collection,
            file,
            title,
            text,
            items,
            level,
        } => {
            let docs = match (file, title) {
                (Some(path), _) => read_documents(&path)?,
                (None, Some(title)) => vec![NewDocument::new(title, text.unwrap_or_default())
                    .with_items(items)
                    .with_level(level)],
                (None, None) => bail!("--file 또는 --title 중 하나를 지정해야 합니다"),
            };
            cmd_ingest(&config, &collection, docs).await
        }
        Commands::Query {
            question,
            collections,
            limit,
        } => cmd_query(&config, &question, &collections, limit).await,
        Commands::Collections => cmd_collections(&config),
        Commands::Status => cmd_status(&config).await,
    }
}

/// 설정으로 엔진 구성
pub fn build_engine(config: &KnowledgeConfig) -> Result<KnowledgeEngine> {
    let store = SqliteDocumentStore::open_default(config).context("문서 저장소 열기 실패")?;
    let embedder = OllamaEmbedding::from_config(config).context("임베딩 프로바이더 생성 실패")?;

    KnowledgeEngine::new(
        Box::new(store),
        Box::new(embedder),
        EngineOptions::from(config),
    )
    .context("KnowledgeEngine 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
///
/// 문서마다 결과를 출력하고 실패한 문서는 건너뜁니다.
async fn cmd_ingest(
    config: &KnowledgeConfig,
    collection: &str,
    docs: Vec<NewDocument>,
) -> Result<()> {
    if docs.is_empty() {
        println!("[!] 수집할 문서가 없습니다.");
        return Ok(());
    }

    let engine = build_engine(config)?;
    let total = docs.len();

    println!("[*] '{}' 컬렉션에 {} 건 수집 중...", collection, total);

    let reports = engine.ingest_batch(collection, docs).await;

    let mut added = 0;
    let mut skipped = 0;
    let mut failed = 0;

    for report in &reports {
        let title = truncate_text(&report.title, 50);
        match &report.result {
            Ok(IngestOutcome::Inserted { id, .. }) => {
                added += 1;
                println!("[{}/{}] 추가: {} (ID: {})", report.index + 1, total, title, id);
            }
            Ok(IngestOutcome::AlreadyPresent { id, .. }) => {
                skipped += 1;
                println!("[{}/{}] 이미 존재: {} (ID: {})", report.index + 1, total, title, id);
            }
            Err(e) => {
                failed += 1;
                println!("[{}/{}] 실패: {} - {}", report.index + 1, total, title, e);
            }
        }
    }

    println!();
    println!("[OK] 완료: 추가 {}, 중복 {}, 실패 {}", added, skipped, failed);

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    config: &KnowledgeConfig,
    question: &str,
    collections: &[String],
    limit: Option<usize>,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(limit) = limit {
        if limit == 0 {
            bail!("--limit은 1 이상이어야 합니다");
        }
        config.result_limit = limit;
    }

    let engine = build_engine(&config)?;

    println!("[*] 검색 중: \"{}\"", question);

    let results = engine
        .query(question, collections)
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        let doc = &result.document;
        println!(
            "{}. [거리: {:.4}] {} / {}",
            i + 1,
            result.dist,
            doc.collection,
            doc.id
        );
        println!("   제목: {}", doc.title);
        if !doc.text.is_empty() {
            println!("   내용: {}", truncate_text(&doc.text, 200));
        }
        for item in doc.items.iter().take(5) {
            println!("   - {}", truncate_text(item, 100));
        }
        println!();
    }

    Ok(())
}

/// 컬렉션 목록 명령어
fn cmd_collections(config: &KnowledgeConfig) -> Result<()> {
    let store = SqliteDocumentStore::open_default(config).context("문서 저장소 열기 실패")?;

    let names = store.list_collections().context("컬렉션 목록 조회 실패")?;
    if names.is_empty() {
        println!("[!] 컬렉션이 없습니다.");
        return Ok(());
    }

    println!("[OK] 컬렉션 ({} 개):\n", names.len());
    for name in names {
        let count = store.count(&name).context("문서 수 조회 실패")?;
        println!("  {:<24} {} 건", name, count);
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &KnowledgeConfig) -> Result<()> {
    println!("docrag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩 모델: {} ({}차원)",
        config.embedding_model, config.embedding_dimension
    );
    println!("[*] Ollama: {}", config.ollama_url);

    match SqliteDocumentStore::open_default(config) {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!(
                    "[OK] 저장된 문서: {} 건 ({} 컬렉션)",
                    stats.document_count, stats.collection_count
                );
            }
            Err(e) => println!("[!] 통계 조회 실패: {}", e),
        },
        Err(e) => println!("[!] 문서 저장소 열기 실패: {}", e),
    }

    match OllamaEmbedding::from_config(config) {
        Ok(embedder) => match embedder.detect_dimension().await {
            Ok(dim) if dim == config.embedding_dimension => {
                println!("[OK] 임베딩 모델 응답: {}차원", dim);
            }
            Ok(dim) => {
                println!(
                    "[!] 임베딩 차원 불일치: 모델 {}차원, 설정 {}차원",
                    dim, config.embedding_dimension
                );
                println!("    설정: export DOCRAG_EMBEDDING_DIMENSION={}", dim);
            }
            Err(e) => {
                println!("[!] 임베딩 모델 ({}) 연결 실패", embedder.model());
                tracing::debug!("Dimension probe failed: {}", e);
            }
        },
        Err(e) => println!("[!] 임베딩 프로바이더 생성 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문서 JSON 파일 읽기 (객체 하나 또는 배열)
fn read_documents(path: &Path) -> Result<Vec<NewDocument>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
    parse_documents(&raw).with_context(|| format!("문서 JSON 파싱 실패: {}", path.display()))
}

fn parse_documents(raw: &str) -> Result<Vec<NewDocument>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let docs = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(docs)
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        assert_eq!(truncate_text(korean, 5), "안녕하세요...");
    }

    #[test]
    fn test_parse_single_document() {
        let docs = parse_documents(r#"{"title": "Intro", "text": "...", "level": 1}"#).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Intro");
        assert_eq!(docs[0].level, 1);
    }

    #[test]
    fn test_parse_document_array() {
        let docs = parse_documents(
            r#"[
                {"title": "A", "text": "a", "items": ["x", "y"]},
                {"title": "B", "text": "b"}
            ]"#,
        )
        .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].items, vec!["x", "y"]);
    }

    #[test]
    fn test_parse_invalid_document() {
        assert!(parse_documents(r#"{"text": "missing title"}"#).is_err());
        assert!(parse_documents("not json").is_err());
    }

    #[test]
    fn test_cli_parses_query() {
        let cli = Cli::parse_from(["docrag", "query", "how do I...", "-c", "a", "-c", "b"]);
        match cli.command {
            Commands::Query {
                question,
                collections,
                limit,
            } => {
                assert_eq!(question, "how do I...");
                assert_eq!(collections, vec!["a", "b"]);
                assert_eq!(limit, None);
            }
            _ => panic!("expected query command"),
        }
    }
}
