//! Corpus sources.
//!
//! A [`CorpusSource`] yields the declared categories and every sentence in
//! source order. The `--source` argument picks the implementation:
//!
//! | Argument | Source |
//! |----------|--------|
//! | `http://…`, `https://…` | [`HttpBundleSource`] — bundle layout over HTTP |
//! | a directory | [`BundleDirSource`] — bundle layout on disk |
//! | a file | [`JsonFileSource`] — single JSON document |
//!
//! # Bundle layout
//!
//! ```text
//! categories.json          [{"key": "a", "name": "Anime", "path": "./sentences/a.json"}, …]
//! sentences/a.json         [{"hitokoto": "…", "type": "a", "from": "…"}, …]
//! sentences/b.json
//! ```
//!
//! `path` defaults to `sentences/{key}.json`. Sentences are concatenated in
//! category declaration order, then file order.
//!
//! # Retry policy (HTTP)
//!
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - other HTTP 4xx → fail immediately
//! - network error → retry

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::CorpusConfig;
use crate::error::{GenerateError, GenerateResult, CORPUS_SPACE};
use crate::models::{CategoryDecl, Corpus, SentenceRecord};

/// File listing category declarations in a bundle.
pub const CATEGORIES_FILE: &str = "categories.json";

/// A place the corpus can be read from.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Human-readable description used in progress and errors.
    fn describe(&self) -> String;

    /// Load the full corpus.
    async fn load(&self) -> GenerateResult<Corpus>;
}

/// Pick a source implementation for a `--source` argument.
pub fn source_from_arg(arg: &str, config: &CorpusConfig) -> Box<dyn CorpusSource> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        Box::new(HttpBundleSource::new(arg, config.clone()))
    } else {
        let path = PathBuf::from(arg);
        if path.is_dir() {
            Box::new(BundleDirSource::new(path))
        } else {
            Box::new(JsonFileSource::new(path))
        }
    }
}

/// Bundle-relative path of a category's sentence file.
fn sentence_file(decl: &CategoryDecl) -> String {
    match &decl.path {
        Some(p) => p.trim_start_matches("./").to_string(),
        None => format!("sentences/{}.json", decl.key),
    }
}

/// [`sentence_file`], rejected if it climbs out of the bundle root.
fn contained_sentence_file(decl: &CategoryDecl) -> GenerateResult<String> {
    let rel = sentence_file(decl);
    if !crate::config::is_contained(&rel) {
        return Err(GenerateError::config_in(
            &decl.key,
            format!("sentence file '{}' escapes the bundle root", rel),
        ));
    }
    Ok(rel)
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> GenerateResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| GenerateError::io(CORPUS_SPACE, format!("parse {}", what), e.into()))
}

// ═══════════════════════════════════════════════════════════════════════
// Local bundle
// ═══════════════════════════════════════════════════════════════════════

pub struct BundleDirSource {
    root: PathBuf,
}

impl BundleDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read(&self, rel: &str) -> GenerateResult<Vec<u8>> {
        let path = self.root.join(rel);
        read_file(&path).await
    }
}

#[async_trait]
impl CorpusSource for BundleDirSource {
    fn describe(&self) -> String {
        format!("bundle {}", self.root.display())
    }

    async fn load(&self) -> GenerateResult<Corpus> {
        let categories: Vec<CategoryDecl> =
            parse_json(&self.read(CATEGORIES_FILE).await?, CATEGORIES_FILE)?;

        let mut sentences = Vec::new();
        for decl in &categories {
            let rel = contained_sentence_file(decl)?;
            let mut batch: Vec<SentenceRecord> = parse_json(&self.read(&rel).await?, &rel)?;
            tracing::debug!(category = %decl.key, file = %rel, count = batch.len(), "read sentences");
            sentences.append(&mut batch);
        }

        Ok(Corpus {
            categories,
            sentences,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Single JSON file
// ═══════════════════════════════════════════════════════════════════════

pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CorpusSource for JsonFileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn load(&self) -> GenerateResult<Corpus> {
        let bytes = read_file(&self.path).await?;
        parse_json(&bytes, &self.path.display().to_string())
    }
}

async fn read_file(path: &Path) -> GenerateResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| GenerateError::io(CORPUS_SPACE, format!("read {}", path.display()), e))
}

// ═══════════════════════════════════════════════════════════════════════
// Bundle over HTTP
// ═══════════════════════════════════════════════════════════════════════

pub struct HttpBundleSource {
    base_url: String,
    config: CorpusConfig,
}

impl HttpBundleSource {
    pub fn new(base_url: &str, config: CorpusConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        }
    }

    fn url(&self, rel: &str) -> String {
        format!("{}/{}", self.base_url, rel.trim_start_matches("./"))
    }

    /// Sentence file URL of every category, checked before anything is fetched.
    fn sentence_urls(&self, categories: &[CategoryDecl]) -> GenerateResult<Vec<String>> {
        categories
            .iter()
            .map(|decl| contained_sentence_file(decl).map(|rel| self.url(&rel)))
            .collect()
    }

    /// GET `url` with retry/backoff.
    async fn fetch(&self, client: &reqwest::Client, url: &str) -> GenerateResult<Vec<u8>> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.bytes().await.map(|b| b.to_vec()).map_err(|e| {
                            GenerateError::io(
                                CORPUS_SPACE,
                                format!("GET {}", url),
                                std::io::Error::other(e),
                            )
                        });
                    }

                    let err = std::io::Error::other(format!("HTTP {}", status));
                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%url, %status, attempt, "corpus fetch failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(GenerateError::io(CORPUS_SPACE, format!("GET {}", url), err));
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, attempt, "corpus fetch failed, retrying");
                    last_err = Some(std::io::Error::other(e));
                    continue;
                }
            }
        }

        Err(GenerateError::io(
            CORPUS_SPACE,
            format!(
                "GET {} failed after {} attempts",
                url,
                self.config.max_retries + 1
            ),
            last_err.unwrap_or_else(|| std::io::Error::other("no response")),
        ))
    }
}

#[async_trait]
impl CorpusSource for HttpBundleSource {
    fn describe(&self) -> String {
        format!("bundle {}", self.base_url)
    }

    async fn load(&self) -> GenerateResult<Corpus> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| {
                GenerateError::io(CORPUS_SPACE, "build HTTP client", std::io::Error::other(e))
            })?;

        let categories_url = self.url(CATEGORIES_FILE);
        let categories: Vec<CategoryDecl> = parse_json(
            &self.fetch(&client, &categories_url).await?,
            &categories_url,
        )?;

        let mut sentences = Vec::new();
        for url in self.sentence_urls(&categories)? {
            let mut batch: Vec<SentenceRecord> = parse_json(&self.fetch(&client, &url).await?, &url)?;
            sentences.append(&mut batch);
        }

        Ok(Corpus {
            categories,
            sentences,
        })
    }
}
