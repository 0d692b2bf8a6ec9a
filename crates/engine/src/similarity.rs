use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;

use theodore_common::backoff;
use theodore_common::config::SystemConfig;
use theodore_common::types::{
    normalize_name, EmbeddingTask, LlmTask, SimilarCompany, SimilaritySource, TaskKind,
};
use theodore_common::urlnorm;
use theodore_common::TheodoreError;

use theodore_fetch::{Extractor, PageFetchPolicy};

use crate::pool::{WorkItem, WorkerPool};
use crate::prompts;
use crate::resolver::SiteResolver;
use crate::store::{KNearestFilter, VectorStore};

/// Per-task budget for expansion and surface-analysis calls.
const EXPANSION_TASK_BUDGET: Duration = Duration::from_secs(30);
/// Budget for the single-URL homepage scrape.
const SURFACE_FETCH_BUDGET: Duration = Duration::from_secs(20);
/// Homepage text handed to the surface prompt is capped here.
const SURFACE_TEXT_CAP: usize = 5_000;
/// Score ceiling for LLM hits when there are no vector hits to sit under.
const DEFAULT_LLM_CEILING: f64 = 0.5;
/// Name similarity above which two companies are considered the same.
const NAME_DEDUP_THRESHOLD: f64 = 0.92;

#[derive(Deserialize)]
struct ExpansionPayload {
    companies: Vec<ExpansionEntry>,
}

#[derive(Deserialize)]
struct ExpansionEntry {
    name: String,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    relationship: Option<String>,
}

#[derive(Deserialize)]
struct SurfacePayload {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    relationship: Option<String>,
}

/// Two-phase similar-company discovery: a vector-store query, then a
/// conditional LLM expansion with homepage surface scraping for the
/// suggestions the store knows nothing about.
pub struct SimilarityEngine {
    config: Arc<SystemConfig>,
    pool: Arc<WorkerPool>,
    store: Arc<dyn VectorStore>,
    extractor: Extractor,
    resolver: Arc<dyn SiteResolver>,
}

impl SimilarityEngine {
    pub fn new(
        config: Arc<SystemConfig>,
        pool: Arc<WorkerPool>,
        store: Arc<dyn VectorStore>,
        extractor: Extractor,
        resolver: Arc<dyn SiteResolver>,
    ) -> Self {
        Self {
            config,
            pool,
            store,
            extractor,
            resolver,
        }
    }

    pub async fn find_similar(
        &self,
        company_name: &str,
        max_results: usize,
    ) -> Result<Vec<SimilarCompany>, TheodoreError> {
        let started = Instant::now();

        let vector_hits = self.vector_phase(company_name, max_results).await?;
        tracing::info!(
            company = %company_name,
            vector_hits = vector_hits.len(),
            "Vector similarity phase complete"
        );

        if vector_hits.len() >= max_results {
            metrics::histogram!("similarity.duration").record(started.elapsed().as_secs_f64());
            let mut hits = vector_hits;
            hits.truncate(max_results);
            return Ok(hits);
        }

        // Phase B only runs when the store came up short.
        let needed = max_results - vector_hits.len();
        let llm_hits = match self.expansion_phase(company_name, needed).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(company = %company_name, error = %e, "LLM expansion failed");
                Vec::new()
            }
        };

        let merged = merge_hits(vector_hits, llm_hits, company_name, max_results);
        metrics::histogram!("similarity.duration").record(started.elapsed().as_secs_f64());
        Ok(merged)
    }

    /// Phase A: query the vector store by stored embedding, or by embedding
    /// the bare name when the company is unknown.
    async fn vector_phase(
        &self,
        company_name: &str,
        max_results: usize,
    ) -> Result<Vec<SimilarCompany>, TheodoreError> {
        let existing = self.store.find_by_name(company_name).await?;

        let (query_vector, filter) = match existing {
            Some(entry) => {
                let filter = KNearestFilter {
                    exclude_id: Some(entry.id.clone()),
                };
                (entry.vector, Some(filter))
            }
            None => {
                let task = EmbeddingTask::new(
                    company_name.to_string(),
                    Instant::now() + EXPANSION_TASK_BUDGET,
                );
                let result = self.pool.submit(WorkItem::Embedding(task)).await;
                match result.vector() {
                    Ok(vector) => (vector.to_vec(), None),
                    Err(e) => {
                        // No embedding, no vector phase; expansion can still run.
                        tracing::warn!(company = %company_name, error = %e, "Name embedding failed");
                        return Ok(Vec::new());
                    }
                }
            }
        };

        let hits = self
            .store
            .k_nearest(&query_vector, max_results, filter)
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let website = hit
                    .company
                    .metadata
                    .get("website")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                let description = hit
                    .company
                    .metadata
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(String::from);

                SimilarCompany {
                    name: hit.company.name,
                    website,
                    similarity_score: hit.score,
                    relationship_kind: "profile_similarity".to_string(),
                    source: SimilaritySource::Vector,
                    researched: true,
                    description,
                }
            })
            .collect())
    }

    /// Phase B: ask the model for additional similar companies, then run a
    /// surface analysis over each suggestion's homepage.
    async fn expansion_phase(
        &self,
        company_name: &str,
        needed: usize,
    ) -> Result<Vec<SimilarCompany>, TheodoreError> {
        let retry_config = &self.config.retry.selection;
        let prompt = prompts::expansion_prompt(company_name, needed.max(3));

        let mut attempt = 0u32;
        let entries = loop {
            attempt += 1;

            let task = LlmTask::new(
                TaskKind::Expansion,
                prompt.clone(),
                Some(prompts::ANALYST_SYSTEM.to_string()),
                Instant::now() + EXPANSION_TASK_BUDGET,
            );
            let result = self.pool.submit(WorkItem::Completion(task)).await;

            let parsed = result.text().and_then(|text| {
                serde_json::from_str::<ExpansionPayload>(prompts::extract_json(text)).map_err(|e| {
                    TheodoreError::invalid_response(format!("expansion response: {}", e))
                })
            });

            match parsed {
                Ok(payload) => break payload.companies,
                Err(e) if e.is_recoverable() && attempt < retry_config.max_attempts => {
                    let delay = backoff::delay_for_attempt(retry_config, attempt);
                    tracing::warn!(attempt, error = %e, "Expansion failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let mut hits = Vec::new();
        for entry in entries {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                continue;
            }

            // Resolve a homepage: the model's URL if given, otherwise guess.
            let website = match entry.website.as_deref().and_then(urlnorm::coerce_url) {
                Some(url) => Some(url),
                None => self.resolver.resolve(&name).await,
            };

            let (description, surface_relationship, researched) = match website.as_deref() {
                Some(url) => match self.surface_analysis(company_name, &name, url).await {
                    Ok((description, relationship)) => (Some(description), relationship, true),
                    Err(e) => {
                        tracing::debug!(target = %name, error = %e, "Surface analysis failed");
                        (None, None, false)
                    }
                },
                None => (None, None, false),
            };

            hits.push(SimilarCompany {
                name,
                website,
                similarity_score: 0.0, // assigned during merge
                relationship_kind: surface_relationship
                    .or(entry.relationship)
                    .unwrap_or_else(|| "suggested_similar".to_string()),
                source: SimilaritySource::Llm,
                researched,
                description,
            });
        }

        Ok(hits)
    }

    /// Scrape one homepage and ask the model for a description and a
    /// relationship label.
    async fn surface_analysis(
        &self,
        company_name: &str,
        target_name: &str,
        url: &str,
    ) -> Result<(String, Option<String>), TheodoreError> {
        let policy = PageFetchPolicy {
            request_timeout: Duration::from_secs(self.config.timeout.default_secs),
            timeout_cap: Duration::from_secs(self.config.timeout.max_secs),
            timeout_increase: self.config.timeout.increase_factor,
            retry: self.config.retry.extraction.clone(),
        };

        let pages = self
            .extractor
            .extract(
                &[url.to_string()],
                1,
                &policy,
                Instant::now() + SURFACE_FETCH_BUDGET,
            )
            .await;

        let page = pages
            .into_iter()
            .next()
            .filter(|p| !p.is_failed())
            .ok_or_else(|| {
                TheodoreError::new(
                    theodore_common::ErrorKind::NoContent,
                    format!("homepage {} yielded no content", url),
                )
            })?;

        let homepage_text: String = page.text.chars().take(SURFACE_TEXT_CAP).collect();
        let prompt = prompts::surface_prompt(company_name, target_name, &homepage_text);

        let task = LlmTask::new(
            TaskKind::SurfaceAnalysis,
            prompt,
            Some(prompts::ANALYST_SYSTEM.to_string()),
            Instant::now() + EXPANSION_TASK_BUDGET,
        );
        let result = self.pool.submit(WorkItem::Completion(task)).await;

        let payload: SurfacePayload =
            serde_json::from_str(prompts::extract_json(result.text()?)).map_err(|e| {
                TheodoreError::invalid_response(format!("surface response: {}", e))
            })?;

        let description = payload
            .description
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| {
                TheodoreError::invalid_response("surface response missing description")
            })?;

        Ok((description, payload.relationship))
    }
}

/// Merge vector and LLM hits: dedup on normalized name (vector wins), score
/// LLM hits by rank scaled below the lowest vector hit, sort descending.
fn merge_hits(
    vector_hits: Vec<SimilarCompany>,
    llm_hits: Vec<SimilarCompany>,
    target_name: &str,
    max_results: usize,
) -> Vec<SimilarCompany> {
    let target = normalize_name(target_name);

    let mut results: Vec<SimilarCompany> = vector_hits
        .into_iter()
        .filter(|hit| normalize_name(&hit.name) != target)
        .collect();

    let ceiling = results
        .iter()
        .map(|hit| hit.similarity_score)
        .fold(f64::INFINITY, f64::min);
    let ceiling = if ceiling.is_finite() {
        ceiling
    } else {
        DEFAULT_LLM_CEILING
    };

    let mut seen: Vec<String> = results.iter().map(|hit| normalize_name(&hit.name)).collect();
    seen.push(target);

    let fresh: Vec<SimilarCompany> = llm_hits
        .into_iter()
        .filter(|hit| {
            let name = normalize_name(&hit.name);
            !seen.iter().any(|known| {
                known == &name || strsim::jaro_winkler(known, &name) > NAME_DEDUP_THRESHOLD
            })
        })
        .collect();

    let count = fresh.len();
    for (rank, mut hit) in fresh.into_iter().enumerate() {
        hit.similarity_score = ceiling * (count - rank) as f64 / (count + 1) as f64;
        results.push(hit);
    }

    results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    results.truncate(max_results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_hit(name: &str, score: f64) -> SimilarCompany {
        SimilarCompany {
            name: name.into(),
            website: None,
            similarity_score: score,
            relationship_kind: "profile_similarity".into(),
            source: SimilaritySource::Vector,
            researched: true,
            description: None,
        }
    }

    fn llm_hit(name: &str) -> SimilarCompany {
        SimilarCompany {
            name: name.into(),
            website: None,
            similarity_score: 0.0,
            relationship_kind: "competitor".into(),
            source: SimilaritySource::Llm,
            researched: false,
            description: None,
        }
    }

    #[test]
    fn test_merge_scores_llm_hits_below_vector_floor() {
        let merged = merge_hits(
            vec![vector_hit("Globex", 0.9), vector_hit("Initech", 0.7)],
            vec![llm_hit("Umbrella"), llm_hit("Wonka")],
            "Acme",
            10,
        );

        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].name, "Globex");
        assert_eq!(merged[1].name, "Initech");

        // Every LLM hit sits strictly below the lowest vector hit and
        // preserves expansion rank order.
        assert!(merged[2].similarity_score < 0.7);
        assert!(merged[3].similarity_score < merged[2].similarity_score);
        assert_eq!(merged[2].name, "Umbrella");
    }

    #[test]
    fn test_merge_dedups_by_normalized_name_vector_wins() {
        let merged = merge_hits(
            vec![vector_hit("Globex Corp", 0.8)],
            vec![llm_hit("Globex, Inc."), llm_hit("Hooli")],
            "Acme",
            10,
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "Globex Corp");
        assert_eq!(merged[0].source, SimilaritySource::Vector);
        assert_eq!(merged[1].name, "Hooli");
    }

    #[test]
    fn test_merge_excludes_the_target_itself() {
        let merged = merge_hits(
            vec![vector_hit("Acme Inc", 0.99)],
            vec![llm_hit("Acme")],
            "Acme",
            10,
        );
        assert!(merged.is_empty());
    }

    #[test]
    fn test_merge_without_vector_hits_uses_default_ceiling() {
        let merged = merge_hits(vec![], vec![llm_hit("Hooli"), llm_hit("Pied Piper")], "Acme", 10);

        assert_eq!(merged.len(), 2);
        assert!(merged[0].similarity_score < DEFAULT_LLM_CEILING);
        assert!(merged[0].similarity_score > merged[1].similarity_score);
    }

    #[test]
    fn test_merge_respects_max_results() {
        let merged = merge_hits(
            vec![vector_hit("A", 0.9), vector_hit("B", 0.8)],
            vec![llm_hit("C"), llm_hit("D")],
            "Acme",
            3,
        );
        assert_eq!(merged.len(), 3);
    }
}
