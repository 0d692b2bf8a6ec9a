use serde::{Deserialize, Serialize};

/// Which phase of the similarity engine produced a hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilaritySource {
    Vector,
    Llm,
}

impl SimilaritySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Llm => "llm",
        }
    }
}

/// One entry in a find_similar() result list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimilarCompany {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// In [0, 1], higher is more similar. LLM-sourced hits always score
    /// below the lowest vector hit.
    pub similarity_score: f64,
    /// Short label for why the companies are related (e.g. "competitor",
    /// "same vertical").
    pub relationship_kind: String,
    pub source: SimilaritySource,
    /// Whether a surface analysis ran (or a full record already exists)
    /// for this company.
    pub researched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
