use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A leadership entry extracted from team or about pages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leader {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The aggregated business-intelligence record for one company.
///
/// Every field except the name may be absent. Absence (`None`) is distinct
/// from an empty value: `None` means the analysis could not establish the
/// field, an empty list means it established there is nothing to list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,

    /// Business model classification label (e.g. "B2B SaaS").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_proposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_market: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products_services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_stack: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitive_advantages: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leadership: Option<Vec<Leader>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founding_year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_job_listings: Option<bool>,

    /// Per-classification confidence scores, each clamped to [0, 1].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub confidence: BTreeMap<String, f64>,

    /// Dense embedding over the canonical record text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub crawled_at: DateTime<Utc>,
    /// URLs whose content contributed to this record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_pages: Vec<String>,
}

impl CompanyRecord {
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            website: None,
            description: None,
            industry: None,
            business_model: None,
            value_proposition: None,
            target_market: None,
            pricing_model: None,
            products_services: None,
            key_services: None,
            tech_stack: None,
            competitive_advantages: None,
            leadership: None,
            location: None,
            founding_year: None,
            employee_range: None,
            has_job_listings: None,
            confidence: BTreeMap::new(),
            embedding: None,
            crawled_at: Utc::now(),
            source_pages: Vec::new(),
        }
    }

    /// Canonical text the embedding is computed over. Stable field order so
    /// identical records embed identically.
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<String> = vec![format!("Company: {}", self.company_name)];

        if let Some(ref industry) = self.industry {
            parts.push(format!("Industry: {}", industry));
        }
        if let Some(ref model) = self.business_model {
            parts.push(format!("Business model: {}", model));
        }
        if let Some(ref description) = self.description {
            parts.push(format!("Description: {}", description));
        }
        if let Some(ref value) = self.value_proposition {
            parts.push(format!("Value proposition: {}", value));
        }
        if let Some(ref market) = self.target_market {
            parts.push(format!("Target market: {}", market));
        }
        if let Some(ref products) = self.products_services {
            if !products.is_empty() {
                parts.push(format!("Products and services: {}", products.join(", ")));
            }
        }

        parts.join("\n")
    }

    /// Count of established (non-absent) optional fields.
    pub fn populated_fields(&self) -> usize {
        [
            self.website.is_some(),
            self.description.is_some(),
            self.industry.is_some(),
            self.business_model.is_some(),
            self.value_proposition.is_some(),
            self.target_market.is_some(),
            self.pricing_model.is_some(),
            self.products_services.is_some(),
            self.key_services.is_some(),
            self.tech_stack.is_some(),
            self.competitive_advantages.is_some(),
            self.leadership.is_some(),
            self.location.is_some(),
            self.founding_year.is_some(),
            self.employee_range.is_some(),
            self.has_job_listings.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count()
    }
}

/// Normalize a company name for identity comparisons: lowercase, corporate
/// suffixes stripped, punctuation removed, whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    const SUFFIXES: &[&str] = &[
        "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "co", "gmbh", "ag",
        "plc", "sa",
    ];

    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(last) = words.last() {
        if words.len() > 1 && SUFFIXES.contains(last) {
            words.pop();
        } else {
            break;
        }
    }

    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_sparse() {
        let record = CompanyRecord::new("Acme");
        assert_eq!(record.company_name, "Acme");
        assert_eq!(record.populated_fields(), 0);
        assert!(record.confidence.is_empty());
        assert!(record.embedding.is_none());
    }

    #[test]
    fn test_absent_distinct_from_empty() {
        let mut record = CompanyRecord::new("Acme");
        assert!(record.products_services.is_none());

        record.products_services = Some(Vec::new());
        assert!(record.products_services.is_some());
        assert_eq!(record.populated_fields(), 1);
    }

    #[test]
    fn test_embedding_text_is_stable() {
        let mut record = CompanyRecord::new("Acme");
        record.industry = Some("Logistics".into());
        record.products_services = Some(vec!["Freight API".into(), "Tracking".into()]);

        let text = record.embedding_text();
        assert_eq!(text, record.embedding_text());
        assert!(text.starts_with("Company: Acme"));
        assert!(text.contains("Freight API, Tracking"));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Acme, Inc."), "acme");
        assert_eq!(normalize_name("ACME Corp"), "acme");
        assert_eq!(normalize_name("Acme Labs LLC"), "acme labs");
        assert_eq!(normalize_name("Co"), "co");
    }

    #[test]
    fn test_sparse_serialization_omits_absent_fields() {
        let record = CompanyRecord::new("Acme");
        let json = serde_json::to_value(&record).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("industry"));
        assert!(!obj.contains_key("embedding"));
        assert!(obj.contains_key("company_name"));
    }
}
