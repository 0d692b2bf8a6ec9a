use theodore_common::types::Candidate;

/// System context shared by all analysis prompts.
pub const ANALYST_SYSTEM: &str = "You are a business-intelligence analyst. \
    You only ever answer with strict JSON matching the requested schema: no \
    markdown fences, no commentary, no trailing text.";

/// Fields the aggregation prompt asks for, in schema order.
pub const TARGET_FIELDS: &[&str] = &[
    "description",
    "industry",
    "business_model",
    "value_proposition",
    "target_market",
    "pricing_model",
    "products_services",
    "key_services",
    "tech_stack",
    "competitive_advantages",
    "leadership",
    "location",
    "founding_year",
    "employee_range",
    "has_job_listings",
];

/// Phase 2: choose which candidate URLs to crawl.
pub fn selection_prompt(company_name: &str, candidates: &[Candidate], max_selected: usize) -> String {
    let listing: String = candidates
        .iter()
        .map(|c| format!("- {} ({})", c.url, c.source.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Company under analysis: {company}\n\n\
        Candidate URLs discovered on its website:\n{listing}\n\n\
        Select up to {max} URLs most likely to contain: {fields}.\n\
        Prefer about/team/product/pricing/careers pages over blog posts.\n\n\
        Respond with strict JSON only, exactly this schema:\n\
        {{\"selections\": [{{\"url\": \"<candidate url verbatim>\", \"reason\": \"<short rationale>\"}}]}}",
        company = company_name,
        listing = listing,
        max = max_selected,
        fields = TARGET_FIELDS.join(", "),
    )
}

/// Phase 4: synthesize the structured record from the crawled corpus.
pub fn aggregation_prompt(company_name: &str, corpus: &str) -> String {
    format!(
        "Company under analysis: {company}\n\n\
        Below is text extracted from its website, one section per page.\n\
        ---\n{corpus}\n---\n\n\
        Produce a business-intelligence record. Respond with strict JSON \
        only, exactly this schema (omit any field you cannot establish from \
        the text; never invent values):\n\
        {{\n\
          \"description\": \"<one-paragraph summary>\",\n\
          \"industry\": \"<primary industry>\",\n\
          \"business_model\": \"<classification, e.g. B2B SaaS>\",\n\
          \"value_proposition\": \"<core value proposition>\",\n\
          \"target_market\": \"<who they sell to>\",\n\
          \"pricing_model\": \"<how they charge>\",\n\
          \"products_services\": [\"<offering>\"],\n\
          \"key_services\": [\"<flagship service>\"],\n\
          \"tech_stack\": [\"<technology>\"],\n\
          \"competitive_advantages\": [\"<advantage>\"],\n\
          \"leadership\": [{{\"name\": \"<person>\", \"role\": \"<title>\"}}],\n\
          \"location\": \"<headquarters>\",\n\
          \"founding_year\": <year as integer>,\n\
          \"employee_range\": \"<e.g. 51-200>\",\n\
          \"has_job_listings\": <true|false>,\n\
          \"confidence\": {{\"<field>\": <score in [0,1]>}}\n\
        }}",
        company = company_name,
        corpus = corpus,
    )
}

/// Similarity Phase B: ask for additional similar companies.
pub fn expansion_prompt(company_name: &str, needed: usize) -> String {
    format!(
        "List {needed} real companies most similar to \"{company}\" \
        (competitors, same market, same business model). For each give a \
        short relationship label.\n\n\
        Respond with strict JSON only, exactly this schema:\n\
        {{\"companies\": [{{\"name\": \"<company>\", \"website\": \"<https url, omit if unknown>\", \
        \"relationship\": \"<label, e.g. competitor>\"}}]}}",
        needed = needed,
        company = company_name,
    )
}

/// Similarity Phase B: describe an expansion hit from its homepage text.
pub fn surface_prompt(company_name: &str, target_name: &str, homepage_text: &str) -> String {
    format!(
        "\"{target}\" was suggested as similar to \"{company}\". Its homepage \
        says:\n---\n{homepage}\n---\n\n\
        Respond with strict JSON only, exactly this schema:\n\
        {{\"description\": \"<two-sentence summary of what {target} does>\", \
        \"relationship\": \"<label for how it relates to {company}>\"}}",
        target = target_name,
        company = company_name,
        homepage = homepage_text,
    )
}

/// Pull the JSON payload out of a model response, tolerating the fences
/// models add despite instructions. Anything further off-contract is the
/// parser's problem.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use theodore_common::types::{CandidateSet, UrlSource};

    #[test]
    fn test_selection_prompt_lists_candidates_with_sources() {
        let mut set = CandidateSet::new(10);
        set.push("https://acme.example/about", UrlSource::Sitemap);
        set.push("https://acme.example/pricing", UrlSource::Nav);

        let prompt = selection_prompt("Acme", set.entries(), 15);
        assert!(prompt.contains("- https://acme.example/about (sitemap)"));
        assert!(prompt.contains("- https://acme.example/pricing (nav)"));
        assert!(prompt.contains("\"selections\""));
    }

    #[test]
    fn test_aggregation_prompt_embeds_corpus_and_schema() {
        let prompt = aggregation_prompt("Acme", "## https://acme.example\nAcme ships freight.");
        assert!(prompt.contains("Acme ships freight."));
        assert!(prompt.contains("\"founding_year\""));
        assert!(prompt.contains("\"confidence\""));
    }

    #[test]
    fn test_extract_json_strips_fences() {
        assert_eq!(extract_json("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(
            extract_json("Here you go:\n```\n{\"a\": 1}\n```\nanything else"),
            "{\"a\": 1}"
        );
    }
}
