use std::collections::BTreeMap;

use serde_json::{Map, Value};

use theodore_common::types::{CompanyRecord, Leader};
use theodore_common::TheodoreError;

use crate::prompts;

/// Parse the aggregation response into a CompanyRecord.
///
/// Parsing is strict about shape (the payload must be a JSON object) and
/// lenient about content: any field that is missing or violates its
/// declared type is simply left absent, never an error.
pub fn parse_aggregation(
    response: &str,
    company_name: &str,
) -> Result<CompanyRecord, TheodoreError> {
    let value: Value = serde_json::from_str(prompts::extract_json(response))
        .map_err(|e| TheodoreError::invalid_response(format!("aggregation response: {}", e)))?;

    let Some(obj) = value.as_object() else {
        return Err(TheodoreError::invalid_response(
            "aggregation response is not a JSON object",
        ));
    };

    let mut record = CompanyRecord::new(company_name);

    record.description = str_field(obj, "description");
    record.industry = str_field(obj, "industry");
    record.business_model = str_field(obj, "business_model");
    record.value_proposition = str_field(obj, "value_proposition");
    record.target_market = str_field(obj, "target_market");
    record.pricing_model = str_field(obj, "pricing_model");

    record.products_services = list_field(obj, "products_services");
    record.key_services = list_field(obj, "key_services");
    record.tech_stack = list_field(obj, "tech_stack");
    record.competitive_advantages = list_field(obj, "competitive_advantages");

    record.leadership = leaders_field(obj);

    record.location = str_field(obj, "location");
    record.founding_year = year_field(obj, "founding_year");
    record.employee_range = str_field(obj, "employee_range");
    record.has_job_listings = obj.get("has_job_listings").and_then(Value::as_bool);

    record.confidence = confidence_field(obj, "confidence");

    Ok(record)
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn list_field(obj: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    let items = obj.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Accepts an integer or a digit string; anything else (or an implausible
/// year) stays absent.
fn year_field(obj: &Map<String, Value>, key: &str) -> Option<u16> {
    let value = obj.get(key)?;

    let year = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };

    if (1400..=2100).contains(&year) {
        Some(year as u16)
    } else {
        None
    }
}

fn leaders_field(obj: &Map<String, Value>) -> Option<Vec<Leader>> {
    let items = obj.get("leadership")?.as_array()?;

    Some(
        items
            .iter()
            .filter_map(|item| {
                let entry = item.as_object()?;
                let name = entry.get("name")?.as_str()?.trim();
                if name.is_empty() {
                    return None;
                }
                // Some models label the field "title" instead of "role".
                let role = entry
                    .get("role")
                    .or_else(|| entry.get("title"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from);

                Some(Leader {
                    name: name.to_string(),
                    role,
                })
            })
            .collect(),
    )
}

fn confidence_field(obj: &Map<String, Value>, key: &str) -> BTreeMap<String, f64> {
    let Some(scores) = obj.get(key).and_then(Value::as_object) else {
        return BTreeMap::new();
    };

    scores
        .iter()
        .filter_map(|(field, value)| {
            let score = value.as_f64()?;
            if score.is_finite() {
                Some((field.clone(), score.clamp(0.0, 1.0)))
            } else {
                None
            }
        })
        .collect()
}
