use theodore_common::config::{RetryConfig, SystemConfig};

use super::loader::ConfigError;

const KNOWN_PROVIDERS: &[&str] = &["bedrock", "gemini"];

/// Validate a parsed configuration. Collects every problem before failing
/// so one restart fixes them all.
pub fn validate(config: &SystemConfig) -> Result<(), ConfigError> {
    let mut problems: Vec<String> = Vec::new();

    if config.rate.capacity == 0 {
        problems.push("rate.capacity must be at least 1".into());
    }
    if config.rate.refill_per_sec <= 0.0 {
        problems.push("rate.refill_per_sec must be positive".into());
    }

    if config.pool.workers == 0 {
        problems.push("pool.workers must be at least 1".into());
    }

    if config.timeout.increase_factor < 1.0 {
        problems.push("timeout.increase_factor must be >= 1.0".into());
    }
    if config.timeout.max_secs < config.timeout.default_secs {
        problems.push("timeout.max_secs must be >= timeout.default_secs".into());
    }
    if config.timeout.overall_deadline_secs == 0 {
        problems.push("timeout.overall_deadline_secs must be positive".into());
    }

    validate_retry("retry.selection", &config.retry.selection, &mut problems);
    validate_retry("retry.extraction", &config.retry.extraction, &mut problems);
    validate_retry("retry.aggregation", &config.retry.aggregation, &mut problems);

    if config.extract.max_concurrent == 0 {
        problems.push("extract.max_concurrent must be at least 1".into());
    }
    if config.extract.primary_threshold_chars == 0 {
        problems.push("extract.primary_threshold_chars must be positive".into());
    }
    if config.extract.prompt_budget_chars < 1_000 {
        problems.push("extract.prompt_budget_chars must be at least 1000".into());
    }

    if config.discovery.max_urls == 0 {
        problems.push("discovery.max_urls must be at least 1".into());
    }

    if config.embedding.dimension == 0 {
        problems.push("embedding.dimension must be positive".into());
    }

    if !KNOWN_PROVIDERS.contains(&config.llm.provider.as_str()) {
        problems.push(format!(
            "llm.provider must be one of {:?}, got {:?}",
            KNOWN_PROVIDERS, config.llm.provider
        ));
    }
    if config.llm.model.is_empty() {
        problems.push("llm.model must not be empty".into());
    }
    if config.llm.max_tokens == 0 {
        problems.push("llm.max_tokens must be positive".into());
    }
    if let Some(t) = config.llm.temperature {
        if !(0.0..=1.0).contains(&t) {
            problems.push("llm.temperature must be within [0.0, 1.0]".into());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(problems.join("; ")))
    }
}

fn validate_retry(name: &str, retry: &RetryConfig, problems: &mut Vec<String>) {
    if retry.max_attempts == 0 {
        problems.push(format!("{}.max_attempts must be at least 1", name));
    }
    if retry.backoff_multiplier < 1.0 {
        problems.push(format!("{}.backoff_multiplier must be >= 1.0", name));
    }
    if retry.max_backoff_ms < retry.base_backoff_ms {
        problems.push(format!(
            "{}.max_backoff_ms must be >= {}.base_backoff_ms",
            name, name
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SystemConfig {
        toml::from_str(
            r#"
            [llm]
            provider = "bedrock"
            model = "anthropic.claude-3-5-sonnet-20241022-v2:0"
            max_tokens = 4096
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_bad_provider_rejected() {
        let mut config = valid_config();
        config.llm.provider = "watson".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("llm.provider"));
    }

    #[test]
    fn test_problems_are_collected() {
        let mut config = valid_config();
        config.rate.capacity = 0;
        config.pool.workers = 0;
        config.timeout.increase_factor = 0.5;

        let err = validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rate.capacity"));
        assert!(message.contains("pool.workers"));
        assert!(message.contains("timeout.increase_factor"));
    }

    #[test]
    fn test_zero_refill_rejected() {
        let mut config = valid_config();
        config.rate.refill_per_sec = 0.0;
        assert!(validate(&config).is_err());
    }
}
