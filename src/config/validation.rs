use crate::config::types::{
    Config, FetchConfig, OutputConfig, PoolConfig, RetryConfig, SchemaEntry, ScrollConfig,
    TargetEntry,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Columns every destination table carries besides its schema fields
pub(crate) const RESERVED_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_pool_config(&config.pool)?;
    validate_retry_config(&config.retry)?;
    validate_scroll_config(&config.scroll)?;
    validate_fetch_config(&config.fetch)?;
    validate_output_config(&config.output)?;
    validate_schemas(&config.schemas)?;
    validate_targets(&config.targets, &config.schemas)?;
    Ok(())
}

fn validate_pool_config(config: &PoolConfig) -> Result<(), ConfigError> {
    if config.crawl_workers < 1 || config.parse_workers < 1 {
        return Err(ConfigError::Validation(format!(
            "crawl_workers and parse_workers must be >= 1, got {} and {}",
            config.crawl_workers, config.parse_workers
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity must be >= 1".to_string(),
        ));
    }

    if config.monitor_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "monitor_interval_ms must be >= 10ms, got {}ms",
            config.monitor_interval_ms
        )));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if !config.backoff_factor.is_finite() || config.backoff_factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff_factor must be a finite number >= 1.0, got {}",
            config.backoff_factor
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    if config.op_max_retries < 1 {
        return Err(ConfigError::Validation(
            "op_max_retries must be >= 1".to_string(),
        ));
    }

    if config.pacing_min_ms > config.pacing_max_ms {
        return Err(ConfigError::Validation(format!(
            "pacing_min_ms ({}) cannot exceed pacing_max_ms ({})",
            config.pacing_min_ms, config.pacing_max_ms
        )));
    }

    Ok(())
}

fn validate_scroll_config(config: &ScrollConfig) -> Result<(), ConfigError> {
    if config.no_growth_threshold < 1 {
        return Err(ConfigError::Validation(
            "no_growth_threshold must be >= 1".to_string(),
        ));
    }

    if config.max_scroll_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_scroll_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if !config.url_template.contains("{key}") {
        return Err(ConfigError::Validation(format!(
            "url_template must contain a {{key}} placeholder, got '{}'",
            config.url_template
        )));
    }

    let sample = config.url_template.replace("{key}", "sample");
    Url::parse(&sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid url_template: {}", e)))?;

    if config.page_load_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "page_load_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.content_selector.trim().is_empty() || config.item_selector.trim().is_empty() {
        return Err(ConfigError::Validation(
            "content_selector and item_selector cannot be empty".to_string(),
        ));
    }

    if config.user_agents.iter().all(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one non-empty entry".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_schemas(schemas: &[SchemaEntry]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();

    for schema in schemas {
        validate_identifier(&schema.id)?;

        if !ids.insert(schema.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate schema id '{}'",
                schema.id
            )));
        }

        if schema.fields.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Schema '{}' must define at least one field",
                schema.id
            )));
        }

        let mut names = HashSet::new();
        for field in &schema.fields {
            validate_identifier(&field.name)?;

            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Schema '{}' uses reserved column name '{}'",
                    schema.id, field.name
                )));
            }

            if !names.insert(field.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Schema '{}' declares field '{}' twice",
                    schema.id, field.name
                )));
            }

            validate_column_type(&schema.id, &field.name, &field.column_type)?;
        }

        if !names.contains(schema.natural_key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Natural key '{}' is not a field of schema '{}'",
                schema.natural_key, schema.id
            )));
        }
    }

    Ok(())
}

fn validate_targets(targets: &[TargetEntry], schemas: &[SchemaEntry]) -> Result<(), ConfigError> {
    let mut keys = HashSet::new();

    for target in targets {
        if target.key.is_empty()
            || !target
                .key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "Target key must be non-empty ASCII alphanumeric (plus '-' and '_'), got '{}'",
                target.key
            )));
        }

        if !keys.insert(target.key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate target key '{}'",
                target.key
            )));
        }

        let schema = schemas
            .iter()
            .find(|s| s.id == target.schema)
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "Target '{}' references unknown schema '{}'",
                    target.key, target.schema
                ))
            })?;

        if let Some(url) = &target.url {
            Url::parse(url).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid url for target '{}': {}", target.key, e))
            })?;
        }

        if !target.rules.iter().any(|r| r.field == schema.natural_key) {
            return Err(ConfigError::Validation(format!(
                "Target '{}' has no rule for natural key '{}'",
                target.key, schema.natural_key
            )));
        }

        for rule in &target.rules {
            if !schema.fields.iter().any(|f| f.name == rule.field) {
                return Err(ConfigError::Validation(format!(
                    "Target '{}' declares rule for '{}', which schema '{}' does not define",
                    target.key, rule.field, schema.id
                )));
            }
        }
    }

    Ok(())
}

/// Schema and field names are interpolated into SQL as quoted identifiers,
/// so they are restricted to `[a-z0-9_]`, starting with a letter.
fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    let valid = name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase())
        .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid {
        return Err(ConfigError::Validation(format!(
            "Identifier '{}' must match [a-z][a-z0-9_]*",
            name
        )));
    }

    Ok(())
}

fn validate_column_type(schema: &str, field: &str, column_type: &str) -> Result<(), ConfigError> {
    let valid = !column_type.trim().is_empty()
        && column_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '(' || c == ')' || c == ',');

    if !valid {
        return Err(ConfigError::Validation(format!(
            "Invalid column type '{}' for {}.{}",
            column_type, schema, field
        )));
    }

    Ok(())
}
