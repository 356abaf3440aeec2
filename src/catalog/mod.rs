//! Target catalog
//!
//! Turns the validated configuration into the immutable [`Schema`] and
//! [`Target`] values the pipeline works with. Everything here is built once
//! at startup and shared through `Arc`s afterwards.

use crate::config::{Config, SchemaEntry, TargetEntry};
use crate::extract::ExtractionRule;
use crate::{ConfigError, ConfigResult, HarvestError};
use std::sync::Arc;
use url::Url;

/// One column of a destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub column_type: String,
}

/// Destination table definition
#[derive(Debug, Clone)]
pub struct Schema {
    pub id: String,
    pub description: String,
    /// Field whose value identifies an existing row
    pub natural_key: String,
    /// Columns in declaration order
    pub fields: Vec<FieldDef>,
}

impl Schema {
    /// Returns true if `name` is one of the schema's fields
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    fn from_entry(entry: &SchemaEntry) -> Self {
        Self {
            id: entry.id.clone(),
            description: entry.description.clone(),
            natural_key: entry.natural_key.clone(),
            fields: entry
                .fields
                .iter()
                .map(|f| FieldDef {
                    name: f.name.clone(),
                    column_type: f.column_type.clone(),
                })
                .collect(),
        }
    }
}

/// One listing source, mapped to exactly one schema
#[derive(Debug, Clone)]
pub struct Target {
    pub key: String,
    pub description: String,
    pub schema_id: String,
    pub url: Url,
    pub rules: Vec<ExtractionRule>,
}

impl Target {
    /// Scheme, host and port of the listing URL (e.g. `https://mzj.sz.gov.cn`)
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    fn from_entry(entry: &TargetEntry, url_template: &str) -> ConfigResult<Self> {
        let raw_url = match &entry.url {
            Some(url) => url.clone(),
            None => url_template.replace("{key}", &entry.key),
        };
        let url = Url::parse(&raw_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("{} for target '{}': {}", raw_url, entry.key, e))
        })?;

        let rules = entry
            .rules
            .iter()
            .map(|rule| ExtractionRule::from_entry(&entry.key, rule))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            key: entry.key.clone(),
            description: entry.description.clone(),
            schema_id: entry.schema.clone(),
            url,
            rules,
        })
    }
}

/// Immutable set of schemas and targets
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    schemas: Vec<Arc<Schema>>,
    targets: Vec<Arc<Target>>,
}

impl Catalog {
    /// Builds the catalog from a validated configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration that already passed structural validation
    ///
    /// # Returns
    ///
    /// * `Ok(Catalog)` - All targets resolved and all rules typed
    /// * `Err(ConfigError)` - A rule or URL could not be converted
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let schemas = config
            .schemas
            .iter()
            .map(|s| Arc::new(Schema::from_entry(s)))
            .collect();

        let targets = config
            .targets
            .iter()
            .map(|t| Target::from_entry(t, &config.fetch.url_template).map(Arc::new))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self { schemas, targets })
    }

    /// Builds a catalog from already-constructed parts
    pub fn new(schemas: Vec<Schema>, targets: Vec<Target>) -> Self {
        Self {
            schemas: schemas.into_iter().map(Arc::new).collect(),
            targets: targets.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn schemas(&self) -> &[Arc<Schema>] {
        &self.schemas
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn schema(&self, id: &str) -> Option<&Arc<Schema>> {
        self.schemas.iter().find(|s| s.id == id)
    }

    pub fn target(&self, key: &str) -> Option<&Arc<Target>> {
        self.targets.iter().find(|t| t.key == key)
    }

    /// Schema a target writes into
    pub fn schema_for(&self, target: &Target) -> Option<&Arc<Schema>> {
        self.schema(&target.schema_id)
    }

    /// Restricts the catalog to the given target keys
    ///
    /// An empty selection keeps every target. Schemas are left untouched.
    ///
    /// # Errors
    ///
    /// `HarvestError::UnknownTarget` for the first key that is not in the catalog.
    pub fn select_targets(&mut self, keys: &[String]) -> Result<(), HarvestError> {
        if keys.is_empty() {
            return Ok(());
        }

        if let Some(unknown) = keys.iter().find(|k| self.target(k).is_none()) {
            return Err(HarvestError::UnknownTarget(unknown.clone()));
        }

        self.targets.retain(|t| keys.contains(&t.key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::extract::{Locator, PostProcessor};

    const CONFIG: &str = r#"
[pool]
crawl-workers = 2
parse-workers = 2
queue-capacity = 10

[retry]
max-attempts = 3
base-delay-ms = 100
backoff-factor = 2.0
max-delay-ms = 1000

[scroll]
step = 800
settle-delay-ms = 10
no-growth-threshold = 3
max-scroll-attempts = 5

[fetch]
url-template = "https://mzj.sz.gov.cn/cn/isz/{key}/index.html"
content-selector = ".content"
item-selector = ".dataItem"
user-agents = ["TestAgent/1.0"]

[output]
database-path = ":memory:"

[[schemas]]
id = "elderly_care_institutions"
fields = [{ name = "name" }, { name = "bed_count", type = "INTEGER" }]

[[targets]]
key = "yljg"
schema = "elderly_care_institutions"
rules = [
    { field = "name", css = "h4.title" },
    { field = "bed_count", label = "床位", processor = "extract-number" },
]

[[targets]]
key = "mirror"
schema = "elderly_care_institutions"
url = "http://127.0.0.1:8080/listing"
rules = [{ field = "name", css = "h4" }]
"#;

    fn catalog() -> Catalog {
        let config = parse_config(CONFIG).unwrap();
        Catalog::from_config(&config).unwrap()
    }

    #[test]
    fn test_url_from_template() {
        let catalog = catalog();
        let target = catalog.target("yljg").unwrap();

        assert_eq!(
            target.url.as_str(),
            "https://mzj.sz.gov.cn/cn/isz/yljg/index.html"
        );
        assert_eq!(target.origin(), "https://mzj.sz.gov.cn");
    }

    #[test]
    fn test_url_override() {
        let catalog = catalog();
        let target = catalog.target("mirror").unwrap();
        assert_eq!(target.url.as_str(), "http://127.0.0.1:8080/listing");
        assert_eq!(target.origin(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_rules_are_typed() {
        let catalog = catalog();
        let target = catalog.target("yljg").unwrap();

        assert_eq!(target.rules.len(), 2);
        assert_eq!(target.rules[1].locator, Locator::Labeled("床位".to_string()));
        assert_eq!(target.rules[1].processor, Some(PostProcessor::ExtractNumber));

        let schema = catalog.schema_for(target).unwrap();
        assert_eq!(schema.natural_key, "name");
        assert_eq!(schema.fields[0].column_type, "TEXT");
        assert!(schema.has_field("bed_count"));
    }

    #[test]
    fn test_invalid_selector_fails_catalog() {
        let content = CONFIG.replace("css = \"h4.title\"", "css = \"h4[\"");
        let config = parse_config(&content).unwrap();
        assert!(matches!(
            Catalog::from_config(&config),
            Err(ConfigError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_select_targets() {
        let mut catalog = catalog();
        catalog.select_targets(&["mirror".to_string()]).unwrap();
        assert_eq!(catalog.targets().len(), 1);
        assert_eq!(catalog.targets()[0].key, "mirror");

        let err = catalog.select_targets(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, HarvestError::UnknownTarget(key) if key == "nope"));
    }

    #[test]
    fn test_empty_selection_keeps_all() {
        let mut catalog = catalog();
        catalog.select_targets(&[]).unwrap();
        assert_eq!(catalog.targets().len(), 2);
    }
}
