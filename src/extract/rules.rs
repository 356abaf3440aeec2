//! Typed extraction rules
//!
//! Rules are written in the config file as loose tables and converted here,
//! once, into closed enums. Anything the loader accepts can be applied
//! without further string matching at extraction time.

use crate::config::RuleEntry;
use crate::extract::processors;
use crate::extract::FieldValue;
use crate::ConfigError;
use scraper::Selector;

/// Where a field's value lives inside an item fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// First element matching a CSS selector
    Css(String),

    /// The `p` of the first `li` whose `label` text matches
    Labeled(String),
}

/// How a located element is turned into a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Text,
    Html,
    Attribute(String),
}

/// Value transformation applied after extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessor {
    ExtractNumber,
    ExtractPhone,
    NormalizeUrl,
}

impl PostProcessor {
    /// Parses a processor name as written in the config file
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "extract-number" => Some(Self::ExtractNumber),
            "extract-phone" => Some(Self::ExtractPhone),
            "normalize-url" => Some(Self::NormalizeUrl),
            _ => None,
        }
    }

    /// Applies the processor to a raw string
    ///
    /// # Arguments
    ///
    /// * `raw` - The extracted string
    /// * `origin` - Scheme and host of the target, used to absolutize root-relative paths
    pub fn apply(&self, raw: &str, origin: &str) -> FieldValue {
        match self {
            Self::ExtractNumber => FieldValue::Integer(processors::extract_number(raw)),
            Self::ExtractPhone => FieldValue::Text(processors::extract_phone(raw)),
            Self::NormalizeUrl => FieldValue::Text(processors::normalize_url(raw, origin)),
        }
    }
}

/// A single field rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRule {
    pub field: String,
    pub locator: Locator,
    pub method: Method,
    pub processor: Option<PostProcessor>,
}

impl ExtractionRule {
    /// Converts a config entry into a typed rule
    ///
    /// # Errors
    ///
    /// * `ConfigError::Validation` - both or neither of `css`/`label` given, unknown
    ///   method or processor, or `attribute` inconsistent with the method
    /// * `ConfigError::InvalidSelector` - the CSS selector does not parse
    pub fn from_entry(target: &str, entry: &RuleEntry) -> Result<Self, ConfigError> {
        let locator = match (&entry.css, &entry.label) {
            (Some(css), None) => {
                Selector::parse(css).map_err(|e| {
                    ConfigError::InvalidSelector(format!(
                        "{}.{}: '{}': {:?}",
                        target, entry.field, css, e
                    ))
                })?;
                Locator::Css(css.clone())
            }
            (None, Some(label)) if !label.trim().is_empty() => {
                Locator::Labeled(label.trim().to_string())
            }
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Rule {}.{} must set exactly one of 'css' or a non-empty 'label'",
                    target, entry.field
                )))
            }
        };

        let method = match (entry.method.as_deref(), &entry.attribute) {
            (None | Some("text"), None) => Method::Text,
            (Some("html"), None) => Method::Html,
            (Some("attr"), Some(attribute)) if !attribute.is_empty() => {
                Method::Attribute(attribute.clone())
            }
            (Some("attr"), _) => {
                return Err(ConfigError::Validation(format!(
                    "Rule {}.{} uses method 'attr' without an attribute",
                    target, entry.field
                )))
            }
            (None | Some("text") | Some("html"), Some(_)) => {
                return Err(ConfigError::Validation(format!(
                    "Rule {}.{} sets 'attribute' but method is not 'attr'",
                    target, entry.field
                )))
            }
            (Some(other), _) => {
                return Err(ConfigError::Validation(format!(
                    "Rule {}.{} has unknown method '{}'",
                    target, entry.field, other
                )))
            }
        };

        let processor = match &entry.processor {
            None => None,
            Some(name) => Some(PostProcessor::from_name(name).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "Rule {}.{} has unknown processor '{}'",
                    target, entry.field, name
                ))
            })?),
        };

        Ok(Self {
            field: entry.field.clone(),
            locator,
            method,
            processor,
        })
    }
}
