//! Rule application and per-target rule cache

use crate::catalog::{Schema, Target};
use crate::extract::{
    ExtractError, ExtractionRule, FieldValue, Locator, Method, PostProcessor, Record,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("li").expect("li selector is valid"));
static LABEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("label").expect("label selector is valid"));
static VALUE: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("p selector is valid"));

enum CompiledLocator {
    Css(Selector),
    Labeled(String),
}

struct CompiledRule {
    field: String,
    locator: CompiledLocator,
    method: Method,
    processor: Option<PostProcessor>,
}

/// A target's rule set, filtered to its schema and with selectors parsed
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
    origin: String,
}

impl CompiledRules {
    fn compile(target: &Target, schema: &Schema) -> Result<Self, ExtractError> {
        let mut rules = Vec::with_capacity(target.rules.len());

        for rule in &target.rules {
            if !schema.has_field(&rule.field) {
                tracing::debug!(
                    "Dropping rule {}.{}: not a field of {}",
                    target.key,
                    rule.field,
                    schema.id
                );
                continue;
            }
            rules.push(compile_rule(&target.key, rule)?);
        }

        Ok(Self {
            rules,
            origin: target.origin(),
        })
    }

    /// Fields the effective rule set writes
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.field.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(target: &str, rule: &ExtractionRule) -> Result<CompiledRule, ExtractError> {
    let locator = match &rule.locator {
        Locator::Css(css) => {
            let selector = Selector::parse(css).map_err(|e| ExtractError::InvalidSelector {
                target: target.to_string(),
                field: rule.field.clone(),
                reason: format!("{:?}", e),
            })?;
            CompiledLocator::Css(selector)
        }
        Locator::Labeled(label) => CompiledLocator::Labeled(label.clone()),
    };

    Ok(CompiledRule {
        field: rule.field.clone(),
        locator,
        method: rule.method.clone(),
        processor: rule.processor,
    })
}

/// Applies typed rules to item fragments
///
/// The compiled rule set for a target is computed on first use and reused for
/// every later fragment of that target. The extractor is shared between parse
/// jobs, so the cache sits behind a mutex.
#[derive(Default)]
pub struct Extractor {
    cache: Mutex<HashMap<String, Arc<CompiledRules>>>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached rule set for a target, compiling it on first use
    pub fn rules_for(
        &self,
        target: &Target,
        schema: &Schema,
    ) -> Result<Arc<CompiledRules>, ExtractError> {
        if let Some(rules) = self.cache.lock().get(&target.key) {
            return Ok(Arc::clone(rules));
        }

        let compiled = Arc::new(CompiledRules::compile(target, schema)?);
        let mut cache = self.cache.lock();
        let entry = cache
            .entry(target.key.clone())
            .or_insert_with(|| Arc::clone(&compiled));
        Ok(Arc::clone(entry))
    }

    /// Number of targets with a cached rule set
    pub fn cached_targets(&self) -> usize {
        self.cache.lock().len()
    }

    /// Extracts one record from an item fragment
    ///
    /// Every schema field is present in the result; fields without a rule, or
    /// whose locator matched nothing, are `None`.
    ///
    /// # Arguments
    ///
    /// * `target` - The target the fragment came from
    /// * `schema` - The destination schema
    /// * `fragment` - Outer markup of one listing item
    pub fn extract(
        &self,
        target: &Target,
        schema: &Schema,
        fragment: &str,
    ) -> Result<Record, ExtractError> {
        let rules = self.rules_for(target, schema)?;
        let document = Html::parse_fragment(fragment);

        let mut fields: BTreeMap<String, Option<FieldValue>> = schema
            .field_names()
            .map(|name| (name.to_string(), None))
            .collect();

        for rule in &rules.rules {
            let value = apply_rule(&document, rule, &rules.origin);
            fields.insert(rule.field.clone(), value);
        }

        Ok(Record::new(&schema.natural_key, fields))
    }
}

fn apply_rule(document: &Html, rule: &CompiledRule, origin: &str) -> Option<FieldValue> {
    let element = match &rule.locator {
        CompiledLocator::Css(selector) => document.select(selector).next(),
        CompiledLocator::Labeled(label) => find_labeled_value(document, label),
    }?;

    let raw = match &rule.method {
        Method::Text => element_text(&element),
        Method::Html => element.html(),
        Method::Attribute(name) => element.value().attr(name)?.trim().to_string(),
    };

    Some(match rule.processor {
        Some(processor) => processor.apply(&raw, origin),
        None => FieldValue::Text(raw),
    })
}

/// Finds the `p` of the row labelled `label`, preferring an exact label match
fn find_labeled_value<'a>(document: &'a Html, label: &str) -> Option<ElementRef<'a>> {
    let rows: Vec<(ElementRef<'a>, String)> = document
        .select(&ROW)
        .filter_map(|row| {
            let text = row.select(&LABEL).next().map(|l| element_text(&l))?;
            Some((row, text))
        })
        .collect();

    let row = rows
        .iter()
        .find(|(_, text)| text.trim_end_matches(&[':', '：'][..]).trim() == label)
        .or_else(|| rows.iter().find(|(_, text)| text.contains(label)))
        .map(|(row, _)| *row)?;

    row.select(&VALUE).next()
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
