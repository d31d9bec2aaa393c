//! Where-filter specs parsed from element-reference templates.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

use super::linkable::{DimensionSpec, EntitySpec, LinkableSpec, LinkableSpecSet, TimeDimensionSpec};
use super::time::{ExpandedGranularity, TimeGranularity};
use super::DUNDER;

/// Pattern for element references in filter templates, e.g.
/// `{{ Dimension('listing__is_lux') }}` or `{{ TimeDimension('metric_time', 'month') }}`.
static ELEMENT_CALL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(Dimension|TimeDimension|Entity)\(\s*'([^']*)'(?:\s*,\s*'([^']*)')?\s*\)\s*\}\}")
        .unwrap()
});

/// Errors raised while extracting element references from a filter template.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterParseError {
    #[error("unknown time granularity '{0}' in filter template")]
    UnknownGranularity(String),
    #[error("empty element reference in filter template")]
    EmptyReference,
}

/// A SQL filter fragment together with the linkable specs it references.
///
/// The `where_sql` text has every template reference replaced with the
/// referenced spec's qualified name, so equality of two filter specs is
/// equality of both the rendered text and the referenced elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhereFilterSpec {
    pub where_sql: String,
    pub linkable_spec_set: LinkableSpecSet,
}

impl WhereFilterSpec {
    pub fn new(where_sql: impl Into<String>, linkable_spec_set: LinkableSpecSet) -> Self {
        Self {
            where_sql: where_sql.into(),
            linkable_spec_set,
        }
    }

    /// Parse a filter template, extracting the referenced specs and rendering
    /// each reference as its qualified name.
    pub fn parse(template: &str) -> Result<Self, FilterParseError> {
        let mut specs: Vec<LinkableSpec> = Vec::new();
        let mut rendered = String::with_capacity(template.len());
        let mut last_end = 0;

        for caps in ELEMENT_CALL_PATTERN.captures_iter(template) {
            let call = caps.get(0).unwrap();
            let kind = &caps[1];
            let reference = &caps[2];
            let (element_name, entity_links) = split_reference(reference)?;

            let spec = match kind {
                "Dimension" => LinkableSpec::Dimension(DimensionSpec {
                    element_name,
                    entity_links,
                }),
                "TimeDimension" => {
                    let granularity = match caps.get(3) {
                        Some(name) => TimeGranularity::from_name(name.as_str()).ok_or_else(
                            || FilterParseError::UnknownGranularity(name.as_str().to_string()),
                        )?,
                        None => TimeGranularity::Day,
                    };
                    LinkableSpec::TimeDimension(TimeDimensionSpec {
                        element_name,
                        entity_links,
                        granularity: ExpandedGranularity::standard(granularity),
                        date_part: None,
                    })
                }
                _ => LinkableSpec::Entity(EntitySpec {
                    element_name,
                    entity_links,
                }),
            };

            rendered.push_str(&template[last_end..call.start()]);
            rendered.push_str(&spec.qualified_name());
            last_end = call.end();
            specs.push(spec);
        }
        rendered.push_str(&template[last_end..]);

        Ok(Self {
            where_sql: rendered,
            linkable_spec_set: LinkableSpecSet::from_specs(specs).dedupe(),
        })
    }
}

fn split_reference(reference: &str) -> Result<(String, Vec<String>), FilterParseError> {
    let mut parts: Vec<&str> = reference.split(DUNDER).collect();
    let element = parts.pop().unwrap_or_default();
    if element.is_empty() || parts.iter().any(|part| part.is_empty()) {
        return Err(FilterParseError::EmptyReference);
    }
    Ok((
        element.to_string(),
        parts.into_iter().map(str::to_string).collect(),
    ))
}

/// Parse a sequence of filter templates, failing on the first bad one.
pub fn parse_filter_templates<'a>(
    templates: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<WhereFilterSpec>, FilterParseError> {
    templates.into_iter().map(WhereFilterSpec::parse).collect()
}
