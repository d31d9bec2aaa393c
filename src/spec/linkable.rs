//! Linkable element specs: dimensions, entities, and time dimensions
//! addressed through an entity-link path.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::time::{DatePart, ExpandedGranularity, TimeGranularity};
use super::DUNDER;

fn join_qualified(entity_links: &[String], tail: &[&str]) -> String {
    let mut parts: Vec<&str> = entity_links.iter().map(String::as_str).collect();
    parts.extend_from_slice(tail);
    parts.join(DUNDER)
}

/// A categorical dimension reached through zero or more entity links.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DimensionSpec {
    pub element_name: String,
    pub entity_links: Vec<String>,
}

impl DimensionSpec {
    pub fn local(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: Vec::new(),
        }
    }

    pub fn with_links<S: Into<String>>(
        element_name: impl Into<String>,
        entity_links: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: entity_links.into_iter().map(Into::into).collect(),
        }
    }

    pub fn qualified_name(&self) -> String {
        join_qualified(&self.entity_links, &[&self.element_name])
    }
}

impl fmt::Display for DimensionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// An entity (join key) reached through zero or more entity links.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntitySpec {
    pub element_name: String,
    pub entity_links: Vec<String>,
}

impl EntitySpec {
    pub fn local(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: Vec::new(),
        }
    }

    pub fn with_links<S: Into<String>>(
        element_name: impl Into<String>,
        entity_links: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links: entity_links.into_iter().map(Into::into).collect(),
        }
    }

    pub fn qualified_name(&self) -> String {
        join_qualified(&self.entity_links, &[&self.element_name])
    }
}

impl fmt::Display for EntitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// A time dimension at a specific granularity, optionally reduced to a date
/// part extraction.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeDimensionSpec {
    pub element_name: String,
    pub entity_links: Vec<String>,
    pub granularity: ExpandedGranularity,
    pub date_part: Option<DatePart>,
}

impl TimeDimensionSpec {
    pub fn new(
        element_name: impl Into<String>,
        entity_links: Vec<String>,
        granularity: ExpandedGranularity,
    ) -> Self {
        Self {
            element_name: element_name.into(),
            entity_links,
            granularity,
            date_part: None,
        }
    }

    pub fn local(element_name: impl Into<String>, granularity: TimeGranularity) -> Self {
        Self::new(
            element_name,
            Vec::new(),
            ExpandedGranularity::standard(granularity),
        )
    }

    pub fn with_granularity(mut self, granularity: ExpandedGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_base_granularity(mut self, granularity: TimeGranularity) -> Self {
        self.granularity = ExpandedGranularity::standard(granularity);
        self
    }

    pub fn with_date_part(mut self, date_part: DatePart) -> Self {
        self.date_part = Some(date_part);
        self
    }

    /// The standard grain this spec resolves to, independent of any custom
    /// calendar naming.
    pub fn base_granularity(&self) -> TimeGranularity {
        self.granularity.base
    }

    pub fn has_custom_granularity(&self) -> bool {
        self.granularity.is_custom()
    }

    pub fn qualified_name(&self) -> String {
        match self.date_part {
            Some(part) => {
                let extract = format!("extract_{part}");
                join_qualified(&self.entity_links, &[&self.element_name, &extract])
            }
            None => join_qualified(
                &self.entity_links,
                &[&self.element_name, &self.granularity.name],
            ),
        }
    }
}

impl fmt::Display for TimeDimensionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Any group-by-able element reference.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LinkableSpec {
    Dimension(DimensionSpec),
    TimeDimension(TimeDimensionSpec),
    Entity(EntitySpec),
}

impl LinkableSpec {
    pub fn element_name(&self) -> &str {
        match self {
            Self::Dimension(spec) => &spec.element_name,
            Self::TimeDimension(spec) => &spec.element_name,
            Self::Entity(spec) => &spec.element_name,
        }
    }

    pub fn entity_links(&self) -> &[String] {
        match self {
            Self::Dimension(spec) => &spec.entity_links,
            Self::TimeDimension(spec) => &spec.entity_links,
            Self::Entity(spec) => &spec.entity_links,
        }
    }

    pub fn qualified_name(&self) -> String {
        match self {
            Self::Dimension(spec) => spec.qualified_name(),
            Self::TimeDimension(spec) => spec.qualified_name(),
            Self::Entity(spec) => spec.qualified_name(),
        }
    }

    /// The same spec as seen from the far side of a join on the first link.
    ///
    /// Returns the spec unchanged when there is no link to strip.
    pub fn without_first_link(&self) -> Self {
        fn strip(links: &[String]) -> Vec<String> {
            links.iter().skip(1).cloned().collect()
        }
        match self {
            Self::Dimension(spec) => Self::Dimension(DimensionSpec {
                element_name: spec.element_name.clone(),
                entity_links: strip(&spec.entity_links),
            }),
            Self::TimeDimension(spec) => Self::TimeDimension(TimeDimensionSpec {
                element_name: spec.element_name.clone(),
                entity_links: strip(&spec.entity_links),
                granularity: spec.granularity.clone(),
                date_part: spec.date_part,
            }),
            Self::Entity(spec) => Self::Entity(EntitySpec {
                element_name: spec.element_name.clone(),
                entity_links: strip(&spec.entity_links),
            }),
        }
    }

    /// The same spec as seen from a node that reaches it by joining on
    /// `entity_link`.
    pub fn with_prepended_link(&self, entity_link: &str) -> Self {
        fn prepend(link: &str, links: &[String]) -> Vec<String> {
            let mut out = Vec::with_capacity(links.len() + 1);
            out.push(link.to_string());
            out.extend(links.iter().cloned());
            out
        }
        match self {
            Self::Dimension(spec) => Self::Dimension(DimensionSpec {
                element_name: spec.element_name.clone(),
                entity_links: prepend(entity_link, &spec.entity_links),
            }),
            Self::TimeDimension(spec) => Self::TimeDimension(TimeDimensionSpec {
                element_name: spec.element_name.clone(),
                entity_links: prepend(entity_link, &spec.entity_links),
                granularity: spec.granularity.clone(),
                date_part: spec.date_part,
            }),
            Self::Entity(spec) => Self::Entity(EntitySpec {
                element_name: spec.element_name.clone(),
                entity_links: prepend(entity_link, &spec.entity_links),
            }),
        }
    }
}

impl fmt::Display for LinkableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

impl From<DimensionSpec> for LinkableSpec {
    fn from(spec: DimensionSpec) -> Self {
        Self::Dimension(spec)
    }
}

impl From<TimeDimensionSpec> for LinkableSpec {
    fn from(spec: TimeDimensionSpec) -> Self {
        Self::TimeDimension(spec)
    }
}

impl From<EntitySpec> for LinkableSpec {
    fn from(spec: EntitySpec) -> Self {
        Self::Entity(spec)
    }
}

/// An ordered, structurally comparable collection of linkable specs.
///
/// Order is preserved so that plan output stays deterministic; all set
/// operations are order-preserving on the left-hand side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkableSpecSet {
    pub dimension_specs: Vec<DimensionSpec>,
    pub time_dimension_specs: Vec<TimeDimensionSpec>,
    pub entity_specs: Vec<EntitySpec>,
}

impl LinkableSpecSet {
    pub fn from_specs(specs: impl IntoIterator<Item = LinkableSpec>) -> Self {
        let mut set = Self::default();
        for spec in specs {
            set.add(spec);
        }
        set
    }

    pub fn add(&mut self, spec: LinkableSpec) {
        match spec {
            LinkableSpec::Dimension(spec) => self.dimension_specs.push(spec),
            LinkableSpec::TimeDimension(spec) => self.time_dimension_specs.push(spec),
            LinkableSpec::Entity(spec) => self.entity_specs.push(spec),
        }
    }

    /// All specs in a stable order: dimensions, time dimensions, entities.
    pub fn as_specs(&self) -> Vec<LinkableSpec> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.dimension_specs.iter().cloned().map(LinkableSpec::from));
        out.extend(
            self.time_dimension_specs
                .iter()
                .cloned()
                .map(LinkableSpec::from),
        );
        out.extend(self.entity_specs.iter().cloned().map(LinkableSpec::from));
        out
    }

    pub fn len(&self) -> usize {
        self.dimension_specs.len() + self.time_dimension_specs.len() + self.entity_specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, spec: &LinkableSpec) -> bool {
        match spec {
            LinkableSpec::Dimension(spec) => self.dimension_specs.contains(spec),
            LinkableSpec::TimeDimension(spec) => self.time_dimension_specs.contains(spec),
            LinkableSpec::Entity(spec) => self.entity_specs.contains(spec),
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            dimension_specs: [self.dimension_specs.clone(), other.dimension_specs.clone()]
                .concat(),
            time_dimension_specs: [
                self.time_dimension_specs.clone(),
                other.time_dimension_specs.clone(),
            ]
            .concat(),
            entity_specs: [self.entity_specs.clone(), other.entity_specs.clone()].concat(),
        }
    }

    pub fn dedupe(&self) -> Self {
        fn dedupe_vec<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
            let mut out: Vec<T> = Vec::with_capacity(items.len());
            for item in items {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            out
        }
        Self {
            dimension_specs: dedupe_vec(&self.dimension_specs),
            time_dimension_specs: dedupe_vec(&self.time_dimension_specs),
            entity_specs: dedupe_vec(&self.entity_specs),
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            dimension_specs: self
                .dimension_specs
                .iter()
                .filter(|spec| other.dimension_specs.contains(spec))
                .cloned()
                .collect(),
            time_dimension_specs: self
                .time_dimension_specs
                .iter()
                .filter(|spec| other.time_dimension_specs.contains(spec))
                .cloned()
                .collect(),
            entity_specs: self
                .entity_specs
                .iter()
                .filter(|spec| other.entity_specs.contains(spec))
                .cloned()
                .collect(),
        }
    }

    pub fn difference(&self, other: &Self) -> Self {
        Self {
            dimension_specs: self
                .dimension_specs
                .iter()
                .filter(|spec| !other.dimension_specs.contains(spec))
                .cloned()
                .collect(),
            time_dimension_specs: self
                .time_dimension_specs
                .iter()
                .filter(|spec| !other.time_dimension_specs.contains(spec))
                .cloned()
                .collect(),
            entity_specs: self
                .entity_specs
                .iter()
                .filter(|spec| !other.entity_specs.contains(spec))
                .cloned()
                .collect(),
        }
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.dimension_specs
            .iter()
            .all(|spec| other.dimension_specs.contains(spec))
            && self
                .time_dimension_specs
                .iter()
                .all(|spec| other.time_dimension_specs.contains(spec))
            && self
                .entity_specs
                .iter()
                .all(|spec| other.entity_specs.contains(spec))
    }

    /// Time dimension specs carrying a custom calendar grain.
    pub fn custom_granularity_specs(&self) -> Vec<&TimeDimensionSpec> {
        self.time_dimension_specs
            .iter()
            .filter(|spec| spec.has_custom_granularity())
            .collect()
    }
}
