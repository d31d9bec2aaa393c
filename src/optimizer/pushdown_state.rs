//! Bookkeeping for predicate pushdown.
//!
//! A [`PredicatePushdownState`] records which predicates may move toward
//! source scans at a point in the plan. States are immutable; every
//! adjustment returns a new value, so sibling branches never observe each
//! other's changes. The same type doubles as part of the recipe cache key,
//! keeping branches with different pushdown opportunities on separate
//! source scans.

use std::collections::BTreeSet;

use crate::spec::{LinkableSpecSet, TimeRangeConstraint, WhereFilterSpec};

/// The kinds of element a pushed predicate may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PredicateInputType {
    CategoricalDimension,
    Entity,
    TimeDimension,
    TimeRangeConstraint,
}

/// What may currently be pushed toward source scans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PredicatePushdownState {
    time_range_constraint: Option<TimeRangeConstraint>,
    where_filter_specs: Vec<WhereFilterSpec>,
    pushdown_enabled_types: BTreeSet<PredicateInputType>,
    applied_where_filter_specs: Vec<WhereFilterSpec>,
}

impl PredicatePushdownState {
    /// The starting state for a query: categorical-dimension filters and the
    /// time range may be pushed; entity and time-dimension predicates stay
    /// where they are written.
    pub fn new(
        time_range_constraint: Option<TimeRangeConstraint>,
        where_filter_specs: Vec<WhereFilterSpec>,
    ) -> Self {
        Self {
            time_range_constraint,
            where_filter_specs,
            pushdown_enabled_types: BTreeSet::from([
                PredicateInputType::CategoricalDimension,
                PredicateInputType::TimeRangeConstraint,
            ]),
            applied_where_filter_specs: Vec::new(),
        }
    }

    /// A state that pushes nothing, for branches whose inputs must not be
    /// pre-filtered.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn time_range_constraint(&self) -> Option<&TimeRangeConstraint> {
        if self.is_pushdown_enabled_for_time_range() {
            self.time_range_constraint.as_ref()
        } else {
            None
        }
    }

    pub fn where_filter_specs(&self) -> &[WhereFilterSpec] {
        &self.where_filter_specs
    }

    pub fn applied_where_filter_specs(&self) -> &[WhereFilterSpec] {
        &self.applied_where_filter_specs
    }

    pub fn is_pushdown_enabled_for_where_filters(&self) -> bool {
        self.pushdown_enabled_types
            .iter()
            .any(|input_type| *input_type != PredicateInputType::TimeRangeConstraint)
    }

    pub fn is_pushdown_enabled_for_time_range(&self) -> bool {
        self.pushdown_enabled_types
            .contains(&PredicateInputType::TimeRangeConstraint)
    }

    pub fn has_pushdown_potential(&self) -> bool {
        (self.is_pushdown_enabled_for_time_range() && self.time_range_constraint.is_some())
            || (self.is_pushdown_enabled_for_where_filters() && !self.where_filter_specs.is_empty())
    }

    pub fn with_time_range_constraint(&self, constraint: TimeRangeConstraint) -> Self {
        let mut next = self.clone();
        next.time_range_constraint = Some(constraint);
        next
    }

    /// Clear the carried time range, as when a scan must read unconstrained
    /// history for an all-time accumulation.
    pub fn without_time_range_constraint(&self) -> Self {
        let mut next = self.clone();
        next.time_range_constraint = None;
        next
    }

    /// Drop where-filter pushdown entirely; time-range pushdown survives.
    pub fn without_where_filters(&self) -> Self {
        let mut next = self.clone();
        next.where_filter_specs.clear();
        next.pushdown_enabled_types
            .retain(|input_type| *input_type == PredicateInputType::TimeRangeConstraint);
        next
    }

    /// Add filters encountered deeper in the plan. A no-op when where-filter
    /// pushdown is off.
    pub fn with_additional_where_filters(
        &self,
        filters: impl IntoIterator<Item = WhereFilterSpec>,
    ) -> Self {
        let mut next = self.clone();
        if !next.is_pushdown_enabled_for_where_filters() {
            return next;
        }
        for filter in filters {
            if !next.where_filter_specs.contains(&filter) {
                next.where_filter_specs.push(filter);
            }
        }
        next
    }

    /// Record filters that were applied at a source, so enclosing constraint
    /// nodes can drop them.
    pub fn with_applied_where_filters(&self, applied: &[WhereFilterSpec]) -> Self {
        let mut next = self.clone();
        for filter in applied {
            if !next.applied_where_filter_specs.contains(filter) {
                next.applied_where_filter_specs.push(filter.clone());
            }
        }
        next
    }

    /// The tracked filters that may be evaluated against a node producing
    /// exactly `output_specs`: every referenced element must be present, of a
    /// pushdown-enabled kind, and not already applied below.
    pub fn eligible_filters_for_output(
        &self,
        output_specs: &LinkableSpecSet,
    ) -> Vec<WhereFilterSpec> {
        self.where_filter_specs
            .iter()
            .filter(|filter| {
                !self.applied_where_filter_specs.contains(filter)
                    && !filter.linkable_spec_set.is_empty()
                    && self.filter_types_enabled(filter)
                    && filter.linkable_spec_set.is_subset_of(output_specs)
            })
            .cloned()
            .collect()
    }

    fn filter_types_enabled(&self, filter: &WhereFilterSpec) -> bool {
        let referenced = &filter.linkable_spec_set;
        let mut required_types = BTreeSet::new();
        if !referenced.dimension_specs.is_empty() {
            required_types.insert(PredicateInputType::CategoricalDimension);
        }
        if !referenced.time_dimension_specs.is_empty() {
            required_types.insert(PredicateInputType::TimeDimension);
        }
        if !referenced.entity_specs.is_empty() {
            required_types.insert(PredicateInputType::Entity);
        }
        required_types.is_subset(&self.pushdown_enabled_types)
    }
}

/// Branch-scoped state stack for the pushdown optimizer's traversal.
///
/// Entering a branch pushes an adjusted state; leaving pops it and merges
/// the popped branch's applied filters into the surrounding state, so a
/// parent constraint node above a join sees what its descendants applied.
#[derive(Debug)]
pub struct PushdownBranchStateTracker {
    stack: Vec<PredicatePushdownState>,
}

impl PushdownBranchStateTracker {
    pub fn new(initial: PredicatePushdownState) -> Self {
        Self {
            stack: vec![initial],
        }
    }

    pub fn track(&mut self, state: PredicatePushdownState) {
        self.stack.push(state);
    }

    pub fn current(&self) -> &PredicatePushdownState {
        self.stack.last().expect("branch state stack is empty")
    }

    pub fn record_applied(&mut self, applied: &[WhereFilterSpec]) {
        let top = self.stack.last_mut().expect("branch state stack is empty");
        *top = top.with_applied_where_filters(applied);
    }

    pub fn finish(&mut self) -> PredicatePushdownState {
        let popped = self
            .stack
            .pop()
            .expect("unbalanced branch state tracking");
        if let Some(top) = self.stack.last_mut() {
            *top = top.with_applied_where_filters(popped.applied_where_filter_specs());
        }
        popped
    }
}
