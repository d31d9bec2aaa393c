//! Rendering of plans as indented trees, one node per line with its
//! distinguishing parameters.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use insta::assert_snapshot;
use strata::dataflow::{
    AddGeneratedUuidColumnNode, AggregateMetricInputsNode, CombineAggregatedOutputsNode,
    ComputeMetricsNode, ConstrainTimeRangeNode, DataflowNode, DataflowNodeRef, DataflowPlan,
    FilterElementsNode, JoinConversionEventsNode, JoinDescription, JoinOnEntitiesNode,
    JoinOverTimeRangeNode, JoinToTimeSpineNode, MetricTimeTransformNode, NodeIdAllocator, NodeKind,
    OrderByLimitNode, ReadSqlSourceNode, SqlJoinType, SqlSource, WhereConstraintNode,
    WriteToResultTableNode, GENERATED_UUID_COLUMN,
};
use strata::spec::{
    DimensionSpec, EntitySpec, InstanceSpec, InstanceSpecSet, LinkableSpec, LinkableSpecSet,
    MeasureSpec, MetricInputSpec, MetricSpec, MetricTimeWindow, OrderBySpec, TimeDimensionSpec,
    TimeGranularity, TimeRangeConstraint, WhereFilterSpec, METRIC_TIME,
};

fn model_read(ids: &mut NodeIdAllocator, model_name: &str, table: &str) -> DataflowNodeRef {
    DataflowNode::new(
        NodeKind::ReadSqlSource(ReadSqlSourceNode {
            source: SqlSource::SemanticModel {
                model_name: model_name.to_string(),
                table: table.to_string(),
            },
        }),
        ids,
    )
}

fn day_spine_read(ids: &mut NodeIdAllocator) -> DataflowNodeRef {
    DataflowNode::new(
        NodeKind::ReadSqlSource(ReadSqlSourceNode {
            source: SqlSource::TimeSpine {
                table: "all_days".to_string(),
                base_column: "date_day".to_string(),
                base_granularity: TimeGranularity::Day,
            },
        }),
        ids,
    )
}

fn metric_time_day() -> TimeDimensionSpec {
    TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day)
}

fn write_plan(ids: &mut NodeIdAllocator, parent: DataflowNodeRef) -> DataflowPlan {
    DataflowPlan::new(DataflowNode::new(
        NodeKind::WriteToResultTable(WriteToResultTableNode { parent }),
        ids,
    ))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn grouped_metric_plan_renders_as_an_indented_tree() {
    let mut ids = NodeIdAllocator::new();
    let bookings = model_read(&mut ids, "bookings_source", "fact_bookings");
    let transform = DataflowNode::new(
        NodeKind::MetricTimeTransform(MetricTimeTransformNode {
            parent: bookings,
            aggregation_time_dimension: "ds".to_string(),
        }),
        &mut ids,
    );
    let listings = model_read(&mut ids, "listings_source", "dim_listings");
    let joined = DataflowNode::new(
        NodeKind::JoinOnEntities(JoinOnEntitiesNode {
            left: transform,
            joins: vec![JoinDescription {
                join_node: listings,
                join_on_entity: Some(EntitySpec::local("listing")),
                join_type: SqlJoinType::LeftOuter,
                join_on_partition_dimensions: Vec::new(),
                join_on_partition_time_dimensions: Vec::new(),
                validity_window: None,
            }],
        }),
        &mut ids,
    );
    let filtered = DataflowNode::new(
        NodeKind::WhereConstraint(WhereConstraintNode {
            parent: joined,
            where_specs: vec![
                WhereFilterSpec::parse("{{ Dimension('booking__is_instant') }}").unwrap(),
            ],
            always_apply: false,
        }),
        &mut ids,
    );
    let country: LinkableSpec = DimensionSpec::with_links("country_latest", ["listing"]).into();
    let projected = DataflowNode::new(
        NodeKind::FilterElements(FilterElementsNode {
            parent: filtered,
            include_specs: InstanceSpecSet::from_linkable(LinkableSpecSet::from_specs([
                country.clone(),
                metric_time_day().into(),
            ]))
            .with_measures(vec![MeasureSpec::new("bookings")]),
            distinct: false,
        }),
        &mut ids,
    );
    let aggregated = DataflowNode::new(
        NodeKind::AggregateMetricInputs(AggregateMetricInputsNode {
            parent: projected,
            metric_input_specs: vec![MetricInputSpec::unconstrained(MeasureSpec::new("bookings"))],
        }),
        &mut ids,
    );
    let computed = DataflowNode::new(
        NodeKind::ComputeMetrics(ComputeMetricsNode {
            parent: aggregated,
            metric_specs: vec![MetricSpec::from_name("bookings")],
            aggregated_to_elements: BTreeSet::from([
                country,
                LinkableSpec::from(metric_time_day()),
            ]),
            for_group_by_source_node: false,
        }),
        &mut ids,
    );
    let plan = write_plan(&mut ids, computed);

    assert_snapshot!(plan.to_string(), @r###"
    WriteToResultTable (wrt_8)
      ComputeMetrics (cm_7) metrics=[bookings]
        AggregateMetricInputs (am_6) inputs=[bookings]
          FilterElements (fe_5) include=[bookings, listing__country_latest, metric_time__day]
            WhereConstraint (wc_4) filters=["booking__is_instant"]
              JoinOnEntities (jse_3) joins=[LEFT OUTER JOIN on listing]
                MetricTimeTransform (mtt_1) column=ds
                  ReadSqlSource (rss_0) model=bookings_source table=fact_bookings
                ReadSqlSource (rss_2) model=listings_source table=dim_listings
    "###);
}

#[test]
fn shared_subtrees_print_once_and_reference_after() {
    let mut ids = NodeIdAllocator::new();
    let bookings = model_read(&mut ids, "bookings_source", "fact_bookings");
    let transform = DataflowNode::new(
        NodeKind::MetricTimeTransform(MetricTimeTransformNode {
            parent: bookings,
            aggregation_time_dimension: "ds".to_string(),
        }),
        &mut ids,
    );
    let include = InstanceSpecSet::from_linkable(LinkableSpecSet::from_specs([
        LinkableSpec::from(metric_time_day()),
    ]))
    .with_measures(vec![MeasureSpec::new("bookings")]);

    let plain_projection = DataflowNode::new(
        NodeKind::FilterElements(FilterElementsNode {
            parent: transform.clone(),
            include_specs: include.clone(),
            distinct: false,
        }),
        &mut ids,
    );
    let plain_aggregate = DataflowNode::new(
        NodeKind::AggregateMetricInputs(AggregateMetricInputsNode {
            parent: plain_projection,
            metric_input_specs: vec![MetricInputSpec::unconstrained(MeasureSpec::new("bookings"))],
        }),
        &mut ids,
    );

    let offset_projection = DataflowNode::new(
        NodeKind::FilterElements(FilterElementsNode {
            parent: transform,
            include_specs: include,
            distinct: false,
        }),
        &mut ids,
    );
    let offset_aggregate = DataflowNode::new(
        NodeKind::AggregateMetricInputs(AggregateMetricInputsNode {
            parent: offset_projection,
            metric_input_specs: vec![MetricInputSpec::unconstrained(MeasureSpec::new("bookings"))
                .with_alias("bookings_last_month")],
        }),
        &mut ids,
    );
    let range = TimeRangeConstraint::new(date(2020, 1, 1), date(2020, 3, 1));
    let spine = day_spine_read(&mut ids);
    let offset_join = DataflowNode::new(
        NodeKind::JoinToTimeSpine(JoinToTimeSpineNode {
            parent: offset_aggregate,
            time_spine_node: spine,
            requested_agg_time_dimension_specs: vec![metric_time_day()],
            join_type: SqlJoinType::Inner,
            offset_window: Some(MetricTimeWindow::new(1, TimeGranularity::Month)),
            offset_to_grain: None,
            time_range_constraint: Some(range),
        }),
        &mut ids,
    );
    let deferred_filter = DataflowNode::new(
        NodeKind::WhereConstraint(WhereConstraintNode {
            parent: offset_join,
            where_specs: vec![WhereFilterSpec::parse(
                "{{ TimeDimension('metric_time', 'day') }} >= '2020-01-01'",
            )
            .unwrap()],
            always_apply: true,
        }),
        &mut ids,
    );
    let constrained = DataflowNode::new(
        NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
            parent: deferred_filter,
            time_range: range,
        }),
        &mut ids,
    );
    let combined = DataflowNode::new(
        NodeKind::CombineAggregatedOutputs(CombineAggregatedOutputsNode {
            parents: vec![plain_aggregate, constrained],
        }),
        &mut ids,
    );
    let computed = DataflowNode::new(
        NodeKind::ComputeMetrics(ComputeMetricsNode {
            parent: combined,
            metric_specs: vec![MetricSpec::from_name("bookings_growth_mom")],
            aggregated_to_elements: BTreeSet::from([LinkableSpec::from(metric_time_day())]),
            for_group_by_source_node: false,
        }),
        &mut ids,
    );
    let plan = write_plan(&mut ids, computed);

    assert_snapshot!(plan.to_string(), @r###"
    WriteToResultTable (wrt_12)
      ComputeMetrics (cm_11) metrics=[bookings_growth_mom]
        CombineAggregatedOutputs (cao_10)
          AggregateMetricInputs (am_3) inputs=[bookings]
            FilterElements (fe_2) include=[bookings, metric_time__day]
              MetricTimeTransform (mtt_1) column=ds
                ReadSqlSource (rss_0) model=bookings_source table=fact_bookings
          ConstrainTimeRange (ctr_9) range=2020-01-01..2020-03-01
            WhereConstraint (wc_8) filters=["metric_time__day >= '2020-01-01'"] always_apply
              JoinToTimeSpine (jts_7) join_type=INNER JOIN offset_window=1 month
                AggregateMetricInputs (am_5) inputs=[bookings AS bookings_last_month]
                  FilterElements (fe_4) include=[bookings, metric_time__day]
                    MetricTimeTransform (mtt_1) column=ds (ref)
                ReadSqlSource (rss_6) time_spine=all_days.date_day grain=day
    "###);
}

#[test]
fn window_details_appear_on_accumulation_and_conversion_joins() {
    let mut ids = NodeIdAllocator::new();
    let bookings = model_read(&mut ids, "bookings_source", "fact_bookings");
    let transform = DataflowNode::new(
        NodeKind::MetricTimeTransform(MetricTimeTransformNode {
            parent: bookings,
            aggregation_time_dimension: "ds".to_string(),
        }),
        &mut ids,
    );
    let spine = day_spine_read(&mut ids);
    let accumulated = DataflowNode::new(
        NodeKind::JoinOverTimeRange(JoinOverTimeRangeNode {
            parent: transform,
            time_spine_node: spine,
            queried_agg_time_dimension_specs: vec![metric_time_day()],
            window: Some(MetricTimeWindow::new(7, TimeGranularity::Day)),
            grain_to_date: None,
            time_range_constraint: None,
        }),
        &mut ids,
    );
    let accumulation_plan = write_plan(&mut ids, accumulated);

    assert_snapshot!(accumulation_plan.to_string(), @r###"
    WriteToResultTable (wrt_4)
      JoinOverTimeRange (jotr_3) window=7 day
        MetricTimeTransform (mtt_1) column=ds
          ReadSqlSource (rss_0) model=bookings_source table=fact_bookings
        ReadSqlSource (rss_2) time_spine=all_days.date_day grain=day
    "###);

    let mut ids = NodeIdAllocator::new();
    let visits = model_read(&mut ids, "visits_source", "fact_visits");
    let base_projection = DataflowNode::new(
        NodeKind::FilterElements(FilterElementsNode {
            parent: visits,
            include_specs: InstanceSpecSet::from_linkable(LinkableSpecSet::from_specs([
                LinkableSpec::from(metric_time_day()),
                LinkableSpec::from(EntitySpec::local("user")),
            ])),
            distinct: false,
        }),
        &mut ids,
    );
    let keyed = DataflowNode::new(
        NodeKind::AddGeneratedUuidColumn(AddGeneratedUuidColumnNode {
            parent: base_projection,
        }),
        &mut ids,
    );
    let buys = model_read(&mut ids, "buys_source", "fact_buys");
    let conversion_projection = DataflowNode::new(
        NodeKind::FilterElements(FilterElementsNode {
            parent: buys,
            include_specs: InstanceSpecSet::from_linkable(LinkableSpecSet::from_specs([
                LinkableSpec::from(metric_time_day()),
                LinkableSpec::from(EntitySpec::local("user")),
            ]))
            .with_measures(vec![MeasureSpec::new("buys")]),
            distinct: false,
        }),
        &mut ids,
    );
    let attributed = DataflowNode::new(
        NodeKind::JoinConversionEvents(JoinConversionEventsNode {
            base_node: keyed,
            conversion_node: conversion_projection,
            entity_spec: EntitySpec::local("user"),
            window: Some(MetricTimeWindow::new(7, TimeGranularity::Day)),
            base_time_dimension_spec: TimeDimensionSpec::local("ds", TimeGranularity::Day),
            conversion_time_dimension_spec: TimeDimensionSpec::local("ds", TimeGranularity::Day),
            unique_identifier_keys: vec![GENERATED_UUID_COLUMN.to_string()],
            constant_properties: Vec::new(),
        }),
        &mut ids,
    );
    let conversion_plan = write_plan(&mut ids, attributed);

    assert_snapshot!(conversion_plan.to_string(), @r###"
    WriteToResultTable (wrt_6)
      JoinConversionEvents (jce_5) entity=user window=7 day
        AddGeneratedUuidColumn (guc_2)
          FilterElements (fe_1) include=[metric_time__day, user]
            ReadSqlSource (rss_0) model=visits_source table=fact_visits
        FilterElements (fe_4) include=[buys, metric_time__day, user]
          ReadSqlSource (rss_3) model=buys_source table=fact_buys
    "###);
}

#[test]
fn distinct_and_ordering_markers_render_inline() {
    let mut ids = NodeIdAllocator::new();
    let listings = model_read(&mut ids, "listings_source", "dim_listings");
    let country: LinkableSpec = DimensionSpec::with_links("country_latest", ["listing"]).into();
    let projected = DataflowNode::new(
        NodeKind::FilterElements(FilterElementsNode {
            parent: listings,
            include_specs: InstanceSpecSet::from_linkable(LinkableSpecSet::from_specs([
                country.clone(),
            ])),
            distinct: true,
        }),
        &mut ids,
    );
    let ordered = DataflowNode::new(
        NodeKind::OrderByLimit(OrderByLimitNode {
            parent: projected,
            order_by_specs: vec![OrderBySpec::asc(InstanceSpec::Linkable(country))],
            limit: Some(10),
        }),
        &mut ids,
    );
    let plan = write_plan(&mut ids, ordered);

    assert_snapshot!(plan.to_string(), @r###"
    WriteToResultTable (wrt_3)
      OrderByLimit (obl_2) order_by=[listing__country_latest asc] limit=10
        FilterElements (fe_1) include=[listing__country_latest] distinct
          ReadSqlSource (rss_0) model=listings_source table=dim_listings
    "###);
}
