//! Shared manifest fixtures for unit and integration tests.
//!
//! One manifest, used everywhere: a bookings fact joined to listings and
//! users dimension models, a visits/buys event pair for conversion metrics,
//! and an accounts model with semi-additive balances. Tests that need a
//! different shape build their own manifest inline.

use crate::manifest::{
    AggregationType, ConversionCalculationType, ConversionTypeParams, CumulativeTypeParams,
    CustomGrainColumn, DimensionDef, EntityDef, EntityType, MeasureDef, Metric, MetricInput,
    MetricInputMeasure, MetricType, MetricTypeParams, NonAdditiveDimensionParams,
    NonAdditiveWindowChoice, PeriodAggregation, SemanticManifest, SemanticModel,
    SemanticModelDefaults, TimeSpineSource,
};
use crate::spec::{MetricTimeWindow, TimeGranularity};

fn day_defaults() -> Option<SemanticModelDefaults> {
    Some(SemanticModelDefaults {
        agg_time_dimension: Some("ds".to_string()),
    })
}

fn bookings_source() -> SemanticModel {
    SemanticModel {
        name: "bookings_source".to_string(),
        sql_table: Some("fact_bookings".to_string()),
        sql_query: None,
        defaults: day_defaults(),
        entities: vec![
            EntityDef::new("booking", EntityType::Primary),
            EntityDef::new("listing", EntityType::Foreign),
        ],
        dimensions: vec![
            DimensionDef::time("ds", TimeGranularity::Day),
            DimensionDef::categorical("is_instant"),
        ],
        measures: vec![
            MeasureDef::new("bookings", AggregationType::Sum).with_expr("1"),
            MeasureDef::new("booking_value", AggregationType::Sum),
            MeasureDef::new("max_booking_value", AggregationType::Max)
                .with_expr("booking_value"),
        ],
    }
}

fn listings_source() -> SemanticModel {
    SemanticModel {
        name: "listings_source".to_string(),
        sql_table: Some("dim_listings".to_string()),
        sql_query: None,
        defaults: None,
        entities: vec![
            EntityDef::new("listing", EntityType::Primary),
            EntityDef::new("user", EntityType::Foreign),
        ],
        dimensions: vec![
            DimensionDef::categorical("country_latest"),
            DimensionDef::categorical("capacity_latest"),
        ],
        measures: vec![],
    }
}

fn users_source() -> SemanticModel {
    SemanticModel {
        name: "users_source".to_string(),
        sql_table: Some("dim_users".to_string()),
        sql_query: None,
        defaults: None,
        entities: vec![EntityDef::new("user", EntityType::Primary)],
        dimensions: vec![DimensionDef::categorical("home_state_latest")],
        measures: vec![],
    }
}

fn visits_source() -> SemanticModel {
    SemanticModel {
        name: "visits_source".to_string(),
        sql_table: Some("fact_visits".to_string()),
        sql_query: None,
        defaults: day_defaults(),
        entities: vec![
            EntityDef::new("visit", EntityType::Primary),
            EntityDef::new("user", EntityType::Foreign),
        ],
        dimensions: vec![
            DimensionDef::time("ds", TimeGranularity::Day),
            DimensionDef::categorical("referrer_id"),
        ],
        measures: vec![MeasureDef::new("visits", AggregationType::Sum).with_expr("1")],
    }
}

fn buys_source() -> SemanticModel {
    SemanticModel {
        name: "buys_source".to_string(),
        sql_table: Some("fact_buys".to_string()),
        sql_query: None,
        defaults: day_defaults(),
        entities: vec![
            EntityDef::new("buy", EntityType::Primary),
            EntityDef::new("user", EntityType::Foreign),
        ],
        dimensions: vec![DimensionDef::time("ds", TimeGranularity::Day)],
        measures: vec![MeasureDef::new("buys", AggregationType::Sum).with_expr("1")],
    }
}

fn accounts_source() -> SemanticModel {
    SemanticModel {
        name: "accounts_source".to_string(),
        sql_table: Some("fact_accounts".to_string()),
        sql_query: None,
        defaults: day_defaults(),
        entities: vec![
            EntityDef::new("account", EntityType::Primary),
            EntityDef::new("user", EntityType::Foreign),
        ],
        dimensions: vec![
            DimensionDef::time("ds", TimeGranularity::Day),
            DimensionDef::categorical("account_type"),
        ],
        measures: vec![
            MeasureDef::new("total_account_balance", AggregationType::Sum)
                .with_expr("account_balance")
                .with_non_additive_dimension(NonAdditiveDimensionParams {
                    name: "ds".to_string(),
                    window_choice: NonAdditiveWindowChoice::Min,
                    window_groupings: vec![],
                }),
            MeasureDef::new("current_account_balance_by_user", AggregationType::Sum)
                .with_expr("account_balance")
                .with_non_additive_dimension(NonAdditiveDimensionParams {
                    name: "ds".to_string(),
                    window_choice: NonAdditiveWindowChoice::Max,
                    window_groupings: vec!["user".to_string()],
                }),
        ],
    }
}

fn metrics() -> Vec<Metric> {
    vec![
        Metric::simple("bookings", "bookings"),
        Metric::simple("booking_value", "booking_value"),
        Metric::simple("max_booking_value", "max_booking_value"),
        Metric::simple("instant_bookings", "bookings")
            .with_filter("{{ Dimension('booking__is_instant') }}"),
        Metric {
            name: "bookings_join_to_time_spine".to_string(),
            metric_type: MetricType::Simple,
            type_params: MetricTypeParams {
                measure: Some(MetricInputMeasure::new("bookings").with_join_to_timespine()),
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric {
            name: "booking_value_per_booking".to_string(),
            metric_type: MetricType::Ratio,
            type_params: MetricTypeParams {
                numerator: Some(MetricInput::new("booking_value")),
                denominator: Some(MetricInput::new("bookings")),
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric {
            name: "booking_fees".to_string(),
            metric_type: MetricType::Derived,
            type_params: MetricTypeParams {
                expr: Some("booking_value * 0.05".to_string()),
                metrics: vec![MetricInput::new("booking_value")],
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric {
            name: "bookings_growth_mom".to_string(),
            metric_type: MetricType::Derived,
            type_params: MetricTypeParams {
                expr: Some("bookings - bookings_last_month".to_string()),
                metrics: vec![
                    MetricInput::new("bookings"),
                    MetricInput::new("bookings")
                        .with_alias("bookings_last_month")
                        .with_offset_window(MetricTimeWindow::new(1, TimeGranularity::Month)),
                ],
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric {
            name: "bookings_last_week".to_string(),
            metric_type: MetricType::Cumulative,
            type_params: MetricTypeParams {
                measure: Some(MetricInputMeasure::new("bookings")),
                cumulative_type_params: Some(CumulativeTypeParams {
                    window: Some(MetricTimeWindow::new(7, TimeGranularity::Day)),
                    grain_to_date: None,
                    period_agg: PeriodAggregation::First,
                }),
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric {
            name: "bookings_mtd".to_string(),
            metric_type: MetricType::Cumulative,
            type_params: MetricTypeParams {
                measure: Some(MetricInputMeasure::new("bookings")),
                cumulative_type_params: Some(CumulativeTypeParams {
                    window: None,
                    grain_to_date: Some(TimeGranularity::Month),
                    period_agg: PeriodAggregation::Last,
                }),
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric {
            name: "lifetime_bookings".to_string(),
            metric_type: MetricType::Cumulative,
            type_params: MetricTypeParams {
                measure: Some(MetricInputMeasure::new("bookings")),
                cumulative_type_params: Some(CumulativeTypeParams::default()),
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric {
            name: "visit_buy_conversion_rate".to_string(),
            metric_type: MetricType::Conversion,
            type_params: MetricTypeParams {
                conversion_type_params: Some(ConversionTypeParams {
                    base_measure: MetricInputMeasure::new("visits"),
                    conversion_measure: MetricInputMeasure::new("buys"),
                    entity: "user".to_string(),
                    calculation: ConversionCalculationType::ConversionRate,
                    window: Some(MetricTimeWindow::new(7, TimeGranularity::Day)),
                    constant_properties: vec![],
                }),
                ..MetricTypeParams::default()
            },
            filter: None,
        },
        Metric::simple("current_account_balance", "total_account_balance"),
        Metric::simple(
            "account_balance_by_user",
            "current_account_balance_by_user",
        ),
    ]
}

/// The standard fixture: six semantic models, a day-grain time spine with a
/// retail calendar column, and one metric of every supported type.
pub fn fixture_manifest() -> SemanticManifest {
    SemanticManifest {
        semantic_models: vec![
            bookings_source(),
            listings_source(),
            users_source(),
            visits_source(),
            buys_source(),
            accounts_source(),
        ],
        metrics: metrics(),
        time_spines: vec![
            TimeSpineSource::new("all_days", "date_day", TimeGranularity::Day).with_custom_grain(
                CustomGrainColumn {
                    name: "retail_month".to_string(),
                    column_name: "retail_month".to_string(),
                    base_granularity: TimeGranularity::Month,
                },
            ),
            TimeSpineSource::new("all_months", "date_month", TimeGranularity::Month),
        ],
    }
}
