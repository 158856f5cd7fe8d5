#![allow(dead_code)]

use chrono::NaiveDate;
use insight_engine::{
    ColumnDef, ColumnFilter, ColumnRef, DataModel, ForeignKey, Measure, MeasureExpr,
    ModelBuilder, Predicate, Table, TableSchema, Value,
};

pub const SCORES: [f64; 10] = [1.0, 1.0, 2.0, 4.0, 5.0, 5.0, 5.0, 3.0, 2.0, 4.0];

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn geo() -> (TableSchema, Table) {
    let schema = TableSchema::dimension(
        "DimGeo",
        vec![
            ColumnDef::key("GeoKey"),
            ColumnDef::text("Country"),
            ColumnDef::text("Region"),
        ],
        "GeoKey",
    );
    let table = Table::with_rows(
        "DimGeo",
        vec!["GeoKey", "Country", "Region"],
        vec![
            vec![1.into(), "US".into(), "NA".into()],
            vec![2.into(), "DE".into(), "EU".into()],
            vec![3.into(), "FR".into(), "EU".into()],
        ],
    )
    .unwrap();
    (schema, table)
}

/// Queue dimension reachable from surveys through two key columns.
pub fn queue() -> (TableSchema, Table) {
    let schema = TableSchema::dimension(
        "DimQueue",
        vec![
            ColumnDef::key("QueueKey"),
            ColumnDef::key("QueueID").not_null().unique(),
            ColumnDef::text("QueueName"),
        ],
        "QueueKey",
    );
    let table = Table::with_rows(
        "DimQueue",
        vec!["QueueKey", "QueueID", "QueueName"],
        vec![
            vec![10.into(), 100.into(), "Billing".into()],
            vec![11.into(), 101.into(), "Tech".into()],
            vec![12.into(), 102.into(), "Sales".into()],
        ],
    )
    .unwrap();
    (schema, table)
}

/// Ten survey responses dated 2024-03-01 through 2024-03-10.
///
/// Row 7 has a blank geo key and row 8 an orphaned one (99).
pub fn survey() -> (TableSchema, Table) {
    let schema = TableSchema::fact(
        "FactSurvey",
        vec![
            ColumnDef::key("SurveyId").not_null().unique(),
            ColumnDef::key("GeoKey"),
            ColumnDef::key("QueueKey"),
            ColumnDef::key("QueueID"),
            ColumnDef::number("CsatScore"),
            ColumnDef::date("SurveyDate"),
        ],
    )
    .with_foreign_key(ForeignKey::new("Survey_Geo", "GeoKey", "DimGeo", "GeoKey"))
    .with_foreign_key(ForeignKey::new(
        "Survey_Queue_ByKey",
        "QueueKey",
        "DimQueue",
        "QueueKey",
    ))
    .with_foreign_key(
        ForeignKey::new("Survey_Queue_ById", "QueueID", "DimQueue", "QueueID").inactive(),
    )
    .with_anchor_column("SurveyDate");

    let geo_keys = [
        Some(1),
        Some(1),
        Some(2),
        Some(1),
        Some(3),
        Some(2),
        Some(1),
        None,
        Some(99),
        Some(2),
    ];
    let queue_keys = [10, 11, 10, 12, 11, 10, 12, 11, 10, 11];
    let queue_ids = [100, 100, 101, 102, 101, 101, 102, 101, 100, 101];

    let mut table = Table::new(
        "FactSurvey",
        vec!["SurveyId", "GeoKey", "QueueKey", "QueueID", "CsatScore", "SurveyDate"],
    );
    for i in 0..10 {
        table
            .push_row(vec![
                Value::from(i as i64 + 1),
                Value::from(geo_keys[i]),
                Value::from(queue_keys[i]),
                Value::from(queue_ids[i]),
                Value::from(SCORES[i]),
                Value::from(date(2024, 3, i as u32 + 1)),
            ])
            .unwrap();
    }
    (schema, table)
}

/// Tickets whose declared anchor column holds no dates.
pub fn tickets() -> (TableSchema, Table) {
    let schema = TableSchema::fact(
        "FactTickets",
        vec![
            ColumnDef::key("TicketId"),
            ColumnDef::key("GeoKey"),
            ColumnDef::date("OpenedDate"),
            ColumnDef::date("CreatedDate"),
        ],
    )
    .with_foreign_key(ForeignKey::new("Tickets_Geo", "GeoKey", "DimGeo", "GeoKey"))
    .with_anchor_column("OpenedDate");
    let table = Table::with_rows(
        "FactTickets",
        vec!["TicketId", "GeoKey", "OpenedDate", "CreatedDate"],
        vec![
            vec![1.into(), 1.into(), Value::Blank, date(2024, 2, 10).into()],
            vec![2.into(), 2.into(), Value::Blank, date(2024, 2, 20).into()],
            vec![3.into(), 2.into(), Value::Blank, date(2024, 3, 5).into()],
        ],
    )
    .unwrap();
    (schema, table)
}

pub fn score_at_most(max: f64) -> ColumnFilter {
    ColumnFilter::new(ColumnRef::new("FactSurvey", "CsatScore"), Predicate::at_most(max))
}

pub fn csat_measures() -> Vec<Measure> {
    vec![
        Measure::new(
            "# CSAT Response",
            MeasureExpr::count("FactSurvey", "CsatScore"),
        ),
        Measure::new(
            "# DSAT",
            MeasureExpr::filtered(
                MeasureExpr::count("FactSurvey", "CsatScore"),
                vec![score_at_most(2.0)],
            ),
        ),
        Measure::new(
            "% DSAT",
            MeasureExpr::ratio(
                MeasureExpr::measure("# DSAT"),
                MeasureExpr::measure("# CSAT Response"),
            ),
        ),
        Measure::new(
            "P75 CSAT",
            MeasureExpr::percentile("FactSurvey", "CsatScore", 0.75),
        ),
        Measure::new(
            "Median CSAT",
            MeasureExpr::Median {
                column: ColumnRef::new("FactSurvey", "CsatScore"),
            },
        ),
        Measure::new("Avg CSAT", MeasureExpr::average("FactSurvey", "CsatScore")),
        Measure::new("Total CSAT", MeasureExpr::sum("FactSurvey", "CsatScore")),
        Measure::new("# Tickets", MeasureExpr::count_rows("FactTickets")),
        Measure::new(
            "# CSAT Response 7d",
            MeasureExpr::window(MeasureExpr::measure("# CSAT Response"), "FactSurvey", 7),
        ),
        Measure::new(
            "# Tickets 30d",
            MeasureExpr::window(MeasureExpr::count_rows("FactTickets"), "FactTickets", 30),
        ),
    ]
}

pub fn csat_builder() -> ModelBuilder {
    let mut builder = ModelBuilder::new();
    for (schema, table) in [geo(), queue(), survey(), tickets()] {
        builder.add_table(schema, table).unwrap();
    }
    for measure in csat_measures() {
        builder.add_measure(measure).unwrap();
    }
    builder
}

pub fn csat_model() -> DataModel {
    csat_builder().build().unwrap()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

pub fn number(value: &Value) -> f64 {
    value
        .as_f64()
        .unwrap_or_else(|| panic!("expected a number, got {value:?}"))
}
