mod common;

use common::*;
use insight_engine::{
    CancelToken, EngineError, IntegrityThresholds, ModelBuilder, RelationshipId, Severity,
};
use pretty_assertions::assert_eq;

#[test]
fn counts_nulls_and_orphans_on_a_relationship() {
    let model = csat_model();
    let reports = model.check_integrity("FactSurvey").unwrap();
    assert_eq!(reports.len(), 3);

    let geo = &reports[0];
    assert_eq!(geo.relationship, RelationshipId::new("Survey_Geo"));
    assert_eq!(geo.total_rows, 10);
    assert_eq!(geo.null_count, 1);
    assert_eq!(geo.orphan_count, 1);
    assert_eq!(geo.distinct_keys, 4);
    assert_eq!(geo.orphan_distinct_keys, 1);
    assert_close(geo.null_ratio, 0.1);
    assert_close(geo.coverage.unwrap(), 0.75);
    assert_eq!(geo.severity, Severity::Red);
}

#[test]
fn clean_relationships_grade_green() {
    let model = csat_model();
    let reports = model.check_integrity("FactSurvey").unwrap();
    for report in &reports[1..] {
        assert_eq!(report.null_count, 0, "{}", report.relationship);
        assert_eq!(report.orphan_count, 0, "{}", report.relationship);
        assert_eq!(report.coverage, Some(1.0));
        assert_eq!(report.severity, Severity::Green);
    }
}

#[test]
fn reports_are_computed_on_load_for_every_fact() {
    let model = csat_model();
    let on_load: Vec<&str> = model
        .integrity_on_load()
        .iter()
        .map(|r| r.relationship.as_str())
        .collect();
    assert_eq!(on_load.len(), 4);
    assert!(on_load.contains(&"Survey_Geo"));
    assert!(on_load.contains(&"Tickets_Geo"));
}

#[test]
fn orphans_do_not_block_loading_or_queries() {
    let model = csat_model();
    // The orphaned and null survey rows still count towards unfiltered totals.
    assert_eq!(
        model
            .evaluate("# CSAT Response", &Default::default())
            .unwrap(),
        10.into()
    );
}

#[test]
fn thresholds_control_grading() {
    let mut builder = csat_builder();
    builder.set_integrity_thresholds(IntegrityThresholds {
        red_coverage: 0.5,
        red_null_ratio: 0.5,
        yellow_coverage: 0.8,
        yellow_null_ratio: 0.2,
    });
    let model = builder.build().unwrap();
    let report = model
        .check_relationship(
            "FactSurvey",
            &RelationshipId::new("Survey_Geo"),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(report.severity, Severity::Yellow);
}

#[test]
fn unknown_or_foreign_relationship_is_an_error() {
    let model = csat_model();
    let cancel = CancelToken::new();

    let err = model
        .check_relationship("FactSurvey", &RelationshipId::new("Missing"), &cancel)
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRelationship(_)), "{err:?}");

    let err = model
        .check_relationship("FactSurvey", &RelationshipId::new("Tickets_Geo"), &cancel)
        .unwrap_err();
    assert!(matches!(err, EngineError::RelationshipMismatch { .. }), "{err:?}");

    let err = model.check_integrity("FactNowhere").unwrap_err();
    assert!(matches!(err, EngineError::UnknownTable(_)), "{err:?}");
}

#[test]
fn fact_without_keys_has_no_coverage() {
    let (geo_schema, geo_table) = geo();
    let (tickets_schema, _) = tickets();
    let empty = insight_engine::Table::new(
        "FactTickets",
        vec!["TicketId", "GeoKey", "OpenedDate", "CreatedDate"],
    );

    let mut builder = ModelBuilder::new();
    builder.add_table(geo_schema, geo_table).unwrap();
    builder.add_table(tickets_schema, empty).unwrap();
    let model = builder.build().unwrap();

    let reports = model.check_integrity("FactTickets").unwrap();
    assert_eq!(reports[0].total_rows, 0);
    assert_eq!(reports[0].coverage, None);
    assert_eq!(reports[0].severity, Severity::Green);
}
