mod common;

use common::*;
use insight_engine::{DateWindow, EngineError, FilterContext, Value};
use pretty_assertions::assert_eq;

#[test]
fn anchor_is_latest_populated_date_of_the_fact() {
    let model = csat_model();
    assert_eq!(model.anchor_date("FactSurvey").unwrap(), date(2024, 3, 10));
    assert_eq!(
        model
            .anchor_date_for("FactTickets", "CreatedDate")
            .unwrap(),
        date(2024, 3, 5)
    );
}

#[test]
fn all_null_anchor_column_reports_no_anchor() {
    let model = csat_model();
    let err = model.anchor_date("FactTickets").unwrap_err();
    match err {
        EngineError::NoAnchor { table, column } => {
            assert_eq!(table, "FactTickets");
            assert_eq!(column, "OpenedDate");
        }
        other => panic!("expected NoAnchor, got {other:?}"),
    }
}

#[test]
fn caller_fallback_window_evaluates_normally() {
    let model = csat_model();
    assert!(model.anchor_date("FactTickets").is_err());

    let window = DateWindow::last_full_calendar_month(date(2024, 3, 15));
    assert_eq!(window, DateWindow::new(date(2024, 2, 1), date(2024, 2, 29)));

    let ctx = FilterContext::empty().with_window("FactTickets", "CreatedDate", window);
    assert_eq!(model.evaluate("# Tickets", &ctx).unwrap(), 2.into());
}

#[test]
fn window_measure_without_anchor_is_blank() {
    let model = csat_model();
    assert_eq!(
        model
            .evaluate("# Tickets 30d", &FilterContext::empty())
            .unwrap(),
        Value::Blank
    );
}

#[test]
fn undeclared_anchor_column_is_reported() {
    let model = csat_model();
    let err = model.anchor_date("DimGeo").unwrap_err();
    assert!(matches!(err, EngineError::NoAnchorColumn { .. }), "{err:?}");

    let err = model.anchor_date_for("FactSurvey", "Missing").unwrap_err();
    assert!(matches!(err, EngineError::UnknownColumn { .. }), "{err:?}");
}

#[test]
fn profile_counts_recent_rows() {
    let model = csat_model();
    let profile = model.anchor_profile("FactSurvey", None).unwrap();
    assert_eq!(profile.column, "SurveyDate");
    assert_eq!(profile.min, Some(date(2024, 3, 1)));
    assert_eq!(profile.anchor, Some(date(2024, 3, 10)));
    assert_eq!(profile.non_blank, 10);
    assert_eq!(profile.recent_counts.get(&7), Some(&8));
    assert_eq!(profile.recent_counts.get(&30), Some(&10));
    assert_eq!(profile.recent_counts.get(&90), Some(&10));

    let empty = model.anchor_profile("FactTickets", None).unwrap();
    assert_eq!(empty.anchor, None);
    assert_eq!(empty.non_blank, 0);
    assert_eq!(empty.total_rows, 3);
    assert!(empty.recent_counts.is_empty());
}

#[test]
fn describe_lists_anchor_per_fact() {
    let model = csat_model();
    let summary = model.describe();
    let survey = summary
        .facts
        .iter()
        .find(|f| f.name == "FactSurvey")
        .unwrap();
    assert_eq!(survey.anchor, Some(date(2024, 3, 10)));
    assert_eq!(survey.row_count, 10);
    let tickets = summary
        .facts
        .iter()
        .find(|f| f.name == "FactTickets")
        .unwrap();
    assert_eq!(tickets.anchor, None);
    assert_eq!(tickets.anchor_column.as_deref(), Some("OpenedDate"));
    assert_eq!(summary.ambiguous.len(), 1);
}
