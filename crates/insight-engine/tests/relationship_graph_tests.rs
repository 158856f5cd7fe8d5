mod common;

use common::*;
use insight_engine::{EngineError, FilterContext, RelationshipId};
use pretty_assertions::assert_eq;

#[test]
fn dual_key_pair_is_flagged_ambiguous_at_load() {
    let model = csat_model();
    let graph = model.graph();

    assert!(graph.is_ambiguous("FactSurvey", "DimQueue"));
    assert!(!graph.is_ambiguous("FactSurvey", "DimGeo"));

    let pairs = graph.ambiguous_pairs();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].fact, "FactSurvey");
    assert_eq!(pairs[0].dimension, "DimQueue");
    let ids: Vec<&str> = pairs[0].candidates.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["Survey_Queue_ByKey", "Survey_Queue_ById"]);
}

#[test]
fn ambiguous_pair_without_selector_lists_both_candidates() {
    let model = csat_model();
    let err = model
        .graph()
        .active_relationship_for("FactSurvey", "DimQueue")
        .unwrap_err();
    match err {
        EngineError::AmbiguousJoin {
            fact,
            dimension,
            candidates,
        } => {
            assert_eq!(fact, "FactSurvey");
            assert_eq!(dimension, "DimQueue");
            assert_eq!(
                candidates,
                vec![
                    "Survey_Queue_ByKey (FactSurvey[QueueKey] -> DimQueue[QueueKey])".to_string(),
                    "Survey_Queue_ById (FactSurvey[QueueID] -> DimQueue[QueueID])".to_string(),
                ]
            );
        }
        other => panic!("expected AmbiguousJoin, got {other:?}"),
    }
}

#[test]
fn single_edge_pair_never_errors() {
    let model = csat_model();
    let rel = model
        .graph()
        .active_relationship_for("FactSurvey", "DimGeo")
        .unwrap();
    assert_eq!(rel.id.as_str(), "Survey_Geo");
    assert_eq!(rel.fact_column, "GeoKey");

    let selected = RelationshipId::new("Survey_Geo");
    let rel = model
        .resolve_join_path("FactSurvey", "DimGeo", Some(&selected))
        .unwrap();
    assert_eq!(rel.id, selected);
}

#[test]
fn selector_picks_one_of_the_ambiguous_edges() {
    let model = csat_model();
    let by_id = RelationshipId::new("Survey_Queue_ById");
    let rel = model
        .resolve_join_path("FactSurvey", "DimQueue", Some(&by_id))
        .unwrap();
    assert_eq!(rel.fact_column, "QueueID");
    assert_eq!(rel.dimension_column, "QueueID");
    assert!(!rel.active);
}

#[test]
fn selector_from_another_pair_is_rejected() {
    let model = csat_model();
    let geo = RelationshipId::new("Survey_Geo");
    let err = model
        .resolve_join_path("FactSurvey", "DimQueue", Some(&geo))
        .unwrap_err();
    assert!(matches!(err, EngineError::RelationshipMismatch { .. }), "{err:?}");

    let unknown = RelationshipId::new("Nope");
    let err = model
        .resolve_join_path("FactSurvey", "DimGeo", Some(&unknown))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRelationship(ref id) if id == "Nope"));
}

#[test]
fn unrelated_pair_has_no_relationship() {
    let model = csat_model();
    let err = model
        .graph()
        .active_relationship_for("FactTickets", "DimQueue")
        .unwrap_err();
    assert!(matches!(err, EngineError::NoRelationship { .. }), "{err:?}");
}

#[test]
fn resolution_order_skips_ambiguous_pairs() {
    let model = csat_model();
    let order: Vec<&str> = model
        .graph()
        .resolution_order("FactSurvey")
        .into_iter()
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(order, vec!["Survey_Geo"]);
    assert_eq!(
        model.graph().dimensions_of("FactSurvey"),
        vec!["DimGeo", "DimQueue"]
    );
}

#[test]
fn ambiguous_filter_fails_until_a_relationship_is_selected() {
    let model = csat_model();
    let billing = FilterContext::empty().with_column_equals("DimQueue", "QueueName", "Billing");

    let err = model.evaluate("# CSAT Response", &billing).unwrap_err();
    assert!(matches!(err, EngineError::AmbiguousJoin { .. }), "{err:?}");

    let by_key = billing.clone().with_relationship("Survey_Queue_ByKey");
    assert_eq!(model.evaluate("# CSAT Response", &by_key).unwrap(), 4.into());

    let by_id = billing.with_relationship("Survey_Queue_ById");
    assert_eq!(model.evaluate("# CSAT Response", &by_id).unwrap(), 3.into());
}

#[test]
fn selecting_both_edges_is_still_ambiguous() {
    let model = csat_model();
    let ctx = FilterContext::empty()
        .with_column_equals("DimQueue", "QueueName", "Billing")
        .with_relationship("Survey_Queue_ByKey")
        .with_relationship("Survey_Queue_ById");
    let err = model.evaluate("# CSAT Response", &ctx).unwrap_err();
    assert!(matches!(err, EngineError::AmbiguousJoin { .. }), "{err:?}");
}
