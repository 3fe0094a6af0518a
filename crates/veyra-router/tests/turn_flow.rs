//! End-to-end turn flows through the dispatcher with real tools and a
//! real (in-memory) checkpoint store.

use std::collections::HashMap;
use std::sync::Arc;

use veyra_core::config::{AgentDefinition, RouterConfig};
use veyra_core::error::VeyraError;
use veyra_core::types::{ConversationState, IntentResult, ThreadId};
use veyra_router::testing::{model_config, FailingStore, ScriptedClassifier, ScriptedModel, Turn};
use veyra_router::{AgentRegistry, RouteDispatcher, TurnRequest};
use veyra_store::SqliteStateStore;
use veyra_tools::{register_builtins, IdentityWrapper, RecordStore, ToolCatalog};

fn router_config() -> RouterConfig {
    RouterConfig {
        confidence_threshold: 0.6,
        max_hops_per_turn: 8,
        classify_timeout_secs: 5,
        node_max_turns: 4,
        clarify_prompt: "Could you tell me a bit more about what you need?".into(),
    }
}

fn agent_definitions() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            key: "blood_pressure_agent".into(),
            node_name: "blood_pressure_node".into(),
            routing_intent_type: "blood_pressure".into(),
            prompt: "You help the user track blood pressure readings.".into(),
            tool_names: vec![
                "record_blood_pressure".into(),
                "query_blood_pressure".into(),
            ],
            model: None,
        },
        AgentDefinition {
            key: "medication_agent".into(),
            node_name: "medication_node".into(),
            routing_intent_type: "medication".into(),
            prompt: "You help the user track medications.".into(),
            tool_names: vec!["record_medication".into(), "query_medications".into()],
            model: None,
        },
    ]
}

struct Harness {
    dispatcher: RouteDispatcher,
    store: Arc<SqliteStateStore>,
    records: Arc<RecordStore>,
    classifier_calls: Arc<std::sync::atomic::AtomicUsize>,
}

fn harness(model: ScriptedModel, classifier: ScriptedClassifier) -> Harness {
    let records = Arc::new(RecordStore::new());
    let mut catalog = ToolCatalog::new();
    register_builtins(&mut catalog, records.clone());
    let catalog = Arc::new(catalog);

    let registry = Arc::new(
        AgentRegistry::build(&agent_definitions(), &catalog, &model_config(), 4).unwrap(),
    );
    let store = Arc::new(SqliteStateStore::open_in_memory().unwrap());
    let classifier_calls = classifier.calls.clone();

    let dispatcher = RouteDispatcher::new(
        registry,
        Arc::new(classifier),
        Arc::new(model),
        IdentityWrapper::new(catalog),
        store.clone(),
        router_config(),
        vec![],
    )
    .unwrap();

    Harness {
        dispatcher,
        store,
        records,
        classifier_calls,
    }
}

fn intent(intent_type: &str, confidence: f64) -> IntentResult {
    IntentResult::new(intent_type, confidence, HashMap::new(), false, None).unwrap()
}

fn request(message: &str, thread: &str) -> TurnRequest {
    TurnRequest {
        message: message.into(),
        thread_id: thread.into(),
        user_id: "u1".into(),
        correlation_id: None,
        prior_turns: vec![],
        context: HashMap::new(),
    }
}

async fn head(store: &SqliteStateStore, thread: &str) -> ConversationState {
    use veyra_core::traits::StateStore;
    store
        .load(&ThreadId::from_string(thread))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_blood_pressure_turn_records_reading_with_injected_identity() {
    let model = ScriptedModel::new(vec![
        Turn::tool_call(
            "record_blood_pressure",
            serde_json::json!({"systolic": 120, "diastolic": 80}),
        ),
        Turn::reply("I've recorded your blood pressure of 120/80."),
    ]);
    let classifier = ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)]);
    let h = harness(model, classifier);

    let response = h
        .dispatcher
        .run_turn(request("record blood pressure 120/80", "t1"))
        .await
        .unwrap();

    assert!(response.reply.contains("recorded"));
    assert_eq!(
        response.resolved_agent.as_deref(),
        Some("blood_pressure_agent")
    );

    // The model never supplied a user_id; the tool still stored the
    // reading under the turn's user, so the wrapper injected it.
    let history = h.records.blood_pressure_history("u1", 10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].systolic, 120);
    assert_eq!(history[0].diastolic, 80);

    let state = head(&h.store, "t1").await;
    assert_eq!(state.current_agent.as_deref(), Some("blood_pressure_agent"));
    assert!(!state.need_reroute);
}

#[tokio::test]
async fn test_ambiguous_message_gets_clarifying_question() {
    let model = ScriptedModel::new(vec![]);
    let classifier = ScriptedClassifier::new(vec![IntentResult::unclear()]);
    let h = harness(model, classifier);

    let response = h.dispatcher.run_turn(request("hello", "t2")).await.unwrap();

    assert_eq!(
        response.reply,
        "Could you tell me a bit more about what you need?"
    );
    assert_eq!(response.resolved_intent.as_deref(), Some("unclear"));

    let state = head(&h.store, "t2").await;
    assert!(state.need_reroute);
}

#[tokio::test]
async fn test_continuation_turn_skips_classifier() {
    let model = ScriptedModel::new(vec![Turn::reply("Noted.")]);
    let classifier = ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)]);
    let h = harness(model, classifier);

    let first = h
        .dispatcher
        .run_turn(request("my blood pressure is fine", "t3"))
        .await
        .unwrap();
    assert_eq!(
        first.resolved_agent.as_deref(),
        Some("blood_pressure_agent")
    );
    assert_eq!(h.classifier_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Same thread, same agent, no differing user input: the second
    // turn routes directly without classifying.
    let second = h
        .dispatcher
        .run_turn(request("my blood pressure is fine", "t3"))
        .await
        .unwrap();
    assert_eq!(
        second.resolved_agent.as_deref(),
        Some("blood_pressure_agent")
    );
    assert_eq!(h.classifier_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_differing_followup_is_reclassified() {
    let model = ScriptedModel::new(vec![Turn::reply("Done.")]);
    let classifier = ScriptedClassifier::new(vec![
        intent("blood_pressure", 0.9),
        intent("medication", 0.9),
    ]);
    let h = harness(model, classifier);

    h.dispatcher
        .run_turn(request("record bp 120/80", "t4"))
        .await
        .unwrap();
    let second = h
        .dispatcher
        .run_turn(request("did I take my pills today", "t4"))
        .await
        .unwrap();

    assert_eq!(second.resolved_agent.as_deref(), Some("medication_agent"));
    assert_eq!(h.classifier_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_save_failure_aborts_turn() {
    let records = Arc::new(RecordStore::new());
    let mut catalog = ToolCatalog::new();
    register_builtins(&mut catalog, records);
    let catalog = Arc::new(catalog);
    let registry = Arc::new(
        AgentRegistry::build(&agent_definitions(), &catalog, &model_config(), 4).unwrap(),
    );

    let dispatcher = RouteDispatcher::new(
        registry,
        Arc::new(ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)])),
        Arc::new(ScriptedModel::new(vec![Turn::reply("Noted.")])),
        IdentityWrapper::new(catalog),
        Arc::new(FailingStore::new()),
        router_config(),
        vec![],
    )
    .unwrap();

    let err = dispatcher
        .run_turn(request("record bp 120/80", "t5"))
        .await
        .unwrap_err();
    assert!(matches!(err, VeyraError::Persistence(_)));
}

#[tokio::test]
async fn test_checkpoints_chain_across_turns() {
    let model = ScriptedModel::new(vec![Turn::reply("Noted.")]);
    let classifier = ScriptedClassifier::new(vec![
        intent("blood_pressure", 0.9),
        intent("blood_pressure", 0.9),
    ]);
    let h = harness(model, classifier);

    h.dispatcher
        .run_turn(request("bp 120/80", "t6"))
        .await
        .unwrap();
    h.dispatcher
        .run_turn(request("bp 118/79", "t6"))
        .await
        .unwrap();

    let history = h
        .store
        .history(&ThreadId::from_string("t6"), 10)
        .unwrap();
    assert_eq!(history.len(), 2);
    // Head first; its parent is the first turn's checkpoint.
    assert_eq!(
        history[0].parent_checkpoint_id.as_deref(),
        Some(history[1].checkpoint_id.as_str())
    );

    let state = head(&h.store, "t6").await;
    assert_eq!(state.messages.len(), 4);
}

#[tokio::test]
async fn test_implausible_reading_surfaces_tool_error_to_model() {
    // The tool rejects the reading; the model sees the failure and
    // apologizes rather than confirming.
    let model = ScriptedModel::new(vec![
        Turn::tool_call(
            "record_blood_pressure",
            serde_json::json!({"systolic": 900, "diastolic": 80}),
        ),
        Turn::reply("That reading looks implausible, could you check it?"),
    ]);
    let classifier = ScriptedClassifier::new(vec![intent("blood_pressure", 0.9)]);
    let h = harness(model, classifier);

    let response = h
        .dispatcher
        .run_turn(request("record blood pressure 900/80", "t7"))
        .await
        .unwrap();

    assert!(response.reply.contains("implausible"));
    assert!(h.records.blood_pressure_history("u1", 10).is_empty());
}
