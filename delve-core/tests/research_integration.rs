//! Integration tests for the research engine.
//!
//! These tests drive complete sessions through the public API using
//! MockLlmProvider and MockSearchProvider, checking what an embedding
//! application observes: the event stream, the final result, and errors.

use delve_core::research::prompts::{GENERATED_QUERY_SCHEMA, REFLECTION_SCHEMA};
use delve_core::research::{
    AsyncFnReporter, ChannelReporter, NoOpReporter, ProgressKind, RecordingReporter, ReportError,
    RoutingDecision,
};
use delve_core::{
    CompletionRequest, MockLlmProvider, MockSearchProvider, ProgressEvent, ResearchEngine,
    ResearchError, ResearchOptions, SearchResponse, SourceItem,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Mock LLM that answers each step by inspecting the requested schema.
fn research_llm() -> Arc<MockLlmProvider> {
    let calls = AtomicUsize::new(0);
    Arc::new(MockLlmProvider::with_responder(
        move |req: &CompletionRequest| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let text = match req.response_schema.as_ref().map(|s| s.name.as_str()) {
                Some(GENERATED_QUERY_SCHEMA) => {
                    json!({"query": "solid state battery density", "rationale": "baseline"})
                        .to_string()
                }
                Some(REFLECTION_SCHEMA) => json!({
                    "knowledge_gap": "manufacturing cost",
                    "follow_up_query": format!("solid state battery cost {n}")
                })
                .to_string(),
                _ => format!("Summary after call {n}."),
            };
            Ok(MockLlmProvider::text_response(&text))
        },
    ))
}

fn battery_sources() -> SearchResponse {
    SearchResponse::new(
        vec![
            SourceItem::new(
                "Solid-state batteries explained",
                "https://example.com/ssb",
                "Solid electrolytes replace liquid ones.",
                "Solid-state batteries use a solid electrolyte...",
            ),
            SourceItem::new(
                "Battery roadmap",
                "https://example.org/roadmap",
                "Energy density targets for 2030.",
                "",
            ),
        ],
        vec!["https://example.com/cell.png".to_string()],
    )
}

fn engine_with(loops: i32, search: MockSearchProvider) -> ResearchEngine {
    ResearchEngine::new(
        research_llm(),
        Arc::new(search),
        ResearchOptions {
            max_research_loops: loops,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_full_session_produces_report() {
    let engine = engine_with(2, MockSearchProvider::always(battery_sources()));
    let recorder = Arc::new(RecordingReporter::new());

    let result = engine
        .run(
            "solid-state batteries",
            recorder.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.topic, "solid-state batteries");
    assert_eq!(result.summary, "Summary after call 3.");
    assert_eq!(result.sources.len(), 2);
    assert_eq!(result.images.len(), 2);

    let kinds = recorder.kinds().await;
    match kinds.last().unwrap() {
        ProgressKind::ResearchComplete {
            summary, sources, ..
        } => {
            assert_eq!(summary, &result.summary);
            assert_eq!(sources, &result.sources);
        }
        other => panic!("Expected ResearchComplete last, got {:?}", other),
    }
    let routings: Vec<RoutingDecision> = kinds
        .iter()
        .filter_map(|k| match k {
            ProgressKind::Routing { decision, .. } => Some(*decision),
            _ => None,
        })
        .collect();
    assert_eq!(
        routings,
        vec![
            RoutingDecision::Continue,
            RoutingDecision::Continue,
            RoutingDecision::Finalize
        ]
    );
}

#[tokio::test]
async fn test_channel_reporter_streams_events_from_spawned_session() {
    let engine = Arc::new(engine_with(1, MockSearchProvider::always(battery_sources())));
    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(4);

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .run(
                    "solid-state batteries",
                    Arc::new(ChannelReporter::new(tx)),
                    CancellationToken::new(),
                )
                .await
        }
    });

    let mut names = Vec::new();
    while let Some(event) = rx.recv().await {
        names.push(event.kind.name());
    }
    let result = handle.await.unwrap().unwrap();

    assert_eq!(names.first(), Some(&"generate_query"));
    assert_eq!(names.last(), Some(&"research_complete"));
    assert_eq!(names.len(), 8);
    assert_eq!(result.sources.len(), 2);
}

#[tokio::test]
async fn test_dropped_receiver_does_not_abort_session() {
    let engine = engine_with(1, MockSearchProvider::always(battery_sources()));
    let (tx, rx) = mpsc::channel::<ProgressEvent>(1);
    drop(rx);

    let result = engine
        .run(
            "topic",
            Arc::new(ChannelReporter::new(tx)),
            CancellationToken::new(),
        )
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_async_observer_can_cancel_session() {
    let engine = engine_with(5, MockSearchProvider::always(battery_sources()));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let reporter = AsyncFnReporter::new(move |event: ProgressEvent, cancel: CancellationToken| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if matches!(event.kind, ProgressKind::Summarize { .. }) {
                cancel.cancel();
                return Err(ReportError::Cancelled);
            }
            Ok(())
        }
    });

    let result = engine
        .run("topic", Arc::new(reporter), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ResearchError::Cancelled)));
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_external_cancellation_mid_search() {
    let search = MockSearchProvider::always(battery_sources());
    let engine = engine_with(3, search);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let result = engine
        .run_with_callback(
            "topic",
            move |event: &ProgressEvent| {
                if let ProgressKind::Routing {
                    decision: RoutingDecision::Continue,
                    loop_count: 1,
                } = event.kind
                {
                    trigger.cancel();
                }
            },
            cancel,
        )
        .await;
    assert!(matches!(result, Err(ResearchError::Cancelled)));
}

#[tokio::test]
async fn test_all_empty_searches_still_complete() {
    let engine = engine_with(2, MockSearchProvider::new());
    let recorder = Arc::new(RecordingReporter::new());
    let result = engine
        .run("obscure topic", recorder.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert!(result.sources.is_empty());
    assert!(result.images.is_empty());
    let retries = recorder
        .kinds()
        .await
        .into_iter()
        .filter(|k| {
            matches!(
                k,
                ProgressKind::Routing {
                    decision: RoutingDecision::RetrySearch,
                    ..
                }
            )
        })
        .count();
    assert_eq!(retries, 4);
}

#[tokio::test]
async fn test_engine_is_reusable_across_sessions() {
    let engine = engine_with(1, MockSearchProvider::always(battery_sources()));
    let first = engine
        .run("first", Arc::new(NoOpReporter), CancellationToken::new())
        .await
        .unwrap();
    let second = engine
        .run("second", Arc::new(NoOpReporter), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.topic, "first");
    assert_eq!(second.topic, "second");
    assert_eq!(second.sources.len(), 2);
}

#[tokio::test]
async fn test_event_wire_format() {
    let engine = engine_with(1, MockSearchProvider::always(battery_sources()));
    let recorder = Arc::new(RecordingReporter::new());
    engine
        .run("topic", recorder.clone(), CancellationToken::new())
        .await
        .unwrap();

    let events = recorder.events().await;
    let first = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(first["type"], "generate_query");
    assert_eq!(first["query"], "solid state battery density");
    assert!(first["timestamp"].is_string());

    let routing = serde_json::to_value(&events[1]).unwrap();
    assert_eq!(routing["decision"], "continue");
    assert_eq!(routing["loop_count"], 0);

    let back: ProgressEvent = serde_json::from_value(first).unwrap();
    assert_eq!(back, events[0]);
}

#[tokio::test]
async fn test_llm_failure_surfaces_step() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_error(delve_core::LlmError::RateLimited {
        retry_after_secs: 30,
    });
    let engine = ResearchEngine::new(
        llm,
        Arc::new(MockSearchProvider::new()),
        ResearchOptions::default(),
    );
    let err = engine
        .run("topic", Arc::new(NoOpReporter), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(delve_core::ResearchStep::QueryGeneration));
    assert!(err.to_string().contains("Rate limited"));
}
