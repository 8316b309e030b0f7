//! Lifecycle, dry-run, and execution tests against the mock plugin.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use loomlog_core::entry::TAG_FIELD;
use loomlog_core::LogEntry;
use loomlog_dsl::{AstNode, ClassRef, NodeMeta, SinkNode};
use loomlog_runtime::testing::MockPlugin;
use loomlog_runtime::{Runtime, RuntimeError, State};

fn entries(messages: &[&str]) -> Vec<LogEntry> {
    messages.iter().map(|m| LogEntry::from_line(m)).collect()
}

fn started_runtime(plugin: MockPlugin) -> Runtime {
    let mut runtime = Runtime::new(vec![Arc::new(plugin)]);
    runtime
        .start(&CancellationToken::new())
        .expect("start from Created");
    runtime
}

#[tokio::test]
async fn lifecycle_rejects_out_of_order_operations() {
    let mut runtime = Runtime::new(vec![Arc::new(MockPlugin::new(Vec::new()))]);
    assert_eq!(runtime.state(), State::Created);

    let err = runtime.execute_string("\n").await.expect_err("not started");
    assert!(matches!(err, RuntimeError::InvalidState { .. }));
    let err = runtime.stop().await.expect_err("not started");
    assert!(matches!(err, RuntimeError::InvalidState { .. }));

    runtime.start(&CancellationToken::new()).expect("start");
    assert_eq!(runtime.state(), State::Started);
    let err = runtime
        .start(&CancellationToken::new())
        .expect_err("second start");
    assert!(matches!(err, RuntimeError::InvalidState { .. }));

    runtime.stop().await.expect("stop from Started");
    assert_eq!(runtime.state(), State::Done);
    let err = runtime.stop().await.expect_err("second stop");
    assert!(matches!(err, RuntimeError::InvalidState { .. }));
}

#[tokio::test]
async fn source_to_sink_collects_every_entry() {
    let plugin = MockPlugin::new(entries(&["A", "B", "C"]));
    let collected = plugin.collected();
    let mut runtime = started_runtime(plugin);

    runtime
        .execute_string("source as s mock.Static\nsink s to mock.Collect\n")
        .await
        .expect("pipeline runs");

    let got = collected.lock().await;
    assert_eq!(got.len(), 3);
    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn fanout_merge_dupe_pipeline_doubles_the_stream() {
    let plugin = MockPlugin::new(entries(&["one", "two", "three"]));
    let collected = plugin.collected();
    let mut runtime = started_runtime(plugin);

    runtime
        .execute_string(concat!(
            "source as src mock.Static\n",
            "tag src with \"unstructured\"\n",
            "fanout src as a and b\n",
            "merge a and b as src2\n",
            "dupe src2 as c and d\n",
            "merge d and c as src3\n",
            "sink src3 to mock.Collect\n",
        ))
        .await
        .expect("pipeline runs");

    let got = collected.lock().await;
    assert_eq!(got.len(), 6, "dupe doubles the three fanned-out entries");
    for entry in got.iter() {
        assert!(entry.has_tag("unstructured"));
        assert!(entry
            .as_string(TAG_FIELD)
            .is_some_and(|t| t.contains("unstructured")));
    }
    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn dry_run_bookkeeps_without_building_anything() {
    let plugin = MockPlugin::new(entries(&["A"]));
    let collected = plugin.collected();
    let mut runtime = started_runtime(plugin);

    let nodes = loomlog_dsl::parse_string(concat!(
        "source as src mock.Static\n",
        "tag src with \"unstructured\"\n",
        "fanout src as a and b\n",
        "merge a and b as src2\n",
        "dupe src2 as c and d\n",
        "merge d and c as src3\n",
        "sink src3 to mock.Collect\n",
    ))
    .await
    .expect("parses");

    runtime.dry_run(&nodes).await.expect("dry run passes");

    for id in ["src", "a", "b", "src2", "c", "d", "src3"] {
        assert!(runtime.is_defined(id), "{id} should be in the table");
    }
    for id in ["src", "a", "b", "src2", "c", "d", "src3"] {
        assert!(runtime.is_consumed(id), "{id} should be consumed");
    }
    assert!(
        collected.lock().await.is_empty(),
        "no sink factory may run during a dry run"
    );
    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn unknown_classes_are_reported() {
    let mut runtime = started_runtime(MockPlugin::new(Vec::new()));

    let err = runtime
        .execute_string("source as s nowhere.Missing\n")
        .await
        .expect_err("unknown source class");
    assert!(matches!(err, RuntimeError::UnknownSourceClass(class) if class == "nowhere.Missing"));

    let err = runtime
        .execute_string("source as s mock.Static\nsink s to nowhere.Missing\n")
        .await
        .expect_err("unknown sink class");
    assert!(matches!(err, RuntimeError::UnknownSinkClass(class) if class == "nowhere.Missing"));
    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn runtime_rejects_consuming_a_consumed_stream() {
    let plugin = MockPlugin::new(entries(&["A"]));
    let mut runtime = started_runtime(plugin);

    runtime
        .execute_string("source as s mock.Static\nsink s to mock.Collect\n")
        .await
        .expect("first sink runs");

    // The parser cannot see earlier executions, so drive the runtime with
    // a hand-built node to exercise its own consumption check.
    let meta = NodeMeta {
        line: 1,
        pos: 0,
        text: "sink s to mock.Collect".to_string(),
    };
    let node = AstNode::Sink(SinkNode {
        meta: meta.clone(),
        source: "s".to_string(),
        sink_id: None,
        class: ClassRef {
            meta,
            qualifier: "mock".to_string(),
            class: "Collect".to_string(),
        },
        args: Vec::new(),
    });
    let err = runtime
        .execute(&[node])
        .await
        .expect_err("stream already consumed");
    assert!(matches!(err, RuntimeError::Consumed(id) if id == "s"));
    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn async_sinks_are_drained_by_stop() {
    let plugin = MockPlugin::new(entries(&["A", "B", "C", "D"]));
    let collected = plugin.collected();
    let mut runtime = started_runtime(plugin);

    runtime
        .execute_string("source as s mock.Static\nsink s async as out to mock.Collect\n")
        .await
        .expect("async dispatch succeeds");

    runtime.stop().await.expect("stop waits for the sink");
    assert_eq!(collected.lock().await.len(), 4);
}

#[tokio::test]
async fn first_plugin_stop_error_is_returned() {
    let plugin = MockPlugin::new(Vec::new()).with_stop_error("flush failed");
    let mut runtime = started_runtime(plugin);

    let err = runtime.stop().await.expect_err("plugin stop error");
    assert!(matches!(err, RuntimeError::Plugin(message) if message == "flush failed"));
    assert_eq!(runtime.state(), State::Done);
}

#[tokio::test]
async fn docs_listing_covers_registered_classes() {
    let runtime = started_runtime(MockPlugin::new(Vec::new()));
    let docs = runtime.registry().all_docs();
    assert!(docs.starts_with("Sources:\n"));
    assert!(docs.contains("  mock.Static\n"));
    assert!(docs.contains("Sinks:\n"));
    assert!(docs.contains("  mock.Collect\n"));
}
