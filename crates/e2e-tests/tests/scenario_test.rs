//! End-to-end indexing scenarios.
//!
//! Created offering -> placeholder document -> attribute update,
//! read-only block remediation, direct initial indexing, deletion,
//! out-of-order topics and reverted attributes.

use pretty_assertions::assert_eq;

use e2e_tests::{created, deleted, offering, superseding, updated, TestHarness};
use offering_search::mock::MockTransport;
use offering_types::{AttributeValue, InitialIndexMode, SearchDocument, TBA};

#[tokio::test(start_paused = true)]
async fn test_created_offering_then_time_update() {
    let mut harness = TestHarness::start().await;
    let cs101 = offering("CS 101", "Intro");
    let id = cs101.record_id();

    harness.publish(created(&cs101)).await;
    assert!(harness.mock.document(id.as_str()).is_none());
    harness.wait_for_flush().await;

    let placeholder = SearchDocument {
        id: id.to_string(),
        course_code: "CS 101".into(),
        course_name: "Intro".into(),
        days: TBA.into(),
        time: TBA.into(),
        instructor: TBA.into(),
        location: TBA.into(),
    };
    assert_eq!(harness.mock.document(id.as_str()), Some(placeholder.clone()));

    harness
        .publish(updated(&cs101, AttributeValue::time("MF", "10:00")))
        .await;
    harness.wait_for_flush().await;

    assert_eq!(
        harness.mock.document(id.as_str()),
        Some(SearchDocument {
            days: "MF".into(),
            time: "10:00".into(),
            ..placeholder
        })
    );
    assert_eq!(harness.mock.calls().bulk_upsert, 2);
    assert_eq!(harness.storage.get_stats().unwrap().marker_count, 2);

    harness.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_read_only_block_is_remediated_within_one_flush() {
    let mut harness = TestHarness::start().await;
    harness.mock.set_read_only(true);
    let cs101 = offering("CS 101", "Intro");

    harness.publish(created(&cs101)).await;
    harness.wait_for_flush().await;

    let calls = harness.mock.calls();
    assert_eq!(calls.bulk_upsert, 2);
    assert_eq!(calls.clear_read_only_block, 1);
    assert!(!harness.mock.is_read_only());
    assert!(harness.mock.document(cs101.record_id().as_str()).is_some());
    assert_eq!(harness.engine.stats().flush.documents_written, 1);
    assert_eq!(harness.engine.stats().queue.dirty, 0);

    harness.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_direct_mode_writes_placeholder_without_flush() {
    let mut harness =
        TestHarness::start_with(MockTransport::new(), InitialIndexMode::Direct).await;
    let cs101 = offering("CS 101", "Intro");
    let id = cs101.record_id();

    harness.publish(created(&cs101)).await;
    let doc = harness.mock.document(id.as_str()).unwrap();
    assert_eq!(doc.instructor, TBA);
    assert_eq!(harness.mock.calls().upsert, 1);
    assert_eq!(harness.mock.calls().bulk_upsert, 0);
    assert_eq!(harness.engine.stats().projector.indexed, 1);

    // Attributes still go through the queue
    harness
        .publish(updated(&cs101, AttributeValue::instructor("Dr. Smith")))
        .await;
    harness.wait_for_flush().await;
    let doc = harness.mock.document(id.as_str()).unwrap();
    assert_eq!(doc.instructor, "Dr. Smith");
    assert_eq!(doc.location, TBA);

    harness.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deleted_offering_ignores_late_events() {
    let mut harness = TestHarness::start().await;
    let cs101 = offering("CS 101", "Intro");
    let id = cs101.record_id();

    harness.publish(created(&cs101)).await;
    harness.wait_for_flush().await;
    assert!(harness.mock.document(id.as_str()).is_some());

    harness.publish(deleted(&cs101)).await;
    assert!(harness.mock.document(id.as_str()).is_none());
    assert!(harness.storage.is_tombstoned(&id).unwrap());

    // Redelivered creation and a late update are both ignored
    harness.publish(created(&cs101)).await;
    harness
        .publish(updated(&cs101, AttributeValue::location("Library", "204")))
        .await;
    harness.wait_for_flush().await;

    assert!(harness.mock.document(id.as_str()).is_none());
    let projector = harness.engine.stats().projector;
    assert_eq!(projector.deleted, 1);
    assert_eq!(projector.tombstoned, 2);
    assert_eq!(harness.mock.calls().bulk_upsert, 1);

    harness.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_before_creation_is_applied_once_created() {
    let mut harness = TestHarness::start().await;
    let cs101 = offering("CS 101", "Intro");
    let id = cs101.record_id();

    harness
        .publish(updated(&cs101, AttributeValue::time("TR", "08:00")))
        .await;
    let stats = harness.engine.stats();
    assert_eq!(stats.projector.parked, 1);
    assert_eq!(stats.queue.dropped_untracked, 1);
    assert!(!stats.queue.armed);

    harness.wait_for_flush().await;
    assert_eq!(harness.mock.calls().bulk_upsert, 0);

    harness.publish(created(&cs101)).await;
    harness.wait_for_flush().await;

    let doc = harness.mock.document(id.as_str()).unwrap();
    assert_eq!(doc.days, "TR");
    assert_eq!(doc.time, "08:00");
    assert_eq!(harness.mock.writes_for(id.as_str()), 1);
    assert_eq!(harness.storage.get_stats().unwrap().marker_count, 2);

    harness.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reverted_attribute_is_written() {
    let mut harness = TestHarness::start().await;
    let cs101 = offering("CS 101", "Intro");
    let id = cs101.record_id();
    let science = updated(&cs101, AttributeValue::location("Science Hall", "101"));
    let library = superseding(&science, AttributeValue::location("Library", "204"));
    let back = superseding(&library, AttributeValue::location("Science Hall", "101"));

    harness.publish(created(&cs101)).await;
    for event in [science, library, back] {
        harness.publish(event).await;
        harness.wait_for_flush().await;
    }

    let doc = harness.mock.document(id.as_str()).unwrap();
    assert_eq!(doc.location, "Science Hall 101");
    assert_eq!(harness.mock.writes_for(id.as_str()), 3);
    assert_eq!(harness.storage.get_stats().unwrap().marker_count, 4);

    harness.engine.shutdown().await;
}
