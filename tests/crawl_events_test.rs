use crawlrunner::crawl_events::*;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_event_bus_creation() {
    let bus = CrawlEventBus::new(100);
    assert_eq!(bus.subscriber_count(), 0);
    assert!(!bus.has_subscribers());
}

#[tokio::test]
async fn test_publish_with_no_subscribers() {
    let bus = CrawlEventBus::new(10);
    let event = CrawlEvent::persist_state();

    let result = bus.publish(event).await;
    assert!(
        result.is_err(),
        "Publishing to empty bus should return error"
    );
    match result {
        Err(crawlrunner::crawl_events::EventBusError::NoSubscribers) => {}
        other => panic!("Expected EventBusError::NoSubscribers, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_subscribe_and_publish() {
    let bus = CrawlEventBus::new(10);
    let mut receiver = bus.subscribe();

    assert_eq!(bus.subscriber_count(), 1);
    assert!(bus.has_subscribers());

    let event = CrawlEvent::system_info(0.4, 0.2, 4);

    let result = bus.publish(event.clone()).await;
    assert!(result.is_ok());
    if let Ok(count) = result {
        assert_eq!(count, 1);
    }

    let received = match timeout(Duration::from_millis(100), receiver.recv()).await {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => panic!("Failed to receive event: {e}"),
        Err(_) => panic!("Timeout waiting for event"),
    };

    match (&event, &received) {
        (
            CrawlEvent::SystemInfo {
                current_concurrency: a,
                ..
            },
            CrawlEvent::SystemInfo {
                current_concurrency: b,
                ..
            },
        ) => assert_eq!(a, b),
        _ => panic!("Event types don't match"),
    }
}

#[tokio::test]
async fn test_multiple_subscribers() {
    let bus = CrawlEventBus::new(10);
    let mut receiver1 = bus.subscribe();
    let mut receiver2 = bus.subscribe();

    assert_eq!(bus.subscriber_count(), 2);

    let event = CrawlEvent::session_retired(uuid::Uuid::new_v4());

    let result = bus.publish(event).await;
    assert!(result.is_ok());
    if let Ok(count) = result {
        assert_eq!(count, 2);
    }

    match timeout(Duration::from_millis(100), receiver1.recv()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => panic!("Receiver 1 failed to receive event: {e}"),
        Err(_) => panic!("Receiver 1 timeout waiting for event"),
    }

    match timeout(Duration::from_millis(100), receiver2.recv()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => panic!("Receiver 2 failed to receive event: {e}"),
        Err(_) => panic!("Receiver 2 timeout waiting for event"),
    }
}

#[tokio::test]
async fn test_async_publish() {
    let bus = CrawlEventBus::new(10);
    let event = CrawlEvent::aborting("manual abort");

    let result = bus.publish(event).await;
    assert!(result.is_err());
}

#[test]
fn test_event_creation_helpers() {
    let session_id = uuid::Uuid::new_v4();
    let retired_event = CrawlEvent::session_retired(session_id);
    match retired_event {
        CrawlEvent::SessionRetired { session_id: id, .. } => assert_eq!(id, session_id),
        _ => panic!("Wrong event type"),
    }

    let info_event = CrawlEvent::system_info(0.8, 0.3, 2);
    match info_event {
        CrawlEvent::SystemInfo {
            mem_used_ratio,
            current_concurrency,
            ..
        } => {
            assert_eq!(mem_used_ratio, 0.8);
            assert_eq!(current_concurrency, 2);
        }
        _ => panic!("Wrong event type"),
    }
}

#[tokio::test]
async fn test_filtered_receiver() {
    let bus = CrawlEventBus::new(10);

    let mut filtered_receiver =
        bus.subscribe_filtered(|event| matches!(event, CrawlEvent::SessionRetired { .. }));

    let persist_event = CrawlEvent::persist_state();
    let _ = bus.publish(persist_event).await;

    let retired_event = CrawlEvent::session_retired(uuid::Uuid::new_v4());
    let _ = bus.publish(retired_event.clone()).await;

    let received = match timeout(Duration::from_millis(100), filtered_receiver.recv()).await {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => panic!("Failed to receive filtered event: {e}"),
        Err(_) => panic!("Timeout waiting for filtered event"),
    };

    match (&retired_event, &received) {
        (
            CrawlEvent::SessionRetired { session_id: a, .. },
            CrawlEvent::SessionRetired { session_id: b, .. },
        ) => {
            assert_eq!(a, b);
        }
        _ => panic!("Event types don't match"),
    }
}

#[tokio::test]
async fn test_filtered_receiver_would_receive() {
    let bus = CrawlEventBus::new(10);

    let filtered_receiver =
        bus.subscribe_filtered(|event| matches!(event, CrawlEvent::Migrating { .. }));

    let persist_event = CrawlEvent::persist_state();
    assert!(!filtered_receiver.would_receive(&persist_event));

    let migrating_event = CrawlEvent::migrating(uuid::Uuid::new_v4());
    assert!(filtered_receiver.would_receive(&migrating_event));
}

#[tokio::test]
async fn test_batch_publish() {
    let bus = CrawlEventBus::new(50);
    let mut receiver = bus.subscribe();

    let events = vec![
        CrawlEvent::persist_state(),
        CrawlEvent::session_retired(uuid::Uuid::new_v4()),
        CrawlEvent::migrating(uuid::Uuid::new_v4()),
    ];

    let result = bus.publish_batch(events).await;
    assert!(result.is_complete());
    assert_eq!(result.published, 3);
    assert_eq!(result.failed, 0);

    for i in 0..3 {
        match timeout(Duration::from_millis(100), receiver.recv()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("Failed to receive event {}: {}", i + 1, e),
            Err(_) => panic!("Timeout waiting for event {}", i + 1),
        }
    }
}

#[test]
fn test_event_bus_config() {
    let config = EventBusConfig {
        capacity: 500,
        backpressure_mode: crawlrunner::crawl_events::config::BackpressureMode::default(),
        overload_threshold: 0.8,
        enable_batching: true,
        max_batch_size: 50,
        batch_timeout_ms: 200,
        enable_metrics: false,
    };

    let bus = CrawlEventBus::with_config(config.clone());
    assert_eq!(bus.config().capacity, 500);
    assert!(bus.config().enable_batching);
    assert_eq!(bus.config().max_batch_size, 50);
    assert_eq!(bus.config().batch_timeout_ms, 200);
    assert!(!bus.config().enable_metrics);
}

#[test]
fn test_metrics_report() {
    let bus = CrawlEventBus::new(10);

    let report = bus.get_metrics_report();
    assert!(report.contains("Event Bus Metrics:"));
    assert!(report.contains("Events Published: 0"));
    assert!(report.contains("Success Rate: 100.00%"));

    let config = EventBusConfig {
        enable_metrics: false,
        ..Default::default()
    };
    let bus_no_metrics = CrawlEventBus::with_config(config);
    let report_disabled = bus_no_metrics.get_metrics_report();
    assert_eq!(report_disabled, "Metrics disabled");
}

#[tokio::test]
async fn test_block_backpressure_no_race_condition() {
    // Verifies the fix for the TOCTOU race condition in BackpressureMode::Block:
    // 20 concurrent publishers x 5 events each must all be received with no drops.
    use crawlrunner::crawl_events::config::BackpressureMode;

    let config = EventBusConfig {
        capacity: 10,
        backpressure_mode: BackpressureMode::Block,
        enable_metrics: true,
        ..Default::default()
    };

    let bus = CrawlEventBus::with_config(config);
    let mut receiver = bus.subscribe();

    let num_publishers = 20;
    let events_per_publisher = 5;
    let total_events = num_publishers * events_per_publisher;

    let mut publisher_handles = vec![];

    for publisher_id in 0..num_publishers {
        let bus_clone = bus.clone();
        let handle = tokio::spawn(async move {
            for event_id in 0..events_per_publisher {
                let event =
                    CrawlEvent::system_info(0.1, 0.1, (publisher_id + event_id) as usize);

                match bus_clone.publish_with_backpressure(event).await {
                    Ok(_) => {}
                    Err(e) => panic!("Publisher {publisher_id} event {event_id} failed: {e:?}"),
                }
            }
        });
        publisher_handles.push(handle);
    }

    let receiver_handle = tokio::spawn(async move {
        let mut received_events = vec![];

        for i in 0..total_events {
            match timeout(Duration::from_secs(10), receiver.recv()).await {
                Ok(Ok(event)) => {
                    received_events.push(event);
                }
                Ok(Err(e)) => {
                    panic!("Failed to receive event {i}: {e}");
                }
                Err(_) => {
                    panic!(
                        "Timeout receiving event {} (received {}/{})",
                        i,
                        received_events.len(),
                        total_events
                    );
                }
            }
        }

        received_events
    });

    for (idx, handle) in publisher_handles.into_iter().enumerate() {
        match timeout(Duration::from_secs(10), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => panic!("Publisher {idx} panicked: {e:?}"),
            Err(_) => panic!("Publisher {idx} timed out"),
        }
    }

    let received_events = match timeout(Duration::from_secs(10), receiver_handle).await {
        Ok(Ok(events)) => events,
        Ok(Err(e)) => panic!("Receiver panicked: {e:?}"),
        Err(_) => panic!("Receiver timed out"),
    };

    assert_eq!(
        received_events.len(),
        total_events,
        "Expected {} events but received {}. Events were dropped!",
        total_events,
        received_events.len()
    );

    let metrics = bus.metrics().snapshot();
    assert_eq!(
        metrics.events_dropped, 0,
        "Metrics show {} events dropped, but Block mode should never drop events",
        metrics.events_dropped
    );
}
