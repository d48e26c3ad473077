//! Router integration tests: envelopes in, processing descriptors out

use crate::common::{object_event, MB};
use gridload_core::config::{GridloadConfig, RouterConfig};
use gridload_core::error::{ErrorKind, GridloadError};
use gridload_core::models::{
    DatasetType, EventEnvelope, FileFormat, ObjectCreatedEvent, ProcessingPath,
};
use gridload_core::router::Router;
use serde_json::json;

fn router() -> Router {
    Router::new(GridloadConfig::default().router)
}

#[test]
fn test_fifty_kb_csv_takes_inline_path() {
    let routed = router()
        .route(&object_event("uploads/plant_generation_2024.csv", 50 * 1024))
        .unwrap();

    assert_eq!(routed.descriptor.processing_path(), ProcessingPath::Inline);
    assert_eq!(routed.file.detected_type, FileFormat::Csv);
    assert_eq!(routed.file.dataset_type, DatasetType::Generation);
    assert_eq!(routed.file.e_tag, "etag-uploads/plant_generation_2024.csv");
    assert_eq!(
        routed.descriptor.output_location(),
        "s3://raw-energy/processed/generation/plant_generation_2024/"
    );
    assert_eq!(
        routed.descriptor.input_file().location(),
        "s3://raw-energy/uploads/plant_generation_2024.csv"
    );
}

#[test]
fn test_two_hundred_mb_pdf_takes_batch_compute_path() {
    let routed = router()
        .route(&object_event("reports/annual_grid_report.pdf", 200 * MB))
        .unwrap();

    assert_eq!(
        routed.descriptor.processing_path(),
        ProcessingPath::BatchCompute
    );
    assert_eq!(routed.file.detected_type, FileFormat::Pdf);
    assert_eq!(routed.file.dataset_type, DatasetType::Transmission);
    assert_eq!(routed.descriptor.processor_config().processor, "pdf-processor");
    assert!((routed.descriptor.input_file().size_mb - 200.0).abs() < f64::EPSILON);
}

#[test]
fn test_documents_take_batch_compute_at_any_size() {
    for key in ["notes/tiny.pdf", "notes/tiny.docx"] {
        let routed = router().route(&object_event(key, 1024)).unwrap();
        assert_eq!(
            routed.descriptor.processing_path(),
            ProcessingPath::BatchCompute,
            "{key}"
        );
    }
}

#[test]
fn test_threshold_is_inclusive() {
    let router = router();
    let below = router
        .route(&object_event("meter/usage.parquet", 100 * MB - 1))
        .unwrap();
    let at = router
        .route(&object_event("meter/usage.parquet", 100 * MB))
        .unwrap();

    assert_eq!(below.descriptor.processing_path(), ProcessingPath::Inline);
    assert_eq!(at.descriptor.processing_path(), ProcessingPath::BatchCompute);
}

#[test]
fn test_configured_threshold_and_resource_hints() {
    let config = RouterConfig {
        inline_threshold_mb: 10,
        output_bucket: Some("curated-energy".to_string()),
        output_prefix: "/staged/".to_string(),
        ..RouterConfig::default()
    };
    let router = Router::new(config.clone());

    let inline = router.route(&object_event("demand/hourly.csv", 9 * MB)).unwrap();
    let batch = router.route(&object_event("demand/hourly.csv", 10 * MB)).unwrap();

    assert_eq!(inline.descriptor.processing_path(), ProcessingPath::Inline);
    assert_eq!(
        inline.descriptor.processor_config().timeout_seconds,
        config.inline_timeout_seconds
    );
    assert_eq!(batch.descriptor.processing_path(), ProcessingPath::BatchCompute);
    assert_eq!(
        batch.descriptor.processor_config().memory_mb,
        config.batch_memory_mb
    );
    assert_eq!(
        batch.descriptor.output_location(),
        "s3://curated-energy/staged/consumption/hourly/"
    );
}

#[test]
fn test_extension_matching_ignores_case() {
    let routed = router()
        .route(&object_event("Substation/READINGS.XLSX", 2 * MB))
        .unwrap();
    assert_eq!(routed.file.detected_type, FileFormat::Xlsx);
    assert_eq!(routed.file.dataset_type, DatasetType::Transmission);
}

#[test]
fn test_unsupported_extension_is_rejected() {
    let error = router()
        .route(&object_event("archive/backup.zip", 1024))
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Classification);
    assert!(error.is_fatal());
    match error {
        GridloadError::UnsupportedFormat { extension, .. } => assert_eq!(extension, "zip"),
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
}

#[test]
fn test_missing_fields_are_rejected() {
    let complete = object_event("generation/daily.csv", 1024);

    let without_bucket = ObjectCreatedEvent {
        bucket: None,
        ..complete.clone()
    };
    let without_key = ObjectCreatedEvent {
        key: Some("   ".to_string()),
        ..complete.clone()
    };
    let without_size = ObjectCreatedEvent {
        size: None,
        ..complete
    };

    for (event, field) in [
        (without_bucket, "bucket"),
        (without_key, "key"),
        (without_size, "size"),
    ] {
        match router().route(&event).unwrap_err() {
            GridloadError::MissingFileInfo { field: missing } => assert_eq!(missing, field),
            other => panic!("expected MissingFileInfo for {field}, got {other:?}"),
        }
    }
}

#[test]
fn test_missing_etag_still_routes() {
    let event = ObjectCreatedEvent::new("raw-energy", "wind/turbines.json", 4096);
    let routed = router().route(&event).unwrap();
    assert_eq!(routed.file.e_tag, "");
    assert_eq!(routed.file.dataset_type, DatasetType::Generation);
}

#[test]
fn test_dataset_inference_order() {
    let cases = [
        ("solar/output.csv", DatasetType::Generation),
        ("customers/demand.csv", DatasetType::Consumption),
        ("grid/flows.csv", DatasetType::Transmission),
        ("misc/prices.csv", DatasetType::General),
        // generation keywords win over consumption keywords
        ("plant/meter_readings.csv", DatasetType::Generation),
    ];
    for (key, expected) in cases {
        let routed = router().route(&object_event(key, 1024)).unwrap();
        assert_eq!(routed.file.dataset_type, expected, "{key}");
    }
}

#[test]
fn test_storage_notification_envelope_yields_every_record() {
    let raw = json!({
        "Records": [
            {
                "eventTime": "2024-02-01T12:00:00Z",
                "s3": {
                    "bucket": { "name": "raw-energy" },
                    "object": { "key": "generation/north+plant.csv", "size": 2048, "eTag": "a1" }
                }
            },
            {
                "eventTime": "2024-02-01T12:00:01Z",
                "s3": {
                    "bucket": { "name": "raw-energy" },
                    "object": { "key": "generation/south%20plant.pdf", "size": 4096, "eTag": "b2" }
                }
            }
        ]
    });

    let events = EventEnvelope::from_json(&raw)
        .unwrap()
        .into_object_events()
        .unwrap();
    assert_eq!(events.len(), 2);

    let router = router();
    let first = router.route(&events[0]).unwrap();
    let second = router.route(&events[1]).unwrap();
    assert_eq!(first.file.key, "generation/north plant.csv");
    assert_eq!(first.descriptor.processing_path(), ProcessingPath::Inline);
    assert_eq!(second.file.key, "generation/south plant.pdf");
    assert_eq!(
        second.descriptor.processing_path(),
        ProcessingPath::BatchCompute
    );
}

#[test]
fn test_event_bus_envelope_routes() {
    let raw = json!({
        "detail-type": "Object Created",
        "time": "2024-02-01T12:00:00Z",
        "detail": {
            "bucket": { "name": "raw-energy" },
            "object": { "key": "consumption/smart_meter.tsv", "size": 1024, "etag": "c3" }
        }
    });

    let events = EventEnvelope::from_json(&raw)
        .unwrap()
        .into_object_events()
        .unwrap();
    let routed = router().route(&events[0]).unwrap();
    assert_eq!(routed.file.detected_type, FileFormat::Tsv);
    assert_eq!(routed.file.e_tag, "c3");
    assert_eq!(routed.file.dataset_type, DatasetType::Consumption);
}

#[test]
fn test_empty_record_list_is_missing_info() {
    let error = EventEnvelope::from_json(&json!({ "Records": [] }))
        .and_then(EventEnvelope::into_object_events)
        .unwrap_err();
    assert!(matches!(error, GridloadError::MissingFileInfo { .. }));
}

#[test]
fn test_descriptor_serializes_camel_case() {
    let routed = router()
        .route(&object_event("reports/grid_outage.docx", 1024))
        .unwrap();
    let value = serde_json::to_value(&routed.descriptor).unwrap();

    assert_eq!(value["processingPath"], "batchCompute");
    assert_eq!(value["processorConfig"]["datasetType"], "transmission");
    assert_eq!(value["inputFile"]["key"], "reports/grid_outage.docx");
    assert_eq!(
        value["outputLocation"],
        "s3://raw-energy/processed/transmission/grid_outage/"
    );
}
