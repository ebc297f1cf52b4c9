/// Integration tests for trace ingestion.
use prefixsim_core::trace::{self, SyntheticConfig, TraceError};
use prefixsim_core::TokenizedRequest;
use std::path::Path;

#[test]
fn test_write_and_read_trace() {
    let tmp_path = std::env::temp_dir().join("prefixsim_test_trace.jsonl");

    let requests = vec![
        TokenizedRequest::new(0, 0, (0..32).collect()).with_endpoint("/v1/chat/completions"),
        TokenizedRequest::new(1, 100, (0..48).collect()).with_hold_ms(250),
    ];

    trace::write_jsonl_file(&requests, &tmp_path).unwrap();
    let loaded = trace::load_trace(&tmp_path, "jsonl").unwrap();

    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].num_tokens(), 32);
    assert_eq!(loaded[0].endpoint.as_deref(), Some("/v1/chat/completions"));
    assert_eq!(loaded[1].num_tokens(), 48);
    assert_eq!(loaded[1].hold_ms, 250);

    let _ = std::fs::remove_file(&tmp_path);
}

#[test]
fn test_generated_trace_survives_file_roundtrip() {
    let tmp_path = std::env::temp_dir().join("prefixsim_test_synthetic.jsonl");
    let generated = trace::generate_synthetic(&SyntheticConfig {
        requests: 64,
        ..Default::default()
    });

    trace::write_jsonl_file(&generated, &tmp_path).unwrap();
    let loaded = trace::load_jsonl(&tmp_path).unwrap();
    assert_eq!(loaded, generated);

    let _ = std::fs::remove_file(&tmp_path);
}

#[test]
fn test_missing_file() {
    let err = trace::load_trace(Path::new("/nonexistent/trace.jsonl"), "jsonl").unwrap_err();
    assert!(matches!(err, TraceError::Io(_)));
}

#[test]
fn test_invalid_format() {
    let result = trace::load_trace(Path::new("traces/example_trace.jsonl"), "invalid_format");
    assert!(matches!(result, Err(TraceError::UnsupportedFormat(_))));
}

#[test]
fn test_malformed_line_is_reported() {
    let tmp_path = std::env::temp_dir().join("prefixsim_test_malformed.jsonl");
    std::fs::write(
        &tmp_path,
        "{\"ts\": 0, \"tokens\": [1, 2]}\n{\"ts\": 5, \"tokens\": \"not a list\"}\n",
    )
    .unwrap();

    let err = trace::load_jsonl(&tmp_path).unwrap_err();
    assert!(matches!(err, TraceError::JsonParse { line: 2, .. }));
    assert!(err.to_string().contains("line 2"));

    let _ = std::fs::remove_file(&tmp_path);
}
