//! Network event reconciliation benchmark suite.
//!
//! Benchmarks the per-request-id pairing buffers and event parsing at
//! different in-flight scales:
//! - Concurrent requests: 100, 1000
//!
//! Run with: cargo bench --bench reconciliation
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;

use chrome_devtools::identifiers::NetworkRequestId;
use chrome_devtools::protocol::{CdpEvent, RequestWillBeSentEvent, ResponseReceivedExtraInfoEvent};
use chrome_devtools::NetworkEventManager;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const REQUEST_COUNTS: &[usize] = &[100, 1000];

// ============================================================================
// Fixtures
// ============================================================================

fn will_be_sent(id: usize) -> RequestWillBeSentEvent {
    serde_json::from_value(json!({
        "requestId": format!("1000.{id}"),
        "loaderId": format!("1000.{id}"),
        "documentUrl": "http://bench.test/",
        "request": {
            "url": format!("http://bench.test/resource/{id}"),
            "method": "GET",
            "headers": { "Accept": "*/*", "User-Agent": "bench" }
        },
        "timestamp": 1.0,
        "type": "XHR"
    }))
    .expect("fixture")
}

fn extra_info(id: usize) -> ResponseReceivedExtraInfoEvent {
    serde_json::from_value(json!({
        "requestId": format!("1000.{id}"),
        "headers": { "content-type": "application/json" },
        "statusCode": 200,
        "headersText": "HTTP/1.1 200 OK\r\n"
    }))
    .expect("fixture")
}

// ============================================================================
// Benchmark: Pairing Buffer Churn
// ============================================================================

/// Store-pair-forget cycle for N interleaved requests.
fn bench_buffer_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_churn");

    for &count in REQUEST_COUNTS {
        group.bench_with_input(BenchmarkId::new("pair_forget", count), &count, |b, &count| {
            b.iter(|| {
                let mut buffers = NetworkEventManager::new();

                // First halves arrive for every request...
                for id in 0..count {
                    let event = will_be_sent(id);
                    buffers.store_will_be_sent(event.request_id.clone(), event);
                }
                // ...then counterparts and extra-infos, interleaved.
                for id in 0..count {
                    let request_id = NetworkRequestId::new(format!("1000.{id}"));
                    buffers.extra_info_queue(&request_id).push_back(extra_info(id));
                    let _ = buffers.get_will_be_sent(&request_id);
                    let _ = buffers.extra_info_queue(&request_id).pop_front();
                    buffers.forget(&request_id);
                }

                buffers.in_flight_requests()
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Event Parsing
// ============================================================================

/// Raw frame → typed event, the per-message hot path.
fn bench_event_parse(c: &mut Criterion) {
    let event = CdpEvent::new(
        "Network.requestWillBeSent",
        json!({
            "requestId": "1000.1",
            "loaderId": "1000.1",
            "documentUrl": "http://bench.test/",
            "request": {
                "url": "http://bench.test/resource",
                "method": "GET",
                "headers": { "Accept": "*/*" }
            },
            "timestamp": 1.0,
            "type": "XHR"
        }),
    );

    c.bench_function("parse_request_will_be_sent", |b| {
        b.iter(|| event.parse());
    });
}

criterion_group!(benches, bench_buffer_churn, bench_event_parse);
criterion_main!(benches);
