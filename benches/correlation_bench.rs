use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;
use ticket_sdk::domain::services::correlation::{PendingRequests, Resolution};
use ticket_sdk::{ResponseType, SdkResponse, TicketType};
use tokio::time::Instant;

fn ticket_response(ticket_id: &str) -> SdkResponse {
    let body = format!(
        r#"{{"result":{{"ticketId":"{}","status":"accepted","reason":{{"code":1024}}}},"signature":"sig","version":"2.4"}}"#,
        ticket_id
    );
    match SdkResponse::parse(ResponseType::Ticket, body.as_bytes(), None) {
        Ok(response) => response,
        Err(e) => panic!("bench response must parse: {}", e),
    }
}

fn correlation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_requests");

    // Register then resolve the same ticket id
    group.bench_function("register_resolve", |b| {
        let pending = PendingRequests::new();
        let response = ticket_response("bench-1");

        b.iter(|| {
            let _ = pending.register(
                "bench-1",
                "corr",
                TicketType::Ticket,
                Duration::from_secs(5),
                None,
            );
            match pending.resolve(black_box(response.clone())) {
                Resolution::Subscribers(r) => black_box(r),
                other => panic!("unexpected resolution {:?}", other),
            };
        });
    });

    // Resolution cost with many other requests in flight
    for in_flight in [100usize, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("resolve_with_in_flight", in_flight),
            &in_flight,
            |b, &in_flight| {
                let pending = PendingRequests::new();
                for i in 0..in_flight {
                    let _ = pending.register(
                        &format!("other-{}", i),
                        "corr",
                        TicketType::Ticket,
                        Duration::from_secs(60),
                        None,
                    );
                }
                let response = ticket_response("bench-2");

                b.iter(|| {
                    let _ = pending.register(
                        "bench-2",
                        "corr",
                        TicketType::Ticket,
                        Duration::from_secs(5),
                        None,
                    );
                    black_box(pending.resolve(response.clone()));
                });
            },
        );
    }

    // Expiry sweep over a batch of due deadlines
    group.bench_function("expire_1000", |b| {
        b.iter_with_setup(
            || {
                let pending = PendingRequests::new();
                for i in 0..1_000 {
                    let _ = pending.register(
                        &format!("due-{}", i),
                        "corr",
                        TicketType::TicketCancel,
                        Duration::ZERO,
                        None,
                    );
                }
                pending
            },
            |pending| black_box(pending.expire(Instant::now())),
        );
    });

    group.finish();
}

criterion_group!(benches, correlation_benchmark);
criterion_main!(benches);
