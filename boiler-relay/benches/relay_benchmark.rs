use std::hint::black_box;

use boiler_relay::connection::{ConnectionHandle, ConnectionReceiver};
use boiler_relay::protocol::{InboundMessage, OutboundMessage};
use boiler_relay::reconcile::on_disconnect;
use boiler_relay::registry::{AppConnection, Registry};
use boiler_relay::router::handle_frame;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const UPDATE_FRAME: &str =
    r#"{"type":"boiler_update","boilerId":"b1","temperature":31.5,"isOn":true}"#;
const COMMAND_FRAME: &str = r#"{"type":"command","appId":"a1","boilerId":"b1","action":"set_temperature","temperature":40}"#;

/// Registry with `apps` apps where only the last one subscribes to `b1`,
/// plus a connected boiler `b1`.
fn populated_registry(apps: usize) -> (Registry, ConnectionHandle, Vec<ConnectionReceiver>) {
    let mut registry = Registry::new();
    let mut receivers = Vec::with_capacity(apps + 1);

    for i in 0..apps {
        let (conn, rx) = ConnectionHandle::channel(1024);
        let subscribed = if i + 1 == apps { "b1".to_string() } else { format!("other-{i}") };
        registry.insert_app(format!("app-{i}"), AppConnection::new(conn, [subscribed]));
        receivers.push(rx);
    }

    let (boiler, rx) = ConnectionHandle::channel(1024);
    receivers.push(rx);
    handle_frame(
        &mut registry,
        r#"{"type":"boiler_init","boilerId":"b1","appId":"a1","temperature":30,"isOn":true}"#,
        &boiler,
    );
    handle_frame(&mut registry, UPDATE_FRAME, &boiler);
    (registry, boiler, receivers)
}

fn drain(receivers: &mut [ConnectionReceiver]) {
    for rx in receivers {
        while rx.outbound.try_recv().is_ok() {}
    }
}

fn bench_parse_update(c: &mut Criterion) {
    c.bench_function("parse_boiler_update", |b| {
        b.iter(|| black_box(InboundMessage::parse(black_box(UPDATE_FRAME)).unwrap()))
    });
}

fn bench_parse_command(c: &mut Criterion) {
    c.bench_function("parse_command", |b| {
        b.iter(|| black_box(InboundMessage::parse(black_box(COMMAND_FRAME)).unwrap()))
    });
}

fn bench_encode_update(c: &mut Criterion) {
    let msg = OutboundMessage::boiler_update("b1", 31.5, true);
    c.bench_function("encode_boiler_update", |b| {
        b.iter(|| black_box(msg.encode().unwrap()))
    });
}

fn bench_update_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_broadcast");
    for apps in [1usize, 100, 1000] {
        let (mut registry, boiler, mut receivers) = populated_registry(apps);
        group.bench_with_input(BenchmarkId::from_parameter(apps), &apps, |b, _| {
            b.iter(|| {
                black_box(handle_frame(&mut registry, UPDATE_FRAME, &boiler));
                drain(&mut receivers);
            })
        });
    }
    group.finish();
}

fn bench_command_echo(c: &mut Criterion) {
    let (mut registry, _boiler, mut receivers) = populated_registry(10);
    let (app, _app_rx) = ConnectionHandle::channel(16);
    c.bench_function("command_echo", |b| {
        b.iter(|| {
            black_box(handle_frame(&mut registry, COMMAND_FRAME, &app));
            drain(&mut receivers);
        })
    });
}

fn bench_boiler_disconnect(c: &mut Criterion) {
    c.bench_function("boiler_disconnect_100_apps", |b| {
        b.iter_batched(
            || populated_registry(100),
            |(mut registry, boiler, receivers)| {
                black_box(on_disconnect(&mut registry, boiler.id()));
                receivers
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_parse_update,
    bench_parse_command,
    bench_encode_update,
    bench_update_broadcast,
    bench_command_echo,
    bench_boiler_disconnect,
);
criterion_main!(benches);
