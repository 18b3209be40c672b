//! Benchmarks for the pure, hot-path pieces of cluster lifecycle
//! management: compose synthesis, name sanitization, and port allocation.

use clusterforge::core::compose::{self, ComposeParams};
use clusterforge::core::model::{sanitize_name, ResourceLimits};
use clusterforge::core::ports::PortAllocator;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tokio::runtime::Runtime;

const TEMPLATE_YAML: &str = "services:\n  app:\n    container_name: placeholder\n    ports:\n      - \"8080:80\"\n    volumes:\n      - ./data:/data\n      - ./logs:/logs\n";

fn bench_compose_synthesize(c: &mut Criterion) {
    c.bench_function("compose_synthesize", |b| {
        b.iter(|| {
            compose::synthesize(
                black_box(TEMPLATE_YAML),
                &ComposeParams {
                    container_name: "alice_phpapp",
                    host_port: 20001,
                    host_root: "/srv/clusters/alice_phpapp",
                    limits: ResourceLimits {
                        cpu_cores: 1.0,
                        memory_mib: 512,
                        disk_gib: 5,
                        network_mbps: 100,
                    },
                },
            )
            .unwrap()
        });
    });
}

fn bench_sanitize_name(c: &mut Criterion) {
    c.bench_function("sanitize_name", |b| {
        b.iter(|| sanitize_name(black_box("Alice's PHP App! (v2)")));
    });
}

fn bench_port_allocation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("port_allocate_release_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let allocator = PortAllocator::new();
                let port = allocator.next_application_port().await.unwrap();
                allocator.release(black_box(port));
            })
        });
    });
}

criterion_group!(benches, bench_compose_synthesize, bench_sanitize_name, bench_port_allocation);
criterion_main!(benches);
