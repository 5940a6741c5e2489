use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use bayline::config::EngineConfig;
use bayline::engine::{EngineError, SchedulingService};
use bayline::model::*;
use bayline::notify::NotifyHub;
use bayline::store::MemoryStore;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const DAY: i64 = 1_767_225_600_000;

type Service = SchedulingService<MemoryStore>;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn booking(resource_id: Ulid, start: Ms) -> Booking {
    Booking {
        id: Ulid::new(),
        resource_id: Some(resource_id),
        location_id: Ulid::nil(),
        span: Span::new(start, start + HOUR),
        status: BookingStatus::Confirmed,
        series: None,
        customer_ref: "bench".into(),
        service_ref: "bench".into(),
        zone: None,
    }
}

async fn setup(svc: &Service) -> Vec<Resource> {
    let capacities = [1, 1, 1, 1, 1, 5, 5, 5, 10, 10];
    let mut resources = Vec::new();
    for &cap in &capacities {
        let r = Resource::new(Ulid::new(), Ulid::nil(), ResourceKind::Bay, cap);
        svc.store().upsert_resource(r.clone()).await.unwrap();
        resources.push(r);
    }
    println!("  created {} resources", resources.len());
    resources
}

async fn phase1_sequential_creates(svc: &Service, resource: &Resource) -> Vec<Ulid> {
    let n = 2000;
    let mut ids = Vec::with_capacity(n);
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let b = booking(resource.id, DAY + (i as i64 % 24) * HOUR);
        ids.push(b.id);
        let t = Instant::now();
        svc.propose_booking(b).await.unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    println!(
        "  {n} bookings in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("propose_booking", &mut latencies);
    ids
}

/// Every task moves its own bookings onto the same few resources.
async fn phase2_contended_reschedules(svc: Arc<Service>, resources: &[Resource]) {
    let n_tasks = 16;
    let n_per_task = 200;

    let mut seeded = Vec::new();
    for t in 0..n_tasks {
        let home = &resources[t % resources.len()];
        let mut ids = Vec::with_capacity(n_per_task);
        for j in 0..n_per_task {
            let b = booking(home.id, DAY + (j as i64) * HOUR);
            ids.push(b.id);
            svc.propose_booking(b).await.unwrap();
        }
        seeded.push(ids);
    }

    let targets: Vec<Ulid> = resources.iter().take(3).map(|r| r.id).collect();
    let start = Instant::now();
    let mut handles = Vec::new();
    for (t, ids) in seeded.into_iter().enumerate() {
        let svc = svc.clone();
        let targets = targets.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(ids.len());
            let mut warnings = 0usize;
            let mut busy = 0usize;
            for (j, id) in ids.into_iter().enumerate() {
                let target = targets[(t + j) % targets.len()];
                let new_start = DAY + 30 * 24 * HOUR + (j as i64 % 8) * HOUR;
                let started = Instant::now();
                match svc.propose_reschedule(id, new_start, Some(target)).await {
                    Ok(ok) => {
                        if ok.warning.is_some() {
                            warnings += 1;
                        }
                    }
                    Err(EngineError::Busy(_)) => busy += 1,
                    Err(e) => panic!("unexpected rejection: {e}"),
                }
                latencies.push(started.elapsed());
            }
            (latencies, warnings, busy)
        }));
    }

    let mut all = Vec::new();
    let mut warnings = 0;
    let mut busy = 0;
    for h in handles {
        let (lat, w, b) = h.await.unwrap();
        all.extend(lat);
        warnings += w;
        busy += b;
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {n_tasks} tasks x {n_per_task} moves = {total} total in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!("  capacity warnings: {warnings}, busy: {busy}");
    print_latency("propose_reschedule", &mut all);
}

async fn phase3_reads_under_load(svc: Arc<Service>, resource: &Resource, booked: Vec<Ulid>) {
    let rid = resource.id;
    let writer = {
        let svc = svc.clone();
        tokio::spawn(async move {
            for (i, id) in booked.into_iter().enumerate() {
                let _ = svc
                    .propose_reschedule(id, DAY + 60 * 24 * HOUR + (i as i64 % 24) * HOUR, None)
                    .await;
            }
        })
    };

    let mut snapshot_lat = Vec::new();
    let mut window_lat = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        svc.capacity_snapshot(rid, Span::instant(DAY + 9 * HOUR))
            .await
            .unwrap();
        snapshot_lat.push(t.elapsed());

        let t = Instant::now();
        svc.capacity_over_window(rid, DAY, DAY + 7 * 24 * HOUR, HOUR / 4)
            .await
            .unwrap();
        window_lat.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    print_latency("capacity_snapshot", &mut snapshot_lat);
    print_latency("capacity_over_window (7d / 15m)", &mut window_lat);
}

#[tokio::main]
async fn main() {
    let svc = Arc::new(SchedulingService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(NotifyHub::new()),
        &EngineConfig::default(),
    ));

    println!("=== bayline stress benchmark ===\n");

    println!("[setup]");
    let resources = setup(&svc).await;

    println!("\n[phase 1] sequential creates");
    let booked = phase1_sequential_creates(&svc, &resources[9]).await;

    println!("\n[phase 2] contended reschedules");
    phase2_contended_reschedules(svc.clone(), &resources).await;

    println!("\n[phase 3] read latency under write load");
    phase3_reads_under_load(svc, &resources[9], booked).await;

    println!("\n=== benchmark complete ===");
}
