use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use strand::{run, spawn, this_task, when_all, Condvar, Mutex, Promise, SchedulerConfig};

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig::new().worker_count(workers)
}

fn bench_startup(c: &mut Criterion) {
    c.bench_function("run_empty_root", |b| {
        b.iter(|| run(config(2), || black_box(1)).unwrap());
    });
}

fn bench_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    for tasks in [100u64, 1000] {
        group.throughput(Throughput::Elements(tasks));
        group.bench_with_input(BenchmarkId::new("spawn_join", tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                run(config(4), move || {
                    let futures: Vec<_> = (0..tasks).map(|i| spawn(move || black_box(i)).unwrap()).collect();
                    when_all(futures).wait().unwrap();
                })
                .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_yield(c: &mut Criterion) {
    let mut group = c.benchmark_group("yield");
    group.throughput(Throughput::Elements(10_000));

    for workers in [1usize, 4] {
        group.bench_with_input(BenchmarkId::new("yield_now", workers), &workers, |b, &workers| {
            b.iter(|| {
                run(config(workers), || {
                    let futures: Vec<_> = (0..4)
                        .map(|_| {
                            spawn(|| {
                                for _ in 0..2500 {
                                    this_task::yield_now();
                                }
                            })
                            .unwrap()
                        })
                        .collect();
                    when_all(futures).wait().unwrap();
                })
                .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    group.throughput(Throughput::Elements(8_000));

    group.bench_function("mutex_8x1000", |b| {
        b.iter(|| {
            run(config(4), || {
                let counter = Arc::new(Mutex::new(0u64));
                let futures: Vec<_> = (0..8)
                    .map(|_| {
                        let counter = counter.clone();
                        spawn(move || {
                            for _ in 0..1000 {
                                *counter.lock() += 1;
                            }
                        })
                        .unwrap()
                    })
                    .collect();
                when_all(futures).wait().unwrap();
                let total = *counter.lock();
                total
            })
            .unwrap()
        });
    });

    group.bench_function("condvar_ping_pong", |b| {
        b.iter(|| {
            run(config(2), || {
                let turn = Arc::new((Mutex::new(false), Condvar::new()));
                let other = turn.clone();
                let pong = spawn(move || {
                    let (flag, changed) = &*other;
                    for _ in 0..1000 {
                        let mut guard = flag.lock();
                        changed.wait_while(&mut guard, |ping| !*ping);
                        *guard = false;
                        changed.notify_all();
                    }
                })
                .unwrap();

                let (flag, changed) = &*turn;
                for _ in 0..1000 {
                    let mut guard = flag.lock();
                    changed.wait_while(&mut guard, |ping| *ping);
                    *guard = true;
                    changed.notify_all();
                }
                pong.wait().unwrap();
            })
            .unwrap()
        });
    });

    group.finish();
}

fn bench_promise(c: &mut Criterion) {
    c.bench_function("promise_handoff", |b| {
        b.iter(|| {
            run(config(2), || {
                let mut sum = 0u64;
                for i in 0..1000u64 {
                    let promise = Promise::new();
                    let future = promise.get_future().unwrap();
                    spawn(move || promise.set_value(i).unwrap()).unwrap();
                    sum += future.into_value().unwrap();
                }
                black_box(sum)
            })
            .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_startup,
    bench_spawn,
    bench_yield,
    bench_contention,
    bench_promise
);
criterion_main!(benches);
