//! Benchmarks for the JSON session store at its retention cap.
//!
//! Every auto-save rewrites the whole collection, so the cost of a full
//! 50-session load and save bounds the per-turn persistence overhead.

use std::time::Duration;

use chrono::Local;
use criterion::{criterion_group, criterion_main, Criterion};
use parley_core::types::{Role, Session};
use parley_storage::{JsonFileStore, SessionStore, MAX_SESSIONS};
use tempfile::TempDir;

/// A session with `pairs` user/assistant exchanges of realistic length.
fn generate_session(index: usize, pairs: usize) -> Session {
    let now = Local::now();
    let mut session = Session::new(format!("20240101_{:06}", index), now);
    for turn in 0..pairs {
        session.push_turn(
            Role::User,
            format!(
                "Can you remind me what we decided about the release schedule, \
                 question {} of session {}?",
                turn, index
            ),
            now,
        );
        session.push_turn(
            Role::Assistant,
            "We agreed to ship the beta on Thursday after the final review, \
             with the public release following a week later if no blockers \
             come up during testing."
                .to_string(),
            now,
        );
    }
    session
}

fn bench_full_store(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path().join("conversation_memory.json"));
    let sessions: Vec<Session> = (0..MAX_SESSIONS).map(|i| generate_session(i, 10)).collect();
    store.save(&sessions).unwrap();

    let mut group = c.benchmark_group("json_store");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("load_full", |b| b.iter(|| store.load()));

    group.bench_function("save_full", |b| {
        b.iter(|| store.save(&sessions).unwrap());
    });

    // Load, upsert the last session, save: what one auto-save does.
    group.bench_function("upsert_cycle", |b| {
        let updated = generate_session(MAX_SESSIONS - 1, 11);
        b.iter(|| {
            let mut loaded = store.load();
            if let Some(slot) = loaded.iter_mut().find(|s| s.id == updated.id) {
                *slot = updated.clone();
            }
            store.save(&loaded).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_full_store);
criterion_main!(benches);
