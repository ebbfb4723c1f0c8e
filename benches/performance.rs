//! Performance benchmarks for the conversation store.

use conversation_sync::{
    reduce, ChangeEvent, Conversation, ConversationStore, IdSignature, MessageBody,
    MessageInsertEvent, Timestamp,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn conversations(count: usize) -> Vec<Conversation> {
    (0..count)
        .map(|i| Conversation {
            id: format!("conv-{:05}", i).as_str().into(),
            created_at: Timestamp(0),
            updated_at: Timestamp(i as i64),
            last_message_at: Timestamp(i as i64),
            last_message_preview: Some("hello".to_string()),
            is_group: false,
            name: None,
            unread_count: 0,
            participants: vec![],
        })
        .collect()
}

fn create_store(count: usize) -> ConversationStore {
    let mut store = ConversationStore::new("me".into(), 80);
    store.replace_all(conversations(count));
    store
}

/// Benchmark moving the oldest conversation to the top with varying list sizes
fn bench_insert_relocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_relocation");

    for size in [50, 200, 1000] {
        group.bench_with_input(BenchmarkId::new("conversations", size), &size, |b, &size| {
            let mut store = create_store(size);
            let mut clock = size as i64;

            b.iter(|| {
                clock += 1;
                // Always the current last entry, so every insert moves it to the top.
                let target = store.conversations()[size - 1].id.clone();
                let event = ChangeEvent::MessageInserted(MessageInsertEvent {
                    conversation_id: target,
                    sender_id: "them".into(),
                    created_at: Timestamp(clock),
                    body: MessageBody::Text("ping".into()),
                });
                store = reduce(std::mem::replace(&mut store, create_store(0)), &event).store;
                black_box(store.len());
            });
        });
    }

    group.finish();
}

/// Benchmark authoritative replacement
fn bench_replace_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("replace_all");

    for size in [50, 200, 1000] {
        let list = conversations(size);
        group.bench_with_input(BenchmarkId::new("conversations", size), &list, |b, list| {
            let mut store = create_store(0);
            b.iter(|| {
                store.replace_all(list.clone());
                black_box(store.id_signature());
            });
        });
    }

    group.finish();
}

/// Benchmark id signature computation
fn bench_signature(c: &mut Criterion) {
    let store = create_store(200);
    let ids = store.current_ids();

    c.bench_function("id_signature_200", |b| {
        b.iter(|| {
            black_box(IdSignature::of(&ids));
        });
    });
}

criterion_group!(
    benches,
    bench_insert_relocation,
    bench_replace_all,
    bench_signature,
);

criterion_main!(benches);
