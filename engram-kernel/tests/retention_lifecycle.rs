//! Retention lifecycle: decay, refs, fusion, update/delete, history.

use engram_core::{
    EngramConfig, MemoryEventKind, MemoryTier, RefType,
};
use engram_kernel::{MemoryKernel, ProposeWriteRequest, ProposeWriteResponse, WriteMode};
use engram_llm::{HashingEmbedder, StaticLlm};
use engram_storage::MemoryPatch;
use std::sync::Arc;

const DIMENSIONS: usize = 128;

fn kernel() -> MemoryKernel {
    let mut config = EngramConfig::default();
    config.vector.dimensions = DIMENSIONS;
    MemoryKernel::new(
        config,
        Arc::new(HashingEmbedder::new(DIMENSIONS)),
        Some(Arc::new(StaticLlm::new("not json"))),
    )
    .unwrap()
}

fn write_direct(kernel: &MemoryKernel, content: &str) -> engram_core::MemoryId {
    let mut request = ProposeWriteRequest::new(content, "u1");
    request.mode = WriteMode::Direct;
    request.trusted_direct = true;
    match kernel.propose_write(&request).unwrap() {
        ProposeWriteResponse::Direct { result } => result.created_ids[0],
        ProposeWriteResponse::Staging { .. } => panic!("expected direct write"),
    }
}

fn backdate(kernel: &MemoryKernel, memory_id: engram_core::MemoryId, days: i64, strength: f64) {
    kernel
        .store()
        .update_memory(
            memory_id,
            &MemoryPatch {
                strength: Some(strength),
                last_accessed: Some(chrono::Utc::now() - chrono::Duration::days(days)),
                ..MemoryPatch::default()
            },
        )
        .unwrap();
}

#[test]
fn test_decay_forgets_stale_memories_but_not_referenced_ones() {
    let kernel = kernel();
    let stale = write_direct(&kernel, "ephemeral observation about nothing");
    let kept = write_direct(&kernel, "protected observation about something");
    backdate(&kernel, stale, 365, 0.06);
    backdate(&kernel, kept, 365, 0.06);

    kernel
        .store()
        .add_memory_subscriber(kept, "agent:keeper", RefType::Strong, None)
        .unwrap();

    let stats = kernel.apply_decay(Some("u1")).unwrap();
    assert_eq!(stats.forgotten, 1);

    assert!(kernel.store().get_memory(stale).unwrap().unwrap().tombstoned);
    assert!(!kernel.store().get_memory(kept).unwrap().unwrap().tombstoned);

    // The forgotten memory carries a FORGET event in its history.
    let history = kernel.get_history(stale).unwrap();
    assert!(history
        .iter()
        .any(|event| event.kind == MemoryEventKind::Forget));
}

#[test]
fn test_deep_sleep_cascades_traces() {
    let kernel = kernel();
    let memory_id = write_direct(&kernel, "trace cascade subject");

    let before = kernel
        .store()
        .get_memory(memory_id)
        .unwrap()
        .unwrap()
        .traces
        .unwrap();
    assert!(before.s_fast > 0.0);
    assert_eq!(before.s_slow, 0.0);

    let report = kernel
        .run_sleep_cycle(&engram_kernel::SleepCycleRequest {
            user_id: Some("u1".to_string()),
            date: Some(chrono::Utc::now().date_naive()),
            apply_decay: false,
            cleanup_stale_refs: false,
            deep_sleep: true,
            ..engram_kernel::SleepCycleRequest::default()
        })
        .unwrap();
    assert!(report.users.get("u1").unwrap().trace_cascades >= 1);

    let after = kernel
        .store()
        .get_memory(memory_id)
        .unwrap()
        .unwrap()
        .traces
        .unwrap();
    assert!(after.s_fast < before.s_fast);
    assert!(after.s_mid > before.s_mid);
    assert!(after.s_slow > 0.0);
}

#[test]
fn test_update_rewrites_content_and_vectors() {
    let kernel = kernel();
    let memory_id = write_direct(&kernel, "the printer lives on floor two");

    kernel
        .update_memory(memory_id, Some("the printer moved to floor three"), None, None)
        .unwrap();

    let memory = kernel.store().get_memory(memory_id).unwrap().unwrap();
    assert_eq!(memory.content, "the printer moved to floor three");

    let response = kernel
        .search(&engram_kernel::SearchRequest::new(
            "the printer moved to floor three",
            "u1",
        ))
        .unwrap();
    assert!(response.count > 0);

    let history = kernel.get_history(memory_id).unwrap();
    assert!(history
        .iter()
        .any(|event| event.kind == MemoryEventKind::Update));
}

#[test]
fn test_immutable_memories_refuse_updates() {
    let kernel = kernel();
    let memory_id = write_direct(&kernel, "a directive that must not change");
    let mut raw = kernel.store().get_memory(memory_id).unwrap().unwrap();
    raw.immutable = true;
    // No immutability patch by design: flip it through a fresh row.
    kernel.store().delete_memory(memory_id, false).unwrap();
    kernel.store().add_memory(&raw).unwrap();

    let err = kernel
        .update_memory(memory_id, Some("changed"), None, None)
        .unwrap_err();
    assert_eq!(err.code(), "validation");
}

#[test]
fn test_fusion_merges_and_tombstones_sources() {
    let kernel = kernel();
    let a = write_direct(&kernel, "the offsite is in Lisbon");
    let b = write_direct(&kernel, "the offsite runs three days");

    let fused = kernel.fuse_memories(&[a, b], "u1").unwrap();
    assert_eq!(fused.tier, MemoryTier::Lml);
    // Static non-JSON LLM output falls back to joined content.
    assert!(fused.content.contains("Lisbon"));
    assert!(fused.content.contains("three days"));

    assert!(kernel.store().get_memory(a).unwrap().unwrap().tombstoned);
    assert!(kernel.store().get_memory(b).unwrap().unwrap().tombstoned);

    // The fused record is searchable.
    let response = kernel
        .search(&engram_kernel::SearchRequest::new("offsite Lisbon", "u1"))
        .unwrap();
    assert!(response.count > 0);
}

#[test]
fn test_fusion_requires_two_memories() {
    let kernel = kernel();
    let only = write_direct(&kernel, "a single fact");
    let err = kernel.fuse_memories(&[only], "u1").unwrap_err();
    assert_eq!(err.code(), "validation");
}

#[test]
fn test_related_memories_via_shared_entities() {
    let kernel = kernel();
    let first = write_direct(&kernel, "Paired with Dana on the importer");
    let second = write_direct(&kernel, "Dana suggested batching the importer writes");
    write_direct(&kernel, "lunch was quiet");

    let related = kernel.get_related_memories(first, 5).unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].memory.memory_id, second);
    assert!(related[0]
        .shared_entities
        .iter()
        .any(|entity| entity == "Dana"));
}

#[test]
fn test_reset_clears_everything() {
    let kernel = kernel();
    write_direct(&kernel, "soon to be gone");
    write_direct(&kernel, "also soon gone");

    let removed = kernel.reset().unwrap();
    assert_eq!(removed, 2);
    assert_eq!(kernel.get_stats(Some("u1"), None).unwrap().total, 0);

    let response = kernel
        .search(&engram_kernel::SearchRequest::new("gone", "u1"))
        .unwrap();
    assert_eq!(response.count, 0);
}
