//! End-to-end kernel scenarios: staged writes, masking, promotion, scenes.

use engram_core::{
    Capability, CommitStatus, ConfidentialityScope, EngramConfig, EngramIdType, MemoryTier,
    SessionRecord, SessionId, StashResolution,
};
use engram_kernel::{
    MemoryKernel, ProposeWriteRequest, ProposeWriteResponse, SearchEntry, SearchRequest,
    SleepCycleRequest, WriteEvent, WriteMode,
};
use engram_llm::{HashingEmbedder, StaticLlm};
use engram_policy::{hash_token, SessionRequest};
use std::sync::Arc;

const DIMENSIONS: usize = 128;

const ECHO_RESPONSE: &str = r#"{
    "paraphrases": ["a rephrased version of the memory", "the same thing said differently"],
    "keywords": ["memory", "note"],
    "implications": [],
    "questions": [],
    "question_form": null,
    "category": "fact",
    "importance": 0.6
}"#;

fn kernel() -> MemoryKernel {
    let mut config = EngramConfig::default();
    config.vector.dimensions = DIMENSIONS;
    MemoryKernel::new(
        config,
        Arc::new(HashingEmbedder::new(DIMENSIONS)),
        Some(Arc::new(StaticLlm::new(ECHO_RESPONSE))),
    )
    .unwrap()
}

fn staged(response: ProposeWriteResponse) -> (engram_core::CommitId, CommitStatus, engram_core::CommitChecks, bool) {
    match response {
        ProposeWriteResponse::Staging {
            commit_id,
            status,
            checks,
            auto_merged,
            ..
        } => (commit_id, status, checks, auto_merged),
        ProposeWriteResponse::Direct { .. } => panic!("expected a staged response"),
    }
}

fn propose(kernel: &MemoryKernel, content: &str, agent: &str) -> ProposeWriteResponse {
    kernel
        .propose_write(&ProposeWriteRequest::new(content, "u1").with_agent(agent))
        .unwrap()
}

fn propose_and_approve(kernel: &MemoryKernel, content: &str, agent: &str) -> engram_core::MemoryId {
    let (commit_id, _, _, auto_merged) = staged(propose(kernel, content, agent));
    if !auto_merged {
        kernel.approve_commit(commit_id, None, None).unwrap();
    }
    kernel
        .store()
        .find_exact_content("u1", content)
        .unwrap()
        .expect("approved write must be stored")
        .memory_id
}

// S1: a write carrying an API key is auto-stashed by the PII check and its
// content never becomes searchable.
#[test]
fn test_pii_write_is_auto_stashed() {
    let kernel = kernel();
    let response = kernel
        .propose_write(
            &ProposeWriteRequest::new("my api_key=sk-abc123", "u1")
                .with_agent("a1")
                .with_scope(ConfidentialityScope::Work),
        )
        .unwrap();

    let (_, status, checks, auto_merged) = staged(response);
    assert_eq!(status, CommitStatus::AutoStashed);
    assert!(checks.pii_risk);
    assert!(checks.risk_score >= 0.85);
    assert!(!auto_merged);

    let results = kernel
        .search(&SearchRequest::new("api key", "u1"))
        .unwrap();
    assert_eq!(results.count, 0);
}

// S2: a proposal contradicting a stored identity invariant is stashed with
// the conflict enumerated and a stash row awaiting resolution.
#[test]
fn test_invariant_conflict_is_stashed() {
    let kernel = kernel();
    propose_and_approve(&kernel, "my name is Alice", "a1");

    let (commit_id, status, checks, _) = staged(propose(&kernel, "my name is Bob", "a1"));
    assert_eq!(status, CommitStatus::AutoStashed);
    assert!(!checks.invariants_ok);
    assert!(checks.risk_score >= 0.72);
    assert_eq!(checks.conflicts.len(), 1);
    assert_eq!(checks.conflicts[0].key, "identity.name");
    assert_eq!(checks.conflicts[0].existing, "Alice");
    assert_eq!(checks.conflicts[0].proposed, "Bob");

    let stashes = kernel
        .store()
        .list_conflict_stash(Some("u1"), Some(StashResolution::Unresolved), 10)
        .unwrap();
    assert_eq!(stashes.len(), 1);
    assert_eq!(stashes[0].source_commit_id, Some(commit_id));
}

// S3: only one approve can win; a commit seen mid-APPLYING is refused with
// the live status, and re-approving an APPROVED commit is an empty success.
#[test]
fn test_double_approve_single_winner() {
    let kernel = kernel();
    let (commit_id, _, _, _) = staged(propose(&kernel, "ship the release notes", "a1"));

    // Simulate a concurrent approver holding the APPLYING section.
    kernel
        .store()
        .transition_commit_status(
            commit_id,
            &[CommitStatus::Pending],
            CommitStatus::Applying,
            None,
        )
        .unwrap();
    let err = kernel.approve_commit(commit_id, None, None).unwrap_err();
    assert_eq!(err.code(), "conflict");

    // The winner finishes; a later approve is a no-op success.
    kernel
        .store()
        .transition_commit_status(
            commit_id,
            &[CommitStatus::Applying],
            CommitStatus::Approved,
            None,
        )
        .unwrap();
    let again = kernel.approve_commit(commit_id, None, None).unwrap();
    assert_eq!(again.status, CommitStatus::Approved);
    assert!(again.applied.is_empty());
}

// S4: memories outside the session's namespaces surface masked, never with
// content.
#[test]
fn test_namespace_masking() {
    let kernel = kernel();
    kernel
        .propose_write(&{
            let mut request = ProposeWriteRequest::new("pager PIN 1234", "u1")
                .with_namespace("personal")
                .with_scope(ConfidentialityScope::Personal);
            request.mode = WriteMode::Direct;
            request.trusted_direct = true;
            request
        })
        .unwrap();

    let grant = kernel
        .create_session(&SessionRequest {
            user_id: "u1".to_string(),
            agent_id: None,
            allowed_scopes: vec![ConfidentialityScope::Work, ConfidentialityScope::Personal],
            capabilities: vec![Capability::Search],
            namespaces: vec!["work".to_string()],
            ttl_minutes: Some(60),
        })
        .unwrap();

    let response = kernel
        .search(&SearchRequest::new("pager PIN", "u1").with_token(grant.token))
        .unwrap();
    assert!(response.count > 0);
    assert!(response.context_packet.masking.masked_count > 0);
    for entry in &response.results {
        match entry {
            SearchEntry::Masked(masked) => {
                assert!(masked.masked);
                assert_eq!(masked.details, "[REDACTED]");
            }
            SearchEntry::Hit(hit) => panic!("content leaked: {}", hit.memory),
        }
    }
}

// S5: an access that crosses both promotion thresholds moves the memory from
// SML to LML.
#[test]
fn test_access_promotes_to_lml() {
    let kernel = kernel();
    let memory_id = propose_and_approve(&kernel, "the deploy pipeline uses blue-green", "a1");

    kernel
        .store()
        .update_memory(
            memory_id,
            &engram_storage::MemoryPatch {
                strength: Some(0.9),
                ..engram_storage::MemoryPatch::default()
            },
        )
        .unwrap();
    for _ in 0..9 {
        kernel.store().increment_access(memory_id).unwrap();
    }

    let response = kernel
        .search(&SearchRequest::new("deploy pipeline blue-green", "u1").with_limit(3))
        .unwrap();
    assert!(response.count > 0);

    let memory = kernel.store().get_memory(memory_id).unwrap().unwrap();
    assert_eq!(memory.tier, MemoryTier::Lml);
}

// S6: two writes close in time with the same place join one scene whose
// window spans both views.
#[test]
fn test_episodic_grouping() {
    let kernel = kernel();
    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "repo".to_string(),
        serde_json::Value::String("repo:/x".to_string()),
    );

    let mut first = ProposeWriteRequest::new("debugging the flaky migration test", "u1")
        .with_agent("a1");
    first.metadata = metadata.clone();
    let (first_commit, _, _, _) = staged(kernel.propose_write(&first).unwrap());
    let first_id = kernel.approve_commit(first_commit, None, None).unwrap().applied[0].id;

    let mut second = ProposeWriteRequest::new("migration test still flaky, adding retries", "u1")
        .with_agent("a1");
    second.metadata = metadata;
    let (second_commit, _, _, _) = staged(kernel.propose_write(&second).unwrap());
    let second_id = kernel
        .approve_commit(second_commit, None, None)
        .unwrap()
        .applied[0]
        .id;

    let first_memory = kernel.store().get_memory(first_id).unwrap().unwrap();
    let second_memory = kernel.store().get_memory(second_id).unwrap().unwrap();
    let scene_id = first_memory.scene_id.unwrap();
    assert_eq!(second_memory.scene_id, Some(scene_id));

    let scene = kernel.store().get_scene(scene_id).unwrap().unwrap();
    assert_eq!(scene.memory_ids, vec![first_id, second_id]);
    assert!(scene.participants.contains(&"a1".to_string()));
    assert!(scene.end_time >= scene.start_time);
}

// Round trip: propose → approve → the stored content equals the original.
#[test]
fn test_write_roundtrip_preserves_content() {
    let kernel = kernel();
    let memory_id = propose_and_approve(&kernel, "the standup moved to 9:30", "a1");
    let memory = kernel.get_memory(memory_id).unwrap().unwrap();
    assert_eq!(memory.content, "the standup moved to 9:30");
    // Echo-driven metadata is attached without touching the content.
    assert!(memory.echo.is_some());
}

// Idempotency: the same (source_event_id, namespace, source_app, content)
// applies once; the second apply reports EXISTING; different content under
// the same key is a conflict.
#[test]
fn test_source_event_idempotency() {
    let kernel = kernel();

    let request = |content: &str| {
        let mut request = ProposeWriteRequest::new(content, "u1")
            .with_source_event("evt-42");
        request.mode = WriteMode::Direct;
        request.trusted_direct = true;
        request
    };

    let first = kernel.propose_write(&request("meeting moved to friday")).unwrap();
    let ProposeWriteResponse::Direct { result } = first else {
        panic!("expected direct response");
    };
    assert_eq!(result.results[0].event, WriteEvent::Add);
    assert!(!result.idempotent);

    let second = kernel.propose_write(&request("meeting moved to friday")).unwrap();
    let ProposeWriteResponse::Direct { result } = second else {
        panic!("expected direct response");
    };
    assert_eq!(result.results[0].event, WriteEvent::Existing);
    assert!(result.idempotent);
    assert!(result.created_ids.is_empty());

    let err = kernel
        .propose_write(&request("meeting moved to monday"))
        .unwrap_err();
    assert_eq!(err.code(), "conflict");
}

// insert → search(exact content) finds the memory at rank 1 when nothing is
// masked.
#[test]
fn test_exact_content_ranks_first() {
    let kernel = kernel();
    let target = propose_and_approve(&kernel, "the wifi antenna points north", "a1");
    propose_and_approve(&kernel, "cold brew is in the second fridge", "a1");
    propose_and_approve(&kernel, "the team offsite is in march", "a1");

    let response = kernel
        .search(&SearchRequest::new("the wifi antenna points north", "u1").with_limit(3))
        .unwrap();
    let SearchEntry::Hit(first) = &response.results[0] else {
        panic!("unexpected masking");
    };
    assert_eq!(first.id, target);
}

// Empty query: intent MIXED, empty results, no error.
#[test]
fn test_empty_query_returns_empty() {
    let kernel = kernel();
    propose_and_approve(&kernel, "some note", "a1");
    let response = kernel.search(&SearchRequest::new("  ", "u1")).unwrap();
    assert_eq!(response.count, 0);
    assert_eq!(response.intent, engram_core::QueryIntent::Mixed);
}

// Expired tokens are rejected with a permission error.
#[test]
fn test_expired_token_rejected() {
    let kernel = kernel();
    let now = chrono::Utc::now();
    let session = SessionRecord {
        session_id: SessionId::new_v4(),
        token_hash: hash_token("stale-token"),
        user_id: "u1".to_string(),
        agent_id: None,
        allowed_scopes: vec![ConfidentialityScope::Work],
        capabilities: vec![Capability::Search],
        namespaces: vec!["default".to_string()],
        expires_at: now - chrono::Duration::minutes(1),
        created_at: now - chrono::Duration::hours(1),
        revoked_at: None,
    };
    kernel.store().create_session(&session).unwrap();

    let err = kernel
        .search(&SearchRequest::new("anything", "u1").with_token("stale-token"))
        .unwrap_err();
    assert_eq!(err.code(), "permission");
}

// Untrusted callers cannot use direct mode.
#[test]
fn test_direct_mode_requires_trust() {
    let kernel = kernel();
    let mut request = ProposeWriteRequest::new("sneaky direct write", "u1").with_agent("a1");
    request.mode = WriteMode::Direct;
    let err = kernel.propose_write(&request).unwrap_err();
    assert_eq!(err.code(), "permission");
}

// Rejection records the reason and counts against agent trust.
#[test]
fn test_reject_commit_updates_trust() {
    let kernel = kernel();
    let (commit_id, _, _, _) = staged(propose(&kernel, "questionable claim", "a1"));
    let rejected = kernel
        .reject_commit(commit_id, Some("unverified"), None, None)
        .unwrap();
    assert_eq!(rejected.status, CommitStatus::Rejected);

    let commit = kernel.store().get_proposal_commit(commit_id).unwrap().unwrap();
    assert_eq!(commit.checks.rejection_reason.as_deref(), Some("unverified"));

    let trust = kernel.get_agent_trust("u1", "a1", None, None).unwrap();
    assert_eq!(trust.rejected_proposals, 1);
    assert_eq!(trust.total_proposals, 1);
}

// A long approval streak earns auto-merge; the merged commit goes through
// the same approve path.
#[test]
fn test_trusted_agent_auto_merges() {
    let kernel = kernel();
    for i in 0..12 {
        propose_and_approve(&kernel, &format!("fact number {} about the build", i), "a1");
    }

    let response = propose(&kernel, "one more fact about the deploy", "a1");
    let (commit_id, status, _, auto_merged) = staged(response);
    assert!(auto_merged);
    assert_eq!(status, CommitStatus::Approved);

    let commit = kernel.store().get_proposal_commit(commit_id).unwrap().unwrap();
    assert_eq!(commit.status, CommitStatus::Approved);
}

// The sleep cycle promotes important day memories, writes a digest, and
// reports per-user stats.
#[test]
fn test_sleep_cycle_builds_digest_and_promotes() {
    let kernel = kernel();
    let memory_id = propose_and_approve(&kernel, "remember the incident retro outcome", "a1");
    kernel
        .store()
        .update_memory(
            memory_id,
            &engram_storage::MemoryPatch {
                strength: Some(0.9),
                ..engram_storage::MemoryPatch::default()
            },
        )
        .unwrap();

    let today = chrono::Utc::now().date_naive();
    let report = kernel
        .run_sleep_cycle(&SleepCycleRequest {
            user_id: Some("u1".to_string()),
            date: Some(today),
            apply_decay: true,
            cleanup_stale_refs: true,
            deep_sleep: true,
            ..SleepCycleRequest::default()
        })
        .unwrap();

    let stats = report.users.get("u1").unwrap();
    assert!(stats.promoted >= 1);
    assert_eq!(stats.digests_upserted, 1);

    let digest = kernel.get_daily_digest("u1", today, None, None).unwrap();
    assert!(!digest.payload.scene_highlights.is_empty());

    let memory = kernel.store().get_memory(memory_id).unwrap().unwrap();
    assert_eq!(memory.tier, MemoryTier::Lml);
}

// resolve_conflict(ACCEPT_PROPOSED) re-points the stored invariant.
#[test]
fn test_accept_proposed_updates_invariant() {
    let kernel = kernel();
    propose_and_approve(&kernel, "my name is Alice", "a1");
    staged(propose(&kernel, "my name is Bob", "a1"));

    let stash = kernel
        .store()
        .list_conflict_stash(Some("u1"), Some(StashResolution::Unresolved), 1)
        .unwrap()
        .remove(0);
    kernel
        .resolve_conflict(stash.stash_id, StashResolution::AcceptProposed, None, None)
        .unwrap();

    let invariant = kernel
        .store()
        .get_invariant("u1", "identity.name")
        .unwrap()
        .unwrap();
    assert_eq!(invariant.value, "Bob");
    assert_eq!(invariant.confidence, 0.8);
}
