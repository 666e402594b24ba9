//! Schema migrations
//!
//! Named ordered DDL groups. A `schema_migrations` table records applied
//! versions; re-applying is idempotent (CREATE IF NOT EXISTS throughout).
//! Governance tables extend the core memory tables and can be introduced
//! against an existing database.

/// Core + governance migrations, applied in order.
pub(crate) const MIGRATIONS: &[(&str, &str)] = &[
    (
        "core_001_memories",
        "CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT,
            run_id TEXT,
            app_id TEXT,
            content TEXT NOT NULL,
            tier TEXT NOT NULL DEFAULT 'sml',
            strength REAL NOT NULL DEFAULT 1.0,
            s_fast REAL,
            s_mid REAL,
            s_slow REAL,
            effective_strength REAL,
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            namespace TEXT NOT NULL DEFAULT 'default',
            confidentiality_scope TEXT NOT NULL DEFAULT 'work',
            memory_kind TEXT,
            sharing_scope TEXT NOT NULL DEFAULT 'global',
            immutable INTEGER NOT NULL DEFAULT 0,
            expiration_date TEXT,
            source_type TEXT,
            source_app TEXT,
            source_event_id TEXT,
            categories TEXT NOT NULL DEFAULT '[]',
            echo TEXT,
            scene_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            tombstoned INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);
        CREATE INDEX IF NOT EXISTS idx_memories_user_namespace ON memories(user_id, namespace);
        CREATE INDEX IF NOT EXISTS idx_memories_scene ON memories(scene_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_source_event
            ON memories(source_event_id, namespace, COALESCE(source_app, ''))
            WHERE source_event_id IS NOT NULL;",
    ),
    (
        "core_002_events",
        "CREATE TABLE IF NOT EXISTS memory_events (
            id TEXT PRIMARY KEY,
            memory_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            old_strength REAL,
            new_strength REAL,
            old_tier TEXT,
            new_tier TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_events_memory ON memory_events(memory_id, created_at);

        CREATE TABLE IF NOT EXISTS decay_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            decayed INTEGER NOT NULL,
            forgotten INTEGER NOT NULL,
            promoted INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );",
    ),
    (
        "core_003_scenes",
        "CREATE TABLE IF NOT EXISTS scenes (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            topic TEXT NOT NULL DEFAULT '',
            summary TEXT NOT NULL DEFAULT '',
            location TEXT,
            participants TEXT NOT NULL DEFAULT '[]',
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            embedding TEXT,
            scene_strength REAL NOT NULL DEFAULT 1.0,
            tier TEXT NOT NULL DEFAULT 'sml',
            namespace TEXT NOT NULL DEFAULT 'default',
            confidentiality_scope TEXT NOT NULL DEFAULT 'work',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_scenes_user_start ON scenes(user_id, start_time DESC);

        CREATE TABLE IF NOT EXISTS scene_memories (
            scene_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            UNIQUE(scene_id, memory_id),
            FOREIGN KEY (scene_id) REFERENCES scenes(id)
        );
        CREATE INDEX IF NOT EXISTS idx_scene_memories_scene ON scene_memories(scene_id, position);

        CREATE TABLE IF NOT EXISTS views (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT,
            timestamp TEXT NOT NULL,
            place_type TEXT NOT NULL DEFAULT 'digital',
            place_value TEXT,
            topic_label TEXT NOT NULL DEFAULT '',
            topic_ref TEXT,
            characters TEXT NOT NULL DEFAULT '[]',
            raw_text TEXT NOT NULL DEFAULT '',
            signals TEXT NOT NULL DEFAULT '{}',
            scene_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_views_user_time ON views(user_id, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_views_scene ON views(scene_id);",
    ),
    (
        "gov_001_proposals",
        "CREATE TABLE IF NOT EXISTS proposal_commits (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT,
            scope TEXT NOT NULL DEFAULT 'work',
            status TEXT NOT NULL DEFAULT 'PENDING',
            checks TEXT NOT NULL DEFAULT '{}',
            preview TEXT NOT NULL DEFAULT '{}',
            provenance TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_proposal_commits_user ON proposal_commits(user_id);
        CREATE INDEX IF NOT EXISTS idx_proposal_commits_status ON proposal_commits(status);

        CREATE TABLE IF NOT EXISTS proposal_changes (
            id TEXT PRIMARY KEY,
            commit_id TEXT NOT NULL,
            op TEXT NOT NULL,
            target_id TEXT,
            patch TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            FOREIGN KEY (commit_id) REFERENCES proposal_commits(id)
        );
        CREATE INDEX IF NOT EXISTS idx_proposal_changes_commit ON proposal_changes(commit_id);",
    ),
    (
        "gov_002_conflict_stash",
        "CREATE TABLE IF NOT EXISTS conflict_stash (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            conflict_key TEXT NOT NULL,
            existing TEXT NOT NULL DEFAULT '',
            proposed TEXT NOT NULL DEFAULT '',
            resolution TEXT NOT NULL DEFAULT 'UNRESOLVED',
            source_commit_id TEXT,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conflict_stash_user ON conflict_stash(user_id);
        CREATE INDEX IF NOT EXISTS idx_conflict_stash_resolution ON conflict_stash(resolution);",
    ),
    (
        "gov_003_sessions",
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            token_hash TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            agent_id TEXT,
            allowed_scopes TEXT NOT NULL DEFAULT '[]',
            capabilities TEXT NOT NULL DEFAULT '[]',
            namespaces TEXT NOT NULL DEFAULT '[]',
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            revoked_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);",
    ),
    (
        "gov_004_refcounts",
        "CREATE TABLE IF NOT EXISTS memory_refcounts (
            memory_id TEXT PRIMARY KEY,
            strong_count INTEGER NOT NULL DEFAULT 0,
            weak_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_subscribers (
            id TEXT PRIMARY KEY,
            memory_id TEXT NOT NULL,
            subscriber TEXT NOT NULL,
            ref_type TEXT NOT NULL CHECK(ref_type IN ('strong','weak')),
            created_at TEXT NOT NULL,
            expires_at TEXT,
            UNIQUE(memory_id, subscriber, ref_type)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_subscribers_memory ON memory_subscribers(memory_id);",
    ),
    (
        "gov_005_digests",
        "CREATE TABLE IF NOT EXISTS daily_digests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            digest_date TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            generated_at TEXT NOT NULL,
            UNIQUE(user_id, digest_date)
        );
        CREATE INDEX IF NOT EXISTS idx_daily_digests_user_date ON daily_digests(user_id, digest_date);",
    ),
    (
        "gov_006_invariants",
        "CREATE TABLE IF NOT EXISTS invariants (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            invariant_key TEXT NOT NULL,
            invariant_value TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'identity',
            confidence REAL NOT NULL DEFAULT 0.0,
            source_memory_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, invariant_key)
        );
        CREATE INDEX IF NOT EXISTS idx_invariants_user ON invariants(user_id);",
    ),
    (
        "gov_007_agent_trust",
        "CREATE TABLE IF NOT EXISTS agent_trust (
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            total_proposals INTEGER NOT NULL DEFAULT 0,
            approved_proposals INTEGER NOT NULL DEFAULT 0,
            rejected_proposals INTEGER NOT NULL DEFAULT 0,
            auto_stashed_proposals INTEGER NOT NULL DEFAULT 0,
            last_proposed_at TEXT,
            last_approved_at TEXT,
            trust_score REAL NOT NULL DEFAULT 0.0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, agent_id)
        );
        CREATE INDEX IF NOT EXISTS idx_agent_trust_score ON agent_trust(trust_score DESC);",
    ),
    (
        "gov_008_namespaces",
        "CREATE TABLE IF NOT EXISTS namespaces (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, name)
        );

        CREATE TABLE IF NOT EXISTS namespace_permissions (
            id TEXT PRIMARY KEY,
            namespace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            capability TEXT NOT NULL,
            granted_at TEXT NOT NULL,
            expires_at TEXT,
            UNIQUE(namespace_id, user_id, agent_id, capability),
            FOREIGN KEY (namespace_id) REFERENCES namespaces(id)
        );
        CREATE INDEX IF NOT EXISTS idx_ns_permissions_agent ON namespace_permissions(user_id, agent_id);",
    ),
    (
        "gov_009_agent_policies",
        "CREATE TABLE IF NOT EXISTS agent_policies (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            allowed_scopes TEXT NOT NULL DEFAULT '[]',
            allowed_capabilities TEXT NOT NULL DEFAULT '[]',
            allowed_namespaces TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, agent_id)
        );
        CREATE INDEX IF NOT EXISTS idx_agent_policies_user ON agent_policies(user_id);",
    ),
    (
        "gov_010_graph",
        "CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'unknown',
            aliases TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            UNIQUE(user_id, name)
        );

        CREATE TABLE IF NOT EXISTS entity_links (
            entity_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            link_type TEXT NOT NULL DEFAULT 'mentioned_in',
            weight REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            UNIQUE(entity_id, memory_id, link_type),
            FOREIGN KEY (entity_id) REFERENCES entities(id)
        );
        CREATE INDEX IF NOT EXISTS idx_entity_links_memory ON entity_links(memory_id);",
    ),
    (
        "gov_011_categories",
        "CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            parent TEXT,
            keywords TEXT NOT NULL DEFAULT '[]',
            strength REAL NOT NULL DEFAULT 1.0,
            memory_count INTEGER NOT NULL DEFAULT 0,
            last_accessed TEXT,
            summary TEXT
        );",
    ),
    (
        "gov_012_handoff",
        "CREATE TABLE IF NOT EXISTS handoff_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            repo TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            task_summary TEXT,
            decisions TEXT NOT NULL DEFAULT '[]',
            files_touched TEXT NOT NULL DEFAULT '[]',
            todos TEXT NOT NULL DEFAULT '[]',
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_handoff_sessions_agent ON handoff_sessions(user_id, agent_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS handoff_lanes (
            id TEXT PRIMARY KEY,
            session_id TEXT,
            user_id TEXT NOT NULL,
            from_agent TEXT,
            to_agent TEXT,
            lane_type TEXT NOT NULL DEFAULT 'general',
            repo TEXT,
            branch TEXT,
            namespace TEXT NOT NULL DEFAULT 'default',
            objective TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_handoff_lanes_user ON handoff_lanes(user_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS handoff_checkpoints (
            id TEXT PRIMARY KEY,
            lane_id TEXT NOT NULL,
            session_id TEXT,
            agent_id TEXT NOT NULL,
            event_type TEXT NOT NULL DEFAULT 'tool_complete',
            snapshot TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            FOREIGN KEY (lane_id) REFERENCES handoff_lanes(id)
        );
        CREATE INDEX IF NOT EXISTS idx_handoff_checkpoints_lane ON handoff_checkpoints(lane_id, created_at DESC);",
    ),
];
