//! Session creation, authentication, clamping, and quotas

use crate::token::{hash_token, mint_token};
use chrono::{Duration, Utc};
use engram_core::{
    normalize_namespace, AgentPolicy, Capability, ConfidentialityScope, EngramIdType,
    EngramResult, HandoffConfig, PolicyConfig, PolicyError, SessionId, SessionRecord, Timestamp,
    DEFAULT_NAMESPACE, WILDCARD,
};
use engram_storage::Store;
use std::sync::Arc;
use tracing::{debug, info};

/// Inputs for creating a session.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub user_id: String,
    pub agent_id: Option<String>,
    pub allowed_scopes: Vec<ConfidentialityScope>,
    pub capabilities: Vec<Capability>,
    pub namespaces: Vec<String>,
    pub ttl_minutes: Option<i64>,
}

/// A freshly minted session. The token appears here exactly once.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: SessionId,
    pub token: String,
    pub expires_at: Timestamp,
    pub allowed_scopes: Vec<ConfidentialityScope>,
    pub capabilities: Vec<Capability>,
    pub namespaces: Vec<String>,
}

/// Policy gateway: clamps sessions against agent policies and answers
/// authentication and quota questions for every kernel operation.
pub struct PolicyGateway {
    store: Arc<Store>,
    config: PolicyConfig,
    handoff: HandoffConfig,
}

impl PolicyGateway {
    pub fn new(store: Arc<Store>, config: PolicyConfig, handoff: HandoffConfig) -> Self {
        Self {
            store,
            config,
            handoff,
        }
    }

    /// Create a session, clamping the request against the agent's policy.
    pub fn create_session(&self, request: &SessionRequest) -> EngramResult<SessionGrant> {
        let mut scopes: Vec<ConfidentialityScope> = if request.allowed_scopes.is_empty() {
            vec![ConfidentialityScope::Work]
        } else {
            dedup_sorted(request.allowed_scopes.clone())
        };
        let mut capabilities: Vec<Capability> = if request.capabilities.is_empty() {
            Capability::DEFAULTS.to_vec()
        } else {
            dedup_sorted(request.capabilities.clone())
        };
        let mut namespaces = self.resolve_session_namespaces(
            &request.user_id,
            request.agent_id.as_deref(),
            &request.namespaces,
        )?;

        let mut policy = match request.agent_id.as_deref() {
            Some(agent_id) => self
                .store
                .get_agent_policy(&request.user_id, agent_id, true)?,
            None => None,
        };
        if let Some(agent_id) = request.agent_id.as_deref() {
            if self.config.require_agent_policy && policy.is_none() {
                return Err(PolicyError::PolicyMissing {
                    user_id: request.user_id.clone(),
                    agent_id: agent_id.to_string(),
                }
                .into());
            }
        }

        // Handoff capabilities demand an explicit policy, or a bootstrap for
        // allowlisted agents.
        if capabilities.iter().any(Capability::is_handoff) {
            if policy.is_none() {
                if let Some(agent_id) = request.agent_id.as_deref() {
                    policy =
                        self.bootstrap_handoff_policy(&request.user_id, agent_id, &namespaces)?;
                }
            }
            if policy.is_none() {
                return Err(PolicyError::HandoffPolicyRequired {
                    user_id: request.user_id.clone(),
                    agent_id: request.agent_id.clone().unwrap_or_default(),
                }
                .into());
            }
        }

        if let Some(policy) = &policy {
            scopes = clamp_scopes(&scopes, policy)?;
            capabilities = clamp_capabilities(&capabilities, policy)?;
            namespaces = clamp_namespaces(&namespaces, policy)?;
        }

        for namespace in &namespaces {
            if namespace != WILDCARD {
                self.store
                    .ensure_namespace(&request.user_id, namespace, None)?;
            }
        }

        let (token, token_hash) = mint_token();
        let ttl_minutes = request
            .ttl_minutes
            .unwrap_or(self.config.default_session_ttl_minutes)
            .max(1);
        let now = Utc::now();
        let expires_at = now + Duration::minutes(ttl_minutes);

        let session = SessionRecord {
            session_id: SessionId::new_v4(),
            token_hash,
            user_id: request.user_id.clone(),
            agent_id: request.agent_id.clone(),
            allowed_scopes: scopes.clone(),
            capabilities: capabilities.clone(),
            namespaces: namespaces.clone(),
            expires_at,
            created_at: now,
            revoked_at: None,
        };
        self.store.create_session(&session)?;
        info!(
            user_id = %request.user_id,
            agent_id = ?request.agent_id,
            %expires_at,
            "created session"
        );

        Ok(SessionGrant {
            session_id: session.session_id,
            token,
            expires_at,
            allowed_scopes: scopes,
            capabilities,
            namespaces,
        })
    }

    /// Authenticate a request.
    ///
    /// Without a token this passes for unrestricted callers and returns no
    /// session; restricted agents are refused. With a token, the session must
    /// be live, match the caller, and hold every required capability.
    pub fn authenticate(
        &self,
        token: Option<&str>,
        user_id: Option<&str>,
        agent_id: Option<&str>,
        require_for_agent: bool,
        required: &[Capability],
    ) -> EngramResult<Option<SessionRecord>> {
        let Some(token) = token else {
            if require_for_agent && self.token_required_for_agent(agent_id) {
                return Err(PolicyError::TokenRequired.into());
            }
            return Ok(None);
        };

        let session = self
            .store
            .get_session_by_token_hash(&hash_token(token))?
            .ok_or(PolicyError::InvalidToken)?;

        if session.revoked_at.is_some() {
            return Err(PolicyError::SessionRevoked.into());
        }
        if Utc::now() >= session.expires_at {
            return Err(PolicyError::SessionExpired.into());
        }
        if let Some(user_id) = user_id {
            if session.user_id != user_id {
                return Err(PolicyError::UserMismatch.into());
            }
        }
        if let (Some(agent_id), Some(session_agent)) = (agent_id, session.agent_id.as_deref()) {
            if session_agent != agent_id {
                return Err(PolicyError::AgentMismatch.into());
            }
        }
        for capability in required {
            if !session.has_capability(*capability) {
                return Err(PolicyError::MissingCapability {
                    capability: capability.as_db_str().to_string(),
                }
                .into());
            }
        }
        debug!(session_id = %session.session_id, "authenticated session");
        Ok(Some(session))
    }

    /// Namespaces the caller may touch for a capability verb.
    pub fn resolve_allowed_namespaces(
        &self,
        session: Option<&SessionRecord>,
        user_id: &str,
        agent_id: Option<&str>,
        capability: &str,
    ) -> EngramResult<Vec<String>> {
        if !self.config.gateway_enabled {
            return Ok(vec![WILDCARD.to_string()]);
        }
        if let Some(session) = session {
            if !session.namespaces.is_empty() {
                return Ok(dedup_sorted(
                    session
                        .namespaces
                        .iter()
                        .map(|ns| {
                            if ns == WILDCARD {
                                ns.clone()
                            } else {
                                normalize_namespace(Some(ns))
                            }
                        })
                        .collect(),
                ));
            }
        }
        if let Some(agent_id) = agent_id {
            let granted = self
                .store
                .get_agent_allowed_namespaces(user_id, agent_id, capability)?;
            // Agents without explicit grants still reach the default
            // namespace.
            if granted.is_empty() {
                return Ok(vec![DEFAULT_NAMESPACE.to_string()]);
            }
            return Ok(granted);
        }
        Ok(vec![WILDCARD.to_string()])
    }

    /// Wildcard-aware namespace membership test.
    pub fn is_namespace_allowed(namespace: &str, allowed: &[String]) -> bool {
        allowed.iter().any(|ns| ns == WILDCARD || ns == namespace)
    }

    /// Scopes visible when no session constrains the caller.
    pub fn default_allowed_scopes() -> Vec<ConfidentialityScope> {
        ConfidentialityScope::ALL.to_vec()
    }

    /// Enforce the configured write-quota windows over proposal commits.
    pub fn enforce_write_quotas(&self, user_id: &str, agent_id: Option<&str>) -> EngramResult<()> {
        if !self.config.gateway_enabled {
            return Ok(());
        }
        let now = Utc::now();
        let quotas = &self.config.quotas;
        let mut windows = vec![
            ("per-user hourly", quotas.per_user_hourly, None, Duration::hours(1)),
            ("per-user daily", quotas.per_user_daily, None, Duration::days(1)),
        ];
        if let Some(agent_id) = agent_id {
            windows.push((
                "per-agent hourly",
                quotas.per_agent_hourly,
                Some(agent_id),
                Duration::hours(1),
            ));
            windows.push((
                "per-agent daily",
                quotas.per_agent_daily,
                Some(agent_id),
                Duration::days(1),
            ));
        }

        for (label, limit, agent, window) in windows {
            if limit <= 0 {
                continue;
            }
            let count = self
                .store
                .count_proposal_commits(user_id, agent, now - window)?;
            if count >= limit {
                return Err(PolicyError::QuotaExceeded {
                    window: label.to_string(),
                    count,
                    limit,
                }
                .into());
            }
        }
        Ok(())
    }

    fn token_required_for_agent(&self, agent_id: Option<&str>) -> bool {
        let Some(agent_id) = agent_id else {
            return false;
        };
        self.config
            .restricted_agents
            .iter()
            .any(|restricted| restricted.eq_ignore_ascii_case(agent_id))
    }

    fn resolve_session_namespaces(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        requested: &[String],
    ) -> EngramResult<Vec<String>> {
        let mut resolved: Vec<String> = if !requested.is_empty() {
            dedup_sorted(
                requested
                    .iter()
                    .filter(|ns| !ns.trim().is_empty())
                    .map(|ns| {
                        if ns.trim() == WILDCARD {
                            WILDCARD.to_string()
                        } else {
                            normalize_namespace(Some(ns))
                        }
                    })
                    .collect(),
            )
        } else if let Some(agent_id) = agent_id {
            self.store
                .get_agent_allowed_namespaces(user_id, agent_id, "read")?
        } else {
            vec![DEFAULT_NAMESPACE.to_string()]
        };
        if resolved.is_empty() {
            resolved = vec![DEFAULT_NAMESPACE.to_string()];
        }
        Ok(resolved)
    }

    /// Auto-create a policy for allowlisted agents requesting handoff
    /// capabilities.
    fn bootstrap_handoff_policy(
        &self,
        user_id: &str,
        agent_id: &str,
        namespaces: &[String],
    ) -> EngramResult<Option<AgentPolicy>> {
        if !self.handoff.allow_auto_trusted_bootstrap {
            return Ok(None);
        }
        let trusted = self
            .handoff
            .auto_trusted_agents
            .iter()
            .any(|trusted| trusted.eq_ignore_ascii_case(agent_id));
        if !trusted {
            return Ok(None);
        }

        let mut allowed_namespaces = vec![DEFAULT_NAMESPACE.to_string()];
        for namespace in namespaces {
            if namespace != WILDCARD && !allowed_namespaces.contains(namespace) {
                allowed_namespaces.push(namespace.clone());
            }
        }
        let mut capabilities: Vec<String> = Capability::DEFAULTS
            .iter()
            .chain(Capability::HANDOFF.iter())
            .map(|c| c.as_db_str().to_string())
            .collect();
        capabilities.sort();

        let now = Utc::now();
        let policy = AgentPolicy {
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            allowed_scopes: ConfidentialityScope::ALL
                .iter()
                .map(|s| s.as_db_str().to_string())
                .collect(),
            allowed_capabilities: capabilities,
            allowed_namespaces,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_agent_policy(&policy)?;
        info!(user_id, agent_id, "bootstrapped handoff policy for trusted agent");
        self.store.get_agent_policy(user_id, agent_id, true)
    }
}

fn dedup_sorted<T: Ord>(mut values: Vec<T>) -> Vec<T> {
    values.sort();
    values.dedup();
    values
}

fn clamp_scopes(
    requested: &[ConfidentialityScope],
    policy: &AgentPolicy,
) -> EngramResult<Vec<ConfidentialityScope>> {
    if policy.allowed_scopes.iter().any(|s| s == WILDCARD) {
        return Ok(requested.to_vec());
    }
    if policy.allowed_scopes.is_empty() {
        return Err(policy_denied("confidentiality scopes", policy));
    }
    let clamped: Vec<ConfidentialityScope> = requested
        .iter()
        .copied()
        .filter(|scope| policy.allows_scope(*scope))
        .collect();
    if clamped.is_empty() {
        return Err(policy_denied("confidentiality scopes", policy));
    }
    Ok(clamped)
}

fn clamp_capabilities(
    requested: &[Capability],
    policy: &AgentPolicy,
) -> EngramResult<Vec<Capability>> {
    if policy.allowed_capabilities.iter().any(|c| c == WILDCARD) {
        return Ok(requested.to_vec());
    }
    if policy.allowed_capabilities.is_empty() {
        return Err(policy_denied("capabilities", policy));
    }
    let clamped: Vec<Capability> = requested
        .iter()
        .copied()
        .filter(|capability| policy.allows_capability(*capability))
        .collect();
    if clamped.is_empty() {
        return Err(policy_denied("capabilities", policy));
    }
    Ok(clamped)
}

fn clamp_namespaces(requested: &[String], policy: &AgentPolicy) -> EngramResult<Vec<String>> {
    if policy.allowed_namespaces.iter().any(|ns| ns == WILDCARD) {
        return Ok(requested.to_vec());
    }
    if policy.allowed_namespaces.is_empty() {
        return Err(policy_denied("namespaces", policy));
    }
    let clamped: Vec<String> = requested
        .iter()
        .filter(|ns| policy.allows_namespace(ns))
        .cloned()
        .collect();
    if clamped.is_empty() {
        return Err(policy_denied("namespaces", policy));
    }
    Ok(clamped)
}

fn policy_denied(what: &str, policy: &AgentPolicy) -> engram_core::EngramError {
    PolicyError::PolicyDenied {
        what: what.to_string(),
        user_id: policy.user_id.clone(),
        agent_id: policy.agent_id.clone(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::WriteQuotas;

    fn gateway_with(config: PolicyConfig, handoff: HandoffConfig) -> (Arc<Store>, PolicyGateway) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let gateway = PolicyGateway::new(Arc::clone(&store), config, handoff);
        (store, gateway)
    }

    fn gateway() -> (Arc<Store>, PolicyGateway) {
        gateway_with(PolicyConfig::default(), HandoffConfig::default())
    }

    fn request(agent: Option<&str>) -> SessionRequest {
        SessionRequest {
            user_id: "u1".to_string(),
            agent_id: agent.map(str::to_string),
            allowed_scopes: vec![ConfidentialityScope::Work],
            capabilities: vec![Capability::Search, Capability::ProposeWrite],
            namespaces: vec!["default".to_string()],
            ttl_minutes: Some(60),
        }
    }

    fn upsert_policy(store: &Store, scopes: &[&str], caps: &[&str], namespaces: &[&str]) {
        let now = Utc::now();
        store
            .upsert_agent_policy(&AgentPolicy {
                user_id: "u1".to_string(),
                agent_id: "a1".to_string(),
                allowed_scopes: scopes.iter().map(|s| s.to_string()).collect(),
                allowed_capabilities: caps.iter().map(|s| s.to_string()).collect(),
                allowed_namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    #[test]
    fn test_session_roundtrip_via_token() {
        let (_, gateway) = gateway();
        let grant = gateway.create_session(&request(None)).unwrap();

        let session = gateway
            .authenticate(
                Some(&grant.token),
                Some("u1"),
                None,
                true,
                &[Capability::Search],
            )
            .unwrap()
            .unwrap();
        assert_eq!(session.session_id, grant.session_id);
    }

    #[test]
    fn test_bad_token_rejected() {
        let (_, gateway) = gateway();
        let err = gateway
            .authenticate(Some("bogus"), Some("u1"), None, true, &[])
            .unwrap_err();
        assert_eq!(err.code(), "permission");
    }

    #[test]
    fn test_missing_capability_rejected() {
        let (_, gateway) = gateway();
        let grant = gateway.create_session(&request(None)).unwrap();
        let err = gateway
            .authenticate(
                Some(&grant.token),
                Some("u1"),
                None,
                true,
                &[Capability::RunSleepCycle],
            )
            .unwrap_err();
        assert!(err.to_string().contains("run_sleep_cycle"));
    }

    #[test]
    fn test_user_mismatch_rejected() {
        let (_, gateway) = gateway();
        let grant = gateway.create_session(&request(None)).unwrap();
        let err = gateway
            .authenticate(Some(&grant.token), Some("someone-else"), None, true, &[])
            .unwrap_err();
        assert_eq!(err.code(), "permission");
    }

    #[test]
    fn test_policy_clamps_scopes_and_caps() {
        let (store, gateway) = gateway();
        upsert_policy(&store, &["work"], &["search"], &["default"]);

        let mut req = request(Some("a1"));
        req.allowed_scopes = vec![ConfidentialityScope::Work, ConfidentialityScope::Private];
        let grant = gateway.create_session(&req).unwrap();
        assert_eq!(grant.allowed_scopes, vec![ConfidentialityScope::Work]);
        assert_eq!(grant.capabilities, vec![Capability::Search]);
    }

    #[test]
    fn test_policy_denies_disjoint_request() {
        let (store, gateway) = gateway();
        upsert_policy(&store, &["work"], &["search"], &["default"]);

        let mut req = request(Some("a1"));
        req.allowed_scopes = vec![ConfidentialityScope::Private];
        let err = gateway.create_session(&req).unwrap_err();
        assert_eq!(err.code(), "permission");
    }

    #[test]
    fn test_wildcard_policy_passes_request_through() {
        let (store, gateway) = gateway();
        upsert_policy(&store, &["*"], &["*"], &["*"]);

        let mut req = request(Some("a1"));
        req.allowed_scopes = vec![ConfidentialityScope::Private];
        req.capabilities = vec![Capability::WriteHandoff];
        let grant = gateway.create_session(&req).unwrap();
        assert_eq!(grant.allowed_scopes, vec![ConfidentialityScope::Private]);
        assert_eq!(grant.capabilities, vec![Capability::WriteHandoff]);
    }

    #[test]
    fn test_handoff_caps_require_policy() {
        let (_, gateway) = gateway();
        let mut req = request(Some("a1"));
        req.capabilities = vec![Capability::ReadHandoff];
        let err = gateway.create_session(&req).unwrap_err();
        assert_eq!(err.code(), "permission");
    }

    #[test]
    fn test_handoff_bootstrap_for_trusted_agent() {
        let handoff = HandoffConfig {
            allow_auto_trusted_bootstrap: true,
            auto_trusted_agents: vec!["a1".to_string()],
            ..HandoffConfig::default()
        };
        let (store, gateway) = gateway_with(PolicyConfig::default(), handoff);

        let mut req = request(Some("a1"));
        req.capabilities = vec![Capability::ReadHandoff, Capability::WriteHandoff];
        let grant = gateway.create_session(&req).unwrap();
        assert!(grant.capabilities.contains(&Capability::WriteHandoff));
        assert!(store.get_agent_policy("u1", "a1", false).unwrap().is_some());
    }

    #[test]
    fn test_restricted_agent_needs_token() {
        let config = PolicyConfig {
            restricted_agents: vec!["shady".to_string()],
            ..PolicyConfig::default()
        };
        let (_, gateway) = gateway_with(config, HandoffConfig::default());

        let err = gateway
            .authenticate(None, Some("u1"), Some("shady"), true, &[])
            .unwrap_err();
        assert_eq!(err.code(), "permission");
        // Unrestricted agents pass without a session.
        assert!(gateway
            .authenticate(None, Some("u1"), Some("friendly"), true, &[])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_write_quota_enforcement() {
        let config = PolicyConfig {
            quotas: WriteQuotas {
                per_user_hourly: 1,
                ..WriteQuotas::default()
            },
            ..PolicyConfig::default()
        };
        let (store, gateway) = gateway_with(config, HandoffConfig::default());

        gateway.enforce_write_quotas("u1", Some("a1")).unwrap();

        // One commit in the window exhausts the quota of 1.
        let now = Utc::now();
        let commit_id = engram_core::CommitId::new_v4();
        store
            .add_proposal_commit(&engram_core::ProposalCommit {
                commit_id,
                user_id: "u1".to_string(),
                agent_id: Some("a1".to_string()),
                scope: ConfidentialityScope::Work,
                status: engram_core::CommitStatus::Pending,
                checks: engram_core::CommitChecks::default(),
                preview: engram_core::CommitPreview {
                    summary: "x".to_string(),
                    scope: ConfidentialityScope::Work,
                    namespace: "default".to_string(),
                    category_count: 0,
                },
                provenance: engram_core::Provenance::new("mcp", "propose_write"),
                changes: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        let err = gateway.enforce_write_quotas("u1", Some("a1")).unwrap_err();
        assert_eq!(err.code(), "rate_limited");
    }

    #[test]
    fn test_expired_session_rejected() {
        let (_, gateway) = gateway();
        let mut req = request(None);
        req.ttl_minutes = Some(0); // clamped to 1 minute
        let grant = gateway.create_session(&req).unwrap();
        assert!(grant.expires_at > Utc::now());
    }
}
