//! The moderation rule engine.

use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;
use warden_api::{ApiRequest, JoinDecision, ModerationApi};
use warden_auth::{AuthorizationGate, GroupAction};
use warden_exec::{ExecError, Executor, Strategy};
use warden_types::{
    EnforcementRecord, EventBus, EventKind, GroupId, ModerationAction, NormalizedEvent,
    PersistError, Persistence, RuleDefinition, SourceOrigin, Subject, Subscription, Trigger,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::notice::{EngineStatus, ModerationNotice, SweepSummary};
use crate::predicate::{evaluate, CompiledRule, RuleMatch};

const NOTICE_CAPACITY: usize = 256;

type ClaimKey = (GroupId, String);

/// A (group, user) pair whose request was recently decided.
struct Settled {
    at: Instant,
    /// Whether the remote side effect, if any, went through.
    executed: bool,
    /// Ids of the join-request notifications already handled.
    notifications: HashSet<String>,
}

/// Which earlier outcomes make a trigger a duplicate.
#[derive(Debug, Clone, Copy)]
enum Dedupe<'a> {
    /// A join-request notification. With an id, only a settled pair that
    /// already saw a different id lets it through as a new request.
    Notification(Option<&'a str>),
    /// Sweeps and operator requests retry pairs whose enforcement failed.
    Retry,
    /// Presence triggers are only guarded while in flight.
    InFlightOnly,
}

impl Dedupe<'_> {
    fn is_duplicate(self, settled: Option<&Settled>) -> bool {
        let Some(prev) = settled else {
            return false;
        };
        match self {
            Self::Notification(Some(id)) => {
                prev.notifications.is_empty() || prev.notifications.contains(id)
            }
            Self::Notification(None) => true,
            Self::Retry => prev.executed,
            Self::InFlightOnly => false,
        }
    }
}

#[derive(Default)]
struct EngineState {
    /// Definition order.
    rules: Vec<CompiledRule>,
    /// Oldest first.
    history: VecDeque<EnforcementRecord>,
    in_flight: HashSet<ClaimKey>,
    settled: HashMap<ClaimKey, Settled>,
    cooldown_until: Option<Instant>,
}

struct Inner {
    config: EngineConfig,
    gate: Arc<AuthorizationGate>,
    api: Arc<dyn ModerationApi>,
    executor: Executor,
    persistence: Arc<dyn Persistence>,
    state: Mutex<EngineState>,
    notices: broadcast::Sender<ModerationNotice>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("rule engine lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn notify(&self, notice: ModerationNotice) {
        if self.notices.send(notice).is_err() {
            tracing::trace!("no moderation notice subscribers");
        }
    }
}

/// Marks one (group, user) pair as being processed. Dropping it releases
/// the pair; a settled claim is remembered for deduplication.
struct Claim {
    inner: Arc<Inner>,
    key: ClaimKey,
    notification: Option<String>,
    settle: Option<bool>,
}

impl Claim {
    fn settle(&mut self, executed: bool) {
        self.settle = Some(executed);
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.in_flight.remove(&self.key);
        if let Some(executed) = self.settle {
            let mut notifications = state
                .settled
                .remove(&self.key)
                .map(|prev| prev.notifications)
                .unwrap_or_default();
            notifications.extend(self.notification.take());
            state.settled.insert(
                self.key.clone(),
                Settled {
                    at: Instant::now(),
                    executed,
                    notifications,
                },
            );
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RemoteCall {
    Respond(JoinDecision),
    Ban,
    Kick,
}

impl RemoteCall {
    fn for_action(action: ModerationAction, trigger: Trigger) -> Option<Self> {
        match (action, trigger) {
            (ModerationAction::Flag, _) => None,
            (ModerationAction::Allow, Trigger::InstanceJoin) => None,
            (ModerationAction::Allow, _) => Some(Self::Respond(JoinDecision::Accept)),
            (ModerationAction::Reject, _) => Some(Self::Respond(JoinDecision::Reject)),
            (ModerationAction::Ban, _) => Some(Self::Ban),
            (ModerationAction::Kick, Trigger::InstanceJoin) => Some(Self::Kick),
            (ModerationAction::Kick, _) => Some(Self::Respond(JoinDecision::Reject)),
        }
    }

    fn gate_action(self) -> GroupAction {
        match self {
            Self::Respond(_) => GroupAction::RespondJoinRequest,
            Self::Ban => GroupAction::Ban,
            Self::Kick => GroupAction::Kick,
        }
    }

    fn correlation_key(self) -> &'static str {
        match self {
            Self::Respond(JoinDecision::Accept) => "accept-join-request",
            Self::Respond(JoinDecision::Reject) => "reject-join-request",
            Self::Ban => "ban-member",
            Self::Kick => "kick-member",
        }
    }
}

/// A user appearing in a group instance cannot be rejected, only flagged.
/// A requester is not a member yet, so kicking them rejects the request.
fn effective_action(action: ModerationAction, trigger: Trigger) -> ModerationAction {
    match (action, trigger) {
        (ModerationAction::Reject, Trigger::InstanceJoin) => ModerationAction::Flag,
        (ModerationAction::Kick, Trigger::InstanceJoin) => ModerationAction::Kick,
        (ModerationAction::Kick, _) => ModerationAction::Reject,
        _ => action,
    }
}

fn dedupe_for(trigger: Trigger, notification: Option<&str>) -> Dedupe<'_> {
    match trigger {
        Trigger::JoinRequest => Dedupe::Notification(notification),
        Trigger::PendingSweep | Trigger::Manual => Dedupe::Retry,
        Trigger::InstanceJoin => Dedupe::InFlightOnly,
    }
}

/// Evaluates subjects against operator rules and enforces the outcome.
///
/// Every group-scoped step asks the [`AuthorizationGate`] first. Remote
/// calls go through the [`Executor`] with typed, generic and raw fallbacks.
/// Cheap to clone.
#[derive(Clone)]
pub struct ModerationEngine {
    inner: Arc<Inner>,
}

impl ModerationEngine {
    pub fn new(
        config: EngineConfig,
        gate: Arc<AuthorizationGate>,
        api: Arc<dyn ModerationApi>,
        executor: Executor,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                gate,
                api,
                executor,
                persistence,
                state: Mutex::new(EngineState::default()),
                notices,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn gate(&self) -> &Arc<AuthorizationGate> {
        &self.inner.gate
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModerationNotice> {
        self.inner.notices.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.inner.lock();
        EngineStatus {
            rules: state.rules.len(),
            history: state.history.len(),
            in_flight: state.in_flight.len(),
            settled: state.settled.len(),
            cooldown_remaining_secs: time_left(state.cooldown_until).map(|d| d.as_secs()),
        }
    }

    // ---- rules ----

    /// Replaces the in-memory rule set with what persistence holds.
    /// Rules that no longer compile are skipped.
    pub async fn load_rules(&self) -> Result<usize, EngineError> {
        let stored = self.persist(|p| p.load_rules()).await?;
        let mut compiled = Vec::with_capacity(stored.len());
        for definition in stored {
            let id = definition.id.clone();
            match CompiledRule::compile(definition) {
                Ok(rule) => compiled.push(rule),
                Err(e) => tracing::warn!(rule_id = %id, error = %e, "skipping invalid stored rule"),
            }
        }
        let count = compiled.len();
        self.inner.lock().rules = compiled;
        tracing::info!(rules = count, "moderation rules loaded");
        Ok(count)
    }

    /// Rules in definition order, restricted to moderated groups.
    ///
    /// # Errors
    ///
    /// Asking for one group that the gate denies is `EngineError::Denied`.
    pub fn rules(&self, group_id: Option<&str>) -> Result<Vec<RuleDefinition>, EngineError> {
        if let Some(group_id) = group_id {
            self.authorize(group_id, GroupAction::ManageRules)?;
        }
        let rules: Vec<RuleDefinition> = self
            .inner
            .lock()
            .rules
            .iter()
            .filter(|r| group_id.map_or(true, |g| r.definition.group_id == g))
            .map(|r| r.definition.clone())
            .collect();
        Ok(self
            .inner
            .gate
            .filter_authorized_data(rules, |r| Some(r.group_id.as_str())))
    }

    /// Validates, persists and installs a rule. An existing rule with the
    /// same id is replaced in place.
    pub async fn save_rule(&self, definition: RuleDefinition) -> Result<RuleDefinition, EngineError> {
        let compiled = CompiledRule::compile(definition)?;
        self.inner
            .gate
            .validate_access(&compiled.definition.group_id, GroupAction::ManageRules)?;

        let to_store = compiled.definition.clone();
        self.persist(move |p| p.save_rule(&to_store)).await?;

        let saved = compiled.definition.clone();
        let mut state = self.inner.lock();
        let existing = state.rules.iter().position(|r| r.definition.id == saved.id);
        match existing {
            Some(index) => state.rules[index] = compiled,
            None => state.rules.push(compiled),
        }
        tracing::info!(rule_id = %saved.id, group_id = %saved.group_id, action = %saved.action, "rule saved");
        Ok(saved)
    }

    pub async fn delete_rule(&self, rule_id: &str) -> Result<RuleDefinition, EngineError> {
        let group_id = self
            .inner
            .lock()
            .rules
            .iter()
            .find(|r| r.definition.id == rule_id)
            .map(|r| r.definition.group_id.clone())
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;
        self.inner
            .gate
            .validate_access(&group_id, GroupAction::ManageRules)?;

        let id = rule_id.to_string();
        self.persist(move |p| p.delete_rule(&id)).await?;

        let mut state = self.inner.lock();
        let index = state
            .rules
            .iter()
            .position(|r| r.definition.id == rule_id)
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;
        let removed = state.rules.remove(index).definition;
        tracing::info!(rule_id, "rule deleted");
        Ok(removed)
    }

    /// Dry run: which rule would decide `subject` in `group_id`.
    pub fn check_user(&self, subject: &Subject, group_id: &str) -> Result<Option<RuleMatch>, EngineError> {
        let group = self.authorize(group_id, GroupAction::EvaluateRules)?;
        Ok(self.evaluate(&group, subject))
    }

    // ---- history ----

    /// Enforcement records of moderated groups, newest first.
    ///
    /// # Errors
    ///
    /// Asking for one group that the gate denies is `EngineError::Denied`.
    pub fn history(&self, group_id: Option<&str>) -> Result<Vec<EnforcementRecord>, EngineError> {
        if let Some(group_id) = group_id {
            self.authorize(group_id, GroupAction::ViewAuditLog)?;
        }
        let records: Vec<EnforcementRecord> = self
            .inner
            .lock()
            .history
            .iter()
            .rev()
            .filter(|r| group_id.map_or(true, |g| r.group_id == g))
            .cloned()
            .collect();
        Ok(self
            .inner
            .gate
            .filter_authorized_data(records, |r| Some(r.group_id.as_str())))
    }

    /// Empties the in-memory history and returns how many records it held.
    /// Persisted records are untouched.
    pub fn clear_history(&self) -> usize {
        let mut state = self.inner.lock();
        let cleared = state.history.len();
        state.history.clear();
        cleared
    }

    // ---- processing ----

    /// A join-request notification without an id.
    pub async fn process_join_request(
        &self,
        group_id: &str,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Option<EnforcementRecord>, EngineError> {
        self.process_join_notification(group_id, user_id, display_name, None)
            .await
    }

    /// A join-request notification. A redelivery of an already handled
    /// notification is ignored, as is any notification for a pair decided
    /// within the settled window unless it carries a new notification id.
    pub async fn process_join_notification(
        &self,
        group_id: &str,
        user_id: &str,
        display_name: Option<&str>,
        notification_id: Option<&str>,
    ) -> Result<Option<EnforcementRecord>, EngineError> {
        self.process(group_id, user_id, display_name, Trigger::JoinRequest, notification_id)
            .await
    }

    /// An operator asked for one pending request to be processed. Pairs
    /// whose last enforcement failed are tried again.
    pub async fn process_pending_request(
        &self,
        group_id: &str,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Option<EnforcementRecord>, EngineError> {
        self.process(group_id, user_id, display_name, Trigger::Manual, None)
            .await
    }

    /// A user appeared in an instance owned by `group_id`.
    pub async fn process_instance_join(
        &self,
        group_id: &str,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Option<EnforcementRecord>, EngineError> {
        self.process(group_id, user_id, display_name, Trigger::InstanceJoin, None)
            .await
    }

    /// Evaluates one subject for one triggering event.
    ///
    /// Returns `Ok(None)` when nothing was recorded: a duplicate of a request
    /// already in flight or recently handled, a group without rules, or a
    /// subject no rule matched.
    async fn process(
        &self,
        group_id: &str,
        user_id: &str,
        display_name: Option<&str>,
        trigger: Trigger,
        notification_id: Option<&str>,
    ) -> Result<Option<EnforcementRecord>, EngineError> {
        let group = self.authorize(group_id, GroupAction::EvaluateRules)?;
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(EngineError::MissingSubject);
        }

        let is_request = trigger != Trigger::InstanceJoin;
        let key = (group.clone(), user_id.to_string());
        let Some(mut claim) = self.try_claim(key, dedupe_for(trigger, notification_id)) else {
            tracing::debug!(group_id = %group, user_id, trigger = trigger.as_str(), "duplicate trigger ignored");
            return Ok(None);
        };
        if !self.has_rules_for(&group) {
            return Ok(None);
        }

        let subject = match self
            .inner
            .executor
            .execute(self.inner.api.fetch_subject(&group, user_id), "fetch-subject")
            .await
        {
            Ok(subject) => subject,
            Err(e) => {
                self.note_rate_limit(&e);
                return Err(e.into());
            }
        };

        let Some(decided) = self.evaluate(&group, &subject) else {
            tracing::debug!(group_id = %group, user_id, "no rule matched");
            if is_request {
                claim.settle(true);
            }
            return Ok(None);
        };

        let action = effective_action(decided.action, trigger);
        let outcome = match RemoteCall::for_action(action, trigger) {
            Some(call) => self.enforce(&group, user_id, call).await,
            None => Ok(()),
        };
        let error = match outcome {
            Ok(()) => None,
            Err(EngineError::CoolingDown { remaining }) => {
                tracing::info!(group_id = %group, user_id, remaining_secs = remaining.as_secs(), "enforcement deferred by cooldown");
                return Err(EngineError::CoolingDown { remaining });
            }
            Err(e) => Some(e.to_string()),
        };

        let subject_name = if subject.display_name.is_empty() {
            display_name.unwrap_or(user_id).to_string()
        } else {
            subject.display_name
        };
        let record = EnforcementRecord {
            id: Uuid::new_v4(),
            group_id: group.to_string(),
            subject_id: user_id.to_string(),
            subject_name,
            rule_id: decided.rule_id,
            action,
            trigger,
            reason: decided.reason,
            executed: error.is_none(),
            error,
            timestamp: Utc::now(),
        };

        // Failed enforcements settle too: a redelivered notification must not
        // log twice. Sweeps and operator requests retry them.
        if is_request {
            claim.settle(record.executed);
        }
        drop(claim);

        tracing::info!(
            group_id = %record.group_id,
            user_id = %record.subject_id,
            rule_id = %record.rule_id,
            action = %record.action,
            trigger = record.trigger.as_str(),
            executed = record.executed,
            "moderation rule enforced"
        );
        self.commit(record.clone()).await;
        Ok(Some(record))
    }

    /// Fetches pending join requests and processes each concurrently.
    ///
    /// With `group_id` only that group is swept; otherwise every allowed
    /// group that has rules. Shares the in-flight guard with per-event
    /// processing.
    pub async fn process_all_pending_requests(&self, group_id: Option<&str>) -> Result<SweepSummary, EngineError> {
        let groups = match group_id {
            Some(id) => vec![self.authorize(id, GroupAction::ViewJoinRequests)?],
            None => self.inner.gate.allowed_groups(),
        };

        let mut summary = SweepSummary::default();
        for group in groups {
            if !self.has_rules_for(&group) {
                continue;
            }
            if let Some(remaining) = self.cooldown_remaining() {
                tracing::info!(remaining_secs = remaining.as_secs(), "sweep stopped by cooldown");
                break;
            }
            if let Err(e) = self.authorize(group.as_str(), GroupAction::ViewJoinRequests) {
                tracing::debug!(error = %e, "skipping group in sweep");
                continue;
            }

            let pending = match self
                .inner
                .executor
                .execute(self.inner.api.pending_join_requests(&group), "pending-join-requests")
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    summary.failed += 1;
                    if self.note_rate_limit(&e) {
                        break;
                    }
                    continue;
                }
            };
            summary.groups += 1;
            summary.pending += pending.len();

            let mut tasks = JoinSet::new();
            for request in pending {
                let engine = self.clone();
                let group = group.clone();
                tasks.spawn(async move {
                    engine
                        .process(
                            group.as_str(),
                            &request.user_id,
                            Some(&request.display_name),
                            Trigger::PendingSweep,
                            None,
                        )
                        .await
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(Some(_))) => summary.enforced += 1,
                    Ok(Ok(None)) => summary.skipped += 1,
                    Ok(Err(EngineError::CoolingDown { .. })) => summary.deferred += 1,
                    Ok(Err(e)) => {
                        tracing::warn!(group_id = %group, error = %e, "pending request failed");
                        summary.failed += 1;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "pending request task panicked");
                        summary.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            groups = summary.groups,
            pending = summary.pending,
            enforced = summary.enforced,
            deferred = summary.deferred,
            failed = summary.failed,
            "pending join requests processed"
        );
        Ok(summary)
    }

    /// Fetches the groups the operator moderates and replaces the gate's
    /// allow-list. On failure the existing list is kept.
    pub async fn refresh_permissions(&self) -> Result<usize, EngineError> {
        let groups = match self
            .inner
            .executor
            .execute(self.inner.api.moderated_groups(), "moderated-groups")
            .await
        {
            Ok(groups) => groups,
            Err(e) => {
                self.note_rate_limit(&e);
                return Err(e.into());
            }
        };
        let count = self.inner.gate.set_allowed_groups(&groups);
        self.inner
            .notify(ModerationNotice::PermissionsRefreshed { groups: count });
        Ok(count)
    }

    /// Processes `join_request` events and local `member_joined` events in
    /// group instances, each on its own task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, bus: &EventBus) -> Subscription {
        let engine = self.clone();
        let runtime = tokio::runtime::Handle::current();
        bus.subscribe(
            vec![EventKind::JoinRequest, EventKind::MemberJoined],
            move |event| engine.dispatch(event, &runtime),
        )
    }

    fn dispatch(&self, event: &NormalizedEvent, runtime: &tokio::runtime::Handle) {
        let trigger = match (event.kind, event.origin) {
            (EventKind::JoinRequest, _) => Trigger::JoinRequest,
            (EventKind::MemberJoined, SourceOrigin::LocalLog) => Trigger::InstanceJoin,
            _ => return,
        };
        let (Some(group_id), Some(user_id)) = (event.group_id(), event.user_id()) else {
            tracing::debug!(kind = %event.kind, "event lacks group or user id, not evaluated");
            return;
        };
        // Instances of unmoderated groups are ordinary places to be in, so
        // presence there is skipped without an audit entry.
        if trigger == Trigger::InstanceJoin && !self.inner.gate.is_allowed(group_id) {
            return;
        }
        let decision = self
            .inner
            .gate
            .validate_access_safe(group_id, GroupAction::EvaluateRules);
        if !decision.allowed {
            if let Some(e) = decision.error {
                tracing::debug!(error = %e, "event outside moderated groups");
            }
            return;
        }

        let engine = self.clone();
        let group_id = group_id.to_string();
        let user_id = user_id.to_string();
        let display_name = event.str_field("displayName").map(str::to_string);
        let notification_id = event.str_field("notificationId").map(str::to_string);
        runtime.spawn(async move {
            let result = engine
                .process(
                    &group_id,
                    &user_id,
                    display_name.as_deref(),
                    trigger,
                    notification_id.as_deref(),
                )
                .await;
            match result {
                Ok(_) => {}
                Err(EngineError::Denied(e)) => tracing::debug!(error = %e, "event outside moderated groups"),
                Err(e) => tracing::warn!(group_id = %group_id, user_id = %user_id, error = %e, "event processing failed"),
            }
        });
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        time_left(self.inner.lock().cooldown_until)
    }

    // ---- internals ----

    fn authorize(&self, group_id: &str, action: GroupAction) -> Result<GroupId, EngineError> {
        Ok(self.inner.gate.validate_access(group_id, action)?)
    }

    fn has_rules_for(&self, group: &GroupId) -> bool {
        self.inner
            .lock()
            .rules
            .iter()
            .any(|r| r.definition.enabled && r.definition.group_id == group.as_str())
    }

    fn evaluate(&self, group: &GroupId, subject: &Subject) -> Option<RuleMatch> {
        evaluate(&self.inner.lock().rules, group.as_str(), subject, Utc::now())
    }

    fn try_claim(&self, key: ClaimKey, dedupe: Dedupe<'_>) -> Option<Claim> {
        let mut state = self.inner.lock();
        let ttl = self.inner.config.settled_ttl();
        state.settled.retain(|_, settled| settled.at.elapsed() < ttl);
        if state.in_flight.contains(&key) || dedupe.is_duplicate(state.settled.get(&key)) {
            return None;
        }
        state.in_flight.insert(key.clone());
        let notification = match dedupe {
            Dedupe::Notification(id) => id.map(str::to_string),
            Dedupe::Retry | Dedupe::InFlightOnly => None,
        };
        Some(Claim {
            inner: Arc::clone(&self.inner),
            key,
            notification,
            settle: None,
        })
    }

    /// Starts a cooldown if `err` is a rate limit. Returns whether it was.
    fn note_rate_limit(&self, err: &ExecError) -> bool {
        if !err.is_rate_limited() {
            return false;
        }
        let cooldown = err
            .retry_after()
            .unwrap_or_else(|| self.inner.config.rate_limit_cooldown());
        self.inner.lock().cooldown_until = Some(Instant::now() + cooldown);
        tracing::warn!(cooldown_secs = cooldown.as_secs(), "platform rate limit hit, pausing enforcement");
        self.inner.notify(ModerationNotice::CooldownStarted {
            retry_after_secs: cooldown.as_secs(),
        });
        true
    }

    async fn enforce(&self, group: &GroupId, user_id: &str, call: RemoteCall) -> Result<(), EngineError> {
        if let Some(remaining) = self.cooldown_remaining() {
            return Err(EngineError::CoolingDown { remaining });
        }
        self.inner.gate.validate_access(group.as_str(), call.gate_action())?;

        let api = &self.inner.api;
        let req = match call {
            RemoteCall::Respond(decision) => ApiRequest::respond_join_request(group, user_id, decision),
            RemoteCall::Ban => ApiRequest::ban_member(group, user_id),
            RemoteCall::Kick => ApiRequest::kick_member(group, user_id),
        };
        let req = &req;
        let strategies = vec![
            Strategy::new("typed", move || async move {
                match call {
                    RemoteCall::Respond(decision) => api.respond_join_request(group, user_id, decision).await,
                    RemoteCall::Ban => api.ban_member(group, user_id).await,
                    RemoteCall::Kick => api.kick_member(group, user_id).await,
                }
            }),
            Strategy::new("generic-request", move || async move {
                api.request(req).await.map(|_| ())
            }),
            Strategy::new("raw-http", move || async move {
                api.raw_request(req).await.map(|_| ())
            }),
        ];

        match self
            .inner
            .executor
            .execute_with_fallback(strategies, call.correlation_key())
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.note_rate_limit(&e);
                Err(e.into())
            }
        }
    }

    /// Appends to history, persists and broadcasts one record.
    async fn commit(&self, record: EnforcementRecord) {
        {
            let mut state = self.inner.lock();
            state.history.push_back(record.clone());
            while state.history.len() > self.inner.config.history_capacity {
                state.history.pop_front();
            }
        }

        let stored = record.clone();
        if let Err(e) = self.persist(move |p| p.record_enforcement(&stored)).await {
            tracing::error!(record_id = %record.id, error = %e, "failed to persist enforcement record");
        }
        self.inner.notify(ModerationNotice::Enforced { record });
    }

    /// Runs a persistence call on the blocking pool.
    async fn persist<T, F>(&self, op: F) -> Result<T, PersistError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Persistence) -> Result<T, PersistError> + Send + 'static,
    {
        let persistence = Arc::clone(&self.inner.persistence);
        tokio::task::spawn_blocking(move || op(persistence.as_ref()))
            .await
            .map_err(|e| PersistError::Backend(format!("persistence task failed: {e}")))?
    }
}

fn time_left(until: Option<Instant>) -> Option<Duration> {
    let until = until?;
    let now = Instant::now();
    (until > now).then(|| until - now)
}
