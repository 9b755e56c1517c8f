//! Engine behaviour against an in-memory platform stub.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_api::{ApiRequest, JoinDecision, JoinRequest, ModerationApi};
use warden_auth::{AuthorizationGate, DenialReason};
use warden_exec::{ExecError, Executor};
use warden_rules::{EngineConfig, EngineError, ModerationEngine, ModerationNotice};
use warden_types::{
    EnforcementRecord, EventBus, EventKind, GroupId, ModerationAction, NormalizedEvent,
    PersistError, Persistence, RuleDefinition, RulePredicate, SourceOrigin, Subject, Trigger,
    TrustTier,
};

const GROUP: &str = "grp_abc";

#[derive(Default)]
struct StubApi {
    subjects: Mutex<HashMap<String, Subject>>,
    pending: Mutex<Vec<JoinRequest>>,
    moderated: Mutex<Option<Vec<String>>>,
    failures: Mutex<HashMap<&'static str, ExecError>>,
    calls: Mutex<Vec<String>>,
    fetch_delay: Duration,
}

impl StubApi {
    fn with_delay(fetch_delay: Duration) -> Self {
        Self {
            fetch_delay,
            ..Self::default()
        }
    }

    fn add_subject(&self, user_id: &str, name: &str, tags: &[&str]) {
        let subject = Subject::new(user_id, name, tags.iter().map(|t| t.to_string()).collect());
        self.subjects
            .lock()
            .unwrap()
            .insert(user_id.to_string(), subject);
    }

    fn fail(&self, path: &'static str, err: ExecError) {
        self.failures.lock().unwrap().insert(path, err);
    }

    fn log(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn enforcement_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("fetch:"))
            .collect()
    }

    fn outcome(&self, path: &'static str) -> Result<(), ExecError> {
        match self.failures.lock().unwrap().get(path) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ModerationApi for StubApi {
    async fn respond_join_request(
        &self,
        group: &GroupId,
        user_id: &str,
        decision: JoinDecision,
    ) -> Result<(), ExecError> {
        self.log(format!("typed:{}:{group}:{user_id}", decision.as_str()));
        self.outcome("typed")
    }

    async fn ban_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError> {
        self.log(format!("typed:ban:{group}:{user_id}"));
        self.outcome("typed")
    }

    async fn kick_member(&self, group: &GroupId, user_id: &str) -> Result<(), ExecError> {
        self.log(format!("typed:kick:{group}:{user_id}"));
        self.outcome("typed")
    }

    async fn request(&self, req: &ApiRequest) -> Result<Value, ExecError> {
        self.log(format!("request:{} {}", req.method, req.path()));
        self.outcome("request").map(|_| Value::Null)
    }

    async fn raw_request(&self, req: &ApiRequest) -> Result<Value, ExecError> {
        self.log(format!("raw:{} {}", req.method, req.path()));
        self.outcome("raw").map(|_| Value::Null)
    }

    async fn pending_join_requests(&self, _group: &GroupId) -> Result<Vec<JoinRequest>, ExecError> {
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn fetch_subject(&self, _group: &GroupId, user_id: &str) -> Result<Subject, ExecError> {
        self.log(format!("fetch:{user_id}"));
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        self.subjects
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| ExecError::NotFound(user_id.to_string()))
    }

    async fn moderated_groups(&self) -> Result<Vec<String>, ExecError> {
        self.moderated
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ExecError::Connection("platform unreachable".to_string()))
    }
}

#[derive(Default)]
struct MemoryPersistence {
    records: Mutex<Vec<EnforcementRecord>>,
    rules: Mutex<Vec<RuleDefinition>>,
}

impl Persistence for MemoryPersistence {
    fn record_enforcement(&self, record: &EnforcementRecord) -> Result<(), PersistError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn record_event(&self, _event: &NormalizedEvent) -> Result<(), PersistError> {
        Ok(())
    }

    fn save_rule(&self, rule: &RuleDefinition) -> Result<(), PersistError> {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter().position(|r| r.id == rule.id) {
            Some(index) => rules[index] = rule.clone(),
            None => rules.push(rule.clone()),
        }
        Ok(())
    }

    fn delete_rule(&self, rule_id: &str) -> Result<(), PersistError> {
        self.rules.lock().unwrap().retain(|r| r.id != rule_id);
        Ok(())
    }

    fn load_rules(&self) -> Result<Vec<RuleDefinition>, PersistError> {
        Ok(self.rules.lock().unwrap().clone())
    }
}

struct Harness {
    engine: ModerationEngine,
    api: Arc<StubApi>,
    gate: Arc<AuthorizationGate>,
    store: Arc<MemoryPersistence>,
}

fn harness(api: StubApi) -> Harness {
    let api = Arc::new(api);
    let gate = Arc::new(AuthorizationGate::new());
    gate.set_allowed_groups([GROUP]);
    let store = Arc::new(MemoryPersistence::default());
    let engine = ModerationEngine::new(
        EngineConfig::default(),
        gate.clone(),
        api.clone(),
        Executor::new(),
        store.clone(),
    );
    Harness {
        engine,
        api,
        gate,
        store,
    }
}

fn rule(id: &str, predicate: RulePredicate, action: ModerationAction) -> RuleDefinition {
    RuleDefinition {
        id: id.to_string(),
        group_id: GROUP.to_string(),
        name: String::new(),
        enabled: true,
        priority: 0,
        predicate,
        action,
        reason: None,
    }
}

fn below_known_reject() -> RuleDefinition {
    RuleDefinition {
        reason: Some("trust below known".to_string()),
        ..rule(
            "low-trust",
            RulePredicate::TrustBelow {
                tier: TrustTier::Known,
            },
            ModerationAction::Reject,
        )
    }
}

#[tokio::test]
async fn low_trust_join_request_is_rejected() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_new", "Newcomer", &["system_trust_basic"]);
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let record = h
        .engine
        .process_join_request(GROUP, "usr_new", None)
        .await
        .unwrap()
        .expect("a rule matched");

    assert_eq!(record.action, ModerationAction::Reject);
    assert_eq!(record.trigger, Trigger::JoinRequest);
    assert_eq!(record.subject_name, "Newcomer");
    assert_eq!(record.reason, "trust below known");
    assert!(record.executed);
    assert_eq!(h.api.enforcement_calls(), vec!["typed:reject:grp_abc:usr_new"]);
    assert_eq!(h.engine.history(Some(GROUP)).unwrap(), vec![record.clone()]);
    assert_eq!(*h.store.records.lock().unwrap(), vec![record]);
}

#[tokio::test]
async fn trusted_user_passes_untouched() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_vet", "Veteran", &["system_trust_veteran"]);
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let outcome = h.engine.process_join_request(GROUP, "usr_vet", None).await.unwrap();

    assert!(outcome.is_none());
    assert!(h.api.enforcement_calls().is_empty());
    assert!(h.engine.history(None).unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_join_request_is_handled_once() {
    let h = harness(StubApi::with_delay(Duration::from_millis(50)));
    h.api.add_subject("usr_123", "Dup", &[]);
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let (first, second) = tokio::join!(
        h.engine.process_join_request(GROUP, "usr_123", None),
        h.engine.process_join_request(GROUP, "usr_123", None),
    );
    let records: Vec<_> = [first.unwrap(), second.unwrap()].into_iter().flatten().collect();
    assert_eq!(records.len(), 1);

    // Settled: a late redelivery is ignored too.
    let late = h.engine.process_join_request(GROUP, "usr_123", None).await.unwrap();
    assert!(late.is_none());

    assert_eq!(h.api.enforcement_calls().len(), 1);
    assert_eq!(h.engine.history(None).unwrap().len(), 1);
    assert_eq!(h.engine.status().in_flight, 0);
    assert_eq!(h.engine.status().settled, 1);
}

#[tokio::test]
async fn generic_path_covers_failed_typed_call() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_bot", "SpamBot", &[]);
    h.api.fail("typed", ExecError::Failed("method removed".to_string()));
    h.engine
        .save_rule(rule("ban-all", RulePredicate::Always, ModerationAction::Ban))
        .await
        .unwrap();

    let record = h
        .engine
        .process_join_request(GROUP, "usr_bot", None)
        .await
        .unwrap()
        .unwrap();

    assert!(record.executed);
    assert_eq!(
        h.api.enforcement_calls(),
        vec!["typed:ban:grp_abc:usr_bot", "request:POST /groups/grp_abc/bans"]
    );
}

#[tokio::test]
async fn exhausted_chain_is_recorded_as_not_executed() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_1", "One", &[]);
    for path in ["typed", "request", "raw"] {
        h.api.fail(path, ExecError::Http {
            status: 500,
            message: "boom".to_string(),
        });
    }
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let record = h
        .engine
        .process_join_request(GROUP, "usr_1", None)
        .await
        .unwrap()
        .unwrap();

    assert!(!record.executed);
    assert!(record.error.as_deref().unwrap().contains("all 3 strategies failed"));
    assert_eq!(h.api.enforcement_calls().len(), 3);

    // A redelivered notification neither calls out nor logs again.
    let again = h.engine.process_join_request(GROUP, "usr_1", None).await.unwrap();
    assert!(again.is_none());
    assert_eq!(h.api.enforcement_calls().len(), 3);
    assert_eq!(h.engine.history(None).unwrap().len(), 1);
    assert_eq!(h.store.records.lock().unwrap().len(), 1);
    assert_eq!(h.engine.status().settled, 1);
}

#[tokio::test]
async fn failed_enforcement_is_retried_by_operator_not_by_redelivery() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_1", "One", &[]);
    for path in ["typed", "request", "raw"] {
        h.api.fail(path, ExecError::Http {
            status: 500,
            message: "boom".to_string(),
        });
    }
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let first = h
        .engine
        .process_join_notification(GROUP, "usr_1", None, Some("not_1"))
        .await
        .unwrap()
        .unwrap();
    assert!(!first.executed);
    let redelivered = h
        .engine
        .process_join_notification(GROUP, "usr_1", None, Some("not_1"))
        .await
        .unwrap();
    assert!(redelivered.is_none());

    h.api.failures.lock().unwrap().clear();
    let retried = h
        .engine
        .process_pending_request(GROUP, "usr_1", None)
        .await
        .unwrap()
        .unwrap();
    assert!(retried.executed);
    assert_eq!(retried.trigger, Trigger::Manual);

    // Once it went through, neither path runs it again.
    assert!(h
        .engine
        .process_pending_request(GROUP, "usr_1", None)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.store.records.lock().unwrap().len(), 2);
    assert_eq!(h.api.enforcement_calls().len(), 4);
}

#[tokio::test]
async fn new_notification_id_is_a_new_request() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_1", "One", &[]);
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let first = h
        .engine
        .process_join_notification(GROUP, "usr_1", None, Some("not_1"))
        .await
        .unwrap();
    let duplicate = h
        .engine
        .process_join_notification(GROUP, "usr_1", None, Some("not_1"))
        .await
        .unwrap();
    let second_request = h
        .engine
        .process_join_notification(GROUP, "usr_1", None, Some("not_2"))
        .await
        .unwrap();
    let replay_of_first = h
        .engine
        .process_join_notification(GROUP, "usr_1", None, Some("not_1"))
        .await
        .unwrap();

    assert!(first.is_some());
    assert!(duplicate.is_none());
    assert!(second_request.is_some());
    assert!(replay_of_first.is_none());
    assert_eq!(h.api.enforcement_calls().len(), 2);
}

#[tokio::test]
async fn rate_limit_starts_cooldown_and_releases_claim() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_1", "One", &[]);
    h.api.add_subject("usr_2", "Two", &[]);
    for path in ["typed", "request", "raw"] {
        h.api.fail(path, ExecError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        });
    }
    h.engine.save_rule(below_known_reject()).await.unwrap();
    let mut notices = h.engine.subscribe();

    let record = h
        .engine
        .process_join_request(GROUP, "usr_1", None)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.executed);

    let remaining = h.engine.cooldown_remaining().expect("cooldown active");
    assert!(remaining > Duration::from_secs(25));
    assert!(matches!(
        notices.recv().await.unwrap(),
        ModerationNotice::CooldownStarted { retry_after_secs: 30 }
    ));

    let calls_before = h.api.enforcement_calls().len();
    let err = h
        .engine
        .process_join_request(GROUP, "usr_2", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CoolingDown { .. }));
    assert_eq!(h.api.enforcement_calls().len(), calls_before, "no call during cooldown");

    // usr_1 settled with its failed record; usr_2 was deferred unclaimed.
    let status = h.engine.status();
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.settled, 1);
    assert_eq!(h.engine.history(None).unwrap().len(), 1);
}

#[tokio::test]
async fn unmoderated_group_is_denied_before_any_call() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_1", "One", &[]);

    let err = h
        .engine
        .process_join_request("grp_elsewhere", "usr_1", None)
        .await
        .unwrap_err();
    match err {
        EngineError::Denied(e) => assert_eq!(e.reason(), DenialReason::NotModerated),
        other => panic!("unexpected: {other:?}"),
    }

    let err = h
        .engine
        .process_join_request("../grp_abc", "usr_1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Denied(ref e) if e.reason() == DenialReason::MalformedGroupId));

    assert!(h.api.calls().is_empty());
    assert_eq!(h.gate.audit_len(), 2);
}

#[tokio::test]
async fn instance_join_never_rejects_or_accepts_remotely() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_low", "Low", &[]);
    h.api.add_subject("usr_high", "High", &["system_trust_veteran"]);
    h.engine.save_rule(below_known_reject()).await.unwrap();
    h.engine
        .save_rule(RuleDefinition {
            priority: 1,
            ..rule("welcome", RulePredicate::Always, ModerationAction::Allow)
        })
        .await
        .unwrap();

    let low = h
        .engine
        .process_instance_join(GROUP, "usr_low", Some("Low"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(low.action, ModerationAction::Flag);
    assert_eq!(low.trigger, Trigger::InstanceJoin);
    assert!(low.executed);

    let high = h
        .engine
        .process_instance_join(GROUP, "usr_high", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(high.action, ModerationAction::Allow);

    assert!(h.api.enforcement_calls().is_empty());

    // Presence triggers are not settled; a rejoin is evaluated again.
    assert!(h
        .engine
        .process_instance_join(GROUP, "usr_low", None)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn sweep_processes_pending_requests_alongside_events() {
    let h = harness(StubApi::with_delay(Duration::from_millis(20)));
    for user in ["usr_a", "usr_b", "usr_c"] {
        h.api.add_subject(user, user, &[]);
    }
    *h.api.pending.lock().unwrap() = ["usr_a", "usr_b", "usr_c"]
        .iter()
        .map(|u| JoinRequest {
            user_id: u.to_string(),
            display_name: u.to_string(),
            requested_at: None,
        })
        .collect();
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let (sweep, event) = tokio::join!(
        h.engine.process_all_pending_requests(None),
        h.engine.process_join_request(GROUP, "usr_b", None),
    );
    let sweep = sweep.unwrap();
    let event_enforced = usize::from(event.unwrap().is_some());

    assert_eq!(sweep.groups, 1);
    assert_eq!(sweep.pending, 3);
    assert_eq!(sweep.enforced + event_enforced, 3);
    assert_eq!(sweep.enforced + sweep.skipped, 3);

    let mut rejected: Vec<String> = h.api.enforcement_calls();
    rejected.sort();
    assert_eq!(
        rejected,
        vec![
            "typed:reject:grp_abc:usr_a",
            "typed:reject:grp_abc:usr_b",
            "typed:reject:grp_abc:usr_c",
        ]
    );
    assert_eq!(h.engine.history(None).unwrap().len(), 3);
}

#[tokio::test]
async fn sweep_of_unmoderated_group_is_denied() {
    let h = harness(StubApi::default());
    let err = h
        .engine
        .process_all_pending_requests(Some("grp_other"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Denied(_)));
}

#[tokio::test]
async fn refresh_replaces_allow_list_and_failure_keeps_it() {
    let h = harness(StubApi::default());
    *h.api.moderated.lock().unwrap() = Some(vec!["grp_new".to_string(), "bogus".to_string()]);

    assert_eq!(h.engine.refresh_permissions().await.unwrap(), 1);
    assert!(h.gate.is_allowed("grp_new"));
    assert!(!h.gate.is_allowed(GROUP), "stale trust does not survive a refresh");

    *h.api.moderated.lock().unwrap() = None;
    assert!(h.engine.refresh_permissions().await.is_err());
    assert!(h.gate.is_allowed("grp_new"));
}

#[tokio::test]
async fn rule_crud_validates_and_keeps_order() {
    let h = harness(StubApi::default());

    let bad = rule(
        "bad",
        RulePredicate::NameMatches {
            pattern: "([".to_string(),
            field: Default::default(),
            case_insensitive: false,
        },
        ModerationAction::Ban,
    );
    assert!(matches!(
        h.engine.save_rule(bad).await,
        Err(EngineError::InvalidPattern { .. })
    ));

    let foreign = RuleDefinition {
        group_id: "grp_other".to_string(),
        ..rule("foreign", RulePredicate::Always, ModerationAction::Flag)
    };
    assert!(matches!(
        h.engine.save_rule(foreign).await,
        Err(EngineError::Denied(_))
    ));

    h.engine
        .save_rule(rule("a", RulePredicate::Always, ModerationAction::Flag))
        .await
        .unwrap();
    h.engine
        .save_rule(rule("b", RulePredicate::Always, ModerationAction::Flag))
        .await
        .unwrap();
    h.engine
        .save_rule(rule("a", RulePredicate::Always, ModerationAction::Ban))
        .await
        .unwrap();

    let rules = h.engine.rules(Some(GROUP)).unwrap();
    assert_eq!(rules.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
    assert_eq!(rules[0].action, ModerationAction::Ban);

    h.engine.delete_rule("a").await.unwrap();
    assert!(matches!(
        h.engine.delete_rule("a").await,
        Err(EngineError::RuleNotFound(_))
    ));
    assert_eq!(h.store.rules.lock().unwrap().len(), 1);

    // A fresh engine over the same store sees the surviving rule.
    let reloaded = ModerationEngine::new(
        EngineConfig::default(),
        h.gate.clone(),
        h.api.clone(),
        Executor::new(),
        h.store.clone(),
    );
    assert_eq!(reloaded.load_rules().await.unwrap(), 1);
    assert_eq!(reloaded.rules(None).unwrap()[0].id, "b");
}

#[tokio::test]
async fn check_user_is_a_dry_run() {
    let h = harness(StubApi::default());
    h.engine.save_rule(below_known_reject()).await.unwrap();

    let subject = Subject::new("usr_x", "Visitor", vec![]);
    let decided = h.engine.check_user(&subject, GROUP).unwrap().unwrap();
    assert_eq!(decided.rule_id, "low-trust");
    assert_eq!(decided.action, ModerationAction::Reject);

    assert!(h.api.calls().is_empty());
    assert!(h.engine.history(None).unwrap().is_empty());
    assert!(h.engine.check_user(&subject, "grp_other").is_err());
}

#[tokio::test]
async fn history_is_bounded_and_clearable() {
    let api = Arc::new(StubApi::default());
    let gate = Arc::new(AuthorizationGate::new());
    gate.set_allowed_groups([GROUP]);
    let engine = ModerationEngine::new(
        EngineConfig {
            history_capacity: 2,
            ..EngineConfig::default()
        },
        gate,
        api.clone(),
        Executor::new(),
        Arc::new(warden_types::NoopPersistence),
    );
    engine
        .save_rule(rule("flag", RulePredicate::Always, ModerationAction::Flag))
        .await
        .unwrap();
    for user in ["usr_1", "usr_2", "usr_3"] {
        api.add_subject(user, user, &[]);
        engine.process_join_request(GROUP, user, None).await.unwrap();
    }

    let ids: Vec<String> = engine.history(None).unwrap().into_iter().map(|r| r.subject_id).collect();
    assert_eq!(ids, ["usr_3", "usr_2"]);
    assert_eq!(engine.clear_history(), 2);
    assert!(engine.history(None).unwrap().is_empty());
}

#[tokio::test]
async fn bus_join_request_events_are_enforced() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_bus", "FromBus", &[]);
    h.engine.save_rule(below_known_reject()).await.unwrap();
    let bus = EventBus::new();
    let mut notices = h.engine.subscribe();
    let _sub = h.engine.spawn(&bus);

    // Remote member joins are not instance presence and are ignored.
    bus.publish(
        NormalizedEvent::new(EventKind::MemberJoined, SourceOrigin::RemotePush)
            .with("groupId", GROUP)
            .with("userId", "usr_bus"),
    );
    bus.publish(
        NormalizedEvent::new(EventKind::JoinRequest, SourceOrigin::RemotePush)
            .with("groupId", GROUP)
            .with("userId", "usr_bus"),
    );

    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("notice in time")
        .unwrap();
    match notice {
        ModerationNotice::Enforced { record } => {
            assert_eq!(record.subject_id, "usr_bus");
            assert_eq!(record.trigger, Trigger::JoinRequest);
        }
        other => panic!("unexpected notice: {other:?}"),
    }
    assert_eq!(h.api.enforcement_calls(), vec!["typed:reject:grp_abc:usr_bus"]);
}

#[tokio::test]
async fn revoked_group_disappears_from_history_and_rules() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_new", "Newcomer", &[]);
    h.engine.save_rule(below_known_reject()).await.unwrap();
    h.engine
        .process_join_request(GROUP, "usr_new", None)
        .await
        .unwrap()
        .unwrap();

    h.gate.set_allowed_groups(["grp_other"]);

    assert!(h.engine.history(None).unwrap().is_empty());
    assert!(h.engine.rules(None).unwrap().is_empty());
    assert!(matches!(
        h.engine.history(Some(GROUP)),
        Err(EngineError::Denied(_))
    ));
    assert!(matches!(h.engine.rules(Some(GROUP)), Err(EngineError::Denied(_))));
    assert_eq!(h.engine.status().history, 1, "records are hidden, not dropped");

    h.gate.set_allowed_groups([GROUP]);
    assert_eq!(h.engine.history(Some(GROUP)).unwrap().len(), 1);
}

#[tokio::test]
async fn kick_rule_kicks_members_and_rejects_requesters() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_troll", "Troll", &[]);
    h.api.add_subject("usr_applicant", "Applicant", &[]);
    h.engine
        .save_rule(rule("kick-all", RulePredicate::Always, ModerationAction::Kick))
        .await
        .unwrap();

    let member = h
        .engine
        .process_instance_join(GROUP, "usr_troll", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(member.action, ModerationAction::Kick);
    assert!(member.executed);

    let requester = h
        .engine
        .process_join_request(GROUP, "usr_applicant", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(requester.action, ModerationAction::Reject);

    assert_eq!(
        h.api.enforcement_calls(),
        vec![
            "typed:kick:grp_abc:usr_troll",
            "typed:reject:grp_abc:usr_applicant",
        ]
    );
}

#[tokio::test]
async fn kick_falls_back_to_generic_delete() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_troll", "Troll", &[]);
    h.api.fail("typed", ExecError::Failed("method removed".to_string()));
    h.engine
        .save_rule(rule("kick-all", RulePredicate::Always, ModerationAction::Kick))
        .await
        .unwrap();

    let record = h
        .engine
        .process_instance_join(GROUP, "usr_troll", None)
        .await
        .unwrap()
        .unwrap();

    assert!(record.executed);
    assert_eq!(
        h.api.enforcement_calls(),
        vec![
            "typed:kick:grp_abc:usr_troll",
            "request:DELETE /groups/grp_abc/members/usr_troll",
        ]
    );
}

#[tokio::test]
async fn bus_events_for_unmoderated_groups_are_audited_not_processed() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_1", "One", &[]);
    h.engine.save_rule(below_known_reject()).await.unwrap();
    let bus = EventBus::new();
    let _sub = h.engine.spawn(&bus);

    bus.publish(
        NormalizedEvent::new(EventKind::JoinRequest, SourceOrigin::RemotePush)
            .with("groupId", "grp_elsewhere")
            .with("userId", "usr_1"),
    );
    // Presence in someone else's group instance is not worth an audit entry.
    bus.publish(
        NormalizedEvent::new(EventKind::MemberJoined, SourceOrigin::LocalLog)
            .with("groupId", "grp_elsewhere")
            .with("userId", "usr_1"),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.api.calls().is_empty());
    let audit = h.gate.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].group_id, "grp_elsewhere");
    assert_eq!(audit[0].reason, DenialReason::NotModerated);
}

#[tokio::test]
async fn redelivered_bus_notification_is_enforced_once() {
    let h = harness(StubApi::default());
    h.api.add_subject("usr_bus", "FromBus", &[]);
    for path in ["typed", "request", "raw"] {
        h.api.fail(path, ExecError::Http {
            status: 502,
            message: "bad gateway".to_string(),
        });
    }
    h.engine.save_rule(below_known_reject()).await.unwrap();
    let bus = EventBus::new();
    let mut notices = h.engine.subscribe();
    let _sub = h.engine.spawn(&bus);

    let notification = NormalizedEvent::new(EventKind::JoinRequest, SourceOrigin::RemotePush)
        .with("groupId", GROUP)
        .with("userId", "usr_bus")
        .with("notificationId", "not_9");
    bus.publish(notification.clone());
    tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("notice in time")
        .unwrap();

    bus.publish(notification);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.store.records.lock().unwrap().len(), 1);
    assert_eq!(h.api.enforcement_calls().len(), 3);
}
