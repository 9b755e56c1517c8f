use chrono::{TimeZone, Utc};
use uuid::Uuid;
use warden_store::{DbRuntimeSettings, SqliteStore};
use warden_types::{
    EnforcementRecord, EventKind, ModerationAction, NormalizedEvent, Persistence, RuleDefinition,
    RulePredicate, SourceOrigin, Trigger, TrustTier,
};

fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
    let path = dir.path().join("warden.db");
    SqliteStore::open(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap()
}

fn record(group: &str, subject: &str, action: ModerationAction) -> EnforcementRecord {
    EnforcementRecord {
        id: Uuid::new_v4(),
        group_id: group.to_string(),
        subject_id: subject.to_string(),
        subject_name: format!("name of {subject}"),
        rule_id: "r1".to_string(),
        action,
        trigger: Trigger::JoinRequest,
        reason: "matched r1".to_string(),
        executed: true,
        error: None,
        timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 21, 14, 2).unwrap(),
    }
}

fn rule(id: &str, action: ModerationAction) -> RuleDefinition {
    RuleDefinition {
        id: id.to_string(),
        group_id: "grp_abc".to_string(),
        name: id.to_uppercase(),
        enabled: true,
        priority: 0,
        predicate: RulePredicate::TrustBelow {
            tier: TrustTier::Known,
        },
        action,
        reason: None,
    }
}

#[test]
fn enforcement_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let first = record("grp_abc", "usr_1", ModerationAction::Reject);
    let mut failed = record("grp_abc", "usr_2", ModerationAction::Ban);
    failed.executed = false;
    failed.error = Some("HTTP 403".to_string());
    failed.trigger = Trigger::InstanceJoin;

    {
        let store = open_store(&dir);
        store.record_enforcement(&first).unwrap();
        store.record_enforcement(&failed).unwrap();
        store
            .record_enforcement(&record("grp_other", "usr_3", ModerationAction::Flag))
            .unwrap();
    }

    let store = open_store(&dir);
    let records = store.recent_enforcements(Some("grp_abc"), 10).unwrap();
    assert_eq!(records, vec![failed, first]);

    let all = store.recent_enforcements(None, 2).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].group_id, "grp_other");
}

#[test]
fn events_keep_lifted_fields_and_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let join = NormalizedEvent::new(EventKind::MemberJoined, SourceOrigin::LocalLog)
        .with("groupId", "grp_abc")
        .with("userId", "usr_1")
        .with("displayName", "Alice");
    let note = NormalizedEvent::new(EventKind::Notification, SourceOrigin::RemotePush);
    store.record_event(&join).unwrap();
    store.record_event(&note).unwrap();

    let events = store.recent_events(None, 10).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "notification");
    assert_eq!(events[0].group_id, None);

    let joins = store.recent_events(Some(EventKind::MemberJoined), 10).unwrap();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].origin, "local_log");
    assert_eq!(joins[0].group_id.as_deref(), Some("grp_abc"));
    assert_eq!(joins[0].user_id.as_deref(), Some("usr_1"));
    let payload: serde_json::Value = serde_json::from_str(&joins[0].payload_json).unwrap();
    assert_eq!(payload["displayName"], "Alice");
}

#[test]
fn replaced_rule_keeps_its_position() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store.save_rule(&rule("a", ModerationAction::Flag)).unwrap();
    store.save_rule(&rule("b", ModerationAction::Reject)).unwrap();
    store.save_rule(&rule("c", ModerationAction::Ban)).unwrap();
    store.save_rule(&rule("a", ModerationAction::Allow)).unwrap();

    let rules = store.load_rules().unwrap();
    let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(rules[0].action, ModerationAction::Allow);

    store.delete_rule("b").unwrap();
    assert!(!store.remove_rule("b").unwrap());
    store.save_rule(&rule("d", ModerationAction::Flag)).unwrap();
    let ids: Vec<String> = store.load_rules().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["a", "c", "d"]);

    assert_eq!(store.rule("c").unwrap().unwrap().action, ModerationAction::Ban);
    assert!(store.rule("b").unwrap().is_none());
}

#[test]
fn undecodable_rule_rows_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    store.save_rule(&rule("good", ModerationAction::Flag)).unwrap();
    store
        .pool()
        .get()
        .unwrap()
        .execute(
            "INSERT INTO moderation_rules (id, position, group_id, definition_json)
             VALUES ('bad', 99, 'grp_abc', '{not json')",
            [],
        )
        .unwrap();

    let rules = store.load_rules().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, "good");
}
