#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use janitor_core::{ClusterClient, Decision, Resource, ResourceType, RunCache, NOTIFIED_ANNOTATION};
use janitor_engine::memory::{MemoryCluster, RecordingNotifier};
use janitor_engine::{hooks, ContextProvider, JanitorConfig, LifecycleEngine, RunState};
use janitor_rules::RuleSet;
use serde_json::{json, Value};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
}

fn deployments() -> ResourceType {
    ResourceType::new("apps", "v1", "Deployment", "deployments", true)
}

fn pvcs() -> ResourceType {
    ResourceType::new("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true)
}

fn pods() -> ResourceType {
    ResourceType::new("", "v1", "Pod", "pods", true)
}

fn object(name: &str, annotations: Value, labels: Value) -> Value {
    json!({
        "metadata": {
            "name": name,
            "namespace": "dev",
            "creationTimestamp": "2024-05-01T10:00:00Z",
            "annotations": annotations,
            "labels": labels,
        }
    })
}

struct Harness {
    cluster: Arc<MemoryCluster>,
    notifier: Arc<RecordingNotifier>,
    engine: LifecycleEngine,
}

fn harness(config: JanitorConfig, rules: &str) -> Harness {
    let cluster = Arc::new(MemoryCluster::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = LifecycleEngine::new(
        &config,
        cluster.clone(),
        Arc::new(RuleSet::load(rules).unwrap()),
        None,
        notifier.clone(),
    );
    Harness { cluster, notifier, engine }
}

async fn stored(h: &Harness, rt: &ResourceType, obj: Value) -> Resource {
    h.cluster.insert(rt, obj);
    h.cluster
        .list(&Arc::new(rt.clone()), Some("dev"))
        .await
        .unwrap()
        .pop()
        .unwrap()
}

#[tokio::test]
async fn ttl_annotation_expires_after_deadline() {
    let h = harness(JanitorConfig::default(), "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "1h"}), json!({}))).await;

    let run = RunState::new();
    let d = h.engine.process_at(r.clone(), &run, at(10, 30)).await.unwrap();
    assert_eq!(d, Decision::Alive);
    assert!(h.cluster.deleted().is_empty());

    let d = h.engine.process_at(r, &run, at(12, 0)).await.unwrap();
    assert!(d.is_expired());
    assert_eq!(h.cluster.deleted().len(), 1);
    let events = h.cluster.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "TTLExpired");
    assert_eq!(
        events[0].message,
        "Deployment dev/web expired on 2024-05-01T11:00:00Z and will be deleted (TTL 1h from 2024-05-01T10:00:00Z)"
    );
    assert_eq!(run.counters.get("deployments-deleted"), 1);
    assert_eq!(run.counters.get("resources-processed"), 2);
}

#[tokio::test]
async fn forever_never_expires() {
    let h = harness(JanitorConfig::default(), "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "forever"}), json!({}))).await;
    let far = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(h.engine.process_at(r, &RunState::new(), far).await.unwrap(), Decision::Alive);
    assert_eq!(h.cluster.mutations(), 0);
}

#[tokio::test]
async fn malformed_ttl_is_ignored() {
    let h = harness(JanitorConfig::default(), "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "7x"}), json!({}))).await;
    assert_eq!(h.engine.process_at(r, &RunState::new(), at(23, 0)).await.unwrap(), Decision::Alive);
    assert_eq!(h.cluster.mutations(), 0);
}

const RULES: &str = r#"
rules:
  - id: keep-prod
    resources: ["deployments"]
    jmespath: "metadata.labels.env == 'prod'"
    ttl: forever
  - id: temp-dev
    resources: ["*"]
    jmespath: "metadata.labels.env == 'dev'"
    ttl: 30m
"#;

#[tokio::test]
async fn first_matching_rule_wins() {
    let h = harness(JanitorConfig::default(), RULES);
    let prod = stored(&h, &deployments(), object("api", json!({}), json!({"env": "prod"}))).await;
    let dev = stored(&h, &deployments(), object("web", json!({}), json!({"env": "dev"}))).await;
    let run = RunState::new();

    assert_eq!(h.engine.process_at(prod, &run, at(20, 0)).await.unwrap(), Decision::Alive);
    assert!(h.engine.process_at(dev, &run, at(10, 30)).await.unwrap().is_expired());

    let events = h.cluster.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "RuleTTLExpired");
    assert!(events[0].message.contains("(rule temp-dev, TTL 30m from 2024-05-01T10:00:00Z)"));
}

#[tokio::test]
async fn ttl_annotation_takes_precedence_over_rules() {
    let h = harness(JanitorConfig::default(), RULES);
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "2h"}), json!({"env": "dev"}))).await;
    assert_eq!(h.engine.process_at(r, &RunState::new(), at(11, 0)).await.unwrap(), Decision::Alive);
}

#[tokio::test]
async fn expiry_annotation_deletes_once_reached() {
    let h = harness(JanitorConfig::default(), "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/expires": "2024-05-01T12:00:00Z"}), json!({}))).await;
    let run = RunState::new();
    assert_eq!(h.engine.process_at(r.clone(), &run, at(11, 59)).await.unwrap(), Decision::Alive);
    assert!(h.engine.process_at(r, &run, at(12, 0)).await.unwrap().is_expired());
    let events = h.cluster.events();
    assert_eq!(events[0].reason, "ExpiryTimeReached");
    assert_eq!(
        events[0].message,
        "Deployment dev/web expired on 2024-05-01T12:00:00Z and will be deleted (annotation janitor/expires is set)"
    );
}

#[tokio::test]
async fn both_markers_expired_count_one_deletion() {
    let h = harness(JanitorConfig::default(), "");
    let annos = json!({"janitor/ttl": "1h", "janitor/expires": "2024-05-01"});
    let r = stored(&h, &deployments(), object("web", annos, json!({}))).await;
    let run = RunState::new();
    assert!(h.engine.process_at(r, &run, at(12, 0)).await.unwrap().is_expired());
    assert_eq!(h.cluster.deleted().len(), 1);
    assert_eq!(run.counters.get("deployments-deleted"), 1);
}

#[tokio::test]
async fn dry_run_counts_without_mutating() {
    let cfg = JanitorConfig { dry_run: true, ..Default::default() };
    let h = harness(cfg, "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "1h"}), json!({}))).await;
    let run = RunState::new();
    assert!(h.engine.process_at(r, &run, at(12, 0)).await.unwrap().is_expired());
    assert_eq!(h.cluster.mutations(), 0);
    assert!(h.cluster.contains(&deployments(), Some("dev"), "web"));
    assert_eq!(run.counters.get("deployments-deleted"), 1);
}

#[tokio::test]
async fn expiry_branch_runs_when_ttl_branch_fails() {
    let cfg = JanitorConfig { delete_notification: Duration::from_secs(3 * 3600), ..Default::default() };
    let h = harness(cfg, "");
    h.cluster.fail_events("DeleteNotification");
    let annos = json!({"janitor/ttl": "2h", "janitor/expires": "2024-05-01T10:30:00Z"});
    let r = stored(&h, &deployments(), object("web", annos, json!({}))).await;
    let run = RunState::new();

    let err = h.engine.process_at(r, &run, at(11, 0)).await.unwrap_err();
    assert!(err.to_string().contains("event quota exceeded"), "{err}");
    assert_eq!(h.cluster.deleted().len(), 1);
    assert_eq!(h.cluster.events()[0].reason, "ExpiryTimeReached");
    assert_eq!(run.counters.get("deployments-deleted"), 1);
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test]
async fn already_deleted_object_still_counts() {
    let h = harness(JanitorConfig::default(), "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "1h"}), json!({}))).await;
    assert!(h.engine.process_at(r.clone(), &RunState::new(), at(12, 0)).await.unwrap().is_expired());

    // a stale copy from an earlier listing: the delete reports NotFound
    let run = RunState::new();
    assert!(h.engine.process_at(r, &run, at(12, 5)).await.unwrap().is_expired());
    assert_eq!(h.cluster.deleted().len(), 1);
    assert_eq!(run.counters.get("deployments-deleted"), 1);
}

#[tokio::test]
async fn dry_run_notification_window_sends_nothing() {
    let cfg = JanitorConfig {
        dry_run: true,
        delete_notification: Duration::from_secs(3600),
        ..Default::default()
    };
    let h = harness(cfg, "");
    let annos = json!({"janitor/ttl": "2h", "janitor/expires": "2024-05-01T12:15:00Z"});
    let r = stored(&h, &deployments(), object("web", annos, json!({}))).await;
    let run = RunState::new();

    let d = h.engine.process_at(r, &run, at(11, 30)).await.unwrap();
    assert!(matches!(d, Decision::NotifyPending { .. }));
    assert!(h.notifier.messages().is_empty());
    assert!(h.cluster.annotations().is_empty());
    assert_eq!(h.cluster.mutations(), 0);
    // both markers are inside the window; one pass notifies once
    assert_eq!(run.counters.get("deployments-notified"), 1);
}

#[tokio::test]
async fn notification_sent_once_inside_window() {
    let cfg = JanitorConfig {
        delete_notification: Duration::from_secs(30 * 60),
        context_name: Some("eu-1".into()),
        ..Default::default()
    };
    let h = harness(cfg, "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "1h"}), json!({}))).await;
    let run = RunState::new();

    assert_eq!(h.engine.process_at(r.clone(), &run, at(10, 29)).await.unwrap(), Decision::Alive);
    assert!(h.notifier.messages().is_empty());

    let d = h.engine.process_at(r, &run, at(10, 40)).await.unwrap();
    assert!(matches!(d, Decision::NotifyPending { .. }));
    assert_eq!(
        h.notifier.messages(),
        ["[eu-1] Deployment dev/web will be deleted at 2024-05-01T11:00:00Z (TTL 1h from 2024-05-01T10:00:00Z)"]
    );
    assert_eq!(h.cluster.events()[0].reason, "DeleteNotification");
    assert_eq!(h.cluster.annotations()[0].1, NOTIFIED_ANNOTATION);
    assert_eq!(run.counters.get("deployments-notified"), 1);

    // the stored object now carries the marker, so the next pass stays quiet
    let again = h.cluster.list(&Arc::new(deployments()), Some("dev")).await.unwrap().pop().unwrap();
    assert!(again.is_notified());
    assert_eq!(h.engine.process_at(again.clone(), &run, at(10, 50)).await.unwrap(), Decision::Alive);
    assert_eq!(h.notifier.messages().len(), 1);

    assert!(h.engine.process_at(again, &run, at(11, 0)).await.unwrap().is_expired());
}

#[tokio::test]
async fn webhook_failure_still_marks_notified() {
    let cfg = JanitorConfig { delete_notification: Duration::from_secs(3600), ..Default::default() };
    let cluster = Arc::new(MemoryCluster::new());
    let notifier = Arc::new(RecordingNotifier::failing());
    let engine = LifecycleEngine::new(&cfg, cluster.clone(), Arc::new(RuleSet::default()), None, notifier.clone());
    cluster.insert(&deployments(), object("web", json!({"janitor/ttl": "2h"}), json!({})));
    let r = cluster.list(&Arc::new(deployments()), Some("dev")).await.unwrap().pop().unwrap();

    let d = engine.process_at(r, &RunState::new(), at(11, 30)).await.unwrap();
    assert!(matches!(d, Decision::NotifyPending { .. }));
    assert_eq!(notifier.messages().len(), 1);
    assert_eq!(cluster.annotations().len(), 1);
}

const PVC_RULES: &str = r#"
rules:
  - id: unused-pvcs
    resources: ["persistentvolumeclaims"]
    jmespath: "_context.pvc_is_not_mounted && _context.pvc_is_not_referenced"
    ttl: 1h
"#;

fn claim(name: &str) -> Value {
    object(name, json!({}), json!({}))
}

#[tokio::test]
async fn pvc_mounted_by_pod_is_kept() {
    let h = harness(JanitorConfig::default(), PVC_RULES);
    h.cluster.insert(
        &pods(),
        json!({"metadata": {"name": "p", "namespace": "dev"},
               "spec": {"volumes": [{"name": "d", "persistentVolumeClaim": {"claimName": "data"}}]}}),
    );
    let r = stored(&h, &pvcs(), claim("data")).await;
    assert_eq!(h.engine.process_at(r, &RunState::new(), at(20, 0)).await.unwrap(), Decision::Alive);
}

#[tokio::test]
async fn pvc_generated_by_statefulset_is_kept() {
    let h = harness(JanitorConfig::default(), PVC_RULES);
    let sts = ResourceType::new("apps", "v1", "StatefulSet", "statefulsets", true);
    h.cluster.insert(
        &sts,
        json!({"metadata": {"name": "db", "namespace": "dev"},
               "spec": {"volumeClaimTemplates": [{"metadata": {"name": "data"}}]}}),
    );
    let r = stored(&h, &pvcs(), claim("data-db-0")).await;
    assert_eq!(h.engine.process_at(r, &RunState::new(), at(20, 0)).await.unwrap(), Decision::Alive);
}

#[tokio::test]
async fn pvc_referenced_by_cronjob_template_is_kept() {
    let h = harness(JanitorConfig::default(), PVC_RULES);
    let cronjobs = ResourceType::new("batch", "v1", "CronJob", "cronjobs", true);
    h.cluster.insert(
        &cronjobs,
        json!({"metadata": {"name": "nightly", "namespace": "dev"},
               "spec": {"jobTemplate": {"spec": {"template": {"spec": {
                   "volumes": [{"name": "d", "persistentVolumeClaim": {"claimName": "scratch"}}]}}}}}}),
    );
    let r = stored(&h, &pvcs(), claim("scratch")).await;
    assert_eq!(h.engine.process_at(r, &RunState::new(), at(20, 0)).await.unwrap(), Decision::Alive);
}

#[tokio::test]
async fn orphaned_pvc_is_deleted() {
    let h = harness(JanitorConfig::default(), PVC_RULES);
    let r = stored(&h, &pvcs(), claim("leftover")).await;
    assert!(h.engine.process_at(r, &RunState::new(), at(20, 0)).await.unwrap().is_expired());
    assert_eq!(h.cluster.deleted()[0].name, "leftover");
}

#[tokio::test]
async fn pvc_context_failure_degrades_to_no_match() {
    let h = harness(JanitorConfig::default(), PVC_RULES);
    h.cluster.fail_list(&pods(), Some("dev"));
    let r = stored(&h, &pvcs(), claim("leftover")).await;
    assert_eq!(h.engine.process_at(r, &RunState::new(), at(20, 0)).await.unwrap(), Decision::Alive);
    assert_eq!(h.cluster.mutations(), 0);
}

#[tokio::test]
async fn undecodable_pod_volumes_keep_the_claim() {
    let h = harness(JanitorConfig::default(), PVC_RULES);
    // volume without a name: the mount cannot be ruled out
    h.cluster.insert(
        &pods(),
        json!({"metadata": {"name": "p", "namespace": "dev"},
               "spec": {"volumes": [{"persistentVolumeClaim": {"claimName": "data"}}]}}),
    );
    let r = stored(&h, &pvcs(), claim("data")).await;
    let ctx = ContextProvider::new(h.cluster.clone(), None);
    assert!(ctx.pvc_facts(&r).await.is_err());
    assert_eq!(h.engine.process_at(r, &RunState::new(), at(20, 0)).await.unwrap(), Decision::Alive);
    assert_eq!(h.cluster.mutations(), 0);
}

#[tokio::test]
async fn filtered_resources_are_not_processed() {
    let cfg = JanitorConfig { exclude_namespaces: vec!["dev".into()], ..Default::default() };
    let h = harness(cfg, "");
    let r = stored(&h, &deployments(), object("web", json!({"janitor/ttl": "1s"}), json!({}))).await;
    let run = RunState::new();
    assert_eq!(h.engine.process_at(r, &run, at(20, 0)).await.unwrap(), Decision::Alive);
    assert_eq!(run.counters.get("resources-processed"), 0);
}

#[tokio::test]
async fn pvc_facts_flip_when_mounted() {
    let cluster = Arc::new(MemoryCluster::new());
    let provider = ContextProvider::new(cluster.clone(), Some(hooks::resolve("random_dice").unwrap()));
    cluster.insert(&pvcs(), claim("data"));
    let pvc = cluster.list(&Arc::new(pvcs()), Some("dev")).await.unwrap().pop().unwrap();
    let cache = RunCache::new();

    let facts = provider.get_context(&pvc, &cache).await.unwrap();
    assert_eq!(facts["pvc_is_not_mounted"], json!(true));
    assert_eq!(facts["pvc_is_not_referenced"], json!(true));
    let dice = facts["random_dice"].clone();

    cluster.insert(
        &pods(),
        json!({"metadata": {"name": "p", "namespace": "dev"},
               "spec": {"volumes": [{"name": "d", "persistentVolumeClaim": {"claimName": "data"}}]}}),
    );
    let facts = provider.get_context(&pvc, &cache).await.unwrap();
    assert_eq!(facts["pvc_is_not_mounted"], json!(false));
    assert_eq!(facts["pvc_is_not_referenced"], json!(true));
    assert_eq!(facts["random_dice"], dice);
}
