//! Per-resource lifecycle: TTL/rule branch, absolute-expiry branch, and their side effects.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use janitor_core::{
    parse_expiry, parse_ttl, ClientError, ClusterClient, Decision, JanitorError, Resource, Ttl, EXPIRY_ANNOTATION,
    NOTIFIED_ANNOTATION, NOTIFIED_VALUE, TTL_ANNOTATION,
};
use janitor_rules::RuleSet;
use tracing::{debug, info, warn};

use crate::config::JanitorConfig;
use crate::context::ContextProvider;
use crate::dispatch::{ResourceHandler, RunState, RESOURCES_PROCESSED};
use crate::filter::ResourceFilter;
use crate::hooks::ContextHook;
use crate::notify::Notifier;

pub const REASON_TTL_EXPIRED: &str = "TTLExpired";
pub const REASON_RULE_TTL_EXPIRED: &str = "RuleTTLExpired";
pub const REASON_EXPIRY_REACHED: &str = "ExpiryTimeReached";
pub const REASON_DELETE_NOTIFICATION: &str = "DeleteNotification";

/// Classify one branch: expired at or after `expires_at`, pending inside the
/// notify-ahead window unless already notified, otherwise alive.
pub fn classify(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Option<Duration>,
    notified: bool,
    reason: &str,
) -> Decision {
    if now >= expires_at {
        return Decision::Expired { reason: reason.to_string(), expires_at };
    }
    if let Some(notify_at) = window.and_then(|w| expires_at.checked_sub_signed(w)) {
        if now >= notify_at && !notified {
            return Decision::NotifyPending { reason: reason.to_string(), notify_at, expires_at };
        }
    }
    Decision::Alive
}

/// `[<context>] <Kind> <ns>/<name> will be deleted at <RFC3339> (<reason>)`.
pub fn notification_message(
    context_name: Option<&str>,
    resource: &Resource,
    expires_at: DateTime<Utc>,
    reason: &str,
) -> String {
    let prefix = context_name.map(|c| format!("[{c}] ")).unwrap_or_default();
    format!(
        "{prefix}{} {}/{} will be deleted at {} ({reason})",
        resource.kind(),
        resource.namespace.as_deref().unwrap_or_default(),
        resource.name,
        rfc3339(expires_at),
    )
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Where a TTL came from; decides the event reason and message.
enum TtlSource {
    Annotation,
    Rule(String),
}

/// Side-effect bookkeeping within one decision pass.
#[derive(Default)]
struct Pass {
    deleted: bool,
    notified: bool,
}

pub struct LifecycleEngine {
    client: Arc<dyn ClusterClient>,
    rules: Arc<RuleSet>,
    context: ContextProvider,
    notifier: Arc<dyn Notifier>,
    filter: ResourceFilter,
    dry_run: bool,
    quiet: bool,
    window: Option<Duration>,
    wait_after_delete: std::time::Duration,
    deployment_time_annotation: Option<String>,
    context_name: Option<String>,
}

impl LifecycleEngine {
    pub fn new(
        config: &JanitorConfig,
        client: Arc<dyn ClusterClient>,
        rules: Arc<RuleSet>,
        hook: Option<Arc<dyn ContextHook>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            context: ContextProvider::new(Arc::clone(&client), hook),
            client,
            rules,
            notifier,
            filter: ResourceFilter::from_config(config),
            dry_run: config.dry_run,
            quiet: config.quiet,
            window: config.notify_window(),
            wait_after_delete: config.wait_after_delete,
            deployment_time_annotation: config.deployment_time_annotation.clone().filter(|a| !a.is_empty()),
            context_name: config.context_name.clone().filter(|c| !c.is_empty()),
        }
    }

    pub fn filter(&self) -> &ResourceFilter {
        &self.filter
    }

    pub async fn process(&self, resource: Resource, run: &RunState) -> Result<Decision, JanitorError> {
        self.process_at(resource, run, Utc::now()).await
    }

    /// Run both branches for one resource at instant `now`; the more severe outcome is returned.
    /// A failing TTL branch does not stop the expiry branch; the first error is reported after both ran.
    pub async fn process_at(
        &self,
        mut resource: Resource,
        run: &RunState,
        now: DateTime<Utc>,
    ) -> Result<Decision, JanitorError> {
        if !self.filter.admits(&resource) {
            return Ok(Decision::Alive);
        }
        run.counters.incr(RESOURCES_PROCESSED);
        let mut pass = Pass::default();
        let ttl = self.ttl_branch(&mut resource, run, now, &mut pass).await;
        let expiry = self.expiry_branch(&mut resource, run, now, &mut pass).await;
        match (ttl, expiry) {
            (Ok(ttl), Ok(expiry)) => Ok(ttl.merge(expiry)),
            (Err(e), other) => {
                if let Ok(expiry) = other {
                    debug!(decision = ?expiry, "expiry branch completed after TTL branch failure");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
        }
    }

    async fn ttl_branch(
        &self,
        resource: &mut Resource,
        run: &RunState,
        now: DateTime<Utc>,
        pass: &mut Pass,
    ) -> Result<Decision, JanitorError> {
        let (ttl, ttl_raw, source) = match resource.annotation(TTL_ANNOTATION) {
            Some(raw) => match parse_ttl(raw) {
                Ok(ttl) => (ttl, raw.to_string(), TtlSource::Annotation),
                Err(e) => {
                    warn!(kind = %resource.kind(), name = %resource.display_name(), error = %JanitorError::from(e), "ignoring TTL annotation");
                    return Ok(Decision::Alive);
                }
            },
            None => {
                let type_name = resource.type_name();
                if !self.rules.iter().any(|r| r.applies_to(&type_name)) {
                    return Ok(Decision::Alive);
                }
                let facts = self.context.context_or_empty(resource, &run.cache).await;
                let Some(rule) = self.rules.first_match(resource, &facts) else {
                    return Ok(Decision::Alive);
                };
                if !self.quiet {
                    info!(rule = %rule.id, kind = %resource.kind(), name = %resource.display_name(), "rule matched");
                }
                (rule.ttl(), rule.ttl_raw().to_string(), TtlSource::Rule(rule.id.clone()))
            }
        };

        if ttl == Ttl::Forever {
            debug!(kind = %resource.kind(), name = %resource.display_name(), "unlimited TTL");
            return Ok(Decision::Alive);
        }
        let Some(deployed) = self.deployment_time(resource) else {
            warn!(kind = %resource.kind(), name = %resource.display_name(), "no creation timestamp, cannot apply TTL");
            return Ok(Decision::Alive);
        };
        let Some(expires_at) = ttl.expires_at(deployed) else {
            return Ok(Decision::Alive);
        };

        let (reason, event_reason) = match &source {
            TtlSource::Annotation => (format!("TTL {ttl_raw} from {}", rfc3339(deployed)), REASON_TTL_EXPIRED),
            TtlSource::Rule(id) => (
                format!("rule {id}, TTL {ttl_raw} from {}", rfc3339(deployed)),
                REASON_RULE_TTL_EXPIRED,
            ),
        };
        let decision = classify(expires_at, now, self.window, resource.is_notified(), &reason);
        match &decision {
            Decision::Expired { .. } => {
                let message = format!(
                    "{} {}/{} expired on {} and will be deleted ({reason})",
                    resource.kind(),
                    resource.namespace.as_deref().unwrap_or_default(),
                    resource.name,
                    rfc3339(expires_at),
                );
                self.expire(resource, event_reason, &message, run, pass).await?;
            }
            Decision::NotifyPending { .. } => self.notify(resource, &reason, expires_at, run, pass).await?,
            Decision::Alive => {
                if !self.quiet {
                    debug!(kind = %resource.kind(), name = %resource.display_name(), expires_at = %rfc3339(expires_at), "not expired yet");
                }
            }
        }
        Ok(decision)
    }

    async fn expiry_branch(
        &self,
        resource: &mut Resource,
        run: &RunState,
        now: DateTime<Utc>,
        pass: &mut Pass,
    ) -> Result<Decision, JanitorError> {
        let Some(raw) = resource.annotation(EXPIRY_ANNOTATION).map(str::to_string) else {
            return Ok(Decision::Alive);
        };
        let expires_at = match parse_expiry(&raw) {
            Ok(t) => t,
            Err(e) => {
                warn!(kind = %resource.kind(), name = %resource.display_name(), error = %JanitorError::from(e), "ignoring expiry annotation");
                return Ok(Decision::Alive);
            }
        };
        let reason = format!("annotation {EXPIRY_ANNOTATION} is set");
        let decision = classify(expires_at, now, self.window, resource.is_notified(), &reason);
        match &decision {
            Decision::Expired { .. } => {
                let message = format!(
                    "{} {}/{} expired on {raw} and will be deleted ({reason})",
                    resource.kind(),
                    resource.namespace.as_deref().unwrap_or_default(),
                    resource.name,
                );
                self.expire(resource, REASON_EXPIRY_REACHED, &message, run, pass).await?;
            }
            Decision::NotifyPending { .. } => self.notify(resource, &reason, expires_at, run, pass).await?,
            Decision::Alive => {}
        }
        Ok(decision)
    }

    /// Alternate deployment-time annotation when set and parseable, else creation time.
    fn deployment_time(&self, resource: &Resource) -> Option<DateTime<Utc>> {
        if let Some(key) = &self.deployment_time_annotation {
            if let Some(raw) = resource.annotation(key) {
                match parse_expiry(raw) {
                    Ok(t) => return Some(t),
                    Err(e) => debug!(annotation = %key, error = %e, "unparseable deployment time, using creation time"),
                }
            }
        }
        resource.created
    }

    async fn expire(
        &self,
        resource: &Resource,
        event_reason: &str,
        message: &str,
        run: &RunState,
        pass: &mut Pass,
    ) -> Result<(), JanitorError> {
        let kind = resource.kind();
        let name = resource.display_name();
        if self.dry_run {
            info!(%kind, %name, reason = %event_reason, "DRY-RUN: would create event: {message}");
            info!(%kind, %name, "DRY-RUN: would delete");
        } else {
            self.client.create_event(resource, event_reason, message).await?;
            match self.client.delete(resource).await {
                Ok(()) => {
                    info!(%kind, %name, reason = %event_reason, "deleted");
                    if !self.wait_after_delete.is_zero() {
                        debug!(secs = self.wait_after_delete.as_secs(), "waiting after delete");
                        tokio::time::sleep(self.wait_after_delete).await;
                    }
                }
                Err(ClientError::NotFound(_)) => warn!(%kind, %name, "already deleted"),
                Err(e) => return Err(e.into()),
            }
        }
        if !pass.deleted {
            pass.deleted = true;
            run.counters.incr(&format!("{}-deleted", resource.type_name()));
        }
        Ok(())
    }

    async fn notify(
        &self,
        resource: &mut Resource,
        reason: &str,
        expires_at: DateTime<Utc>,
        run: &RunState,
        pass: &mut Pass,
    ) -> Result<(), JanitorError> {
        if pass.notified {
            return Ok(());
        }
        let message = notification_message(self.context_name.as_deref(), resource, expires_at, reason);
        let kind = resource.kind().to_string();
        let name = resource.display_name();
        if self.dry_run {
            info!(%kind, %name, "DRY-RUN: would send delete notification: {message}");
        } else {
            if !self.quiet {
                info!(%kind, %name, expires_at = %rfc3339(expires_at), "sending delete notification");
            }
            self.client.create_event(resource, REASON_DELETE_NOTIFICATION, &message).await?;
            if let Err(e) = self.notifier.notify(&message).await {
                warn!(%kind, %name, error = %format!("{e:#}"), "webhook notification failed");
            }
            if let Err(e) = self.client.annotate(resource, NOTIFIED_ANNOTATION, NOTIFIED_VALUE).await {
                warn!(%kind, %name, error = %e, "failed to persist notified marker");
            }
            resource.set_annotation(NOTIFIED_ANNOTATION, NOTIFIED_VALUE);
        }
        pass.notified = true;
        run.counters.incr(&format!("{}-notified", resource.type_name()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResourceHandler for LifecycleEngine {
    async fn handle(&self, resource: Resource, run: &RunState) -> Result<(), JanitorError> {
        let decision = self.process(resource, run).await?;
        debug!(?decision, "decided");
        Ok(())
    }
}
