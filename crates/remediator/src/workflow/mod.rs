//! Remediation workflow: alert intake, approval gate and execution.
//!
//! ```text
//! INTAKE ─┬─ vetted + auto_execute ──────────────► AUTO_EXECUTE ─► EXECUTED | FAILED
//!         ├─ vetted + require_approval ──┐
//!         ├─ no SOP, alert.ai ─► filter ─┤
//!         └─ no SOP ─► advisor ─► filter ┴─► AWAITING_APPROVAL
//!                                                 │ decision(request_id)
//!                                                 ├─ reject  ─► REJECTED
//!                                                 ├─ approve ─► EXECUTED | FAILED
//!                                                 └─ too old ─► EXPIRED
//! ```
//!
//! Collaborator failures are turned into a terminal outcome plus a
//! notification here; only registry failures escape to the caller.


use chrono::Utc;
use notify::{Notification, Notifier};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::advisor::{AdvisorError, RemediationAdvisor};
use crate::alert::{Alert, AlertEnvelope, PrecomputedPlan};
use crate::config::{ConfigError, RemediationPolicy, VettedPolicy};
use crate::error::RemediationError;
use crate::executor::{CommandExecutor, ExecutionError};
use crate::plan::{CommandFilter, Procedure};
use crate::procedures::{ProcedureRepository, RepositoryError};
use crate::registry::{RegistryError, RemediationRegistry};
use crate::report::{self, CallbackBase};
use crate::types::{
    CommandPlan, Decision, ExecutionResult, IncidentContext, PlanOrigin, RemediationRequest,
    RequestId, RequestStatus,
};

/// Result of a successful intake for one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// An approval card was sent for a new pending request
    AwaitingApproval {
        request_id: RequestId,
        origin: PlanOrigin,
    },
    /// A vetted plan ran without a human decision
    AutoExecuted { status: RequestStatus },
    /// Same delivery already handled inside the dedup window
    Duplicate,
    /// Alert is not firing
    Skipped,
}

impl IntakeOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingApproval { .. } => "awaiting_approval",
            Self::AutoExecuted { .. } => "auto_executed",
            Self::Duplicate => "duplicate",
            Self::Skipped => "skipped",
        }
    }
}

/// Per-alert line of an intake response. Never carries the request id.
#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub incident: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<PlanOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response to one alert envelope.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeSummary {
    pub status: &'static str,
    pub alerts: Vec<AlertSummary>,
}

/// Result of a decision callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub status: RequestStatus,
    pub incident: String,
}

/// The remediation state machine and its collaborators.
pub struct RemediationWorkflow {
    policy: RemediationPolicy,
    filter: CommandFilter,
    callback: CallbackBase,
    registry: Arc<dyn RemediationRegistry>,
    executor: Arc<dyn CommandExecutor>,
    notifier: Arc<Notifier>,
    procedures: Option<Arc<dyn ProcedureRepository>>,
    advisor: Option<Arc<dyn RemediationAdvisor>>,
}

impl RemediationWorkflow {
    pub fn new(
        policy: RemediationPolicy,
        callback: CallbackBase,
        registry: Arc<dyn RemediationRegistry>,
        executor: Arc<dyn CommandExecutor>,
        notifier: Arc<Notifier>,
    ) -> Result<Self, ConfigError> {
        policy.validate()?;
        let filter = policy.command_filter()?;
        Ok(Self {
            policy,
            filter,
            callback,
            registry,
            executor,
            notifier,
            procedures: None,
            advisor: None,
        })
    }

    #[must_use]
    pub fn with_procedures(mut self, procedures: Arc<dyn ProcedureRepository>) -> Self {
        self.procedures = Some(procedures);
        self
    }

    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn RemediationAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RemediationPolicy {
        &self.policy
    }

    /// Process every alert of an Alertmanager envelope.
    ///
    /// Per-alert conditions are reported in the summary. A registry
    /// failure on any alert fails the whole delivery so the sender
    /// retries; alerts already handled are then reported as duplicates.
    pub async fn handle_envelope(
        &self,
        envelope: &AlertEnvelope,
    ) -> Result<IntakeSummary, RemediationError> {
        envelope.validate()?;

        let mut alerts = Vec::with_capacity(envelope.alerts.len());
        let mut registry_failure = None;

        for alert in &envelope.alerts {
            let incident = alert.incident_key().unwrap_or_default().to_string();
            match self.handle_alert(alert).await {
                Ok(outcome) => alerts.push(summarize(incident, &outcome)),
                Err(RemediationError::Registry(e)) => {
                    error!(incident = %incident, error = %e, "Registry failure during intake");
                    registry_failure = Some(e);
                }
                Err(e) => alerts.push(AlertSummary {
                    incident,
                    outcome: e.code(),
                    origin: None,
                    status: None,
                    detail: Some(e.to_string()),
                }),
            }
        }

        if let Some(e) = registry_failure {
            return Err(RemediationError::Registry(e));
        }
        Ok(IntakeSummary {
            status: "processed",
            alerts,
        })
    }

    /// Intake for a single alert, with delivery de-duplication.
    pub async fn handle_alert(&self, alert: &Alert) -> Result<IntakeOutcome, RemediationError> {
        let Some(incident_key) = alert.incident_key() else {
            return Err(RemediationError::InvalidInput(
                "alert is missing labels.alertname".to_string(),
            ));
        };

        if !alert.is_firing() {
            debug!(incident = %incident_key, status = %alert.status, "Skipping non-firing alert");
            return Ok(IntakeOutcome::Skipped);
        }

        let delivery_key = alert.delivery_key();
        let claimed = self
            .registry
            .claim_delivery(&delivery_key, self.policy.dedup_window())
            .await?;
        if !claimed {
            info!(incident = %incident_key, "Duplicate alert delivery ignored");
            return Ok(IntakeOutcome::Duplicate);
        }

        let result = self
            .resolve(incident_key, alert.context(), alert.ai.as_ref())
            .await;
        if matches!(result, Err(RemediationError::Registry(_))) {
            // Nothing was sent or run; let the retry through
            if let Err(e) = self.registry.release_delivery(&delivery_key).await {
                warn!(incident = %incident_key, error = %e, "Failed to release delivery claim");
            }
        }
        result
    }

    /// Decide the plan for an incident and either run it or ask a human.
    pub async fn intake(
        &self,
        incident_key: &str,
        context: IncidentContext,
    ) -> Result<IntakeOutcome, RemediationError> {
        self.resolve(incident_key, context, None).await
    }

    /// A vetted procedure always wins. Without one, a precomputed plan
    /// from the alert replaces the advisor call.
    async fn resolve(
        &self,
        incident_key: &str,
        mut context: IncidentContext,
        precomputed: Option<&PrecomputedPlan>,
    ) -> Result<IntakeOutcome, RemediationError> {
        info!(incident = %incident_key, precomputed = precomputed.is_some(), "Remediation intake");

        match self.lookup_vetted(incident_key).await {
            Ok(Some(procedure)) => {
                info!(
                    incident = %incident_key,
                    commands = procedure.commands.len(),
                    policy = self.policy.vetted_policy.as_str(),
                    "Using vetted procedure"
                );
                context.risk = procedure.risk.clone();
                // Upstream AI analysis does not describe the vetted plan
                context.ai_summary = None;
                context.ai_explanation = None;
                if context.description.is_empty() {
                    if let Some(description) = &procedure.description {
                        context.description.clone_from(description);
                    }
                }

                match self.policy.vetted_policy {
                    VettedPolicy::AutoExecute => {
                        self.auto_execute(incident_key, procedure.commands, context)
                            .await
                    }
                    VettedPolicy::RequireApproval => {
                        self.request_approval(
                            incident_key,
                            procedure.commands.as_slice().to_vec(),
                            PlanOrigin::Vetted,
                            context,
                        )
                        .await
                    }
                }
            }
            Ok(None) => match precomputed {
                Some(plan) => self.propose(incident_key, context, plan).await,
                None => self.advise(incident_key, context).await,
            },
            Err(e) => {
                warn!(incident = %incident_key, error = %e, "Vetted procedure unusable");
                self.send(report::invalid_procedure(incident_key, &context, &e.to_string()))
                    .await;
                Err(RemediationError::InvalidPlan(e))
            }
        }
    }

    /// Look up a vetted plan. Repository trouble degrades to "no plan".
    async fn lookup_vetted(
        &self,
        incident_key: &str,
    ) -> Result<Option<Procedure>, crate::plan::PlanError> {
        let Some(procedures) = &self.procedures else {
            return Ok(None);
        };

        match timeout(self.policy.lookup_timeout(), procedures.lookup(incident_key)).await {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(RepositoryError::InvalidDocument(e))) => Err(e),
            Ok(Err(e)) => {
                warn!(
                    incident = %incident_key,
                    error = %e,
                    "Procedure repository unavailable, falling back to advisor"
                );
                Ok(None)
            }
            Err(_) => {
                warn!(
                    incident = %incident_key,
                    timeout_secs = self.policy.lookup_timeout_secs,
                    "Procedure lookup timed out, falling back to advisor"
                );
                Ok(None)
            }
        }
    }

    /// No vetted plan: ask the advisor and filter its answer.
    async fn advise(
        &self,
        incident_key: &str,
        context: IncidentContext,
    ) -> Result<IntakeOutcome, RemediationError> {
        let advice = match &self.advisor {
            None => Err(AdvisorError::Unavailable("no advisor configured".to_string())),
            Some(advisor) => timeout(
                self.policy.advisor_timeout(),
                advisor.suggest(incident_key, &context.description),
            )
            .await
            .unwrap_or_else(|_| {
                Err(AdvisorError::Failed(format!(
                    "timed out after {}s",
                    self.policy.advisor_timeout_secs
                )))
            }),
        };

        let text = match advice {
            Ok(text) => text,
            Err(e) => {
                warn!(incident = %incident_key, error = %e, "No remediation plan available");
                self.send(report::no_plan(incident_key, &context, &e.to_string()))
                    .await;
                return Err(RemediationError::AdvisorUnavailable(e.to_string()));
            }
        };

        let commands = self.filter.extract(&text);
        if commands.is_empty() {
            info!(incident = %incident_key, "Advisor output contained no allowed commands");
            self.send(report::no_actionable_commands(incident_key, &context, &text))
                .await;
            return Err(RemediationError::NoActionableCommands);
        }

        self.request_approval(incident_key, commands, PlanOrigin::AiSuggested, context)
            .await
    }

    /// Filter commands that arrived with the alert and ask for approval.
    async fn propose(
        &self,
        incident_key: &str,
        context: IncidentContext,
        plan: &PrecomputedPlan,
    ) -> Result<IntakeOutcome, RemediationError> {
        let commands: Vec<String> = plan
            .commands
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty() && self.filter.allows(c))
            .map(ToString::to_string)
            .collect();

        let dropped = plan.commands.len() - commands.len();
        if dropped > 0 {
            info!(
                incident = %incident_key,
                dropped,
                "Precomputed commands outside the allow-list dropped"
            );
        }
        if commands.is_empty() {
            self.send(report::no_actionable_commands(
                incident_key,
                &context,
                &plan.commands.join("\n"),
            ))
            .await;
            return Err(RemediationError::NoActionableCommands);
        }

        self.request_approval(incident_key, commands, PlanOrigin::AiSuggested, context)
            .await
    }

    /// Register a pending request and send the approval card.
    async fn request_approval(
        &self,
        incident_key: &str,
        commands: Vec<String>,
        origin: PlanOrigin,
        context: IncidentContext,
    ) -> Result<IntakeOutcome, RemediationError> {
        let plan = CommandPlan::new(commands.clone())?;
        let request_id = self
            .registry
            .create(incident_key, commands, origin, context.clone())
            .await
            .map_err(|e| match e {
                RegistryError::InvalidPlan(p) => RemediationError::InvalidPlan(p),
                other @ RegistryError::Unavailable(_) => RemediationError::Registry(other),
            })?;

        // Card view of the stored request
        let request = RemediationRequest::restore(
            request_id.clone(),
            incident_key.to_string(),
            origin,
            plan,
            Utc::now(),
            context,
        );
        self.send(report::approval_request(&request, &self.callback))
            .await;

        info!(
            request_id = %request_id,
            incident = %incident_key,
            origin = origin.as_str(),
            "Awaiting approval"
        );
        Ok(IntakeOutcome::AwaitingApproval { request_id, origin })
    }

    /// Run a vetted plan immediately.
    async fn auto_execute(
        &self,
        incident_key: &str,
        plan: CommandPlan,
        context: IncidentContext,
    ) -> Result<IntakeOutcome, RemediationError> {
        let mut request = RemediationRequest::new(incident_key, plan, PlanOrigin::Vetted, context);
        request.advance(RequestStatus::Approved)?;

        self.execute(&mut request).await?;
        self.send(report::execution_outcome(&request, true)).await;

        Ok(IntakeOutcome::AutoExecuted {
            status: request.status,
        })
    }

    /// Apply a human decision to a pending request.
    ///
    /// Malformed, unknown and already-consumed ids are indistinguishable
    /// to the caller.
    pub async fn decide(
        &self,
        raw_request_id: &str,
        decision: Decision,
    ) -> Result<DecisionOutcome, RemediationError> {
        let Some(request_id) = RequestId::parse(raw_request_id) else {
            debug!("Decision for malformed request id");
            return Err(RemediationError::AlreadyResolvedOrUnknown);
        };

        let Some(mut request) = self.registry.consume(&request_id).await? else {
            info!(
                request_id = %request_id,
                decision = decision.as_str(),
                "Decision for resolved or unknown request"
            );
            return Err(RemediationError::AlreadyResolvedOrUnknown);
        };

        if request.is_older_than(self.policy.request_ttl(), Utc::now()) {
            request.advance(RequestStatus::Expired)?;
            warn!(
                request_id = %request_id,
                incident = %request.incident_key,
                "Decision arrived after expiry"
            );
            self.send(report::expired(&request)).await;
            return Err(RemediationError::Expired(request_id));
        }

        match decision {
            Decision::Reject => {
                request.advance(RequestStatus::Rejected)?;
                info!(
                    request_id = %request_id,
                    incident = %request.incident_key,
                    "Remediation rejected"
                );
                self.send(report::rejected(&request)).await;
            }
            Decision::Approve => {
                request.advance(RequestStatus::Approved)?;
                info!(
                    request_id = %request_id,
                    incident = %request.incident_key,
                    "Remediation approved"
                );
                self.execute(&mut request).await?;
                self.send(report::execution_outcome(&request, false)).await;
            }
        }

        Ok(DecisionOutcome {
            status: request.status,
            incident: request.incident_key,
        })
    }

    /// Run an APPROVED request and attach the result. Never retried.
    async fn execute(&self, request: &mut RemediationRequest) -> Result<(), RemediationError> {
        let run = self
            .executor
            .run(request.commands(), self.policy.halt_on_failure);

        let result = match timeout(self.policy.execution_timeout(), run).await {
            Ok(Ok(report)) => ExecutionResult::Completed(report),
            Ok(Err(e)) => ExecutionResult::Error {
                message: e.to_string(),
            },
            Err(_) => ExecutionResult::Error {
                message: ExecutionError::Timeout {
                    secs: self.policy.execution_timeout_secs,
                }
                .to_string(),
            },
        };

        request.complete(result)?;
        match request.status {
            RequestStatus::Executed => info!(
                request_id = %request.request_id,
                incident = %request.incident_key,
                "Remediation executed"
            ),
            _ => warn!(
                request_id = %request.request_id,
                incident = %request.incident_key,
                "Remediation failed"
            ),
        }
        Ok(())
    }

    /// Sweep PENDING requests past their approval window.
    pub async fn expire_stale(&self) -> Result<usize, RemediationError> {
        let expired = self.registry.expire(self.policy.request_ttl()).await?;
        for request in &expired {
            info!(
                request_id = %request.request_id,
                incident = %request.incident_key,
                "Request expired"
            );
            self.send(report::expired(request)).await;
        }
        Ok(expired.len())
    }

    /// Number of requests waiting for a decision.
    pub async fn pending_count(&self) -> Result<usize, RemediationError> {
        Ok(self.registry.pending_count().await?)
    }

    /// Read a stored procedure.
    pub async fn procedure(
        &self,
        incident_key: &str,
    ) -> Result<Option<Procedure>, RemediationError> {
        let procedures = self.require_procedures()?;
        match timeout(self.policy.lookup_timeout(), procedures.lookup(incident_key)).await {
            Ok(result) => result.map_err(repository_error),
            Err(_) => Err(RemediationError::RepositoryUnavailable(
                "procedure lookup timed out".to_string(),
            )),
        }
    }

    /// Store a procedure.
    pub async fn save_procedure(
        &self,
        incident_key: &str,
        procedure: &Procedure,
    ) -> Result<(), RemediationError> {
        let procedures = self.require_procedures()?;
        procedures
            .save(incident_key, procedure)
            .await
            .map_err(repository_error)?;
        info!(incident = %incident_key, commands = procedure.commands.len(), "Procedure saved");
        Ok(())
    }

    fn require_procedures(&self) -> Result<&Arc<dyn ProcedureRepository>, RemediationError> {
        self.procedures.as_ref().ok_or_else(|| {
            RemediationError::RepositoryUnavailable(
                "no procedure repository configured".to_string(),
            )
        })
    }

    /// Deliver a notification. Delivery failures are logged, never retried.
    async fn send(&self, notification: Notification) {
        let title = notification.title.clone();
        if timeout(
            self.policy.notify_timeout(),
            self.notifier.notify_and_wait(&notification),
        )
        .await
        .is_err()
        {
            warn!(title = %title, "Notification delivery timed out");
        }
    }
}

fn repository_error(e: RepositoryError) -> RemediationError {
    match e {
        RepositoryError::InvalidDocument(p) => RemediationError::InvalidPlan(p),
        RepositoryError::InvalidKey(key) => {
            RemediationError::InvalidInput(format!("invalid incident key: {key}"))
        }
        RepositoryError::Unavailable(msg) => RemediationError::RepositoryUnavailable(msg),
    }
}

fn summarize(incident: String, outcome: &IntakeOutcome) -> AlertSummary {
    let (origin, status) = match outcome {
        IntakeOutcome::AwaitingApproval { origin, .. } => {
            (Some(*origin), Some(RequestStatus::Pending))
        }
        IntakeOutcome::AutoExecuted { status } => (Some(PlanOrigin::Vetted), Some(*status)),
        IntakeOutcome::Duplicate | IntakeOutcome::Skipped => (None, None),
    };
    AlertSummary {
        incident,
        outcome: outcome.as_str(),
        origin,
        status,
        detail: None,
    }
}
