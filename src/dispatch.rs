//! Per-mutation dispatch pipeline.
//!
//! Order of checks is fixed: transition, message, owner (all pure), then the
//! token lookup and the provider call. Every branch ends in a
//! [`DispatchOutcome`]; nothing is returned as an error to the writer.

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::model::{
    DispatchFailure, DispatchOutcome, EntitySnapshot, MutationEvent, NotificationSpec, SkipReason,
    Transition,
};
use crate::policy;
use crate::push::DeliveryGateway;
use crate::recipient::{RecipientResolver, ResolveError};
use crate::transition;

pub const DEFAULT_STATUS_FIELD: &str = "status";
pub const DEFAULT_OWNER_FIELD: &str = "customer";

/// Log context for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub dispatch_id: Uuid,
    pub entity_id: String,
    pub old_status: String,
    pub new_status: String,
    pub owner_id: String,
}

/// Result of the pure checks, ready for the I/O half of the pipeline.
#[derive(Debug, Clone)]
pub struct PlannedDispatch {
    pub context: DispatchContext,
    pub transition: Transition,
    pub spec: NotificationSpec,
}

#[derive(Debug, Clone)]
pub enum Plan {
    Skip(DispatchContext, SkipReason),
    Dispatch(PlannedDispatch),
}

pub struct DispatchCoordinator {
    resolver: RecipientResolver,
    gateway: DeliveryGateway,
    status_field: String,
    owner_field: String,
}

impl DispatchCoordinator {
    pub fn new(resolver: RecipientResolver, gateway: DeliveryGateway) -> Self {
        Self::with_fields(resolver, gateway, DEFAULT_STATUS_FIELD, DEFAULT_OWNER_FIELD)
    }

    pub fn with_fields(
        resolver: RecipientResolver,
        gateway: DeliveryGateway,
        status_field: impl Into<String>,
        owner_field: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            gateway,
            status_field: status_field.into(),
            owner_field: owner_field.into(),
        }
    }

    pub fn status_field(&self) -> &str {
        &self.status_field
    }

    pub fn owner_field(&self) -> &str {
        &self.owner_field
    }

    /// Steps 1–3: transition, message, owner. No I/O.
    pub fn plan(
        &self,
        original: &EntitySnapshot,
        current: &EntitySnapshot,
        fallback_owner: Option<&str>,
    ) -> Plan {
        let owner_id = current
            .get(&self.owner_field)
            .or(fallback_owner)
            .unwrap_or_default()
            .trim()
            .to_string();
        let context = DispatchContext {
            dispatch_id: Uuid::new_v4(),
            entity_id: current.id.clone(),
            old_status: original.get(&self.status_field).unwrap_or_default().to_string(),
            new_status: current.get(&self.status_field).unwrap_or_default().to_string(),
            owner_id,
        };

        let Some(transition) = transition::detect(original, current, &self.status_field) else {
            return Plan::Skip(context, SkipReason::NoTransition);
        };
        let Some(spec) = policy::compose(&transition) else {
            return Plan::Skip(context, SkipReason::StatusNotNotifiable);
        };
        if context.owner_id.is_empty() {
            return Plan::Skip(context, SkipReason::NoOwner);
        }
        Plan::Dispatch(PlannedDispatch {
            context,
            transition,
            spec,
        })
    }

    /// Plan for a raw mutation event, using its `owner_id` only as a fallback.
    pub fn plan_event(&self, event: &MutationEvent) -> Plan {
        self.plan(&event.original(), &event.current(), event.owner_id.as_deref())
    }

    /// Steps 4–5: resolve the destination and hand the message to the gateway.
    #[instrument(skip_all, fields(dispatch_id = %planned.context.dispatch_id))]
    pub async fn execute(&self, planned: PlannedDispatch) -> DispatchOutcome {
        let outcome = match self.resolver.resolve(&planned.context.owner_id).await {
            Err(ResolveError::NotFound) => DispatchOutcome::Skipped(SkipReason::NoDestination),
            Err(err @ ResolveError::Store(_)) => {
                DispatchOutcome::Failed(DispatchFailure::Resolver(err.to_string()))
            }
            Ok(destination) => match self.gateway.deliver(&destination, &planned.spec).await {
                Ok(receipt) => DispatchOutcome::Delivered(receipt),
                Err(err) => DispatchOutcome::Failed(DispatchFailure::Delivery(err)),
            },
        };
        record_outcome(&planned.context, &outcome);
        outcome
    }

    /// Run the whole pipeline for one mutation and report what happened.
    pub async fn on_mutation(
        &self,
        original: &EntitySnapshot,
        current: &EntitySnapshot,
    ) -> DispatchOutcome {
        self.run(self.plan(original, current, None)).await
    }

    pub async fn on_event(&self, event: &MutationEvent) -> DispatchOutcome {
        self.run(self.plan_event(event)).await
    }

    async fn run(&self, plan: Plan) -> DispatchOutcome {
        match plan {
            Plan::Skip(context, reason) => {
                let outcome = DispatchOutcome::Skipped(reason);
                record_outcome(&context, &outcome);
                outcome
            }
            Plan::Dispatch(planned) => self.execute(planned).await,
        }
    }
}

/// Emit the single structured event for a finished dispatch.
pub fn record_outcome(ctx: &DispatchContext, outcome: &DispatchOutcome) {
    let kind = outcome.kind();
    match outcome {
        DispatchOutcome::Skipped(_) => info!(
            dispatch_id = %ctx.dispatch_id,
            entity_id = %ctx.entity_id,
            old_status = %ctx.old_status,
            new_status = %ctx.new_status,
            owner_id = %ctx.owner_id,
            outcome = kind,
            "dispatch skipped"
        ),
        DispatchOutcome::Delivered(receipt) => info!(
            dispatch_id = %ctx.dispatch_id,
            entity_id = %ctx.entity_id,
            old_status = %ctx.old_status,
            new_status = %ctx.new_status,
            owner_id = %ctx.owner_id,
            outcome = kind,
            receipt = %receipt.id,
            "notification delivered"
        ),
        DispatchOutcome::Failed(DispatchFailure::Resolver(err)) => warn!(
            dispatch_id = %ctx.dispatch_id,
            entity_id = %ctx.entity_id,
            old_status = %ctx.old_status,
            new_status = %ctx.new_status,
            owner_id = %ctx.owner_id,
            outcome = kind,
            error = %err,
            "token lookup failed; notification dropped"
        ),
        DispatchOutcome::Failed(DispatchFailure::Delivery(err)) => error!(
            dispatch_id = %ctx.dispatch_id,
            entity_id = %ctx.entity_id,
            old_status = %ctx.old_status,
            new_status = %ctx.new_status,
            owner_id = %ctx.owner_id,
            outcome = kind,
            error = %err,
            "push delivery failed"
        ),
    }
}
