use tracing::{error, info, warn};

use crate::Result;

use super::conditions::ConditionSet;
use super::definition::{BuildContext, ResourceDefinition};
use super::{EventSeverity, ReconcileOutcome, Reconciler};

impl Reconciler {
    /// Create the object behind `definition` if it does not exist yet.
    ///
    /// A successful create requeues the pass so that the drift check runs against the stored
    /// object. Lookup failures are returned before anything is mutated.
    pub async fn ensure(
        &self,
        conditions: &mut ConditionSet<'_>,
        definition: &ResourceDefinition<'_>,
        ctx: &BuildContext<'_>,
    ) -> Result<ReconcileOutcome> {
        let kind = definition.object_kind();
        let name = &definition.name;

        if self
            .cluster()
            .get(kind, &definition.namespace, name)
            .await?
            .is_some()
        {
            return Ok(ReconcileOutcome::done());
        }

        let object = definition.build(ctx)?;
        let pulp = conditions.pulp();

        info!("Creating a new {} {kind} {name}", definition.alias);
        self.set_condition(
            conditions,
            &definition.condition_type,
            false,
            &format!("Creating{}", definition.alias),
            &format!("Creating {name} {kind} resource"),
        )
        .await?;

        if let Err(err) = self.cluster().create(&object).await {
            error!("Failed to create {kind} {name}: {err}");
            if let Err(status_err) = self
                .set_condition(
                    conditions,
                    &definition.condition_type,
                    false,
                    &format!("ErrorCreating{}", definition.alias),
                    &format!("Failed to create {name} {kind} resource"),
                )
                .await
            {
                warn!("Failed to record create failure of {kind} {name}: {status_err}");
            }
            self.publish(
                pulp,
                EventSeverity::Warning,
                "Failed",
                format!("Failed to create {} {kind}: {err}", definition.alias),
            )
            .await;
            return Err(err);
        }

        self.publish(
            pulp,
            EventSeverity::Normal,
            "Created",
            format!("{} {kind} created", definition.alias),
        )
        .await;
        Ok(ReconcileOutcome::requeue())
    }
}
