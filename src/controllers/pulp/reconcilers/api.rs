use std::time::Duration;

use kube::ResourceExt;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::resources::pulps::{non_empty, Pulp};
use crate::{Error, Result};

use super::conditions::{api_ready_condition_type, content_ready_condition_type, ConditionSet};
use super::definition::{BuildContext, ManagedKind, ResourceDefinition, ResourceNames};
use super::settings::resolve_settings_inputs;
use super::storage::{storage_backend, StorageBackend};
use super::workloads::Workload;
use super::{ReconcileOutcome, Reconciler};

/// Reconciliation order. Shared configuration comes before the workloads that mount it.
const PASS_ORDER: [ManagedKind; 9] = [
    ManagedKind::FileStorage,
    ManagedKind::ServerSecret,
    ManagedKind::DbFieldsEncryptionSecret,
    ManagedKind::AdminPasswordSecret,
    ManagedKind::ContainerAuthSecret,
    ManagedKind::ApiDeployment,
    ManagedKind::ApiService,
    ManagedKind::ContentDeployment,
    ManagedKind::ContentService,
];

/// The definitions one pass walks, in order. The file storage claim is only managed when a
/// StorageClass backs the file storage.
pub fn work_list<'a>(
    pulp: &'a Pulp,
    names: &ResourceNames,
    namespace: &str,
    backend: &StorageBackend,
) -> Vec<ResourceDefinition<'a>> {
    let api_condition = api_ready_condition_type(pulp);
    let content_condition = content_ready_condition_type(pulp);

    PASS_ORDER
        .into_iter()
        .filter(|kind| *kind != ManagedKind::FileStorage || backend.is_storage_class())
        .map(|kind| {
            let condition_type = match kind.workload() {
                Workload::Api => api_condition.clone(),
                Workload::Content => content_condition.clone(),
            };
            ResourceDefinition::new(pulp, kind, names, namespace, condition_type)
        })
        .collect()
}

impl Reconciler {
    /// Record the default secret names in the Pulp spec so users can see which secrets to read
    async fn apply_spec_defaults(&self, pulp: &Pulp, names: &ResourceNames) -> Result<()> {
        let spec = &pulp.spec;
        let mut patch = Map::new();
        for (field, current, default) in [
            (
                "adminPasswordSecret",
                &spec.admin_password_secret,
                &names.admin_password,
            ),
            (
                "containerTokenSecret",
                &spec.container_token_secret,
                &names.container_auth,
            ),
            (
                "dbFieldsEncryptionSecret",
                &spec.db_fields_encryption_secret,
                &names.db_fields_encryption,
            ),
        ] {
            if non_empty(current).is_none() {
                patch.insert(field.into(), Value::String(default.clone()));
            }
        }

        if patch.is_empty() {
            return Ok(());
        }
        debug!("Setting default secret names on Pulp {}", pulp.name_any());
        self.cluster().patch_spec(pulp, &Value::Object(patch)).await
    }

    /// One convergence pass over every managed resource of `pulp`.
    ///
    /// Stops at the first step that creates or updates something and asks to be requeued; the
    /// next pass starts again from the top.
    pub async fn reconcile_pulp(&self, pulp: &Pulp) -> Result<ReconcileOutcome> {
        let namespace = pulp
            .namespace()
            .ok_or_else(|| Error::MissingObjectKey(format!("Pulp {}", pulp.name_any()), "namespace"))?;
        let names = ResourceNames::new(pulp);

        self.apply_spec_defaults(pulp, &names).await?;

        let backend = storage_backend(pulp);
        let inputs = resolve_settings_inputs(self.cluster(), pulp, &backend).await?;
        let ctx = BuildContext {
            pulp,
            names: &names,
            storage: backend.clone(),
            settings: &inputs,
        };
        // the cached copy can trail our own status writes from the previous pass
        let stored_status = self.cluster().status(pulp).await?;
        let mut conditions = ConditionSet::with_status(pulp, stored_status);

        for definition in work_list(pulp, &names, &namespace, &backend) {
            let outcome = self.ensure(&mut conditions, &definition, &ctx).await?;
            if outcome.requeue {
                return Ok(outcome);
            }

            if !definition.kind.drift_checked() {
                continue;
            }

            let Some(observed) = self
                .cluster()
                .get(definition.object_kind(), &namespace, &definition.name)
                .await?
            else {
                // deleted between the two lookups
                return Ok(ReconcileOutcome::requeue());
            };
            let expected = definition.build(&ctx)?;

            let outcome = self
                .reconcile(&mut conditions, &definition, &expected, &observed)
                .await?;
            if outcome.requeue {
                if !definition.kind.dependents().is_empty() {
                    self.on_shared_config_changed(&ctx, definition.kind).await;
                }
                return Ok(outcome);
            }
        }

        self.set_condition(
            &mut conditions,
            &api_ready_condition_type(pulp),
            true,
            "ApiTasksFinished",
            "All API tasks ran successfully",
        )
        .await?;
        self.set_condition(
            &mut conditions,
            &content_ready_condition_type(pulp),
            true,
            "ContentTasksFinished",
            "All Content tasks ran successfully",
        )
        .await?;

        info!("Pulp {} is reconciled", pulp.name_any());
        Ok(ReconcileOutcome::done())
    }

    /// [`Reconciler::reconcile_pulp`] under a deadline
    pub async fn reconcile_pulp_within(
        &self,
        pulp: &Pulp,
        deadline: Duration,
    ) -> Result<ReconcileOutcome> {
        tokio::time::timeout(deadline, self.reconcile_pulp(pulp))
            .await
            .map_err(|_| Error::DeadlineExceeded(deadline))?
    }
}
