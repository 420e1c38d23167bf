use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::definition::{BuildContext, ManagedKind};
use super::workloads::settings_annotations;
use super::Reconciler;

impl Reconciler {
    /// Roll the pods of every workload that mounts `changed`, so they pick up the new content.
    ///
    /// A restart stamps the new settings hash on the pod template, the same annotation the
    /// workload builder sets. A failed restart is logged and the pass carries on; the stale
    /// hash then shows up as drift on the next pass, which rolls the pods instead. Returns
    /// the workloads that were restarted.
    pub async fn on_shared_config_changed(
        &self,
        ctx: &BuildContext<'_>,
        changed: ManagedKind,
    ) -> Vec<ManagedKind> {
        let pulp = ctx.pulp;
        let namespace = pulp.namespace().unwrap_or_default();
        let annotations = settings_annotations(ctx);
        let mut restarted = Vec::new();

        for dependent in changed.dependents() {
            let name = ctx.names.name_of(*dependent);
            info!(
                "Reprovisioning {name} pods to get the new {} settings",
                changed.alias()
            );
            match self.cluster().restart(&namespace, name, &annotations).await {
                Ok(true) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.restart(pulp);
                    }
                    restarted.push(*dependent);
                }
                Ok(false) => debug!("Deployment {name} does not exist yet, nothing to restart"),
                Err(err) => warn!("Failed to restart Deployment {name}: {err}"),
            }
        }

        restarted
    }
}
