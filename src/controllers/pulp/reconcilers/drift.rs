use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::Result;

use super::conditions::ConditionSet;
use super::definition::{ManagedObject, ResourceDefinition};
use super::quantity::same_quantity;
use super::{EventSeverity, ReconcileOutcome, Reconciler};

const UPDATE_REQUEUE_DELAY: Duration = Duration::from_secs(1);

// a field the apiserver would drop on write
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Whether every field set in `expected` has the same value in `observed`.
///
/// Fields missing from `expected` are ignored so that server-populated defaults never count as
/// drift. Arrays are compared element by element and must have the same length. Values under
/// `requests` and `limits` are compared as quantities, since the apiserver rewrites them to
/// their canonical form.
pub fn is_subset(expected: &Value, observed: &Value) -> bool {
    is_subset_in(expected, observed, false)
}

fn is_subset_in(expected: &Value, observed: &Value, quantities: bool) -> bool {
    match (expected, observed) {
        (Value::Null, _) => true,
        (Value::Object(expected), Value::Object(observed)) => {
            expected.iter().all(|(key, value)| match observed.get(key) {
                Some(observed) => is_subset_in(
                    value,
                    observed,
                    quantities || key == "requests" || key == "limits",
                ),
                None => is_unset(value),
            })
        }
        (Value::Array(expected), Value::Array(observed)) => {
            expected.len() == observed.len()
                && expected
                    .iter()
                    .zip(observed)
                    .all(|(expected, observed)| is_subset_in(expected, observed, quantities))
        }
        (Value::String(expected), Value::String(observed)) if quantities => {
            same_quantity(expected, observed).unwrap_or(expected == observed)
        }
        (expected, observed) => expected == observed,
    }
}

/// Write every field set in `patch` into `target`. Objects merge key by key; arrays and
/// scalars are replaced.
pub fn overlay(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (_, Value::Null) => {}
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    continue;
                }
                match target.get_mut(key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

// identity and ownership are fixed at creation; only labels and annotations can drift
fn comparable(mut expected: Value) -> Value {
    if let Some(Value::Object(meta)) = expected.get_mut("metadata") {
        meta.retain(|key, _| key == "labels" || key == "annotations");
    }
    expected
}

impl Reconciler {
    /// Bring `observed` back in line with the freshly built `expected` object
    pub async fn reconcile(
        &self,
        conditions: &mut ConditionSet<'_>,
        definition: &ResourceDefinition<'_>,
        expected: &ManagedObject,
        observed: &ManagedObject,
    ) -> Result<ReconcileOutcome> {
        let expected = expected.to_value()?;
        let mut desired = observed.to_value()?;
        if is_subset(&comparable(expected.clone()), &desired) {
            return Ok(ReconcileOutcome::done());
        }

        let pulp = conditions.pulp();
        let kind = definition.object_kind();
        let name = &definition.name;
        info!("The {kind} {name} has been modified, reconciling");

        self.set_condition(
            conditions,
            &definition.condition_type,
            false,
            &format!("Updating{}", definition.alias),
            &format!("Reconciling {name} {kind} resource"),
        )
        .await?;
        self.publish(
            pulp,
            EventSeverity::Normal,
            "Updating",
            format!("Reconciling {} {kind}", definition.alias),
        )
        .await;

        // keep resourceVersion from the observed object so concurrent writers conflict
        overlay(&mut desired, &expected);
        if let Some(Value::Object(meta)) = desired.get_mut("metadata") {
            meta.remove("managedFields");
        }
        let desired = ManagedObject::from_value(kind, desired)?;

        if let Err(err) = self.cluster().update(&desired).await {
            error!("Failed to update {kind} {name}: {err}");
            if let Err(status_err) = self
                .set_condition(
                    conditions,
                    &definition.condition_type,
                    false,
                    &format!("ErrorUpdating{}", definition.alias),
                    &format!("Failed to reconcile {name} {kind} resource"),
                )
                .await
            {
                warn!("Failed to record update failure of {kind} {name}: {status_err}");
            }
            self.publish(
                pulp,
                EventSeverity::Warning,
                "Failed",
                format!("Failed to reconcile {} {kind}: {err}", definition.alias),
            )
            .await;
            return Err(err);
        }

        self.publish(
            pulp,
            EventSeverity::Normal,
            "Updated",
            format!("{} {kind} reconciled", definition.alias),
        )
        .await;
        Ok(ReconcileOutcome::requeue_after(UPDATE_REQUEUE_DELAY))
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn unset_fields_are_ignored() {
        let expected = json!({"spec": {"replicas": 1, "paused": null, "volumes": []}});
        let observed = json!({"spec": {"replicas": 1, "revisionHistoryLimit": 10}});
        assert!(is_subset(&expected, &observed));
    }

    #[test]
    fn set_fields_must_match() {
        let expected = json!({"spec": {"replicas": 2}});
        let observed = json!({"spec": {"replicas": 1}});
        assert!(!is_subset(&expected, &observed));

        let expected = json!({"spec": {"serviceName": "x"}});
        let observed = json!({"spec": {}});
        assert!(!is_subset(&expected, &observed));
    }

    #[test]
    fn arrays_compare_element_wise() {
        let expected = json!({"ports": [{"port": 24817}]});
        assert!(is_subset(
            &expected,
            &json!({"ports": [{"port": 24817, "protocol": "TCP"}]})
        ));
        assert!(!is_subset(
            &expected,
            &json!({"ports": [{"port": 24817}, {"port": 24816}]})
        ));
        assert!(!is_subset(&expected, &json!({"ports": [{"port": 24816}]})));
    }

    #[test]
    fn resource_quantities_compare_by_amount() {
        let expected = json!({"resources": {"requests": {"cpu": "0.5", "memory": "1024Mi"}}});
        let observed = json!({"resources": {"requests": {"cpu": "500m", "memory": "1Gi"}}});
        assert!(is_subset(&expected, &observed));

        let observed = json!({"resources": {"requests": {"cpu": "1", "memory": "1Gi"}}});
        assert!(!is_subset(&expected, &observed));

        // outside requests and limits strings stay strings
        assert!(!is_subset(&json!({"image": "0.5"}), &json!({"image": "500m"})));
    }

    #[test]
    fn overlay_keeps_fields_the_builder_left_unset() {
        let mut observed = json!({
            "metadata": {"name": "example-api", "resourceVersion": "7"},
            "spec": {"replicas": 3, "minReadySeconds": 5, "selector": {"matchLabels": {"a": "b"}}}
        });
        overlay(
            &mut observed,
            &json!({"metadata": {"name": "example-api"}, "spec": {"replicas": 1, "paused": null}}),
        );
        assert_json_eq!(
            observed,
            json!({
                "metadata": {"name": "example-api", "resourceVersion": "7"},
                "spec": {"replicas": 1, "minReadySeconds": 5, "selector": {"matchLabels": {"a": "b"}}}
            })
        );
    }

    #[test]
    fn ownership_metadata_is_not_compared() {
        let expected = json!({
            "metadata": {"name": "a", "ownerReferences": [{"uid": "1"}], "labels": {"x": "y"}},
        });
        let observed = json!({
            "metadata": {"name": "a", "ownerReferences": [{"uid": "1"}, {"uid": "2"}], "labels": {"x": "y"}},
        });
        assert!(is_subset(&comparable(expected.clone()), &observed));

        let relabelled = json!({"metadata": {"labels": {"x": "z"}}});
        assert!(!is_subset(&comparable(expected), &relabelled));
    }
}
