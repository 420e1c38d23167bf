use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tracing::debug;

use crate::resources::pulps::{Pulp, PulpCondition, PulpStatus};
use crate::Result;

use super::Reconciler;

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

fn status_str(status: bool) -> &'static str {
    if status {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    }
}

/// "pulp" -> "Pulp", "galaxy" -> "Galaxy"
fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn api_ready_condition_type(pulp: &Pulp) -> String {
    format!("{}-API-Ready", title_case(pulp.spec.deployment_type()))
}

pub fn content_ready_condition_type(pulp: &Pulp) -> String {
    format!("{}-Content-Ready", title_case(pulp.spec.deployment_type()))
}

/// Insert or update the condition of the given type.
///
/// Existing conditions keep their position and new types are appended. The transition time
/// moves only when the status or the reason changes. Returns whether anything changed.
pub fn upsert_condition(
    conditions: &mut Vec<PulpCondition>,
    r#type: &str,
    status: bool,
    reason: &str,
    message: &str,
    now: Time,
) -> bool {
    let status = status_str(status);

    match conditions.iter_mut().find(|c| c.r#type == r#type) {
        Some(existing) => {
            let transitioned =
                existing.status != status || existing.reason.as_deref() != Some(reason);
            let message_changed = existing.message.as_deref() != Some(message);
            if !transitioned && !message_changed {
                return false;
            }

            if transitioned || existing.last_transition_time.is_none() {
                existing.last_transition_time = Some(now);
            }
            existing.status = status.into();
            existing.reason = Some(reason.into());
            existing.message = Some(message.into());
            true
        }
        None => {
            conditions.push(PulpCondition {
                last_transition_time: Some(now),
                message: Some(message.into()),
                reason: Some(reason.into()),
                status: status.into(),
                r#type: r#type.into(),
            });
            true
        }
    }
}

/// The conditions of one Pulp as last written during the current pass.
///
/// Each write patches the whole list, so later writes in the same pass must build on the
/// earlier ones rather than on the status the pass started from.
pub struct ConditionSet<'a> {
    pulp: &'a Pulp,
    conditions: Vec<PulpCondition>,
}

impl<'a> ConditionSet<'a> {
    /// Start from `status` as currently stored, which may be newer than the copy in `pulp`
    pub fn with_status(pulp: &'a Pulp, status: Option<PulpStatus>) -> Self {
        Self {
            pulp,
            conditions: status.and_then(|s| s.conditions).unwrap_or_default(),
        }
    }

    pub fn pulp(&self) -> &'a Pulp {
        self.pulp
    }
}

impl Reconciler {
    /// Record a condition on the Pulp status. Unchanged conditions are not written; a failed
    /// status patch is returned to the caller.
    pub async fn set_condition(
        &self,
        set: &mut ConditionSet<'_>,
        r#type: &str,
        status: bool,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let now = Time(Utc::now());
        if !upsert_condition(&mut set.conditions, r#type, status, reason, message, now) {
            return Ok(());
        }

        debug!("Setting condition {} to {status} ({reason})", r#type);
        let status = PulpStatus {
            conditions: Some(set.conditions.clone()),
        };
        self.cluster().patch_status(set.pulp, &status).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::resources::pulps::PulpSpec;

    fn at(seconds: i64) -> Time {
        Time(Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(seconds))
    }

    #[test]
    fn condition_types_follow_deployment_type() {
        let pulp = Pulp::new("example", PulpSpec::default());
        assert_eq!(api_ready_condition_type(&pulp), "Pulp-API-Ready");
        assert_eq!(content_ready_condition_type(&pulp), "Pulp-Content-Ready");

        let galaxy = Pulp::new(
            "example",
            PulpSpec {
                deployment_type: Some("galaxy".into()),
                ..Default::default()
            },
        );
        assert_eq!(api_ready_condition_type(&galaxy), "Galaxy-API-Ready");
    }

    #[test]
    fn identical_writes_keep_transition_time() {
        let mut conditions = vec![];
        assert!(upsert_condition(
            &mut conditions,
            "Pulp-API-Ready",
            false,
            "CreatingApi",
            "Creating Api Deployment",
            at(0)
        ));
        assert!(!upsert_condition(
            &mut conditions,
            "Pulp-API-Ready",
            false,
            "CreatingApi",
            "Creating Api Deployment",
            at(10)
        ));
        assert_eq!(conditions[0].last_transition_time, Some(at(0)));
    }

    #[test]
    fn message_only_change_keeps_transition_time() {
        let mut conditions = vec![];
        upsert_condition(&mut conditions, "Pulp-API-Ready", false, "UpdatingApi", "a", at(0));
        assert!(upsert_condition(
            &mut conditions,
            "Pulp-API-Ready",
            false,
            "UpdatingApi",
            "b",
            at(10)
        ));
        assert_eq!(conditions[0].message.as_deref(), Some("b"));
        assert_eq!(conditions[0].last_transition_time, Some(at(0)));
    }

    #[test]
    fn status_or_reason_change_moves_transition_time() {
        let mut conditions = vec![];
        upsert_condition(&mut conditions, "Pulp-API-Ready", false, "CreatingApi", "m", at(0));

        upsert_condition(&mut conditions, "Pulp-API-Ready", false, "UpdatingApi", "m", at(5));
        assert_eq!(conditions[0].last_transition_time, Some(at(5)));

        upsert_condition(
            &mut conditions,
            "Pulp-API-Ready",
            true,
            "UpdatingApi",
            "m",
            at(9),
        );
        assert_eq!(conditions[0].status, "True");
        assert_eq!(conditions[0].last_transition_time, Some(at(9)));
    }

    #[test]
    fn condition_set_starts_from_the_stored_status() {
        let pulp = Pulp::new("example", PulpSpec::default());
        let stored = PulpStatus {
            conditions: Some(vec![PulpCondition {
                r#type: "Pulp-API-Ready".into(),
                status: CONDITION_STATUS_TRUE.into(),
                ..Default::default()
            }]),
        };
        let set = ConditionSet::with_status(&pulp, Some(stored));
        assert_eq!(set.conditions.len(), 1);
        assert!(ConditionSet::with_status(&pulp, None).conditions.is_empty());
    }

    #[test]
    fn types_stay_unique_and_ordered() {
        let mut conditions = vec![];
        upsert_condition(&mut conditions, "Pulp-API-Ready", false, "a", "", at(0));
        upsert_condition(&mut conditions, "Pulp-Content-Ready", false, "b", "", at(0));
        upsert_condition(&mut conditions, "Pulp-API-Ready", true, "c", "", at(1));

        let types: Vec<_> = conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(types, ["Pulp-API-Ready", "Pulp-Content-Ready"]);
    }
}
