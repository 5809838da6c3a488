//! Per-component status rollup for both root resources.
//!
//! Statuses persist across reconcile passes; each pass only replaces the
//! entry of the component it reconciled, so unconfigured components keep
//! their previous state.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Condition of one component after its latest reconcile pass.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum ComponentCondition {
    Ready,
    Failed,
}

/// Reference to one reconciled child object.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub condition: ComponentCondition,

    /// Error message of the failed pass; absent when `Ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Objects reconciled by the last successful pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRef>,
}

impl ComponentStatus {
    pub fn ready(resources: Vec<ResourceRef>) -> Self {
        ComponentStatus {
            condition: ComponentCondition::Ready,
            message: None,
            resources,
        }
    }

    pub fn failed(message: String) -> Self {
        ComponentStatus {
            condition: ComponentCondition::Failed,
            message: Some(message),
            resources: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AirflowBaseStatus {
    /// Status per configured component, keyed by component tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AirflowClusterStatus {
    /// Status per configured component, keyed by component tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatus>,
}

/// Merge-style fold of reconcile outcomes into a status block. Shared by
/// both root kinds.
pub trait ComponentStatusSink {
    fn components_mut(&mut self) -> &mut BTreeMap<String, ComponentStatus>;

    /// Records one component's outcome. An error folds to `Failed` with its
    /// message; a non-empty reconciled list folds to `Ready` with object
    /// references. A pass that reconciled nothing and raised nothing (fully
    /// suppressed component) leaves the previous entry untouched.
    fn update_component(&mut self, component: &str, reconciled: &[ResourceRef], error: Option<String>) {
        match error {
            Some(message) => {
                tracing::warn!("component {} failed to reconcile: {}", component, message);
                self.components_mut()
                    .insert(component.to_owned(), ComponentStatus::failed(message));
            }
            None if !reconciled.is_empty() => {
                self.components_mut()
                    .insert(component.to_owned(), ComponentStatus::ready(reconciled.to_vec()));
            }
            None => {}
        }
    }
}

impl ComponentStatusSink for AirflowBaseStatus {
    fn components_mut(&mut self) -> &mut BTreeMap<String, ComponentStatus> {
        &mut self.components
    }
}

impl ComponentStatusSink for AirflowClusterStatus {
    fn components_mut(&mut self) -> &mut BTreeMap<String, ComponentStatus> {
        &mut self.components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sts_ref(name: &str) -> ResourceRef {
        ResourceRef {
            kind: "StatefulSet".to_owned(),
            name: name.to_owned(),
        }
    }

    #[test]
    fn successful_pass_records_ready_and_refs() {
        let mut status = AirflowBaseStatus::default();
        status.update_component("mysql", &[sts_ref("mb-mysql")], None);

        let mysql = &status.components["mysql"];
        assert_eq!(mysql.condition, ComponentCondition::Ready);
        assert_eq!(mysql.resources, vec![sts_ref("mb-mysql")]);
        assert!(mysql.message.is_none());
    }

    #[test]
    fn failed_pass_records_message_and_clears_refs() {
        let mut status = AirflowBaseStatus::default();
        status.update_component("mysql", &[sts_ref("mb-mysql")], None);
        status.update_component("mysql", &[], Some("apply conflict".to_owned()));

        let mysql = &status.components["mysql"];
        assert_eq!(mysql.condition, ComponentCondition::Failed);
        assert_eq!(mysql.message.as_deref(), Some("apply conflict"));
        assert!(mysql.resources.is_empty());
    }

    #[test]
    fn updates_merge_instead_of_overwriting_siblings() {
        let mut status = AirflowClusterStatus::default();
        status.update_component("redis", &[sts_ref("mc-redis")], None);
        status.update_component("scheduler", &[], Some("boom".to_owned()));

        assert_eq!(status.components["redis"].condition, ComponentCondition::Ready);
        assert_eq!(status.components["scheduler"].condition, ComponentCondition::Failed);
        assert_eq!(status.components.len(), 2);
    }

    #[test]
    fn suppressed_component_leaves_status_untouched() {
        let mut status = AirflowBaseStatus::default();
        status.update_component("mysql", &[sts_ref("mb-mysql")], None);
        // Externally operated database: nothing reconciled, nothing failed.
        status.update_component("mysql", &[], None);

        assert_eq!(status.components["mysql"].condition, ComponentCondition::Ready);
        assert_eq!(status.components["mysql"].resources, vec![sts_ref("mb-mysql")]);
    }
}
