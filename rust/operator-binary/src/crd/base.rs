//! The AirflowBase custom resource: shared SQL and storage infrastructure
//! one or more AirflowClusters bind to by name.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, PersistentVolumeClaim, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{
    raw_object_schema, status::AirflowBaseStatus, RootResource, CR_TAG_BASE, DEFAULT_MYSQL_IMAGE,
    DEFAULT_MYSQL_VERSION, DEFAULT_NFS_IMAGE, DEFAULT_NFS_VERSION, DEFAULT_POSTGRES_IMAGE,
    DEFAULT_POSTGRES_VERSION, DEFAULT_SQLPROXY_IMAGE, DEFAULT_SQLPROXY_VERSION,
};

/// Shared infrastructure for one or more Airflow clusters: exactly one SQL
/// backend (self-managed MySQL or Postgres, or a CloudSQL proxy) and
/// optional NFS storage for DAGs and logs.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "airflow.k8s.io",
    version = "v1alpha1",
    kind = "AirflowBase",
    plural = "airflowbases",
    shortname = "airflowbase",
    status = "AirflowBaseStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AirflowBaseSpec {
    /// Self-managed MySQL backend. Mutually exclusive with `postgres` and
    /// `sqlproxy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MySqlSpec>,

    /// Self-managed Postgres backend. Mutually exclusive with `mysql` and
    /// `sqlproxy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresSpec>,

    /// CloudSQL proxy fronting an externally provisioned database.
    /// Mutually exclusive with `mysql` and `postgres`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlproxy: Option<SqlProxySpec>,

    /// NFS server for sharing DAGs and logs between cluster pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<NfsStoreSpec>,

    /// Scheduling affinity applied to every pod this resource owns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub affinity: Option<Affinity>,

    /// Node selector applied to every pod this resource owns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Annotations inherited by every child object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Extra labels for child objects, merged beneath the CR-identity
    /// labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Self-managed MySQL database.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MySqlSpec {
    /// Container image; defaults to `mysql`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `5.7`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "super::default_replicas")]
    pub replicas: i32,

    /// When set, data lives on a persistent volume claimed per replica;
    /// otherwise an ephemeral emptyDir is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub volume_claim_template: Option<PersistentVolumeClaim>,

    /// True when a separate MySQL operator manages the database. Suppresses
    /// every child object of this component.
    #[serde(default)]
    pub operator: bool,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl MySqlSpec {
    pub fn container_image(&self) -> String {
        image_ref(&self.image, &self.version, DEFAULT_MYSQL_IMAGE, DEFAULT_MYSQL_VERSION)
    }
}

/// Self-managed Postgres database.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresSpec {
    /// Container image; defaults to `postgres`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `9.5`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "super::default_replicas")]
    pub replicas: i32,

    /// When set, data lives on a persistent volume claimed per replica;
    /// otherwise an ephemeral emptyDir is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub volume_claim_template: Option<PersistentVolumeClaim>,

    /// True when a separate Postgres operator manages the database.
    /// Suppresses every child object of this component.
    #[serde(default)]
    pub operator: bool,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl PostgresSpec {
    pub fn container_image(&self) -> String {
        image_ref(
            &self.image,
            &self.version,
            DEFAULT_POSTGRES_IMAGE,
            DEFAULT_POSTGRES_VERSION,
        )
    }
}

/// CloudSQL proxy in front of an externally provisioned database instance.
/// The instance credential Secret (`<name>-sqlproxy`) is expected to exist
/// already; it is referred to, never created.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlProxySpec {
    /// Container image; defaults to `gcr.io/cloudsql-docker/gce-proxy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `1.11`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// GCP project of the CloudSQL instance.
    pub project: String,

    /// GCP region of the CloudSQL instance.
    pub region: String,

    /// CloudSQL instance name.
    pub instance: String,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl SqlProxySpec {
    pub fn container_image(&self) -> String {
        image_ref(
            &self.image,
            &self.version,
            DEFAULT_SQLPROXY_IMAGE,
            DEFAULT_SQLPROXY_VERSION,
        )
    }

    /// `<project>:<region>:<instance>` as the proxy's `-instances` flag
    /// expects it.
    pub fn instance_connection(&self) -> String {
        format!("{}:{}:{}", self.project, self.region, self.instance)
    }
}

/// Self-managed NFS server.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsStoreSpec {
    /// Container image; defaults to `k8s.gcr.io/volume-nfs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `0.8`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// When set, the export directory lives on a persistent volume;
    /// otherwise an ephemeral emptyDir is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub volume: Option<PersistentVolumeClaim>,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl NfsStoreSpec {
    pub fn container_image(&self) -> String {
        image_ref(&self.image, &self.version, DEFAULT_NFS_IMAGE, DEFAULT_NFS_VERSION)
    }
}

impl RootResource for AirflowBase {
    const CR_TAG: &'static str = CR_TAG_BASE;

    type Status = AirflowBaseStatus;

    fn affinity(&self) -> Option<&Affinity> {
        self.spec.affinity.as_ref()
    }

    fn node_selector(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.node_selector.as_ref()
    }

    fn spec_annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.annotations.as_ref()
    }

    fn spec_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.labels.as_ref()
    }
}

fn image_ref(
    image: &Option<String>,
    version: &Option<String>,
    default_image: &str,
    default_version: &str,
) -> String {
    format!(
        "{}:{}",
        image.as_deref().unwrap_or(default_image),
        version.as_deref().unwrap_or(default_version)
    )
}

/// MySQL-backed base manifest shared by tests across the crate.
#[cfg(test)]
pub(crate) const MYSQL_BASE: &str = "
    apiVersion: airflow.k8s.io/v1alpha1
    kind: AirflowBase
    metadata:
      name: mb
      namespace: af
    spec:
      mysql: {}
      storage: {}
    ";

#[cfg(test)]
pub(crate) fn parse_base(manifest: &str) -> AirflowBase {
    serde_yaml::from_str(manifest).expect("base manifest should deserialize")
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::crd::{COMPONENT_MYSQL, COMPONENT_POSTGRES, LABEL_COMPONENT, LABEL_CR};

    #[test]
    fn minimal_mysql_base_deserializes_with_defaults() {
        let base = parse_base(
            "
            apiVersion: airflow.k8s.io/v1alpha1
            kind: AirflowBase
            metadata:
              name: mb
              namespace: af
            spec:
              mysql: {}
            ",
        );
        let mysql = base.spec.mysql.as_ref().unwrap();
        assert_eq!(mysql.replicas, 1);
        assert!(!mysql.operator);
        assert_eq!(mysql.container_image(), "mysql:5.7");
        assert_eq!(base.name_any(), "mb");
    }

    #[test]
    fn child_names_of_distinct_components_never_collide() {
        let base = parse_base(
            "
            apiVersion: airflow.k8s.io/v1alpha1
            kind: AirflowBase
            metadata:
              name: mb
            spec:
              postgres:
                operator: false
            ",
        );
        assert_ne!(
            base.child_name(COMPONENT_MYSQL, ""),
            base.child_name(COMPONENT_POSTGRES, "")
        );
        assert_eq!(base.child_name(COMPONENT_MYSQL, ""), "mb-mysql");
        assert_eq!(base.child_name(COMPONENT_MYSQL, "-extra"), "mb-mysql-extra");
    }

    #[test]
    fn component_labels_carry_cr_identity() {
        let base = parse_base(
            "
            apiVersion: airflow.k8s.io/v1alpha1
            kind: AirflowBase
            metadata:
              name: mb
            spec:
              labels:
                team: data
            ",
        );
        let labels = base.component_labels(COMPONENT_MYSQL);
        assert_eq!(labels[LABEL_CR], CR_TAG_BASE);
        assert_eq!(labels[LABEL_COMPONENT], "mysql");
        assert_eq!(labels["team"], "data");
    }

    #[test]
    fn sqlproxy_instance_connection_is_colon_joined() {
        let proxy = SqlProxySpec {
            project: "proj".into(),
            region: "us-central1".into(),
            instance: "af".into(),
            ..SqlProxySpec::default()
        };
        assert_eq!(proxy.instance_connection(), "proj:us-central1:af");
        assert_eq!(proxy.container_image(), "gcr.io/cloudsql-docker/gce-proxy:1.11");
    }
}
