//! The AirflowCluster custom resource: one team's Airflow deployment (UI,
//! scheduler, workers, queue, task monitor) bound to an AirflowBase.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, PersistentVolumeClaim, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{
    raw_object_schema, status::AirflowClusterStatus, DbType, Executor, RootResource,
    CR_TAG_CLUSTER, DEFAULT_AIRFLOW_IMAGE, DEFAULT_AIRFLOW_VERSION, DEFAULT_REDIS_IMAGE,
    DEFAULT_REDIS_VERSION,
};

/// A single Airflow deployment: UI, scheduler and task execution backend,
/// wired to the SQL/storage infrastructure of an AirflowBase.
///
/// Airflow expects every component to run with the same configuration, so
/// image, version and environment derive from one shared spec rather than
/// per-pod settings.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "airflow.k8s.io",
    version = "v1alpha1",
    kind = "AirflowCluster",
    plural = "airflowclusters",
    shortname = "airflow",
    status = "AirflowClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AirflowClusterSpec {
    /// Task execution backend. `Celery` (default) runs a shared worker pool
    /// fed through Redis; `Kubernetes` schedules one pod per task.
    #[serde(default)]
    pub executor: Executor,

    /// Name reference to the AirflowBase providing SQL (and optionally NFS)
    /// infrastructure for this cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airflow_base_ref: Option<NameRef>,

    /// Redis queue backing the Celery executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisSpec>,

    /// The scheduler; also carries the SQL connection fields shared by all
    /// components.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerSpec>,

    /// The Airflow webserver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<AirflowUiSpec>,

    /// Celery worker pool. Required under the Kubernetes executor as well,
    /// as the source of the per-task pod image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerSpec>,

    /// Flower, the Celery task monitor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flower: Option<FlowerSpec>,

    /// Where workflow definitions are synced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dags: Option<DagsSpec>,

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

/// Reference to a named object in the same namespace.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameRef {
    pub name: String,
}

impl NameRef {
    /// Child-object name under the referenced root, `<name>-<component>`.
    pub fn child(&self, component: &str) -> String {
        format!("{}-{}", self.name, component)
    }
}

/// The Airflow webserver.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AirflowUiSpec {
    /// Container image; defaults to the Airflow release image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `1.10.2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "super::default_replicas")]
    pub replicas: i32,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl AirflowUiSpec {
    pub fn container_image(&self) -> String {
        airflow_image(&self.image, &self.version)
    }
}

/// The Airflow scheduler. Carries the SQL connection fields (database name,
/// application user, backend flavor) every component's environment is built
/// from.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSpec {
    /// Container image; defaults to the Airflow release image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `1.10.2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Metadata database name; defaults to `airflow`. Created by the
    /// schema-bootstrap container if absent.
    #[serde(default = "SchedulerSpec::default_db_name")]
    pub db_name: String,

    /// Application database user; defaults to `airflow`.
    #[serde(default = "SchedulerSpec::default_db_user")]
    pub db_user: String,

    /// SQL backend flavor of the bound AirflowBase; defaults to `mysql`.
    #[serde(default)]
    pub database: DbType,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl SchedulerSpec {
    fn default_db_name() -> String {
        "airflow".to_owned()
    }

    fn default_db_user() -> String {
        "airflow".to_owned()
    }

    pub fn container_image(&self) -> String {
        airflow_image(&self.image, &self.version)
    }
}

/// Celery worker pool.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Container image; defaults to the Airflow release image. Under the
    /// Kubernetes executor this image also runs the per-task pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `1.10.2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "super::default_replicas")]
    pub replicas: i32,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl WorkerSpec {
    pub fn container_image(&self) -> String {
        airflow_image(&self.image, &self.version)
    }

    /// Image repository and tag as separate values, the form the Kubernetes
    /// executor's pod-template settings expect.
    pub fn image_repository(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_AIRFLOW_IMAGE)
    }

    pub fn image_tag(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_AIRFLOW_VERSION)
    }
}

/// Flower, the Celery task monitor UI.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowerSpec {
    /// Container image; defaults to the Airflow release image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `1.10.2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "super::default_replicas")]
    pub replicas: i32,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl FlowerSpec {
    pub fn container_image(&self) -> String {
        airflow_image(&self.image, &self.version)
    }
}

/// Redis queue for the Celery executor.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// Container image; defaults to `redis`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag; defaults to `4.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Extra flags appended to the redis-server command line through the
    /// `REDIS_EXTRA_FLAGS` environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_args: Option<String>,

    /// When set, data lives on a persistent volume claimed per replica;
    /// otherwise an ephemeral emptyDir is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub volume_claim_template: Option<PersistentVolumeClaim>,

    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: ResourceRequirements,
}

impl RedisSpec {
    pub fn container_image(&self) -> String {
        format!(
            "{}:{}",
            self.image.as_deref().unwrap_or(DEFAULT_REDIS_IMAGE),
            self.version.as_deref().unwrap_or(DEFAULT_REDIS_VERSION)
        )
    }
}

/// Where workflow definition files come from.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DagsSpec {
    /// Subdirectory within the synced tree that holds the DAGs.
    #[serde(default)]
    pub dag_subdir: String,

    /// Sync DAGs from a git repository. Takes precedence over `gcs` when
    /// both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSpec>,

    /// Sync DAGs from a GCS bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsSpec>,
}

/// DAG sync from a git repository.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSpec {
    /// The repository URL to clone.
    pub repo: String,

    /// Branch to check out.
    #[serde(default)]
    pub branch: String,

    /// Revision (commit hash or tag) to check out.
    #[serde(default)]
    pub rev: String,

    /// User name for basic-auth repositories; paired with the `password`
    /// key of `credSecretRef`.
    #[serde(default)]
    pub user: String,

    /// Sync exactly once at pod startup (init container) instead of
    /// polling continuously (sidecar).
    #[serde(default)]
    pub once: bool,

    /// Secret holding the repository password or token under the
    /// `password` key. The Secret is referred to, never managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred_secret_ref: Option<NameRef>,
}

/// DAG sync from a GCS bucket.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsSpec {
    /// Bucket holding the DAG files.
    pub bucket: String,

    /// Sync exactly once at pod startup (init container) instead of
    /// running continuously (sidecar).
    #[serde(default)]
    pub once: bool,
}

/// The configured DAG source, if any. Git wins when both are declared.
#[derive(Clone, Copy, Debug)]
pub enum DagSource<'a> {
    Git(&'a GitSpec),
    Gcs(&'a GcsSpec),
}

impl DagsSpec {
    pub fn source(&self) -> Option<DagSource<'_>> {
        match (&self.git, &self.gcs) {
            (Some(git), _) => Some(DagSource::Git(git)),
            (None, Some(gcs)) => Some(DagSource::Gcs(gcs)),
            (None, None) => None,
        }
    }
}

impl AirflowCluster {
    pub fn dag_source(&self) -> Option<DagSource<'_>> {
        self.spec.dags.as_ref().and_then(|dags| dags.source())
    }
}

impl RootResource for AirflowCluster {
    const CR_TAG: &'static str = CR_TAG_CLUSTER;

    type Status = AirflowClusterStatus;

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

fn airflow_image(image: &Option<String>, version: &Option<String>) -> String {
    format!(
        "{}:{}",
        image.as_deref().unwrap_or(DEFAULT_AIRFLOW_IMAGE),
        version.as_deref().unwrap_or(DEFAULT_AIRFLOW_VERSION)
    )
}

/// Celery-mode cluster manifest shared by tests across the crate.
#[cfg(test)]
pub(crate) const CELERY_CLUSTER: &str = "
    apiVersion: airflow.k8s.io/v1alpha1
    kind: AirflowCluster
    metadata:
      name: mc
      namespace: af
    spec:
      executor: Celery
      airflowBaseRef:
        name: mb
      redis: {}
      scheduler:
        version: 1.10.2
      ui:
        replicas: 1
      worker:
        replicas: 2
      flower: {}
      dags:
        dagSubdir: airflow/example_dags
        git:
          repo: https://github.com/apache/incubator-airflow
          once: true
    ";

#[cfg(test)]
pub(crate) fn parse_cluster(manifest: &str) -> AirflowCluster {
    serde_yaml::from_str(manifest).expect("cluster manifest should deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{COMPONENT_SCHEDULER, LABEL_CR};

    #[test]
    fn celery_cluster_deserializes_with_defaults() {
        let cluster = parse_cluster(CELERY_CLUSTER);
        assert_eq!(cluster.spec.executor, Executor::Celery);

        let scheduler = cluster.spec.scheduler.as_ref().unwrap();
        assert_eq!(scheduler.db_name, "airflow");
        assert_eq!(scheduler.db_user, "airflow");
        assert_eq!(scheduler.database, DbType::Mysql);
        assert_eq!(scheduler.container_image(), "gcr.io/cloud-airflow-releaser/airflow:1.10.2");

        assert_eq!(cluster.spec.worker.as_ref().unwrap().replicas, 2);
        assert_eq!(cluster.child_name(COMPONENT_SCHEDULER, ""), "mc-scheduler");
        assert_eq!(cluster.component_labels("redis")[LABEL_CR], CR_TAG_CLUSTER);
    }

    #[test]
    fn executor_defaults_to_celery_when_omitted() {
        let cluster = parse_cluster(
            "
            apiVersion: airflow.k8s.io/v1alpha1
            kind: AirflowCluster
            metadata:
              name: mc
            spec: {}
            ",
        );
        assert_eq!(cluster.spec.executor, Executor::Celery);
        assert!(cluster.dag_source().is_none());
    }

    #[test]
    fn git_takes_precedence_over_gcs() {
        let dags = DagsSpec {
            dag_subdir: String::new(),
            git: Some(GitSpec {
                repo: "https://git.example/dags.git".into(),
                ..GitSpec::default()
            }),
            gcs: Some(GcsSpec {
                bucket: "dag-bucket".into(),
                once: false,
            }),
        };
        match dags.source() {
            Some(DagSource::Git(git)) => assert_eq!(git.repo, "https://git.example/dags.git"),
            other => panic!("expected git source, got {other:?}"),
        }
    }

    #[test]
    fn dag_source_resolves_from_cluster_yaml() {
        let cluster = parse_cluster(CELERY_CLUSTER);
        match cluster.dag_source() {
            Some(DagSource::Git(git)) => {
                assert!(git.once);
                assert!(git.cred_secret_ref.is_none());
            }
            other => panic!("expected git source, got {other:?}"),
        }
    }
}
