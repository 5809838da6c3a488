//! Shared pieces of the AirflowBase and AirflowCluster custom resources:
//! the label and naming contracts, the executor/backend enums, and the
//! [`RootResource`] capability both root kinds implement.

use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::Affinity, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub mod base;
pub mod cluster;
pub mod status;

pub const APP_NAME: &str = "airflow";
pub const API_GROUP: &str = "airflow.k8s.io";

/// CR-identity labels stamped on every child object. The same set is handed
/// to the reconcile engine as the label selector for live-object lookups, so
/// selectors match exactly the objects the builders produce.
pub const LABEL_CR: &str = "airflow-cr";
pub const LABEL_CR_NAME: &str = "airflow-cr-name";
pub const LABEL_COMPONENT: &str = "airflow-component";
pub const LABEL_APP: &str = "app";

pub const CR_TAG_BASE: &str = "airflow-base";
pub const CR_TAG_CLUSTER: &str = "airflow-cluster";

/// Component tags. Each doubles as the middle segment of child-object names.
pub const COMPONENT_MYSQL: &str = "mysql";
pub const COMPONENT_POSTGRES: &str = "postgres";
pub const COMPONENT_SQLPROXY: &str = "sqlproxy";
pub const COMPONENT_NFS: &str = "nfs";
pub const COMPONENT_UI: &str = "airflowui";
pub const COMPONENT_REDIS: &str = "redis";
pub const COMPONENT_SCHEDULER: &str = "scheduler";
pub const COMPONENT_WORKER: &str = "worker";
pub const COMPONENT_FLOWER: &str = "flower";
/// Shared tag for the SQL Service and Secret, so clusters can resolve
/// `<base>-sql` no matter which backend (MySQL, Postgres, proxy) serves it.
pub const COMPONENT_SQL: &str = "sql";

pub const FINALIZER_CLEANUP: &str = "airflow.k8s.io/cleanup";

pub const AIRFLOW_HOME: &str = "/usr/local/airflow";
pub const AIRFLOW_DAGS_BASE: &str = "/usr/local/airflow/dags";
/// Directory (relative to the dags volume) git-sync checks out into.
pub const GIT_SYNC_DEST_DIR: &str = "gitdags";
/// Directory (relative to the dags volume) the GCS sync daemon fills.
pub const GCS_SYNC_DEST_DIR: &str = "dags";

/// Data keys of generated credential Secrets.
pub const SECRET_KEY_PASSWORD: &str = "password";
pub const SECRET_KEY_ROOT_PASSWORD: &str = "rootpassword";

pub const DEFAULT_MYSQL_IMAGE: &str = "mysql";
pub const DEFAULT_MYSQL_VERSION: &str = "5.7";
pub const DEFAULT_POSTGRES_IMAGE: &str = "postgres";
pub const DEFAULT_POSTGRES_VERSION: &str = "9.5";
pub const DEFAULT_SQLPROXY_IMAGE: &str = "gcr.io/cloudsql-docker/gce-proxy";
pub const DEFAULT_SQLPROXY_VERSION: &str = "1.11";
pub const DEFAULT_NFS_IMAGE: &str = "k8s.gcr.io/volume-nfs";
pub const DEFAULT_NFS_VERSION: &str = "0.8";
pub const DEFAULT_REDIS_IMAGE: &str = "redis";
pub const DEFAULT_REDIS_VERSION: &str = "4.0";
pub const DEFAULT_AIRFLOW_IMAGE: &str = "gcr.io/cloud-airflow-releaser/airflow";
pub const DEFAULT_AIRFLOW_VERSION: &str = "1.10.2";
pub const GIT_SYNC_IMAGE: &str = "gcr.io/google_containers/git-sync";
pub const GIT_SYNC_VERSION: &str = "v3.0.1";
pub const GCS_SYNC_IMAGE: &str = "gcr.io/cloud-airflow-releaser/gcs-syncd";
pub const GCS_SYNC_VERSION: &str = "cloud_composer_service_2018-05-23-RC0";
pub const PROMETHEUS_EXPORTER_IMAGE: &str = "pbweb/airflow-prometheus-exporter:latest";

/// Task execution backend of an AirflowCluster.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, EnumString, Eq, JsonSchema, PartialEq,
    Serialize,
)]
pub enum Executor {
    /// Tasks run on a shared worker pool fed through the Redis queue.
    #[default]
    Celery,
    /// Every task runs in its own short-lived pod.
    Kubernetes,
    /// Tasks run inside the scheduler process. Development only.
    Local,
}

/// SQL backend the bound AirflowBase provides. Drives the `DB_TYPE`
/// environment value and the flavor of the schema-bootstrap container.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, EnumString, Eq, JsonSchema, PartialEq,
    Serialize,
)]
pub enum DbType {
    #[default]
    #[serde(rename = "mysql")]
    #[strum(serialize = "mysql")]
    Mysql,
    #[serde(rename = "postgres")]
    #[strum(serialize = "postgres")]
    Postgres,
}

impl DbType {
    /// Port the shared SQL service listens on for this backend.
    pub fn port(&self) -> i32 {
        match self {
            DbType::Mysql => 3306,
            DbType::Postgres => 5432,
        }
    }
}

/// Capability shared by both root custom-resource kinds. Everything the
/// desired-state builders need from a root funnels through here, keeping
/// each component statically bound to the root kind it belongs to.
pub trait RootResource: Resource<DynamicType = ()> + Sized {
    /// Value of the `airflow-cr` label on child objects of this kind.
    const CR_TAG: &'static str;

    /// Status block receiving per-component reconcile outcomes.
    type Status: status::ComponentStatusSink;

    fn affinity(&self) -> Option<&Affinity>;

    fn node_selector(&self) -> Option<&BTreeMap<String, String>>;

    /// Annotations declared on the spec (not the CR metadata); inherited by
    /// every child object.
    fn spec_annotations(&self) -> Option<&BTreeMap<String, String>>;

    /// Extra labels declared on the spec, merged beneath the CR-identity
    /// labels.
    fn spec_labels(&self) -> Option<&BTreeMap<String, String>>;

    /// `<root>-<component><suffix>`. For a fixed root, distinct
    /// (component, suffix) pairs never collide, and names are stable across
    /// calls.
    fn child_name(&self, component: &str, suffix: &str) -> String {
        format!("{}-{}{}", self.name_any(), component, suffix)
    }

    /// Full label set for one component's child objects.
    fn component_labels(&self, component: &str) -> BTreeMap<String, String> {
        let name = self.name_any();
        let mut labels = self.spec_labels().cloned().unwrap_or_default();
        labels.insert(LABEL_APP.to_owned(), format!("{name}-{component}"));
        labels.insert(LABEL_CR.to_owned(), Self::CR_TAG.to_owned());
        labels.insert(LABEL_CR_NAME.to_owned(), name);
        labels.insert(LABEL_COMPONENT.to_owned(), component.to_owned());
        labels
    }

    /// Child-object metadata: namespace and spec annotations inherited from
    /// the root, the given labels, and a controller owner reference so
    /// cascade deletion reaches every managed object.
    fn child_meta(&self, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: self.namespace(),
            labels: Some(labels),
            annotations: self.spec_annotations().cloned(),
            owner_references: self.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..ObjectMeta::default()
        }
    }

    fn remove_finalizer(&mut self, finalizer: &str) {
        if let Some(finalizers) = self.meta_mut().finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
    }
}

pub(crate) fn default_replicas() -> i32 {
    1
}

/// Schema for embedded upstream Kubernetes API types. Those structs do not
/// implement `JsonSchema`, so the CRD treats them as opaque objects.
pub fn raw_object_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    }))
    .expect("valid raw object schema literal")
}
