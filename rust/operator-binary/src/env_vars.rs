//! Environment composition for the Airflow workload containers.
//!
//! Everything here is a pure function of the cluster spec: the same spec
//! always yields the same variable set, sorted by name so repeated builds
//! compare structurally equal. Consumers treat the result as unordered.

use const_format::concatcp;
use k8s_openapi::api::core::v1::EnvVar;
use kube::ResourceExt;
use snafu::{OptionExt, Snafu};

use crate::{
    crd::{
        cluster::{AirflowCluster, DagSource, NameRef, SchedulerSpec, WorkerSpec},
        Executor, RootResource, AIRFLOW_DAGS_BASE, COMPONENT_REDIS,
        COMPONENT_SCHEDULER, COMPONENT_SQL, COMPONENT_UI, GCS_SYNC_DEST_DIR, GIT_SYNC_DEST_DIR,
        SECRET_KEY_PASSWORD, SECRET_KEY_ROOT_PASSWORD,
    },
    util::{env_var, env_var_from_secret},
};

const AFC: &str = "AIRFLOW__CORE__";
const AFK: &str = "AIRFLOW__KUBERNETES__";

pub const ENV_EXECUTOR: &str = "EXECUTOR";
pub const ENV_SQL_HOST: &str = "SQL_HOST";
pub const ENV_SQL_USER: &str = "SQL_USER";
pub const ENV_SQL_DB: &str = "SQL_DB";
pub const ENV_SQL_PASSWORD: &str = "SQL_PASSWORD";
pub const ENV_SQL_ROOT_PASSWORD: &str = "SQL_ROOT_PASSWORD";
pub const ENV_DB_TYPE: &str = "DB_TYPE";
pub const ENV_DAGS_FOLDER: &str = concatcp!(AFC, "DAGS_FOLDER");
pub const ENV_WORKER_REPOSITORY: &str = concatcp!(AFK, "WORKER_CONTAINER_REPOSITORY");
pub const ENV_WORKER_TAG: &str = concatcp!(AFK, "WORKER_CONTAINER_TAG");
pub const ENV_WORKER_PULL_POLICY: &str = concatcp!(AFK, "WORKER_CONTAINER_IMAGE_PULL_POLICY");
pub const ENV_DELETE_WORKER_PODS: &str = concatcp!(AFK, "DELETE_WORKER_PODS");
pub const ENV_K8S_NAMESPACE: &str = concatcp!(AFK, "NAMESPACE");
pub const ENV_GIT_REPO: &str = concatcp!(AFK, "GIT_REPO");
pub const ENV_GIT_BRANCH: &str = concatcp!(AFK, "GIT_BRANCH");
pub const ENV_GIT_SUBPATH: &str = concatcp!(AFK, "GIT_SUBPATH");
pub const ENV_WORKER_SERVICE_ACCOUNT: &str = concatcp!(AFK, "WORKER_SERVICE_ACCOUNT_NAME");
pub const ENV_GIT_USER: &str = "GIT_USER";
pub const ENV_GIT_PASSWORD: &str = "GIT_PASSWORD";
pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
pub const ENV_REDIS_PASSWORD: &str = "REDIS_PASSWORD";

const PROMETHEUS_PREFIX: &str = "AIRFLOW_PROMETHEUS_";
const PROMETHEUS_DB_PREFIX: &str = concatcp!(PROMETHEUS_PREFIX, "DATABASE_");

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An unsupported or missing sub-spec combination. Raised before any object
/// is built, so a failing pass leaves nothing half-assembled.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no scheduler is configured, but the SQL connection settings live on the scheduler spec"))]
    SchedulerMissing,

    #[snafu(display("no airflowBaseRef is configured, so the SQL service cannot be resolved"))]
    BaseRefMissing,

    #[snafu(display("the Kubernetes executor requires a worker spec to supply the task-pod image"))]
    WorkerMissing,
}

/// Scheduler spec and base reference, the two inputs every variable set
/// starts from.
fn connection_specs(cluster: &AirflowCluster) -> Result<(&SchedulerSpec, &NameRef)> {
    let scheduler = cluster.spec.scheduler.as_ref().context(SchedulerMissingSnafu)?;
    let base = cluster
        .spec
        .airflow_base_ref
        .as_ref()
        .context(BaseRefMissingSnafu)?;
    Ok((scheduler, base))
}

fn worker_spec(cluster: &AirflowCluster) -> Result<&WorkerSpec> {
    cluster.spec.worker.as_ref().context(WorkerMissingSnafu)
}

/// Directory the workload containers load DAGs from: the base path, plus
/// the sync destination and declared subdirectory when a DAG source is
/// configured.
fn dags_folder(cluster: &AirflowCluster) -> String {
    let subdir = cluster
        .spec
        .dags
        .as_ref()
        .map(|dags| dags.dag_subdir.as_str())
        .unwrap_or_default();
    match cluster.dag_source() {
        Some(DagSource::Git(_)) => format!("{AIRFLOW_DAGS_BASE}/{GIT_SYNC_DEST_DIR}/{subdir}"),
        Some(DagSource::Gcs(_)) => format!("{AIRFLOW_DAGS_BASE}/{GCS_SYNC_DEST_DIR}/{subdir}"),
        None => AIRFLOW_DAGS_BASE.to_owned(),
    }
}

/// The shared variable set of every Airflow container (UI, scheduler,
/// worker, flower), conditioned on executor mode and DAG source.
pub fn airflow_env(cluster: &AirflowCluster) -> Result<Vec<EnvVar>> {
    let (scheduler, base) = connection_specs(cluster)?;
    let sql_host = base.child(COMPONENT_SQL);
    let ui_secret = cluster.child_name(COMPONENT_UI, "");

    let mut env = vec![
        env_var(ENV_EXECUTOR, cluster.spec.executor.to_string()),
        env_var_from_secret(ENV_SQL_PASSWORD, &ui_secret, SECRET_KEY_PASSWORD),
        env_var(ENV_DAGS_FOLDER, dags_folder(cluster)),
        env_var(ENV_SQL_HOST, sql_host),
        env_var(ENV_SQL_USER, scheduler.db_user.clone()),
        env_var(ENV_SQL_DB, scheduler.db_name.clone()),
        env_var(ENV_DB_TYPE, scheduler.database.to_string()),
    ];

    match cluster.spec.executor {
        Executor::Kubernetes => {
            let worker = worker_spec(cluster)?;
            env.push(env_var(ENV_WORKER_REPOSITORY, worker.image_repository()));
            env.push(env_var(ENV_WORKER_TAG, worker.image_tag()));
            env.push(env_var(ENV_WORKER_PULL_POLICY, "IfNotPresent"));
            env.push(env_var(ENV_DELETE_WORKER_PODS, "True"));
            env.push(env_var(ENV_K8S_NAMESPACE, cluster.namespace().unwrap_or_default()));
            if let Some(DagSource::Git(git)) = cluster.dag_source() {
                let subdir = cluster
                    .spec
                    .dags
                    .as_ref()
                    .map(|dags| dags.dag_subdir.clone())
                    .unwrap_or_default();
                env.push(env_var(ENV_GIT_REPO, git.repo.clone()));
                env.push(env_var(ENV_GIT_BRANCH, git.branch.clone()));
                env.push(env_var(ENV_GIT_SUBPATH, subdir));
                // Task pods run under the scheduler's identity; Airflow
                // requires uniform settings across all components.
                env.push(env_var(
                    ENV_WORKER_SERVICE_ACCOUNT,
                    cluster.child_name(COMPONENT_SCHEDULER, ""),
                ));
                if let Some(cred) = &git.cred_secret_ref {
                    env.push(env_var_from_secret(ENV_GIT_PASSWORD, &cred.name, SECRET_KEY_PASSWORD));
                    env.push(env_var(ENV_GIT_USER, git.user.clone()));
                }
            }
        }
        Executor::Celery => {
            let redis = cluster.child_name(COMPONENT_REDIS, "");
            env.push(env_var_from_secret(ENV_REDIS_PASSWORD, &redis, SECRET_KEY_PASSWORD));
            env.push(env_var(ENV_REDIS_HOST, redis));
        }
        Executor::Local => {}
    }

    env.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(env)
}

/// Variable set of the scheduler's Prometheus exporter sidecar.
pub fn prometheus_env(cluster: &AirflowCluster) -> Result<Vec<EnvVar>> {
    let (scheduler, base) = connection_specs(cluster)?;
    let ui_secret = cluster.child_name(COMPONENT_UI, "");

    let mut env = vec![
        env_var(concatcp!(PROMETHEUS_PREFIX, "LISTEN_ADDR"), ":9112"),
        env_var(
            concatcp!(PROMETHEUS_DB_PREFIX, "BACKEND"),
            scheduler.database.to_string(),
        ),
        env_var(concatcp!(PROMETHEUS_DB_PREFIX, "HOST"), base.child(COMPONENT_SQL)),
        env_var(
            concatcp!(PROMETHEUS_DB_PREFIX, "PORT"),
            scheduler.database.port().to_string(),
        ),
        env_var(concatcp!(PROMETHEUS_DB_PREFIX, "USER"), scheduler.db_user.clone()),
        env_var_from_secret(
            concatcp!(PROMETHEUS_DB_PREFIX, "PASSWORD"),
            &ui_secret,
            SECRET_KEY_PASSWORD,
        ),
        env_var(concatcp!(PROMETHEUS_DB_PREFIX, "NAME"), scheduler.db_name.clone()),
    ];

    env.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(env)
}

/// Variable set of the schema-bootstrap init container. Root credentials
/// come from the base's SQL secret, the application password from the UI
/// secret the bootstrap DDL installs.
pub fn bootstrap_env(cluster: &AirflowCluster) -> Result<Vec<EnvVar>> {
    let (scheduler, base) = connection_specs(cluster)?;
    let sql_secret = base.child(COMPONENT_SQL);
    let ui_secret = cluster.child_name(COMPONENT_UI, "");

    let mut env = vec![
        env_var_from_secret(ENV_SQL_ROOT_PASSWORD, &sql_secret, SECRET_KEY_ROOT_PASSWORD),
        env_var(ENV_SQL_DB, scheduler.db_name.clone()),
        env_var(ENV_SQL_USER, scheduler.db_user.clone()),
        env_var_from_secret(ENV_SQL_PASSWORD, &ui_secret, SECRET_KEY_PASSWORD),
        env_var(ENV_SQL_HOST, sql_secret.clone()),
        env_var(ENV_DB_TYPE, scheduler.database.to_string()),
    ];

    env.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(env)
}
