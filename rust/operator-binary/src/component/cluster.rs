//! AirflowCluster components: Redis, scheduler, UI, workers and Flower.

use std::collections::BTreeMap;

use k8s_openapi::api::{apps::v1::StatefulSet, core::v1::Container};
use kube::ResourceExt;
use rand::Rng;

use crate::{
    build::{
        add_airflow_containers, add_data_volume, build_credentials_secret, build_pdb,
        build_role_binding, build_service, build_service_account, container_port,
        db_bootstrap_container, exec_probe, http_probe, pod_spec_mut, prepend_init_container,
        referred_secret, service_port, set_parallel_pod_management, statefulset_frame,
        volume_mount,
    },
    component::{Component, Result},
    crd::{
        cluster::{
            AirflowCluster, AirflowUiSpec, DagSource, FlowerSpec, RedisSpec, SchedulerSpec,
            WorkerSpec,
        },
        Executor, RootResource, AIRFLOW_DAGS_BASE, COMPONENT_FLOWER, COMPONENT_REDIS,
        COMPONENT_SCHEDULER, COMPONENT_UI, COMPONENT_WORKER, PROMETHEUS_EXPORTER_IMAGE,
        SECRET_KEY_PASSWORD,
    },
    env_vars::{airflow_env, bootstrap_env, prometheus_env},
    resources::{default_differs, ChildResource, ManagedObject, ObjectSet},
    util::{env_var, env_var_from_secret},
};

/// Name of the shared emptyDir the DAG sync containers fill and the Airflow
/// containers read.
const DAGS_VOLUME: &str = "dags-data";

/// The components an AirflowCluster can be configured with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClusterComponent {
    Redis,
    Scheduler,
    Ui,
    Worker,
    Flower,
}

impl AirflowCluster {
    /// The configured components of this cluster, in reconcile order.
    pub fn components(&self) -> Vec<ClusterComponent> {
        let mut components = Vec::new();
        if self.spec.redis.is_some() {
            components.push(ClusterComponent::Redis);
        }
        if self.spec.scheduler.is_some() {
            components.push(ClusterComponent::Scheduler);
        }
        if self.spec.ui.is_some() {
            components.push(ClusterComponent::Ui);
        }
        if self.spec.worker.is_some() {
            components.push(ClusterComponent::Worker);
        }
        if self.spec.flower.is_some() {
            components.push(ClusterComponent::Flower);
        }
        components
    }
}

impl Component for ClusterComponent {
    type Root = AirflowCluster;

    fn tag(&self) -> &'static str {
        match self {
            ClusterComponent::Redis => COMPONENT_REDIS,
            ClusterComponent::Scheduler => COMPONENT_SCHEDULER,
            ClusterComponent::Ui => COMPONENT_UI,
            ClusterComponent::Worker => COMPONENT_WORKER,
            ClusterComponent::Flower => COMPONENT_FLOWER,
        }
    }

    fn expected_resources(
        &self,
        root: &AirflowCluster,
        labels: &BTreeMap<String, String>,
        rng: &mut (impl Rng + ?Sized),
    ) -> Result<ObjectSet> {
        let mut set = ObjectSet::new();
        match self {
            ClusterComponent::Redis => {
                if let Some(redis) = &root.spec.redis {
                    set.add(ManagedObject::managed(build_credentials_secret(
                        root,
                        root.child_name(COMPONENT_REDIS, ""),
                        labels,
                        &[SECRET_KEY_PASSWORD],
                        rng,
                    )));
                    set.add(ManagedObject::managed(build_service(
                        root,
                        COMPONENT_REDIS,
                        None,
                        labels,
                        vec![service_port("redis", 6379)],
                    )));
                    set.add(ManagedObject::managed(redis_statefulset(root, redis, labels)));
                    set.add(ManagedObject::managed(build_pdb(
                        root,
                        COMPONENT_REDIS,
                        labels,
                        "100%",
                    )));
                }
            }
            ClusterComponent::Scheduler => {
                if let Some(scheduler) = &root.spec.scheduler {
                    // The ServiceAccount and its binding exist solely so the
                    // Kubernetes executor can manage task pods.
                    if root.spec.executor == Executor::Kubernetes {
                        set.add(ManagedObject::managed(build_service_account(
                            root,
                            COMPONENT_SCHEDULER,
                            labels,
                        )));
                        set.add(ManagedObject::managed(build_role_binding(
                            root,
                            COMPONENT_SCHEDULER,
                            labels,
                        )));
                    }
                    set.add(ManagedObject::managed(scheduler_statefulset(
                        root, scheduler, labels,
                    )?));
                    if let Some(DagSource::Git(git)) = root.dag_source() {
                        if let Some(cred) = &git.cred_secret_ref {
                            set.add(ManagedObject::referred(referred_secret(
                                cred.name.clone(),
                                root.namespace(),
                            )));
                        }
                    }
                }
            }
            ClusterComponent::Ui => {
                if let Some(ui) = &root.spec.ui {
                    set.add(ManagedObject::managed(ui_statefulset(root, ui, labels)?));
                    set.add(ManagedObject::managed(build_credentials_secret(
                        root,
                        root.child_name(COMPONENT_UI, ""),
                        labels,
                        &[SECRET_KEY_PASSWORD],
                        rng,
                    )));
                }
            }
            ClusterComponent::Worker => {
                if let Some(worker) = &root.spec.worker {
                    set.add(ManagedObject::managed(worker_statefulset(root, worker, labels)?));
                }
            }
            ClusterComponent::Flower => {
                if let Some(flower) = &root.spec.flower {
                    set.add(ManagedObject::managed(flower_statefulset(root, flower, labels)?));
                }
            }
        }
        tracing::debug!(
            component = self.tag(),
            objects = set.len(),
            "computed expected resources"
        );
        Ok(set)
    }

    fn differs(&self, expected: &mut ChildResource, observed: &ChildResource) -> bool {
        match self {
            // TODO: narrow once worker drift detection is understood; until
            // then workers are reapplied on every pass.
            ClusterComponent::Worker => true,
            _ => default_differs(expected, observed),
        }
    }
}

fn redis_statefulset(
    root: &AirflowCluster,
    redis: &RedisSpec,
    labels: &BTreeMap<String, String>,
) -> StatefulSet {
    let redis_secret = root.child_name(COMPONENT_REDIS, "");
    let mut sts = statefulset_frame(root, COMPONENT_REDIS, labels, None, true);
    let vol = add_data_volume(&mut sts, redis.volume_claim_template.as_ref(), "redis-data");
    let mut args = vec!["--requirepass".to_owned(), "$(REDIS_PASSWORD)".to_owned()];
    if redis.additional_args.is_some() {
        args.push("$(REDIS_EXTRA_FLAGS)".to_owned());
    }
    let probe = |delay, period, timeout| exec_probe(&["redis-cli", "ping"], delay, period, timeout);
    pod_spec_mut(&mut sts).containers = vec![Container {
        name: "redis".to_owned(),
        image: Some(redis.container_image()),
        env: Some(vec![
            env_var(
                "REDIS_EXTRA_FLAGS",
                redis.additional_args.clone().unwrap_or_default(),
            ),
            env_var_from_secret("REDIS_PASSWORD", &redis_secret, SECRET_KEY_PASSWORD),
        ]),
        args: Some(args),
        resources: Some(redis.resources.clone()),
        ports: Some(vec![container_port("redis", 6379)]),
        volume_mounts: Some(vec![volume_mount(&vol, "/data")]),
        liveness_probe: Some(probe(30, 20, 5)),
        readiness_probe: Some(probe(10, 5, 2)),
        ..Container::default()
    }];
    sts
}

fn ui_statefulset(
    root: &AirflowCluster,
    ui: &AirflowUiSpec,
    labels: &BTreeMap<String, String>,
) -> Result<StatefulSet> {
    let mut sts = statefulset_frame(root, COMPONENT_UI, labels, Some(ui.replicas), false);
    set_parallel_pod_management(&mut sts);
    let vol = add_data_volume(&mut sts, None, DAGS_VOLUME);
    let containers = vec![Container {
        name: "airflow-ui".to_owned(),
        image: Some(ui.container_image()),
        env: Some(airflow_env(root)?),
        image_pull_policy: Some("Always".to_owned()),
        args: Some(vec!["webserver".to_owned()]),
        resources: Some(ui.resources.clone()),
        ports: Some(vec![container_port("web", 8080)]),
        volume_mounts: Some(vec![volume_mount(&vol, AIRFLOW_DAGS_BASE)]),
        liveness_probe: Some(http_probe("/health", "web", 100, 60, 2, 5)),
        ..Container::default()
    }];
    add_airflow_containers(&mut sts, containers, root.dag_source(), &vol);
    // The webserver pod bootstraps the metadata schema before anything in
    // the cluster first talks to the database.
    let database = root
        .spec
        .scheduler
        .as_ref()
        .map(|scheduler| scheduler.database)
        .unwrap_or_default();
    prepend_init_container(&mut sts, db_bootstrap_container(database, bootstrap_env(root)?));
    Ok(sts)
}

fn scheduler_statefulset(
    root: &AirflowCluster,
    scheduler: &SchedulerSpec,
    labels: &BTreeMap<String, String>,
) -> Result<StatefulSet> {
    let mut sts = statefulset_frame(root, COMPONENT_SCHEDULER, labels, None, true);
    let vol = add_data_volume(&mut sts, None, DAGS_VOLUME);
    if root.spec.executor == Executor::Kubernetes {
        pod_spec_mut(&mut sts).service_account_name =
            Some(root.child_name(COMPONENT_SCHEDULER, ""));
    }
    let containers = vec![
        Container {
            name: "scheduler".to_owned(),
            image: Some(scheduler.container_image()),
            env: Some(airflow_env(root)?),
            image_pull_policy: Some("Always".to_owned()),
            args: Some(vec!["scheduler".to_owned()]),
            resources: Some(scheduler.resources.clone()),
            volume_mounts: Some(vec![volume_mount(&vol, AIRFLOW_DAGS_BASE)]),
            ..Container::default()
        },
        Container {
            name: "metrics".to_owned(),
            image: Some(PROMETHEUS_EXPORTER_IMAGE.to_owned()),
            env: Some(prometheus_env(root)?),
            ports: Some(vec![container_port("metrics", 9112)]),
            ..Container::default()
        },
    ];
    add_airflow_containers(&mut sts, containers, root.dag_source(), &vol);
    Ok(sts)
}

fn worker_statefulset(
    root: &AirflowCluster,
    worker: &WorkerSpec,
    labels: &BTreeMap<String, String>,
) -> Result<StatefulSet> {
    let mut sts = statefulset_frame(root, COMPONENT_WORKER, labels, Some(worker.replicas), true);
    let vol = add_data_volume(&mut sts, None, DAGS_VOLUME);
    let containers = vec![Container {
        name: "worker".to_owned(),
        image: Some(worker.container_image()),
        env: Some(airflow_env(root)?),
        image_pull_policy: Some("Always".to_owned()),
        args: Some(vec!["worker".to_owned()]),
        resources: Some(worker.resources.clone()),
        ports: Some(vec![container_port("wlog", 8793)]),
        volume_mounts: Some(vec![volume_mount(&vol, AIRFLOW_DAGS_BASE)]),
        ..Container::default()
    }];
    add_airflow_containers(&mut sts, containers, root.dag_source(), &vol);
    Ok(sts)
}

fn flower_statefulset(
    root: &AirflowCluster,
    flower: &FlowerSpec,
    labels: &BTreeMap<String, String>,
) -> Result<StatefulSet> {
    let mut sts = statefulset_frame(root, COMPONENT_FLOWER, labels, Some(flower.replicas), true);
    let vol = add_data_volume(&mut sts, None, DAGS_VOLUME);
    let containers = vec![Container {
        name: "flower".to_owned(),
        image: Some(flower.container_image()),
        env: Some(airflow_env(root)?),
        image_pull_policy: Some("Always".to_owned()),
        args: Some(vec!["flower".to_owned()]),
        resources: Some(flower.resources.clone()),
        ports: Some(vec![container_port("flower", 5555)]),
        volume_mounts: Some(vec![volume_mount(&vol, AIRFLOW_DAGS_BASE)]),
        ..Container::default()
    }];
    add_airflow_containers(&mut sts, containers, root.dag_source(), &vol);
    Ok(sts)
}
