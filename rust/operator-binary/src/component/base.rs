//! AirflowBase components: the SQL backends, the CloudSQL proxy and the
//! NFS store.

use std::collections::BTreeMap;

use k8s_openapi::api::{apps::v1::StatefulSet, core::v1::Container};
use kube::ResourceExt;
use rand::Rng;

use crate::{
    build::{
        add_data_volume, build_credentials_secret, build_pdb, build_service, container_port,
        exec_probe, pod_spec_mut, referred_secret, service_port, set_parallel_pod_management,
        statefulset_frame, volume_mount,
    },
    component::{Component, Result},
    crd::{
        base::{AirflowBase, MySqlSpec, NfsStoreSpec, PostgresSpec, SqlProxySpec},
        RootResource, COMPONENT_MYSQL, COMPONENT_NFS, COMPONENT_POSTGRES, COMPONENT_SQL,
        COMPONENT_SQLPROXY, SECRET_KEY_PASSWORD, SECRET_KEY_ROOT_PASSWORD,
    },
    resources::{ManagedObject, ObjectSet},
    util::{env_var, env_var_from_secret},
};

/// The components an AirflowBase can be configured with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BaseComponent {
    MySql,
    Postgres,
    SqlProxy,
    NfsStore,
}

impl AirflowBase {
    /// The configured components of this base, in reconcile order.
    pub fn components(&self) -> Vec<BaseComponent> {
        let mut components = Vec::new();
        if self.spec.mysql.is_some() {
            components.push(BaseComponent::MySql);
        }
        if self.spec.postgres.is_some() {
            components.push(BaseComponent::Postgres);
        }
        if self.spec.sqlproxy.is_some() {
            components.push(BaseComponent::SqlProxy);
        }
        if self.spec.storage.is_some() {
            components.push(BaseComponent::NfsStore);
        }
        components
    }
}

impl Component for BaseComponent {
    type Root = AirflowBase;

    fn tag(&self) -> &'static str {
        match self {
            BaseComponent::MySql => COMPONENT_MYSQL,
            BaseComponent::Postgres => COMPONENT_POSTGRES,
            BaseComponent::SqlProxy => COMPONENT_SQLPROXY,
            BaseComponent::NfsStore => COMPONENT_NFS,
        }
    }

    fn expected_resources(
        &self,
        root: &AirflowBase,
        labels: &BTreeMap<String, String>,
        rng: &mut (impl Rng + ?Sized),
    ) -> Result<ObjectSet> {
        let mut set = ObjectSet::new();
        match self {
            BaseComponent::MySql => {
                if let Some(mysql) = root.spec.mysql.as_ref().filter(|mysql| !mysql.operator) {
                    let sql_name = root.child_name(COMPONENT_SQL, "");
                    set.add(ManagedObject::managed(build_credentials_secret(
                        root,
                        sql_name.clone(),
                        labels,
                        &[SECRET_KEY_PASSWORD, SECRET_KEY_ROOT_PASSWORD],
                        rng,
                    )));
                    set.add(ManagedObject::managed(build_service(
                        root,
                        COMPONENT_MYSQL,
                        Some(sql_name),
                        labels,
                        vec![service_port("mysql", 3306)],
                    )));
                    set.add(ManagedObject::managed(mysql_statefulset(root, mysql, labels)));
                    set.add(ManagedObject::managed(build_pdb(
                        root,
                        COMPONENT_MYSQL,
                        labels,
                        "100%",
                    )));
                }
            }
            BaseComponent::Postgres => {
                if let Some(postgres) = root.spec.postgres.as_ref().filter(|pg| !pg.operator) {
                    let sql_name = root.child_name(COMPONENT_SQL, "");
                    set.add(ManagedObject::managed(build_credentials_secret(
                        root,
                        sql_name.clone(),
                        labels,
                        &[SECRET_KEY_PASSWORD, SECRET_KEY_ROOT_PASSWORD],
                        rng,
                    )));
                    set.add(ManagedObject::managed(build_service(
                        root,
                        COMPONENT_POSTGRES,
                        Some(sql_name),
                        labels,
                        vec![service_port("postgres", 5432)],
                    )));
                    set.add(ManagedObject::managed(postgres_statefulset(root, postgres, labels)));
                    set.add(ManagedObject::managed(build_pdb(
                        root,
                        COMPONENT_POSTGRES,
                        labels,
                        "100%",
                    )));
                }
            }
            BaseComponent::SqlProxy => {
                if let Some(proxy) = &root.spec.sqlproxy {
                    set.add(ManagedObject::managed(build_service(
                        root,
                        COMPONENT_SQLPROXY,
                        Some(root.child_name(COMPONENT_SQL, "")),
                        labels,
                        vec![service_port("sqlproxy", 3306)],
                    )));
                    set.add(ManagedObject::managed(sqlproxy_statefulset(root, proxy, labels)));
                    // The instance credential is provisioned out of band;
                    // the engine only watches it.
                    set.add(ManagedObject::referred(referred_secret(
                        root.child_name(COMPONENT_SQLPROXY, ""),
                        root.namespace(),
                    )));
                }
            }
            BaseComponent::NfsStore => {
                if let Some(storage) = &root.spec.storage {
                    set.add(ManagedObject::managed(nfs_statefulset(root, storage, labels)));
                    set.add(ManagedObject::managed(build_service(
                        root,
                        COMPONENT_NFS,
                        None,
                        labels,
                        vec![
                            service_port("nfs", 2049),
                            service_port("mountd", 20048),
                            service_port("rpcbind", 111),
                        ],
                    )));
                    set.add(ManagedObject::managed(build_pdb(root, COMPONENT_NFS, labels, "100%")));
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
}

fn mysql_statefulset(
    root: &AirflowBase,
    mysql: &MySqlSpec,
    labels: &BTreeMap<String, String>,
) -> StatefulSet {
    let sql_secret = root.child_name(COMPONENT_SQL, "");
    let mut sts = statefulset_frame(root, COMPONENT_MYSQL, labels, Some(mysql.replicas), true);
    let vol = add_data_volume(&mut sts, mysql.volume_claim_template.as_ref(), "mysql-data");
    pod_spec_mut(&mut sts).containers = vec![Container {
        name: "mysql".to_owned(),
        image: Some(mysql.container_image()),
        env: Some(vec![
            env_var("MYSQL_DATABASE", "testdb"),
            env_var("MYSQL_USER", "airflow"),
            env_var_from_secret("MYSQL_PASSWORD", &sql_secret, SECRET_KEY_PASSWORD),
            env_var_from_secret("MYSQL_ROOT_PASSWORD", &sql_secret, SECRET_KEY_ROOT_PASSWORD),
        ]),
        args: Some(vec!["--explicit-defaults-for-timestamp=ON".to_owned()]),
        resources: Some(mysql.resources.clone()),
        ports: Some(vec![container_port("mysql", 3306)]),
        volume_mounts: Some(vec![volume_mount(&vol, "/var/lib/mysql")]),
        liveness_probe: Some(exec_probe(
            &["bash", "-c", "mysqladmin -p$MYSQL_ROOT_PASSWORD ping"],
            30,
            20,
            5,
        )),
        readiness_probe: Some(exec_probe(
            &["bash", "-c", "mysql -u$MYSQL_USER -p$MYSQL_PASSWORD -e \"use testdb\""],
            10,
            5,
            2,
        )),
        ..Container::default()
    }];
    sts
}

fn postgres_statefulset(
    root: &AirflowBase,
    postgres: &PostgresSpec,
    labels: &BTreeMap<String, String>,
) -> StatefulSet {
    let sql_secret = root.child_name(COMPONENT_SQL, "");
    let mut sts = statefulset_frame(root, COMPONENT_POSTGRES, labels, Some(postgres.replicas), true);
    let vol = add_data_volume(&mut sts, postgres.volume_claim_template.as_ref(), "postgres-data");
    let probe = |delay, period, timeout| {
        exec_probe(
            &["bash", "-c", "psql -w -U $POSTGRES_USER -d $POSTGRES_DB -c 'SELECT 1'"],
            delay,
            period,
            timeout,
        )
    };
    pod_spec_mut(&mut sts).containers = vec![Container {
        name: "postgres".to_owned(),
        image: Some(postgres.container_image()),
        env: Some(vec![
            env_var("POSTGRES_DB", "testdb"),
            env_var("POSTGRES_USER", "airflow"),
            env_var_from_secret("POSTGRES_PASSWORD", &sql_secret, SECRET_KEY_ROOT_PASSWORD),
        ]),
        resources: Some(postgres.resources.clone()),
        ports: Some(vec![container_port("postgres", 5432)]),
        volume_mounts: Some(vec![volume_mount(&vol, "/var/lib/postgres/data")]),
        liveness_probe: Some(probe(30, 20, 5)),
        readiness_probe: Some(probe(10, 5, 2)),
        ..Container::default()
    }];
    sts
}

fn sqlproxy_statefulset(
    root: &AirflowBase,
    proxy: &SqlProxySpec,
    labels: &BTreeMap<String, String>,
) -> StatefulSet {
    let mut sts = statefulset_frame(root, COMPONENT_SQLPROXY, labels, None, true);
    let instance = format!("{}=tcp:0.0.0.0:3306", proxy.instance_connection());
    pod_spec_mut(&mut sts).containers = vec![Container {
        name: "sqlproxy".to_owned(),
        image: Some(proxy.container_image()),
        env: Some(vec![env_var("SQL_INSTANCE", instance)]),
        command: Some(vec![
            "/cloud_sql_proxy".to_owned(),
            "-instances".to_owned(),
            "$(SQL_INSTANCE)".to_owned(),
        ]),
        resources: Some(proxy.resources.clone()),
        ports: Some(vec![container_port("sqlproxy", 3306)]),
        ..Container::default()
    }];
    sts
}

fn nfs_statefulset(
    root: &AirflowBase,
    storage: &NfsStoreSpec,
    labels: &BTreeMap<String, String>,
) -> StatefulSet {
    let mut sts = statefulset_frame(root, COMPONENT_NFS, labels, None, true);
    set_parallel_pod_management(&mut sts);
    let vol = add_data_volume(&mut sts, storage.volume.as_ref(), "nfs-data");
    pod_spec_mut(&mut sts).containers = vec![Container {
        name: "nfs-server".to_owned(),
        image: Some(storage.container_image()),
        resources: Some(storage.resources.clone()),
        ports: Some(vec![
            container_port("nfs", 2049),
            container_port("mountd", 20048),
            container_port("rpcbind", 111),
        ]),
        volume_mounts: Some(vec![volume_mount(&vol, "/exports")]),
        ..Container::default()
    }];
    sts
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        crd::base::parse_base,
        resources::{ChildKind, Lifecycle},
    };

    fn expected(
        manifest: &str,
        component: BaseComponent,
        seed: u64,
    ) -> (AirflowBase, ObjectSet) {
        let base = parse_base(manifest);
        let labels = base.component_labels(component.tag());
        let mut rng = StdRng::seed_from_u64(seed);
        let set = component
            .expected_resources(&base, &labels, &mut rng)
            .expect("expected resources");
        (base, set)
    }

    #[test]
    fn mysql_emits_secret_service_statefulset_and_pdb() {
        let (_, set) = expected(crate::crd::base::MYSQL_BASE, BaseComponent::MySql, 1);
        assert_eq!(set.len(), 4);
        assert!(set.get(ChildKind::Secret, "mb-sql").is_some());
        assert!(set.get(ChildKind::Service, "mb-sql").is_some());
        assert!(set.get(ChildKind::StatefulSet, "mb-mysql").is_some());
        assert!(set.get(ChildKind::PodDisruptionBudget, "mb-mysql").is_some());
        assert!(set.iter().all(|object| object.lifecycle == Lifecycle::Managed));
    }

    #[test]
    fn externally_operated_mysql_is_fully_suppressed() {
        let (_, set) = expected(
            "
            apiVersion: airflow.k8s.io/v1alpha1
            kind: AirflowBase
            metadata:
              name: mb
            spec:
              mysql:
                operator: true
            ",
            BaseComponent::MySql,
            1,
        );
        assert!(set.is_empty());
    }

    #[test]
    fn mysql_without_claim_gets_exactly_one_empty_dir_volume() {
        let (_, set) = expected(crate::crd::base::MYSQL_BASE, BaseComponent::MySql, 1);
        let sts = match &set.get(ChildKind::StatefulSet, "mb-mysql").unwrap().resource {
            crate::resources::ChildResource::StatefulSet(sts) => sts.clone(),
            other => panic!("expected a StatefulSet, got {other:?}"),
        };
        let spec = sts.spec.expect("spec");
        assert_eq!(spec.volume_claim_templates, None);
        let volumes = spec.template.spec.expect("pod spec").volumes.expect("volumes");
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "mysql-data");
        assert!(volumes[0].empty_dir.is_some());
    }

    #[test]
    fn same_seed_builds_identical_sets_including_secret_material() {
        let (_, first) = expected(crate::crd::base::MYSQL_BASE, BaseComponent::MySql, 42);
        let (_, second) = expected(crate::crd::base::MYSQL_BASE, BaseComponent::MySql, 42);
        assert_eq!(first, second);
    }

    #[test]
    fn sqlproxy_refers_to_its_credential_secret() {
        let (_, set) = expected(
            "
            apiVersion: airflow.k8s.io/v1alpha1
            kind: AirflowBase
            metadata:
              name: mb
              namespace: af
            spec:
              sqlproxy:
                project: proj
                region: us-central1
                instance: af
            ",
            BaseComponent::SqlProxy,
            1,
        );
        assert_eq!(set.len(), 3);
        let secret = set.get(ChildKind::Secret, "mb-sqlproxy").expect("referred secret");
        assert_eq!(secret.lifecycle, Lifecycle::Referred);
        let referred: Vec<_> = set
            .iter()
            .filter(|object| object.lifecycle == Lifecycle::Referred)
            .collect();
        assert_eq!(referred.len(), 1);
        assert_eq!(referred[0].kind(), ChildKind::Secret);
    }

    #[test]
    fn sqlproxy_publishes_under_the_shared_sql_name() {
        let (_, set) = expected(
            "
            apiVersion: airflow.k8s.io/v1alpha1
            kind: AirflowBase
            metadata:
              name: mb
            spec:
              sqlproxy:
                project: proj
                region: r
                instance: i
            ",
            BaseComponent::SqlProxy,
            1,
        );
        assert!(set.get(ChildKind::Service, "mb-sql").is_some());
        let sts = match &set.get(ChildKind::StatefulSet, "mb-sqlproxy").unwrap().resource {
            crate::resources::ChildResource::StatefulSet(sts) => sts.clone(),
            other => panic!("expected a StatefulSet, got {other:?}"),
        };
        let container = &sts.spec.unwrap().template.spec.unwrap().containers[0];
        let instance = container.env.as_ref().unwrap()[0].value.as_deref().unwrap();
        assert_eq!(instance, "proj:r:i=tcp:0.0.0.0:3306");
    }

    #[test]
    fn nfs_exposes_all_three_service_ports() {
        let (_, set) = expected(crate::crd::base::MYSQL_BASE, BaseComponent::NfsStore, 1);
        let service = match &set.get(ChildKind::Service, "mb-nfs").unwrap().resource {
            crate::resources::ChildResource::Service(service) => service.clone(),
            other => panic!("expected a Service, got {other:?}"),
        };
        let ports = service.spec.unwrap().ports.unwrap();
        let numbers: Vec<i32> = ports.iter().map(|port| port.port).collect();
        assert_eq!(numbers, vec![2049, 20048, 111]);
    }

    #[test]
    fn configured_components_follow_the_spec() {
        let base = parse_base(crate::crd::base::MYSQL_BASE);
        assert_eq!(
            base.components(),
            vec![BaseComponent::MySql, BaseComponent::NfsStore]
        );
    }
}
