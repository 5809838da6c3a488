//! Builders for the Kubernetes child objects the components are assembled
//! from. Everything here is shared by at least two components; shapes owned
//! by a single component live next to that component.

use std::collections::BTreeMap;

use const_format::concatcp;
use indoc::indoc;
use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetSpec},
        core::v1::{
            Container, ContainerPort, EmptyDirVolumeSource, EnvVar, ExecAction, HTTPGetAction,
            PersistentVolumeClaim, PodSpec, PodTemplateSpec, Probe, Secret, Service,
            ServiceAccount, ServicePort, ServiceSpec, Volume, VolumeMount,
        },
        policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec},
        rbac::v1::{RoleBinding, RoleRef, Subject},
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
    ByteString,
};
use kube::ResourceExt;
use rand::Rng;

use crate::{
    crd::{
        cluster::{DagSource, GcsSpec, GitSpec},
        DbType, RootResource, DEFAULT_MYSQL_IMAGE, DEFAULT_MYSQL_VERSION, DEFAULT_POSTGRES_IMAGE,
        DEFAULT_POSTGRES_VERSION, GCS_SYNC_IMAGE, GCS_SYNC_VERSION, GIT_SYNC_DEST_DIR,
        GIT_SYNC_IMAGE, GIT_SYNC_VERSION, SECRET_KEY_PASSWORD,
    },
    util::{env_var, env_var_from_secret},
};

/// Length of every generated credential.
pub const GENERATED_PASSWORD_LEN: usize = 16;

const PASSWORD_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const PASSWORD_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Schema bootstrap for MySQL. `$(VAR)` references are expanded by the
/// kubelet from the container environment before bash runs the script.
const MYSQL_BOOTSTRAP_DDL: &str = indoc! {r#"
    mysql -uroot -h$(SQL_HOST) -p$(SQL_ROOT_PASSWORD) <<'EOSQL'
    CREATE DATABASE IF NOT EXISTS $(SQL_DB);
    USE $(SQL_DB);
    CREATE USER IF NOT EXISTS '$(SQL_USER)'@'%' IDENTIFIED BY '$(SQL_PASSWORD)';
    GRANT ALL ON $(SQL_DB).* TO '$(SQL_USER)'@'%';
    FLUSH PRIVILEGES;
    EOSQL
"#};

/// Schema bootstrap for Postgres. Both the database and the role creation
/// are guarded, so the script is safe to run against an already bootstrapped
/// instance.
const POSTGRES_BOOTSTRAP_DDL: &str = indoc! {r#"
    export PGPASSWORD=$(SQL_ROOT_PASSWORD)
    echo "SELECT 1 FROM pg_database WHERE datname = '$(SQL_DB)'" | psql -h $(SQL_HOST) -U airflow -d testdb -tA | grep -q 1 ||
        psql -h $(SQL_HOST) -U airflow -d testdb -c "CREATE DATABASE $(SQL_DB)"
    psql -h $(SQL_HOST) -U airflow -d testdb <<'EOSQL'
    DO $do$
    BEGIN
        IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '$(SQL_USER)') THEN
            CREATE USER $(SQL_USER) WITH ENCRYPTED PASSWORD '$(SQL_PASSWORD)';
        END IF;
    END
    $do$;
    GRANT ALL PRIVILEGES ON DATABASE $(SQL_DB) TO $(SQL_USER);
    EOSQL
"#};

/// Random lowercase-alphanumeric credential. The first character is always
/// a letter.
pub fn random_password<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut password = Vec::with_capacity(len);
    for _ in 0..len {
        password.push(PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())]);
    }
    if let Some(first) = password.first_mut() {
        *first = PASSWORD_LETTERS[rng.gen_range(0..PASSWORD_LETTERS.len())];
    }
    password
}

/// StatefulSet skeleton shared by every component: identity metadata, a
/// selector over the component labels, and a pod template carrying the
/// root's affinity and node selector. Containers and volumes are layered on
/// by the caller.
pub fn statefulset_frame<R: RootResource>(
    root: &R,
    component: &str,
    labels: &BTreeMap<String, String>,
    replicas: Option<i32>,
    headless_service: bool,
) -> StatefulSet {
    let name = root.child_name(component, "");
    let service_name = if headless_service {
        name.clone()
    } else {
        String::new()
    };
    StatefulSet {
        metadata: root.child_meta(name.clone(), labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas,
            service_name,
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: root.spec_annotations().cloned(),
                    labels: Some(labels.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    affinity: root.affinity().cloned(),
                    node_selector: root.node_selector().cloned(),
                    subdomain: Some(name),
                    ..PodSpec::default()
                }),
            },
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    }
}

pub(crate) fn sts_spec_mut(sts: &mut StatefulSet) -> &mut StatefulSetSpec {
    sts.spec.get_or_insert_with(StatefulSetSpec::default)
}

pub(crate) fn pod_spec_mut(sts: &mut StatefulSet) -> &mut PodSpec {
    sts_spec_mut(sts).template.spec.get_or_insert_with(PodSpec::default)
}

/// Pods of this set start in any order.
pub fn set_parallel_pod_management(sts: &mut StatefulSet) {
    sts_spec_mut(sts).pod_management_policy = Some("Parallel".to_owned());
}

/// Attaches the component's data volume. A declared claim template is used
/// as-is and its own metadata name is what mounts must reference; without
/// one the pod gets an emptyDir named `default_name`. Returns the volume
/// name to mount.
pub fn add_data_volume(
    sts: &mut StatefulSet,
    claim: Option<&PersistentVolumeClaim>,
    default_name: &str,
) -> String {
    match claim {
        Some(claim) => {
            let name = claim.metadata.name.clone().unwrap_or_default();
            sts_spec_mut(sts).volume_claim_templates = Some(vec![claim.clone()]);
            name
        }
        None => {
            pod_spec_mut(sts).volumes = Some(vec![Volume {
                name: default_name.to_owned(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Volume::default()
            }]);
            default_name.to_owned()
        }
    }
}

/// Service selecting the component's pods. `name` overrides the default
/// `<root>-<component>` child name; the MySQL, Postgres and SQL proxy
/// components all publish under the shared `sql` name this way.
pub fn build_service<R: RootResource>(
    root: &R,
    component: &str,
    name: Option<String>,
    labels: &BTreeMap<String, String>,
    ports: Vec<ServicePort>,
) -> Service {
    let name = name.unwrap_or_else(|| root.child_name(component, ""));
    Service {
        metadata: root.child_meta(name, labels.clone()),
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector: Some(labels.clone()),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

pub fn build_pdb<R: RootResource>(
    root: &R,
    component: &str,
    labels: &BTreeMap<String, String>,
    min_available: &str,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: root.child_meta(root.child_name(component, ""), labels.clone()),
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::String(min_available.to_owned())),
            selector: Some(LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            }),
            ..PodDisruptionBudgetSpec::default()
        }),
        ..PodDisruptionBudget::default()
    }
}

/// Secret carrying freshly generated credentials, one random value per key.
/// The key slice also fixes the draw order from `rng`.
pub fn build_credentials_secret<R, RNG>(
    root: &R,
    name: String,
    labels: &BTreeMap<String, String>,
    keys: &[&str],
    rng: &mut RNG,
) -> Secret
where
    R: RootResource,
    RNG: Rng + ?Sized,
{
    let data = keys
        .iter()
        .map(|key| {
            let password = random_password(rng, GENERATED_PASSWORD_LEN);
            ((*key).to_owned(), ByteString(password))
        })
        .collect();
    Secret {
        metadata: root.child_meta(name, labels.clone()),
        data: Some(data),
        ..Secret::default()
    }
}

/// Stub for a secret some other party owns: name and namespace only, enough
/// for the reconcile engine to watch it.
pub fn referred_secret(name: String, namespace: Option<String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace,
            ..ObjectMeta::default()
        },
        ..Secret::default()
    }
}

pub fn build_service_account<R: RootResource>(
    root: &R,
    component: &str,
    labels: &BTreeMap<String, String>,
) -> ServiceAccount {
    ServiceAccount {
        metadata: root.child_meta(root.child_name(component, ""), labels.clone()),
        ..ServiceAccount::default()
    }
}

/// Binds the component's ServiceAccount to `cluster-admin`. The Kubernetes
/// executor creates and deletes task pods through this identity.
pub fn build_role_binding<R: RootResource>(
    root: &R,
    component: &str,
    labels: &BTreeMap<String, String>,
) -> RoleBinding {
    let name = root.child_name(component, "");
    RoleBinding {
        metadata: root.child_meta(name.clone(), labels.clone()),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_owned(),
            name,
            namespace: root.namespace(),
            ..Subject::default()
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_owned(),
            kind: "ClusterRole".to_owned(),
            name: "cluster-admin".to_owned(),
        },
    }
}

pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_owned()),
        container_port: port,
        ..ContainerPort::default()
    }
}

pub fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port,
        ..ServicePort::default()
    }
}

pub fn volume_mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_owned(),
        mount_path: mount_path.to_owned(),
        ..VolumeMount::default()
    }
}

pub fn exec_probe(
    command: &[&str],
    initial_delay_seconds: i32,
    period_seconds: i32,
    timeout_seconds: i32,
) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command.iter().map(|part| (*part).to_owned()).collect()),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(timeout_seconds),
        ..Probe::default()
    }
}

pub fn http_probe(
    path: &str,
    port: &str,
    initial_delay_seconds: i32,
    period_seconds: i32,
    timeout_seconds: i32,
    failure_threshold: i32,
) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_owned()),
            port: IntOrString::String(port.to_owned()),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(timeout_seconds),
        success_threshold: Some(1),
        failure_threshold: Some(failure_threshold),
        ..Probe::default()
    }
}

/// Container keeping the DAG volume in step with the configured git
/// repository.
pub fn git_sync_container(git: &GitSpec, vol_name: &str) -> Container {
    let mut env = vec![
        env_var("GIT_SYNC_REPO", git.repo.clone()),
        env_var("GIT_SYNC_DEST", GIT_SYNC_DEST_DIR),
        env_var("GIT_SYNC_BRANCH", git.branch.clone()),
        env_var("GIT_SYNC_ONE_TIME", git.once.to_string()),
        env_var("GIT_SYNC_REV", git.rev.clone()),
    ];
    if let Some(cred) = &git.cred_secret_ref {
        env.push(env_var_from_secret("GIT_PASSWORD", &cred.name, SECRET_KEY_PASSWORD));
        env.push(env_var("GIT_USER", git.user.clone()));
    }
    Container {
        name: "git-sync".to_owned(),
        image: Some(concatcp!(GIT_SYNC_IMAGE, ":", GIT_SYNC_VERSION).to_owned()),
        env: Some(env),
        command: Some(vec!["/git-sync".to_owned()]),
        ports: Some(vec![container_port("gitsync", 2020)]),
        volume_mounts: Some(vec![volume_mount(vol_name, "/git")]),
        ..Container::default()
    }
}

/// Container mirroring a GCS bucket into the DAG volume.
pub fn gcs_sync_container(gcs: &GcsSpec, vol_name: &str) -> Container {
    Container {
        name: "gcs-syncd".to_owned(),
        image: Some(concatcp!(GCS_SYNC_IMAGE, ":", GCS_SYNC_VERSION).to_owned()),
        env: Some(vec![env_var("GCS_BUCKET", gcs.bucket.clone())]),
        args: Some(vec!["/home/airflow/gcs".to_owned()]),
        volume_mounts: Some(vec![volume_mount(vol_name, "/home/airflow/gcs")]),
        ..Container::default()
    }
}

/// Installs the workload containers plus the DAG sync container. A one-shot
/// sync runs as an init container, a continuous one joins the pod as a
/// sidecar.
pub fn add_airflow_containers(
    sts: &mut StatefulSet,
    mut containers: Vec<Container>,
    dags: Option<DagSource<'_>>,
    vol_name: &str,
) {
    let pod = pod_spec_mut(sts);
    pod.init_containers = Some(Vec::new());
    if let Some(source) = dags {
        let (once, sync) = match source {
            DagSource::Git(git) => (git.once, git_sync_container(git, vol_name)),
            DagSource::Gcs(gcs) => (gcs.once, gcs_sync_container(gcs, vol_name)),
        };
        if once {
            pod.init_containers = Some(vec![sync]);
        } else {
            containers.push(sync);
        }
    }
    pod.containers = containers;
}

/// One-shot init container creating the metadata database and application
/// user. The DDL is guarded, so rerunning it against an existing database
/// changes nothing.
pub fn db_bootstrap_container(db: DbType, env: Vec<EnvVar>) -> Container {
    let (name, image, ddl) = match db {
        DbType::Mysql => (
            "mysql-dbcreate",
            concatcp!(DEFAULT_MYSQL_IMAGE, ":", DEFAULT_MYSQL_VERSION),
            MYSQL_BOOTSTRAP_DDL,
        ),
        DbType::Postgres => (
            "postgres-dbcreate",
            concatcp!(DEFAULT_POSTGRES_IMAGE, ":", DEFAULT_POSTGRES_VERSION),
            POSTGRES_BOOTSTRAP_DDL,
        ),
    };
    Container {
        name: name.to_owned(),
        image: Some(image.to_owned()),
        env: Some(env),
        command: Some(vec!["/bin/bash".to_owned()]),
        args: Some(vec!["-c".to_owned(), ddl.to_owned()]),
        ..Container::default()
    }
}

/// Schema bootstrap runs before everything else in the pod, DAG sync
/// included.
pub fn prepend_init_container(sts: &mut StatefulSet, container: Container) {
    let pod = pod_spec_mut(sts);
    let mut init = vec![container];
    init.extend(pod.init_containers.take().unwrap_or_default());
    pod.init_containers = Some(init);
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};
    use rstest::rstest;

    use super::*;
    use crate::crd::{
        base::{AirflowBase, AirflowBaseSpec},
        cluster::NameRef,
        COMPONENT_MYSQL, COMPONENT_SCHEDULER,
    };

    fn base() -> AirflowBase {
        let mut base = AirflowBase::new("mb", AirflowBaseSpec::default());
        base.metadata.namespace = Some("af".to_owned());
        base
    }

    #[test]
    fn password_is_lowercase_alphanumeric_with_letter_prefix() {
        let mut rng = StdRng::seed_from_u64(7);
        let password = random_password(&mut rng, GENERATED_PASSWORD_LEN);
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password[0].is_ascii_lowercase());
        assert!(password
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn same_seed_same_password() {
        let a = random_password(&mut StdRng::seed_from_u64(11), 16);
        let b = random_password(&mut StdRng::seed_from_u64(11), 16);
        let c = random_password(&mut StdRng::seed_from_u64(12), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[rstest]
    #[case(true, "mb-mysql")]
    #[case(false, "")]
    fn frame_service_name_follows_headless_flag(#[case] headless: bool, #[case] expected: &str) {
        let root = base();
        let labels = root.component_labels(COMPONENT_MYSQL);
        let sts = statefulset_frame(&root, COMPONENT_MYSQL, &labels, Some(1), headless);
        let spec = sts.spec.expect("frame always sets a spec");
        assert_eq!(spec.service_name, expected);
        assert_eq!(spec.selector.match_labels, Some(labels.clone()));
        let template_meta = spec.template.metadata.expect("template metadata");
        assert_eq!(template_meta.labels, Some(labels));
        let pod = spec.template.spec.expect("pod spec");
        assert_eq!(pod.subdomain.as_deref(), Some("mb-mysql"));
    }

    #[test]
    fn declared_claim_becomes_the_volume_claim_template() {
        let root = base();
        let labels = root.component_labels(COMPONENT_MYSQL);
        let mut sts = statefulset_frame(&root, COMPONENT_MYSQL, &labels, Some(1), true);
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("mysql-claim".to_owned()),
                ..ObjectMeta::default()
            },
            ..PersistentVolumeClaim::default()
        };
        let vol = add_data_volume(&mut sts, Some(&claim), "mysql-data");
        assert_eq!(vol, "mysql-claim");
        let spec = sts.spec.expect("spec");
        assert_eq!(spec.volume_claim_templates, Some(vec![claim]));
        assert_eq!(spec.template.spec.expect("pod spec").volumes, None);
    }

    #[test]
    fn missing_claim_falls_back_to_empty_dir() {
        let root = base();
        let labels = root.component_labels(COMPONENT_MYSQL);
        let mut sts = statefulset_frame(&root, COMPONENT_MYSQL, &labels, Some(1), true);
        let vol = add_data_volume(&mut sts, None, "mysql-data");
        assert_eq!(vol, "mysql-data");
        let spec = sts.spec.expect("spec");
        assert_eq!(spec.volume_claim_templates, None);
        let volumes = spec.template.spec.expect("pod spec").volumes.expect("volumes");
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "mysql-data");
        assert!(volumes[0].empty_dir.is_some());
    }

    #[test]
    fn role_binding_grants_cluster_admin_to_the_component_account() {
        let root = base();
        let labels = root.component_labels(COMPONENT_SCHEDULER);
        let rb = build_role_binding(&root, COMPONENT_SCHEDULER, &labels);
        assert_eq!(rb.role_ref.kind, "ClusterRole");
        assert_eq!(rb.role_ref.name, "cluster-admin");
        let subjects = rb.subjects.expect("subjects");
        assert_eq!(subjects[0].kind, "ServiceAccount");
        assert_eq!(subjects[0].name, "mb-scheduler");
        assert_eq!(subjects[0].namespace.as_deref(), Some("af"));
    }

    #[test]
    fn pdb_blocks_voluntary_eviction_entirely() {
        let root = base();
        let labels = root.component_labels(COMPONENT_MYSQL);
        let pdb = build_pdb(&root, COMPONENT_MYSQL, &labels, "100%");
        let spec = pdb.spec.expect("spec");
        assert_eq!(
            spec.min_available,
            Some(IntOrString::String("100%".to_owned()))
        );
    }

    #[test]
    fn git_credentials_surface_as_secret_backed_env() {
        let git = GitSpec {
            repo: "https://github.com/apache/airflow".to_owned(),
            branch: "main".to_owned(),
            once: true,
            cred_secret_ref: Some(NameRef {
                name: "git-cred".to_owned(),
            }),
            user: "ci-bot".to_owned(),
            ..GitSpec::default()
        };
        let container = git_sync_container(&git, "dags-data");
        let env = container.env.expect("env");
        let one_time = env.iter().find(|e| e.name == "GIT_SYNC_ONE_TIME").expect("one-time var");
        assert_eq!(one_time.value.as_deref(), Some("true"));
        let password = env.iter().find(|e| e.name == "GIT_PASSWORD").expect("password var");
        let source = password.value_from.as_ref().expect("secret source");
        let key_ref = source.secret_key_ref.as_ref().expect("secret key ref");
        assert_eq!(key_ref.name, "git-cred");
        assert_eq!(key_ref.key, "password");
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn one_shot_sync_runs_as_init_container(#[case] once: bool) {
        let root = base();
        let labels = root.component_labels(COMPONENT_SCHEDULER);
        let mut sts = statefulset_frame(&root, COMPONENT_SCHEDULER, &labels, None, true);
        let git = GitSpec {
            repo: "https://github.com/apache/airflow".to_owned(),
            once,
            ..GitSpec::default()
        };
        let worker = Container {
            name: "scheduler".to_owned(),
            ..Container::default()
        };
        add_airflow_containers(&mut sts, vec![worker], Some(DagSource::Git(&git)), "dags-data");
        let pod = sts.spec.expect("spec").template.spec.expect("pod spec");
        let init = pod.init_containers.expect("init containers");
        if once {
            assert_eq!(init.len(), 1);
            assert_eq!(init[0].name, "git-sync");
            assert_eq!(pod.containers.len(), 1);
        } else {
            assert!(init.is_empty());
            assert_eq!(pod.containers.len(), 2);
            assert_eq!(pod.containers[1].name, "git-sync");
        }
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn one_shot_gcs_sync_runs_as_init_container(#[case] once: bool) {
        let root = base();
        let labels = root.component_labels(COMPONENT_SCHEDULER);
        let mut sts = statefulset_frame(&root, COMPONENT_SCHEDULER, &labels, None, true);
        let gcs = GcsSpec {
            bucket: "dag-bucket".to_owned(),
            once,
        };
        let worker = Container {
            name: "scheduler".to_owned(),
            ..Container::default()
        };
        add_airflow_containers(&mut sts, vec![worker], Some(DagSource::Gcs(&gcs)), "dags-data");
        let pod = sts.spec.expect("spec").template.spec.expect("pod spec");
        let init = pod.init_containers.expect("init containers");
        let sync = if once {
            assert_eq!(pod.containers.len(), 1);
            assert_eq!(init.len(), 1);
            &init[0]
        } else {
            assert!(init.is_empty());
            assert_eq!(pod.containers.len(), 2);
            &pod.containers[1]
        };
        assert_eq!(sync.name, "gcs-syncd");
        let env = sync.env.as_ref().expect("env");
        assert_eq!(env[0].name, "GCS_BUCKET");
        assert_eq!(env[0].value.as_deref(), Some("dag-bucket"));
        assert_eq!(sync.args, Some(vec!["/home/airflow/gcs".to_owned()]));
        assert_eq!(
            sync.volume_mounts.as_ref().expect("mounts")[0].name,
            "dags-data"
        );
    }

    #[test]
    fn pods_without_dag_source_still_reset_init_containers() {
        let root = base();
        let labels = root.component_labels(COMPONENT_SCHEDULER);
        let mut sts = statefulset_frame(&root, COMPONENT_SCHEDULER, &labels, None, true);
        add_airflow_containers(&mut sts, Vec::new(), None, "dags-data");
        let pod = sts.spec.expect("spec").template.spec.expect("pod spec");
        assert_eq!(pod.init_containers, Some(Vec::new()));
    }

    #[rstest]
    #[case(DbType::Mysql, "mysql-dbcreate", "CREATE DATABASE IF NOT EXISTS")]
    #[case(DbType::Postgres, "postgres-dbcreate", "IF NOT EXISTS (SELECT FROM pg_roles")]
    fn bootstrap_ddl_is_rerunnable(
        #[case] db: DbType,
        #[case] name: &str,
        #[case] guard: &str,
    ) {
        let container = db_bootstrap_container(db, Vec::new());
        assert_eq!(container.name, name);
        let args = container.args.expect("args");
        assert!(args[1].contains(guard));
    }

    #[test]
    fn bootstrap_container_runs_first() {
        let root = base();
        let labels = root.component_labels(COMPONENT_SCHEDULER);
        let mut sts = statefulset_frame(&root, COMPONENT_SCHEDULER, &labels, None, true);
        let git = GitSpec {
            repo: "https://github.com/apache/airflow".to_owned(),
            once: true,
            ..GitSpec::default()
        };
        add_airflow_containers(&mut sts, Vec::new(), Some(DagSource::Git(&git)), "dags-data");
        prepend_init_container(&mut sts, db_bootstrap_container(DbType::Mysql, Vec::new()));
        let init = sts
            .spec
            .expect("spec")
            .template
            .spec
            .expect("pod spec")
            .init_containers
            .expect("init containers");
        assert_eq!(init.len(), 2);
        assert_eq!(init[0].name, "mysql-dbcreate");
        assert_eq!(init[1].name, "git-sync");
    }
}
