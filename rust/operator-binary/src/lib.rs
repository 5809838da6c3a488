//! Desired-state layer of the Airflow platform operator.
//!
//! Two custom resources describe an Airflow installation: [`crd::base::AirflowBase`]
//! (shared SQL and NFS infrastructure) and [`crd::cluster::AirflowCluster`]
//! (one team's scheduler, workers, UI and queue). For every configured
//! component this crate computes the Kubernetes child objects that should
//! exist, decides which observed objects need an apply, and folds the
//! outcome back into CR status.
//!
//! The crate performs no I/O. A generic reconcile engine owns watching,
//! fetching and applying; it drives the [`component::Component`] protocol
//! with plain data and gets plain data back.

pub mod build;
pub mod component;
pub mod crd;
pub mod env_vars;
pub mod resources;
pub mod util;
