//! The per-component reconcile protocol.
//!
//! The external engine drives every configured component through the same
//! cycle: [`Component::expected_resources`] for the desired object set,
//! [`Component::observables`] for the live-object selectors,
//! [`Component::differs`] per matched pair, then
//! [`Component::update_component_status`] with the outcome. All operations
//! are synchronous and idempotent; the engine owns retries and may run many
//! root resources in parallel, so nothing here shares mutable state.

use std::collections::BTreeMap;

use rand::Rng;
use snafu::Snafu;

use crate::{
    crd::{
        status::{ComponentStatusSink, ResourceRef},
        RootResource, FINALIZER_CLEANUP,
    },
    env_vars,
    resources::{default_differs, ChildResource, ObjectSet, Observable},
};

pub mod base;
pub mod cluster;

pub use base::BaseComponent;
pub use cluster::ClusterComponent;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    /// The declared spec cannot be turned into a desired-state description.
    #[snafu(context(false), display("invalid configuration: {source}"))]
    Configuration { source: env_vars::Error },
}

/// One logical component of a root resource.
///
/// The `Root` association binds every component to the CR kind it belongs
/// to at compile time, so a component can never be driven with the wrong
/// root.
pub trait Component {
    type Root: RootResource;

    /// Component tag: the middle segment of child-object names and the key
    /// of this component's entry in the root's status block.
    fn tag(&self) -> &'static str;

    /// Computes the complete desired object set from the root's spec. A
    /// component suppressed by its spec (externally operated database)
    /// returns an empty set, not an error. `rng` feeds freshly generated
    /// secret material; with an identically seeded generator the output is
    /// reproducible bit for bit.
    fn expected_resources(
        &self,
        root: &Self::Root,
        labels: &BTreeMap<String, String>,
        rng: &mut (impl Rng + ?Sized),
    ) -> Result<ObjectSet>;

    /// Label selectors the engine uses to fetch live counterparts of the
    /// expected set.
    fn observables(
        &self,
        expected: &ObjectSet,
        labels: &BTreeMap<String, String>,
    ) -> Vec<Observable> {
        expected.observables(labels)
    }

    /// Whether the observed object needs an apply to match `expected`.
    /// Infrastructure-assigned fields are copied into `expected` here, so
    /// they are never treated as drift.
    fn differs(&self, expected: &mut ChildResource, observed: &ChildResource) -> bool {
        default_differs(expected, observed)
    }

    /// Adjusts desired state using observed state before the apply.
    /// Identity for all current components.
    fn mutate(&self, expected: ObjectSet, _observed: &ObjectSet) -> Result<ObjectSet> {
        Ok(expected)
    }

    /// Runs when the root resource is being deleted. Clears the cleanup
    /// finalizer; an error blocks deletion until external dependencies are
    /// resolved.
    fn finalize(&self, root: &mut Self::Root, _observed: &ObjectSet) -> Result<()> {
        root.remove_finalizer(FINALIZER_CLEANUP);
        Ok(())
    }

    /// Folds the reconcile outcome into the root's status block. Never
    /// fails; an engine error degrades into a `Failed` condition.
    fn update_component_status(
        &self,
        status: &mut <Self::Root as RootResource>::Status,
        reconciled: &[ResourceRef],
        error: Option<String>,
    ) {
        status.update_component(self.tag(), reconciled, error);
    }
}
