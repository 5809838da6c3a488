//! Typed child objects exchanged with the reconcile engine.
//!
//! Components describe desired state as an [`ObjectSet`] of
//! [`ManagedObject`]s; the engine fetches live counterparts via
//! [`Observable`] selectors and asks the diff policy whether a matched pair
//! needs an apply.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::{
    api::{
        apps::v1::StatefulSet,
        core::v1::{Secret, Service, ServiceAccount},
        policy::v1::PodDisruptionBudget,
        rbac::v1::RoleBinding,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use strum::Display;

use crate::crd::status::ResourceRef;

/// The closed set of child-object kinds this layer emits.
#[derive(Clone, Copy, Debug, Display, Eq, Ord, PartialEq, PartialOrd)]
pub enum ChildKind {
    PodDisruptionBudget,
    RoleBinding,
    Secret,
    Service,
    ServiceAccount,
    StatefulSet,
}

/// One concrete child object.
#[derive(Clone, Debug, PartialEq)]
pub enum ChildResource {
    PodDisruptionBudget(PodDisruptionBudget),
    RoleBinding(RoleBinding),
    Secret(Secret),
    Service(Service),
    ServiceAccount(ServiceAccount),
    StatefulSet(StatefulSet),
}

impl ChildResource {
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildResource::PodDisruptionBudget(_) => ChildKind::PodDisruptionBudget,
            ChildResource::RoleBinding(_) => ChildKind::RoleBinding,
            ChildResource::Secret(_) => ChildKind::Secret,
            ChildResource::Service(_) => ChildKind::Service,
            ChildResource::ServiceAccount(_) => ChildKind::ServiceAccount,
            ChildResource::StatefulSet(_) => ChildKind::StatefulSet,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ChildResource::PodDisruptionBudget(o) => &o.metadata,
            ChildResource::RoleBinding(o) => &o.metadata,
            ChildResource::Secret(o) => &o.metadata,
            ChildResource::Service(o) => &o.metadata,
            ChildResource::ServiceAccount(o) => &o.metadata,
            ChildResource::StatefulSet(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> String {
        self.metadata().name.clone().unwrap_or_default()
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind().to_string(),
            name: self.name(),
        }
    }
}

macro_rules! impl_from_child {
    ($($variant:ident($object:ty)),+ $(,)?) => {
        $(impl From<$object> for ChildResource {
            fn from(object: $object) -> Self {
                ChildResource::$variant(object)
            }
        })+
    };
}

impl_from_child! {
    PodDisruptionBudget(PodDisruptionBudget),
    RoleBinding(RoleBinding),
    Secret(Secret),
    Service(Service),
    ServiceAccount(ServiceAccount),
    StatefulSet(StatefulSet),
}

/// Who owns a child object's lifecycle.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Lifecycle {
    /// Created, updated and deleted by the engine.
    Managed,
    /// Externally owned; the engine only reads it.
    Referred,
}

/// A child object plus its lifecycle tag.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedObject {
    pub lifecycle: Lifecycle,
    pub resource: ChildResource,
}

impl ManagedObject {
    pub fn managed(resource: impl Into<ChildResource>) -> Self {
        ManagedObject {
            lifecycle: Lifecycle::Managed,
            resource: resource.into(),
        }
    }

    pub fn referred(resource: impl Into<ChildResource>) -> Self {
        ManagedObject {
            lifecycle: Lifecycle::Referred,
            resource: resource.into(),
        }
    }

    pub fn kind(&self) -> ChildKind {
        self.resource.kind()
    }

    pub fn name(&self) -> String {
        self.resource.name()
    }
}

/// Desired child objects of one component, keyed by (kind, name). Adding an
/// object under an existing key replaces it, keeping the set idempotent
/// under repeated builds. Iteration order is the key order, so two
/// structurally equal sets compare equal element by element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSet {
    items: BTreeMap<(ChildKind, String), ManagedObject>,
}

impl ObjectSet {
    pub fn new() -> Self {
        ObjectSet::default()
    }

    pub fn add(&mut self, object: ManagedObject) {
        self.items.insert((object.kind(), object.name()), object);
    }

    pub fn union(&mut self, other: ObjectSet) {
        self.items.extend(other.items);
    }

    pub fn get(&self, kind: ChildKind, name: &str) -> Option<&ManagedObject> {
        self.items.get(&(kind, name.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedObject> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct kinds present in the set.
    pub fn kinds(&self) -> BTreeSet<ChildKind> {
        self.items.keys().map(|(kind, _)| *kind).collect()
    }

    /// Status references for every object in the set.
    pub fn resource_refs(&self) -> Vec<ResourceRef> {
        self.iter().map(|object| object.resource.resource_ref()).collect()
    }

    /// Label selectors the engine uses to fetch live counterparts: one per
    /// kind present, all selecting on the component's label set.
    pub fn observables(&self, labels: &BTreeMap<String, String>) -> Vec<Observable> {
        self.kinds()
            .into_iter()
            .map(|kind| Observable {
                kind,
                selector: labels.clone(),
            })
            .collect()
    }
}

impl IntoIterator for ObjectSet {
    type Item = ManagedObject;
    type IntoIter = std::collections::btree_map::IntoValues<(ChildKind, String), ManagedObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_values()
    }
}

/// One live-object query: fetch everything of `kind` matching `selector`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Observable {
    pub kind: ChildKind,
    pub selector: BTreeMap<String, String>,
}

/// Kind-based update policy, shared by all components.
///
/// Secrets and ServiceAccounts are immutable post-creation (credential and
/// identity stability), so they never differ. Services keep the
/// cluster-assigned virtual IP: it is copied from the observed object into
/// the expected one so the apply never fights the API server over it.
/// PodDisruptionBudgets copy the observed resource version to permit an
/// in-place update. Everything else is always applied.
pub fn default_differs(expected: &mut ChildResource, observed: &ChildResource) -> bool {
    match expected {
        ChildResource::Secret(_) | ChildResource::ServiceAccount(_) => false,
        ChildResource::Service(expected) => {
            if let ChildResource::Service(observed) = observed {
                expected.metadata.resource_version = observed.metadata.resource_version.clone();
                let cluster_ip = observed.spec.as_ref().and_then(|spec| spec.cluster_ip.clone());
                expected
                    .spec
                    .get_or_insert_with(Default::default)
                    .cluster_ip = cluster_ip;
            }
            true
        }
        ChildResource::PodDisruptionBudget(expected) => {
            if let ChildResource::PodDisruptionBudget(observed) = observed {
                expected.metadata.resource_version = observed.metadata.resource_version.clone();
            }
            true
        }
        ChildResource::RoleBinding(_) | ChildResource::StatefulSet(_) => true,
    }
}
