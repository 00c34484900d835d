//! replgrid-controller — lifecycle management of workspace compute.
//!
//! Renders the per-workspace resource set (Deployment, Service, Ingress),
//! makes sure each object exists, and polls the Deployment until it has
//! enough available replicas.
//!
//! # Architecture
//!
//! ```text
//! ResourceController
//!   ├── ResourceSource
//!   │   ├── ManifestTemplate (literal placeholder → YAML → typed objects)
//!   │   └── ResourceSetBuilder (typed objects built programmatically)
//!   └── dyn ClusterApi
//!       ├── KubeCluster (Kubernetes API via kube)
//!       └── InMemoryCluster (tests, local runs)
//! ```
//!
//! # Idempotence
//!
//! Every resource is read before it is created, and a create that fails
//! because the object already exists counts as success. Concurrent callers
//! for the same new workspace therefore converge on a single object set.

pub mod builder;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod kube_cluster;
pub mod manifest;
pub mod memory;
pub mod resource;

pub use builder::ResourceSetBuilder;
pub use cluster::{ClusterApi, ReplicaStatus};
pub use controller::{EnsureReport, Readiness, ResourceController, TeardownReport};
pub use error::{ClusterError, ClusterResult, ControllerError, ControllerResult, ManifestError};
pub use kube_cluster::KubeCluster;
pub use manifest::{ManifestTemplate, ResourceSource};
pub use memory::InMemoryCluster;
pub use resource::{ManifestResource, ResourceKind, ResourceSet};
