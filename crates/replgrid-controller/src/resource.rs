//! The per-workspace resource set.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;

use replgrid_core::WorkspaceId;

use crate::error::{ManifestError, ManifestResult};

/// The three object kinds that make a workspace reachable and running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    Deployment,
    Service,
    Ingress,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::Ingress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::Ingress => "Ingress",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(ResourceKind::Deployment),
            "Service" => Some(ResourceKind::Service),
            "Ingress" => Some(ResourceKind::Ingress),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed object of the resource set.
#[derive(Debug, Clone)]
pub enum ManifestResource {
    Deployment(Box<Deployment>),
    Service(Box<Service>),
    Ingress(Box<Ingress>),
}

impl ManifestResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManifestResource::Deployment(_) => ResourceKind::Deployment,
            ManifestResource::Service(_) => ResourceKind::Service,
            ManifestResource::Ingress(_) => ResourceKind::Ingress,
        }
    }

    pub fn name(&self) -> Option<&str> {
        let meta = match self {
            ManifestResource::Deployment(d) => &d.metadata,
            ManifestResource::Service(s) => &s.metadata,
            ManifestResource::Ingress(i) => &i.metadata,
        };
        meta.name.as_deref()
    }
}

/// A validated resource set for one workspace.
///
/// Holds exactly one Deployment and at most one Service and Ingress, all
/// named after the workspace id so teardown can address them by id alone.
#[derive(Debug, Clone)]
pub struct ResourceSet {
    resources: Vec<ManifestResource>,
}

impl ResourceSet {
    pub fn new(
        workspace_id: &WorkspaceId,
        resources: Vec<ManifestResource>,
    ) -> ManifestResult<Self> {
        let mut seen = Vec::new();
        for resource in &resources {
            let kind = resource.kind();
            if seen.contains(&kind) {
                return Err(ManifestError::Duplicate(kind));
            }
            seen.push(kind);

            let name = resource.name().unwrap_or_default();
            if name != workspace_id.as_str() {
                return Err(ManifestError::NameMismatch {
                    kind,
                    found: name.to_string(),
                    expected: workspace_id.to_string(),
                });
            }
        }
        if !seen.contains(&ResourceKind::Deployment) {
            return Err(ManifestError::MissingDeployment);
        }
        Ok(Self { resources })
    }

    pub fn resources(&self) -> &[ManifestResource] {
        &self.resources
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.resources.iter().map(ManifestResource::kind).collect()
    }

    pub fn into_resources(self) -> Vec<ManifestResource> {
        self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn named_deployment(name: &str) -> ManifestResource {
        ManifestResource::Deployment(Box::new(Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    fn named_service(name: &str) -> ManifestResource {
        ManifestResource::Service(Box::new(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    fn id(s: &str) -> WorkspaceId {
        WorkspaceId::parse(s).unwrap()
    }

    #[test]
    fn accepts_matching_names() {
        let resources = vec![named_deployment("abc"), named_service("abc")];
        let set = ResourceSet::new(&id("abc"), resources).unwrap();
        assert_eq!(set.kinds(), vec![ResourceKind::Deployment, ResourceKind::Service]);
    }

    #[test]
    fn rejects_missing_deployment() {
        let err = ResourceSet::new(&id("abc"), vec![named_service("abc")]).unwrap_err();
        assert!(matches!(err, ManifestError::MissingDeployment));
    }

    #[test]
    fn rejects_foreign_names() {
        let err = ResourceSet::new(&id("abc"), vec![named_deployment("other")]).unwrap_err();
        assert!(matches!(err, ManifestError::NameMismatch { kind: ResourceKind::Deployment, .. }));
    }

    #[test]
    fn rejects_duplicate_kinds() {
        let resources = vec![named_deployment("abc"), named_deployment("abc")];
        let err = ResourceSet::new(&id("abc"), resources).unwrap_err();
        assert!(matches!(err, ManifestError::Duplicate(ResourceKind::Deployment)));
    }

    #[test]
    fn kind_parsing() {
        assert_eq!(ResourceKind::from_kind("Ingress"), Some(ResourceKind::Ingress));
        assert_eq!(ResourceKind::from_kind("ConfigMap"), None);
    }
}
