//! Programmatic resource-set builder.
//!
//! The default alternative to a manifest template: objects are assembled as
//! structured values, so no workspace-supplied text is ever spliced into
//! YAML.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;

use replgrid_core::WorkspaceId;
use replgrid_core::config::BuilderConfig;

use crate::error::{ManifestError, ManifestResult};
use crate::resource::{ManifestResource, ResourceSet};

/// Container name of the in-workspace runner.
pub const RUNNER_CONTAINER: &str = "runner";

#[derive(Debug, Clone)]
pub struct ResourceSetBuilder {
    config: BuilderConfig,
}

impl ResourceSetBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn host(&self, id: &WorkspaceId) -> String {
        format!("{id}.{}", self.config.domain)
    }

    pub fn build(&self, id: &WorkspaceId) -> ManifestResult<ResourceSet> {
        let resources = vec![
            ManifestResource::Deployment(Box::new(self.deployment(id)?)),
            ManifestResource::Service(Box::new(self.service(id)?)),
            ManifestResource::Ingress(Box::new(self.ingress(id)?)),
        ];
        ResourceSet::new(id, resources)
    }

    fn deployment(&self, id: &WorkspaceId) -> ManifestResult<Deployment> {
        let mut container = json!({
            "name": RUNNER_CONTAINER,
            "image": self.config.image,
            "ports": [{ "containerPort": self.config.port }],
            "env": [{ "name": "WORKSPACE_ID", "value": id.as_str() }],
        });
        if let Some(secret) = &self.config.storage_secret {
            container["envFrom"] = json!([{ "secretRef": { "name": secret, "optional": true } }]);
        }

        from_json(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": id.as_str(), "labels": { "app": id.as_str() } },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "app": id.as_str() } },
                "template": {
                    "metadata": { "labels": { "app": id.as_str() } },
                    "spec": { "containers": [container] },
                },
            },
        }))
    }

    fn service(&self, id: &WorkspaceId) -> ManifestResult<Service> {
        from_json(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": id.as_str(), "labels": { "app": id.as_str() } },
            "spec": {
                "selector": { "app": id.as_str() },
                "ports": [{
                    "protocol": "TCP",
                    "port": self.config.port,
                    "targetPort": self.config.port,
                }],
            },
        }))
    }

    fn ingress(&self, id: &WorkspaceId) -> ManifestResult<Ingress> {
        let mut spec = json!({
            "rules": [{
                "host": self.host(id),
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": id.as_str(),
                                "port": { "number": self.config.port },
                            },
                        },
                    }],
                },
            }],
        });
        if let Some(class) = &self.config.ingress_class {
            spec["ingressClassName"] = json!(class);
        }

        from_json(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": { "name": id.as_str(), "labels": { "app": id.as_str() } },
            "spec": spec,
        }))
    }
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> ManifestResult<T> {
    serde_json::from_value(value).map_err(|e| ManifestError::Parse(e.to_string()))
}
