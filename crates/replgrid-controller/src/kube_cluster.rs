//! Kubernetes-backed `ClusterApi`.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cluster::{ClusterApi, ReplicaStatus};
use crate::error::{ClusterError, ClusterResult};
use crate::resource::{ManifestResource, ResourceKind};

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn try_default(namespace: impl Into<String>) -> ClusterResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn map_kube_error(kind: ResourceKind, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        other => ClusterError::Api(other.to_string()),
    }
}

async fn get_named<K>(api: Api<K>, kind: ResourceKind, name: &str) -> ClusterResult<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get(name)
        .await
        .map(|_| ())
        .map_err(|e| map_kube_error(kind, name, e))
}

async fn create_object<K>(api: Api<K>, kind: ResourceKind, object: &K) -> ClusterResult<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object.meta().name.clone().unwrap_or_default();
    api.create(&PostParams::default(), object)
        .await
        .map(|_| ())
        .map_err(|e| map_kube_error(kind, &name, e))
}

async fn delete_named<K>(api: Api<K>, kind: ResourceKind, name: &str) -> ClusterResult<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default())
        .await
        .map(|_| ())
        .map_err(|e| map_kube_error(kind, name, e))
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, kind: ResourceKind, name: &str) -> ClusterResult<()> {
        match kind {
            ResourceKind::Deployment => get_named(self.api::<Deployment>(), kind, name).await,
            ResourceKind::Service => get_named(self.api::<Service>(), kind, name).await,
            ResourceKind::Ingress => get_named(self.api::<Ingress>(), kind, name).await,
        }
    }

    async fn create(&self, resource: &ManifestResource) -> ClusterResult<()> {
        let kind = resource.kind();
        debug!(%kind, name = resource.name().unwrap_or_default(), ns = %self.namespace, "creating");
        match resource {
            ManifestResource::Deployment(d) => create_object(self.api(), kind, d.as_ref()).await,
            ManifestResource::Service(s) => create_object(self.api(), kind, s.as_ref()).await,
            ManifestResource::Ingress(i) => create_object(self.api(), kind, i.as_ref()).await,
        }
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> ClusterResult<()> {
        match kind {
            ResourceKind::Deployment => delete_named(self.api::<Deployment>(), kind, name).await,
            ResourceKind::Service => delete_named(self.api::<Service>(), kind, name).await,
            ResourceKind::Ingress => delete_named(self.api::<Ingress>(), kind, name).await,
        }
    }

    async fn replica_status(&self, deployment: &str) -> ClusterResult<ReplicaStatus> {
        let object = self
            .api::<Deployment>()
            .get(deployment)
            .await
            .map_err(|e| map_kube_error(ResourceKind::Deployment, deployment, e))?;

        let desired = object.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let available = object
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        Ok(ReplicaStatus { desired, available })
    }
}
