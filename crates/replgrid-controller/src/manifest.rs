//! Manifest template rendering.
//!
//! A template is a multi-document YAML file in which one literal token
//! (by default `service_name`) stands for the workspace id. The token is
//! replaced textually before the YAML is parsed, so template authors write
//! ordinary resource definitions. Substitution is safe because a
//! `WorkspaceId` only ever contains `[a-z0-9-]`.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use replgrid_core::WorkspaceId;

use crate::builder::ResourceSetBuilder;
use crate::error::{ManifestError, ManifestResult};
use crate::resource::{ManifestResource, ResourceKind, ResourceSet};

/// Where the resource set of a workspace comes from.
#[derive(Debug, Clone)]
pub enum ResourceSource {
    Template(ManifestTemplate),
    Builder(ResourceSetBuilder),
}

impl ResourceSource {
    pub fn render(&self, id: &WorkspaceId) -> ManifestResult<ResourceSet> {
        match self {
            ResourceSource::Template(template) => template.render(id),
            ResourceSource::Builder(builder) => builder.build(id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManifestTemplate {
    text: String,
    placeholder: String,
}

impl ManifestTemplate {
    pub fn new(text: impl Into<String>, placeholder: impl Into<String>) -> ManifestResult<Self> {
        let placeholder = placeholder.into();
        if placeholder.is_empty() {
            return Err(ManifestError::EmptyPlaceholder);
        }
        Ok(Self {
            text: text.into(),
            placeholder,
        })
    }

    pub fn from_file(path: &Path, placeholder: &str) -> ManifestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        debug!(?path, "manifest template loaded");
        Self::new(text, placeholder)
    }

    /// Substitute the id for every occurrence of the placeholder.
    pub fn substitute(&self, id: &WorkspaceId) -> String {
        self.text.replace(&self.placeholder, id.as_str())
    }

    /// Substitute, then parse every YAML document into a typed resource.
    ///
    /// Documents of other kinds are skipped with a warning.
    pub fn render(&self, id: &WorkspaceId) -> ManifestResult<ResourceSet> {
        let rendered = self.substitute(id);
        let mut resources = Vec::new();

        for document in serde_yaml::Deserializer::from_str(&rendered) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| ManifestError::Parse(e.to_string()))?;
            if value.is_null() {
                continue;
            }
            let kind = value
                .get("kind")
                .and_then(serde_yaml::Value::as_str)
                .map(str::to_owned);
            let resource = match kind.as_deref().and_then(ResourceKind::from_kind) {
                Some(ResourceKind::Deployment) => {
                    ManifestResource::Deployment(Box::new(parse_document(value)?))
                }
                Some(ResourceKind::Service) => {
                    ManifestResource::Service(Box::new(parse_document(value)?))
                }
                Some(ResourceKind::Ingress) => {
                    ManifestResource::Ingress(Box::new(parse_document(value)?))
                }
                None => {
                    let kind = kind.as_deref().unwrap_or("<none>");
                    warn!(kind, "skipping unsupported manifest document");
                    continue;
                }
            };
            resources.push(resource);
        }

        ResourceSet::new(id, resources)
    }
}

fn parse_document<T: serde::de::DeserializeOwned>(value: serde_yaml::Value) -> ManifestResult<T> {
    serde_yaml::from_value(value).map_err(|e| ManifestError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: service_name
  labels:
    app: service_name
spec:
  replicas: 1
  selector:
    matchLabels:
      app: service_name
  template:
    metadata:
      labels:
        app: service_name
    spec:
      containers:
        - name: runner
          image: replgrid/runner:latest
          ports:
            - containerPort: 3001
---
apiVersion: v1
kind: Service
metadata:
  name: service_name
spec:
  selector:
    app: service_name
  ports:
    - protocol: TCP
      port: 3001
      targetPort: 3001
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: service_name
spec:
  rules:
    - host: service_name.repl.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: service_name
                port:
                  number: 3001
"#;

    fn id(s: &str) -> WorkspaceId {
        WorkspaceId::parse(s).unwrap()
    }

    #[test]
    fn renders_three_resources() {
        let template = ManifestTemplate::new(TEMPLATE, "service_name").unwrap();
        let set = template.render(&id("abc-def-ghi")).unwrap();
        assert_eq!(
            set.kinds(),
            vec![ResourceKind::Deployment, ResourceKind::Service, ResourceKind::Ingress]
        );
        for resource in set.resources() {
            assert_eq!(resource.name(), Some("abc-def-ghi"));
        }
    }

    #[test]
    fn substitutes_every_occurrence_before_parsing() {
        let template = ManifestTemplate::new(TEMPLATE, "service_name").unwrap();
        let text = template.substitute(&id("abc"));
        assert!(!text.contains("service_name"));
        assert!(text.contains("host: abc.repl.example.com"));

        let set = template.render(&id("abc")).unwrap();
        let ManifestResource::Ingress(ingress) = &set.resources()[2] else {
            panic!("expected ingress");
        };
        let rules = ingress.spec.as_ref().unwrap().rules.as_ref().unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("abc.repl.example.com"));
    }

    #[test]
    fn skips_unknown_kinds() {
        let extra = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: service_name\n";
        let text = format!("{TEMPLATE}\n---\n{extra}");
        let template = ManifestTemplate::new(text, "service_name").unwrap();
        assert_eq!(template.render(&id("abc")).unwrap().resources().len(), 3);
    }

    #[test]
    fn template_without_placeholder_names_is_rejected() {
        let text = TEMPLATE.replace("name: service_name", "name: fixed");
        let template = ManifestTemplate::new(text, "service_name").unwrap();
        assert!(matches!(
            template.render(&id("abc")),
            Err(ManifestError::NameMismatch { .. })
        ));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let template = ManifestTemplate::new("kind: Deployment\n  bad: [", "service_name").unwrap();
        assert!(matches!(template.render(&id("abc")), Err(ManifestError::Parse(_))));
    }

    #[test]
    fn empty_placeholder_rejected() {
        assert!(matches!(
            ManifestTemplate::new(TEMPLATE, ""),
            Err(ManifestError::EmptyPlaceholder)
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.yaml");
        std::fs::write(&path, TEMPLATE).unwrap();
        let template = ManifestTemplate::from_file(&path, "service_name").unwrap();
        assert!(template.render(&id("abc")).is_ok());

        let missing = ManifestTemplate::from_file(&dir.path().join("nope.yaml"), "service_name");
        assert!(matches!(missing, Err(ManifestError::Read { .. })));
    }
}
