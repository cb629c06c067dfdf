//! In-memory projection of the watched cluster objects
//!
//! The store is owned exclusively by the reconciler task; there is no locking
//! because there is a single writer and the builder reads inline on the same
//! task. All maps are `BTreeMap`s so that walking the store is deterministic
//! and two generations over identical state render byte-identical output.

use std::collections::BTreeMap;

use crate::config::NamespacePolicy;

pub type Labels = BTreeMap<String, String>;
pub type AnnotationMap = BTreeMap<String, String>;

/// Pod lifecycle phase as reported by the kubelet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub ip: String,
    pub phase: PodPhase,
}

impl Pod {
    /// A pod backs a service only when every selector key/value is present
    /// and equal in its labels. An empty selector matches nothing upstream;
    /// callers skip those services before asking.
    pub fn matches(&self, selector: &Labels) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: i32,
    pub target_port: i32,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub ports: Vec<ServicePort>,
    pub selector: Labels,
    pub annotations: AnnotationMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressPath {
    pub path: String,
    pub service_name: String,
    pub service_port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingress {
    pub name: String,
    pub namespace: String,
    pub annotations: AnnotationMap,
    pub rules: Vec<IngressRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMap {
    pub name: String,
    pub data: AnnotationMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub namespace: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// One namespace worth of watched objects
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub watched: bool,
    pub pods: BTreeMap<String, Pod>,
    pub services: BTreeMap<String, Service>,
    pub ingresses: BTreeMap<String, Ingress>,
}

impl Namespace {
    fn new(name: &str, watched: bool) -> Self {
        Self {
            name: name.to_string(),
            watched,
            pods: BTreeMap::new(),
            services: BTreeMap::new(),
            ingresses: BTreeMap::new(),
        }
    }
}

/// The cluster projection. Single writer (the reconciler), read inline by the
/// builder for the duration of one generation.
#[derive(Debug)]
pub struct Store {
    namespaces: BTreeMap<String, Namespace>,
    config_maps: BTreeMap<String, ConfigMap>,
    secrets: BTreeMap<String, Secret>,
    policy: NamespacePolicy,
}

fn secret_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl Store {
    pub fn new(policy: NamespacePolicy) -> Self {
        Self {
            namespaces: BTreeMap::new(),
            config_maps: BTreeMap::new(),
            secrets: BTreeMap::new(),
            policy,
        }
    }

    /// Namespaces are created on first reference: a pod or service event may
    /// arrive before its namespace event.
    pub fn ensure_namespace(&mut self, name: &str) -> &mut Namespace {
        let watched = self.policy.watched(name);
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| Namespace::new(name, watched))
    }

    pub fn remove_namespace(&mut self, name: &str) -> bool {
        self.namespaces.remove(name).is_some()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn upsert_service(&mut self, service: Service) {
        let ns = self.ensure_namespace(&service.namespace);
        ns.services.insert(service.name.clone(), service);
    }

    pub fn remove_service(&mut self, namespace: &str, name: &str) -> bool {
        self.namespaces
            .get_mut(namespace)
            .map(|ns| ns.services.remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn add_pod(&mut self, pod: Pod) {
        let ns = self.ensure_namespace(&pod.namespace);
        ns.pods.insert(pod.name.clone(), pod);
    }

    /// Replace a pod already known to the store. Returns false (and leaves
    /// the store untouched) when the pod was never added; the watch contract
    /// says a MODIFY for an unknown object is skipped, not synthesized.
    pub fn modify_pod(&mut self, pod: Pod) -> bool {
        match self
            .namespaces
            .get_mut(&pod.namespace)
            .and_then(|ns| ns.pods.get_mut(&pod.name))
        {
            Some(existing) => {
                *existing = pod;
                true
            }
            None => false,
        }
    }

    /// Returns true when the pod was present and removed.
    pub fn remove_pod(&mut self, namespace: &str, name: &str) -> bool {
        self.namespaces
            .get_mut(namespace)
            .map(|ns| ns.pods.remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn upsert_ingress(&mut self, ingress: Ingress) {
        let ns = self.ensure_namespace(&ingress.namespace);
        ns.ingresses.insert(ingress.name.clone(), ingress);
    }

    pub fn remove_ingress(&mut self, namespace: &str, name: &str) -> bool {
        self.namespaces
            .get_mut(namespace)
            .map(|ns| ns.ingresses.remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn upsert_config_map(&mut self, config_map: ConfigMap) {
        self.config_maps
            .insert(config_map.name.clone(), config_map);
    }

    pub fn remove_config_map(&mut self, name: &str) -> bool {
        self.config_maps.remove(name).is_some()
    }

    pub fn config_map(&self, name: &str) -> Option<&ConfigMap> {
        self.config_maps.get(name)
    }

    pub fn upsert_secret(&mut self, secret: Secret) {
        self.secrets
            .insert(secret_key(&secret.namespace, &secret.name), secret);
    }

    pub fn remove_secret(&mut self, namespace: &str, name: &str) -> bool {
        self.secrets.remove(&secret_key(namespace, name)).is_some()
    }

    /// Lookup used by annotation handlers holding a `namespace/name` reference.
    pub fn secret(&self, namespace: &str, name: &str) -> Option<&Secret> {
        self.secrets.get(&secret_key(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str, namespace: &str, labels: &[(&str, &str)], phase: PodPhase) -> Pod {
        Pod {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ip: "10.0.0.1".to_string(),
            phase,
        }
    }

    #[test]
    fn test_namespace_created_on_first_reference() {
        let mut store = Store::new(NamespacePolicy::Default);
        store.add_pod(pod("web-a", "default", &[("app", "web")], PodPhase::Running));

        let ns = store.namespace("default").expect("namespace should exist");
        assert!(ns.watched);
        assert_eq!(ns.pods.len(), 1);
    }

    #[test]
    fn test_namespace_policy_applied_at_creation() {
        let mut store = Store::new(NamespacePolicy::Default);
        store.add_pod(pod("api-a", "prod", &[("app", "api")], PodPhase::Running));

        let ns = store.namespace("prod").expect("namespace should exist");
        assert!(!ns.watched, "non-default namespace should not be watched");
    }

    #[test]
    fn test_modify_unknown_pod_is_skipped() {
        let mut store = Store::new(NamespacePolicy::Default);
        let known = store.modify_pod(pod("ghost", "default", &[], PodPhase::Running));
        assert!(!known);
        assert!(store
            .namespace("default")
            .map(|ns| ns.pods.is_empty())
            .unwrap_or(true));
    }

    #[test]
    fn test_remove_pod_reports_presence() {
        let mut store = Store::new(NamespacePolicy::Default);
        store.add_pod(pod("web-a", "default", &[], PodPhase::Running));

        assert!(store.remove_pod("default", "web-a"));
        assert!(!store.remove_pod("default", "web-a"));
    }

    #[test]
    fn test_selector_matching() {
        let p = pod(
            "web-a",
            "default",
            &[("app", "web"), ("tier", "frontend")],
            PodPhase::Running,
        );

        let mut selector = Labels::new();
        selector.insert("app".to_string(), "web".to_string());
        assert!(p.matches(&selector));

        selector.insert("tier".to_string(), "backend".to_string());
        assert!(!p.matches(&selector), "selector value mismatch must not match");

        let mut missing = Labels::new();
        missing.insert("zone".to_string(), "eu".to_string());
        assert!(!p.matches(&missing), "missing selector key must not match");
    }

    #[test]
    fn test_idempotent_upserts() {
        let mut store = Store::new(NamespacePolicy::Default);
        let p = pod("web-a", "default", &[("app", "web")], PodPhase::Running);
        store.add_pod(p.clone());
        store.add_pod(p);

        let ns = store.namespace("default").expect("namespace should exist");
        assert_eq!(ns.pods.len(), 1);
    }

    #[test]
    fn test_secret_lookup() {
        let mut store = Store::new(NamespacePolicy::Default);
        store.upsert_secret(Secret {
            name: "creds".to_string(),
            namespace: "default".to_string(),
            data: BTreeMap::from([("admin".to_string(), b"hunter2".to_vec())]),
        });

        assert!(store.secret("default", "creds").is_some());
        assert!(store.secret("prod", "creds").is_none());
        assert!(store.remove_secret("default", "creds"));
        assert!(store.secret("default", "creds").is_none());
    }
}
