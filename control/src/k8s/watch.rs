//! Watch stream plumbing
//!
//! Translates kube watcher events into [`SyncEvent`]s carrying the store's
//! entity types. ADD/MODIFY verbs are derived per stream with a
//! [`VerbTracker`] since the watcher reports every upsert as Apply.

use std::fmt::Debug;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::Api;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::k8s::event::{ResourceKind, SyncEvent, Verb, VerbTracker};
use crate::store;

/// Spawn one watch task per resource kind, all feeding `tx`.
pub fn spawn_watchers(
    client: Client,
    config: &ControllerConfig,
    tx: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let config_map_name = config.config_map_name.clone();
    vec![
        spawn_watch(
            Api::<Namespace>::all(client.clone()),
            ResourceKind::Namespace,
            tx.clone(),
            cancel.clone(),
            |verb, ns: &Namespace| Some(SyncEvent::Namespace(verb, ns.name_any())),
        ),
        spawn_watch(
            Api::<Service>::all(client.clone()),
            ResourceKind::Service,
            tx.clone(),
            cancel.clone(),
            |verb, svc: &Service| Some(SyncEvent::Service(verb, service_from(svc))),
        ),
        spawn_watch(
            Api::<Pod>::all(client.clone()),
            ResourceKind::Pod,
            tx.clone(),
            cancel.clone(),
            |verb, pod: &Pod| Some(SyncEvent::Pod(verb, pod_from(pod))),
        ),
        spawn_watch(
            Api::<Ingress>::all(client.clone()),
            ResourceKind::Ingress,
            tx.clone(),
            cancel.clone(),
            |verb, ing: &Ingress| Some(SyncEvent::Ingress(verb, ingress_from(ing))),
        ),
        spawn_watch(
            Api::<ConfigMap>::all(client.clone()),
            ResourceKind::ConfigMap,
            tx.clone(),
            cancel.clone(),
            // Only the single well-known ConfigMap is interesting; everything
            // else is dropped at ingest.
            move |verb, cm: &ConfigMap| {
                (cm.name_any() == config_map_name)
                    .then(|| SyncEvent::ConfigMap(verb, config_map_from(cm)))
            },
        ),
        spawn_watch(
            Api::<Secret>::all(client),
            ResourceKind::Secret,
            tx,
            cancel,
            |verb, secret: &Secret| Some(SyncEvent::Secret(verb, secret_from(secret))),
        ),
    ]
}

fn spawn_watch<K, F>(
    api: Api<K>,
    kind: ResourceKind,
    tx: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
    convert: F,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
    F: Fn(Verb, &K) -> Option<SyncEvent> + Send + 'static,
{
    tokio::spawn(async move {
        run_watch(api, kind, tx, cancel, convert).await;
    })
}

async fn run_watch<K, F>(
    api: Api<K>,
    kind: ResourceKind,
    tx: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
    convert: F,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
    F: Fn(Verb, &K) -> Option<SyncEvent>,
{
    let stream = watcher(api, WatcherConfig::default());
    futures::pin_mut!(stream);

    info!("Starting {} watcher", kind);
    let mut verbs = VerbTracker::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => event,
        };

        let sync_event = match event {
            None => break,
            Some(Ok(watcher::Event::Apply(obj))) | Some(Ok(watcher::Event::InitApply(obj))) => {
                let verb = verbs.apply(&object_key(&obj));
                convert(verb, &obj)
            }
            Some(Ok(watcher::Event::Delete(obj))) => {
                let verb = verbs.delete(&object_key(&obj));
                convert(verb, &obj)
            }
            Some(Ok(watcher::Event::Init)) => {
                debug!("{} watcher initialized", kind);
                None
            }
            Some(Ok(watcher::Event::InitDone)) => {
                info!("{} watcher initial sync complete", kind);
                None
            }
            Some(Err(e)) => {
                warn!("{} watcher error: {}", kind, e);
                Some(SyncEvent::WatchError(kind, e.to_string()))
            }
        };

        if let Some(ev) = sync_event {
            // Blocking send: the channel is the backpressure boundary.
            if tx.send(ev).await.is_err() {
                warn!("{} watcher stopping, event channel closed", kind);
                break;
            }
        }
    }

    info!("{} watcher stopped", kind);
}

fn object_key<K>(obj: &K) -> String
where
    K: Resource,
    K::DynamicType: Default,
{
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Periodic flush: emits a synthetic COMMAND event so batched changes get
/// collapsed into one generation. The period can change at runtime (ConfigMap
/// `sync-period`), delivered through the watch channel.
pub async fn tick(
    tx: mpsc::Sender<SyncEvent>,
    mut period_rx: watch::Receiver<Duration>,
    cancel: CancellationToken,
) {
    let mut updates_closed = false;
    loop {
        let period = *period_rx.borrow_and_update();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {
                if tx.send(SyncEvent::Command).await.is_err() {
                    break;
                }
            }
            changed = period_rx.changed(), if !updates_closed => {
                if changed.is_err() {
                    updates_closed = true;
                }
            }
        }
    }
}

fn service_from(svc: &Service) -> store::Service {
    let spec = svc.spec.clone().unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| store::ServicePort {
            name: p.name,
            port: p.port,
            target_port: match p.target_port {
                Some(IntOrString::Int(v)) => v,
                // Named target ports resolve on the pod; the generated
                // config addresses the service port, so the number is
                // enough here.
                Some(IntOrString::String(_)) | None => p.port,
            },
            protocol: p.protocol.unwrap_or_else(|| "TCP".to_string()),
        })
        .collect();

    store::Service {
        name: svc.name_any(),
        namespace: svc.namespace().unwrap_or_default(),
        ports,
        selector: spec.selector.unwrap_or_default(),
        annotations: svc.annotations().clone(),
    }
}

fn pod_from(pod: &Pod) -> store::Pod {
    let status = pod.status.clone().unwrap_or_default();
    store::Pod {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        labels: pod.labels().clone(),
        ip: status.pod_ip.unwrap_or_default(),
        phase: store::PodPhase::parse(status.phase.as_deref().unwrap_or("")),
    }
}

fn ingress_from(ing: &Ingress) -> store::Ingress {
    let mut rules = Vec::new();
    for rule in ing
        .spec
        .clone()
        .unwrap_or_default()
        .rules
        .unwrap_or_default()
    {
        let mut paths = Vec::new();
        for path in rule.http.map(|http| http.paths).unwrap_or_default() {
            let Some(backend) = path.backend.service else {
                debug!(
                    "Ingress {}/{} path without service backend, skipping",
                    ing.namespace().unwrap_or_default(),
                    ing.name_any()
                );
                continue;
            };
            paths.push(store::IngressPath {
                path: path.path.unwrap_or_else(|| "/".to_string()),
                service_name: backend.name,
                service_port: backend.port.and_then(|p| p.number).unwrap_or(0),
            });
        }
        rules.push(store::IngressRule {
            host: rule.host.unwrap_or_default(),
            paths,
        });
    }

    store::Ingress {
        name: ing.name_any(),
        namespace: ing.namespace().unwrap_or_default(),
        annotations: ing.annotations().clone(),
        rules,
    }
}

fn config_map_from(cm: &ConfigMap) -> store::ConfigMap {
    store::ConfigMap {
        name: cm.name_any(),
        data: cm.data.clone().unwrap_or_default(),
    }
}

fn secret_from(secret: &Secret) -> store::Secret {
    store::Secret {
        name: secret.name_any(),
        namespace: secret.namespace().unwrap_or_default(),
        data: secret
            .data
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodStatus, ServicePort, ServiceSpec};
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
        IngressSpec, ServiceBackendPort,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_service_conversion() {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(BTreeMap::from([(
                    "load-balance".to_string(),
                    "roundrobin".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 80,
                    target_port: Some(IntOrString::Int(8080)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                selector: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                ..Default::default()
            }),
            status: None,
        };

        let converted = service_from(&svc);
        assert_eq!(converted.name, "web");
        assert_eq!(converted.namespace, "default");
        assert_eq!(converted.ports.len(), 1);
        assert_eq!(converted.ports[0].port, 80);
        assert_eq!(converted.ports[0].target_port, 8080);
        assert_eq!(
            converted.selector.get("app").map(String::as_str),
            Some("web")
        );
        assert_eq!(
            converted.annotations.get("load-balance").map(String::as_str),
            Some("roundrobin")
        );
    }

    #[test]
    fn test_pod_conversion_defaults_unknown_phase() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-a".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.1".to_string()),
                phase: Some("Evicted".to_string()),
                ..Default::default()
            }),
        };

        let converted = pod_from(&pod);
        assert_eq!(converted.ip, "10.0.0.1");
        assert_eq!(converted.phase, store::PodPhase::Unknown);
    }

    #[test]
    fn test_ingress_conversion() {
        let ing = Ingress {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some("foo.bar".to_string()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/web".to_string()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: "web".to_string(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(80),
                                        name: None,
                                    }),
                                }),
                                resource: None,
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            status: None,
        };

        let converted = ingress_from(&ing);
        assert_eq!(converted.rules.len(), 1);
        assert_eq!(converted.rules[0].host, "foo.bar");
        assert_eq!(converted.rules[0].paths.len(), 1);
        assert_eq!(converted.rules[0].paths[0].service_name, "web");
        assert_eq!(converted.rules[0].paths[0].service_port, 80);
    }
}
