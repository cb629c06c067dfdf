//! The reconciler: single consumer of the fan-in event channel
//!
//! Applies every event to the store and regenerates the proxy configuration
//! on the periodic COMMAND tick once something changed. Pod deletions
//! rebuild immediately so traffic stops routing to terminated endpoints
//! before the next tick. Because the builder and publisher run inline on
//! this task, each generation observes a consistent store snapshot.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::annotations::parse_time;
use crate::config::ControllerConfig;
use crate::haproxy::{Builder, ConfigPublisher, PublishOutcome};
use crate::k8s::{SyncEvent, Verb};
use crate::metrics;
use crate::store::{AnnotationMap, Store};

pub struct Reconciler<P> {
    store: Store,
    rx: mpsc::Receiver<SyncEvent>,
    publisher: P,
    period_tx: watch::Sender<Duration>,
    config: ControllerConfig,
    cancel: CancellationToken,
    dirty: bool,
}

impl<P: ConfigPublisher> Reconciler<P> {
    pub fn new(
        store: Store,
        rx: mpsc::Receiver<SyncEvent>,
        publisher: P,
        period_tx: watch::Sender<Duration>,
        config: ControllerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            rx,
            publisher,
            period_tx,
            config,
            cancel,
            dirty: false,
        }
    }

    /// Consume events until the channel closes or shutdown is requested. The
    /// event in flight is always finished first.
    pub async fn run(mut self) {
        info!("reconciler started");
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }
        info!("reconciler stopped");
    }

    async fn handle(&mut self, event: SyncEvent) {
        metrics::record_sync_event(event.kind());
        match event {
            SyncEvent::Command => {
                if self.dirty {
                    self.rebuild().await;
                    self.dirty = false;
                }
            }
            SyncEvent::Namespace(verb, name) => match verb {
                Verb::Add | Verb::Modify => {
                    self.store.ensure_namespace(&name);
                    debug!("Namespace {} {}", name, verb);
                    self.dirty = true;
                }
                Verb::Delete => {
                    if self.store.remove_namespace(&name) {
                        debug!("Namespace {} deleted", name);
                        self.dirty = true;
                    }
                }
            },
            SyncEvent::Service(verb, service) => match verb {
                Verb::Add | Verb::Modify => {
                    debug!("Service {}/{} {}", service.namespace, service.name, verb);
                    self.store.upsert_service(service);
                    self.dirty = true;
                }
                Verb::Delete => {
                    if self.store.remove_service(&service.namespace, &service.name) {
                        debug!("Service {}/{} deleted", service.namespace, service.name);
                        self.dirty = true;
                    }
                }
            },
            SyncEvent::Pod(verb, pod) => match verb {
                Verb::Add => {
                    debug!("Pod {}/{} added", pod.namespace, pod.name);
                    self.store.add_pod(pod);
                    self.dirty = true;
                }
                Verb::Modify => {
                    // Intentionally not synthesized into an ADD: an unknown
                    // pod here means the watch never delivered its creation.
                    if self.store.modify_pod(pod.clone()) {
                        debug!("Pod {}/{} modified", pod.namespace, pod.name);
                        self.dirty = true;
                    } else {
                        warn!(
                            "Pod {}/{} not registered with controller, cannot modify",
                            pod.namespace, pod.name
                        );
                    }
                }
                Verb::Delete => {
                    if self.store.remove_pod(&pod.namespace, &pod.name) {
                        debug!("Pod {}/{} deleted, rebuilding now", pod.namespace, pod.name);
                        // A removed server must not keep receiving traffic
                        // until the next tick.
                        self.rebuild().await;
                        self.dirty = false;
                    } else {
                        warn!(
                            "Pod {}/{} not registered with controller, cannot delete",
                            pod.namespace, pod.name
                        );
                    }
                }
            },
            SyncEvent::Ingress(verb, ingress) => match verb {
                Verb::Add | Verb::Modify => {
                    debug!("Ingress {}/{} {}", ingress.namespace, ingress.name, verb);
                    self.store.upsert_ingress(ingress);
                    self.dirty = true;
                }
                Verb::Delete => {
                    if self.store.remove_ingress(&ingress.namespace, &ingress.name) {
                        debug!("Ingress {}/{} deleted", ingress.namespace, ingress.name);
                        self.dirty = true;
                    }
                }
            },
            SyncEvent::ConfigMap(verb, config_map) => match verb {
                Verb::Add | Verb::Modify => {
                    debug!("ConfigMap {} {}", config_map.name, verb);
                    self.apply_sync_period(Some(&config_map.data));
                    self.store.upsert_config_map(config_map);
                    self.dirty = true;
                }
                Verb::Delete => {
                    if self.store.remove_config_map(&config_map.name) {
                        debug!("ConfigMap {} deleted", config_map.name);
                        self.apply_sync_period(None);
                        self.dirty = true;
                    }
                }
            },
            SyncEvent::Secret(verb, secret) => match verb {
                Verb::Add | Verb::Modify => {
                    debug!("Secret {}/{} {}", secret.namespace, secret.name, verb);
                    self.store.upsert_secret(secret);
                    self.dirty = true;
                }
                Verb::Delete => {
                    if self.store.remove_secret(&secret.namespace, &secret.name) {
                        debug!("Secret {}/{} deleted", secret.namespace, secret.name);
                        self.dirty = true;
                    }
                }
            },
            SyncEvent::WatchError(kind, message) => {
                // Re-subscription is the watch collaborator's job; the store
                // keeps serving its last known state meanwhile.
                warn!("{} watch error: {}", kind, message);
            }
        }
    }

    /// The ConfigMap `sync-period` key overrides the tick interval; removal
    /// or an empty value reverts to the bootstrap default.
    fn apply_sync_period(&mut self, data: Option<&AnnotationMap>) {
        let period = match data.and_then(|d| d.get("sync-period")).filter(|v| !v.is_empty()) {
            Some(value) => match parse_time(value) {
                Ok(ms) => Duration::from_millis(ms as u64),
                Err(e) => {
                    warn!("invalid sync-period '{}': {}", value, e);
                    return;
                }
            },
            None => self.config.sync_period,
        };
        let previous = self.period_tx.send_replace(period);
        if previous != period {
            info!("sync period set to {:?}", period);
        }
    }

    async fn rebuild(&mut self) {
        let started = Instant::now();
        let document = Builder::new(&self.store, &self.config).build();
        match self.publisher.publish(&document).await {
            Ok(PublishOutcome::Reloaded(path)) => {
                info!("configuration published: {}", path.display());
                metrics::record_generation("success", started.elapsed().as_secs_f64());
            }
            Ok(PublishOutcome::Unchanged) => {
                debug!("configuration unchanged");
                metrics::record_generation("unchanged", started.elapsed().as_secs_f64());
            }
            Err(e) => {
                // Previous configuration stays in force.
                warn!("configuration generation failed: {}", e);
                metrics::record_generation("failure", started.elapsed().as_secs_f64());
            }
        }
    }
}
