//! Walks the store and renders the configuration document
//!
//! Section order is fixed: global, defaults, frontends (http, https, stats),
//! backends, then any userlists. Given one store snapshot the output is
//! deterministic; the store's maps iterate sorted and every collection built
//! here preserves first-seen order.

use std::collections::HashSet;
use std::fmt::Write;

use tracing::{debug, warn};

use crate::annotations::{self, shared, Shared};
use crate::config::ControllerConfig;
use crate::haproxy::models::{Acl, Backend, Defaults, Global, Server, UseBackend, Userlist};
use crate::haproxy::rules::{Rule, Rules};
use crate::store::{PodPhase, Store};

pub struct Builder<'a> {
    store: &'a Store,
    config: &'a ControllerConfig,
}

impl<'a> Builder<'a> {
    pub fn new(store: &'a Store, config: &'a ControllerConfig) -> Self {
        Self { store, config }
    }

    /// Produce the full configuration document for the current store state.
    /// Reference errors (missing service, empty selector) are logged and the
    /// offending fragment is left out.
    pub fn build(&self) -> String {
        let config_map_data = self
            .store
            .config_map(&self.config.config_map_name)
            .map(|cm| cm.data.clone())
            .unwrap_or_default();

        let global = shared(Global::default());
        let defaults = shared(Defaults::default());
        let http_snippet: Shared<Vec<String>> = shared(Vec::new());
        let https_snippet: Shared<Vec<String>> = shared(Vec::new());
        let stats_snippet: Shared<Vec<String>> = shared(Vec::new());

        let mut handlers =
            annotations::global_handlers(&global, &http_snippet, &https_snippet, &stats_snippet);
        handlers.extend(annotations::defaults_handlers(&defaults));
        annotations::process_all(&mut handlers, self.store, &[&config_map_data]);

        let rules = shared(Rules::default());
        let userlists: Shared<Vec<Userlist>> = shared(Vec::new());

        let mut acls: Vec<Acl> = Vec::new();
        let mut acl_hosts: HashSet<String> = HashSet::new();
        let mut use_backends: Vec<UseBackend> = Vec::new();
        let mut seen_use_backends: HashSet<(String, String)> = HashSet::new();
        let mut backends: Vec<Backend> = Vec::new();
        let mut created_backends: HashSet<String> = HashSet::new();

        for namespace in self.store.namespaces().filter(|ns| ns.watched) {
            for ingress in namespace.ingresses.values() {
                let mut frontend_handlers =
                    annotations::frontend_handlers(ingress, &rules, &userlists);
                annotations::process_all(
                    &mut frontend_handlers,
                    self.store,
                    &[&ingress.annotations, &config_map_data],
                );

                for rule in &ingress.rules {
                    if !rule.host.is_empty() && acl_hosts.insert(rule.host.clone()) {
                        acls.push(Acl {
                            name: format!("host-{}", rule.host),
                            expr: format!("var(txn.hdr_host) -i {}", rule.host),
                        });
                    }

                    for path in &rule.paths {
                        let Some(service) = namespace.services.get(&path.service_name) else {
                            warn!(
                                "service {}/{} does not exist, skipping path {}",
                                namespace.name, path.service_name, path.path
                            );
                            continue;
                        };
                        if service.selector.is_empty() {
                            warn!(
                                "service {}/{} has no selector, skipping path {}",
                                namespace.name, service.name, path.path
                            );
                            continue;
                        }
                        if path.service_port == 0 {
                            warn!(
                                "ingress {}/{} references service {} by port name, \
                                 only numeric ports are supported",
                                namespace.name, ingress.name, service.name
                            );
                            continue;
                        }

                        let backend_name = format!(
                            "{}-{}-{}",
                            namespace.name, service.name, path.service_port
                        );

                        let condition = if rule.host.is_empty() {
                            format!("if {{ var(txn.path) -m beg {} }}", path.path)
                        } else {
                            format!(
                                "if host-{} {{ var(txn.path) -m beg {} }}",
                                rule.host, path.path
                            )
                        };
                        if seen_use_backends.insert((backend_name.clone(), condition.clone())) {
                            use_backends.push(UseBackend {
                                backend: backend_name.clone(),
                                condition,
                            });
                        }

                        if !created_backends.insert(backend_name.clone()) {
                            continue;
                        }

                        let backend = shared(Backend::new(&backend_name));
                        let mut backend_handlers = annotations::backend_handlers(
                            &backend,
                            &namespace.name,
                            &self.config.certs_dir,
                        );
                        annotations::process_all(
                            &mut backend_handlers,
                            self.store,
                            &[
                                &ingress.annotations,
                                &service.annotations,
                                &config_map_data,
                            ],
                        );

                        let mut backend = backend.borrow().clone();
                        for pod in namespace.pods.values() {
                            if pod.phase != PodPhase::Running {
                                continue;
                            }
                            if pod.ip.is_empty() {
                                debug!(
                                    "pod {}/{} is Running without an IP, skipping",
                                    namespace.name, pod.name
                                );
                                continue;
                            }
                            if !pod.matches(&service.selector) {
                                continue;
                            }
                            backend.servers.push(Server {
                                name: format!("server{:03}", backend.servers.len()),
                                addr: pod.ip.clone(),
                                port: path.service_port,
                            });
                        }
                        backends.push(backend);
                    }
                }
            }
        }

        // Stick-table backends referenced by rate-limit rules
        let mut table_backends: Vec<Backend> = Vec::new();
        for rule in rules.borrow().iter() {
            if let Rule::RateLimit {
                table,
                period_ms,
                size,
                ..
            } = rule
            {
                if created_backends.insert(table.clone()) {
                    table_backends.push(Backend::rate_limit_table(
                        table,
                        format!(
                            "stick-table type ip size {} expire {} store http_req_rate({})",
                            size, period_ms, period_ms
                        ),
                    ));
                }
            }
        }
        backends.extend(table_backends);

        let global = global.borrow();
        let log_global = !global.syslog_servers.is_empty();

        let mut sections: Vec<String> = Vec::new();

        let mut section = String::new();
        global.render(&mut section);
        sections.push(section);

        let mut section = String::new();
        defaults.borrow().render(&mut section, log_global);
        sections.push(section);

        let rules = rules.borrow();
        sections.push(render_frontend(
            "http",
            "*:80",
            &http_snippet.borrow(),
            &acls,
            &rules,
            &use_backends,
        ));
        sections.push(render_frontend(
            "https",
            "*:443",
            &https_snippet.borrow(),
            &acls,
            &rules,
            &use_backends,
        ));
        sections.push(render_stats_frontend(&stats_snippet.borrow()));

        for backend in &backends {
            let mut section = String::new();
            backend.render(&mut section);
            sections.push(section);
        }

        for userlist in userlists.borrow().iter() {
            let mut section = String::new();
            userlist.render(&mut section);
            sections.push(section);
        }

        sections.join("\n")
    }
}

fn render_frontend(
    name: &str,
    bind: &str,
    snippet: &[String],
    acls: &[Acl],
    rules: &Rules,
    use_backends: &[UseBackend],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "frontend {}", name);
    out.push_str("    mode http\n");
    let _ = writeln!(out, "    bind {}", bind);
    for line in snippet {
        let _ = writeln!(out, "    {}", line);
    }
    out.push_str("    http-request set-var(txn.hdr_host) req.hdr(Host)\n");
    out.push_str("    http-request set-var(txn.path) path\n");
    for acl in acls {
        let _ = writeln!(out, "    acl {} {}", acl.name, acl.expr);
    }
    rules.render(&mut out);
    for use_backend in use_backends {
        let _ = writeln!(
            out,
            "    use_backend {} {}",
            use_backend.backend, use_backend.condition
        );
    }
    out
}

fn render_stats_frontend(snippet: &[String]) -> String {
    let mut out = String::new();
    out.push_str("frontend stats\n");
    out.push_str("    mode http\n");
    out.push_str("    bind *:1024\n");
    for line in snippet {
        let _ = writeln!(out, "    {}", line);
    }
    out.push_str("    stats enable\n");
    out.push_str("    stats uri /\n");
    out
}
