//! Mutable settings records the annotation pipeline writes into
//!
//! One set of records exists per generation; handlers receive shared
//! references at construction and the builder renders the final state.
//! Directives are indented four spaces under their section header.

use std::collections::BTreeMap;
use std::fmt::Write;

/// A syslog target for the global section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub address: String,
    pub facility: String,
    pub level: Option<String>,
}

/// Global section settings
#[derive(Debug, Default)]
pub struct Global {
    pub nbthread: Option<i64>,
    pub maxconn: Option<i64>,
    /// Milliseconds
    pub hard_stop_after: Option<i64>,
    pub syslog_servers: Vec<LogTarget>,
    pub config_snippet: Vec<String>,
}

impl Global {
    pub fn render(&self, out: &mut String) {
        out.push_str("global\n");
        out.push_str("    daemon\n");
        if let Some(nbthread) = self.nbthread {
            let _ = writeln!(out, "    nbthread {}", nbthread);
        }
        if let Some(maxconn) = self.maxconn {
            let _ = writeln!(out, "    maxconn {}", maxconn);
        }
        if let Some(ms) = self.hard_stop_after {
            let _ = writeln!(out, "    hard-stop-after {}", ms);
        }
        for target in &self.syslog_servers {
            match &target.level {
                Some(level) => {
                    let _ = writeln!(out, "    log {} {} {}", target.address, target.facility, level);
                }
                None => {
                    let _ = writeln!(out, "    log {} {}", target.address, target.facility);
                }
            }
        }
        for line in &self.config_snippet {
            let _ = writeln!(out, "    {}", line);
        }
    }
}

/// Defaults section settings
#[derive(Debug, Default)]
pub struct Defaults {
    /// `option <name>` toggles, keyed by option name
    pub options: BTreeMap<String, bool>,
    /// `timeout <suffix> <ms>`, keyed by suffix (`connect`, `client`, ...)
    pub timeouts: BTreeMap<String, i64>,
    pub log_format: Option<String>,
}

impl Defaults {
    pub fn render(&self, out: &mut String, log_global: bool) {
        out.push_str("defaults\n");
        out.push_str("    mode http\n");
        if log_global {
            out.push_str("    log global\n");
        }
        if let Some(format) = &self.log_format {
            let _ = writeln!(out, "    log-format {}", format);
        }
        for (option, enabled) in &self.options {
            if *enabled {
                let _ = writeln!(out, "    option {}", option);
            } else {
                let _ = writeln!(out, "    no option {}", option);
            }
        }
        for (suffix, ms) in &self.timeouts {
            let _ = writeln!(out, "    timeout {} {}", suffix, ms);
        }
    }
}

/// Per-server options applied through a `default-server` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultServer {
    /// Whether server lines carry a health check (on unless annotated off)
    pub check: bool,
    /// Health-check interval, milliseconds
    pub inter: Option<i64>,
    pub maxconn: Option<i64>,
    pub send_proxy: bool,
    pub ssl: bool,
    pub crt: Option<String>,
    pub ca_file: Option<String>,
    pub proto: Option<String>,
}

impl DefaultServer {
    fn args(&self) -> String {
        let mut args = String::new();
        if let Some(inter) = self.inter {
            let _ = write!(args, " inter {}", inter);
        }
        if let Some(maxconn) = self.maxconn {
            let _ = write!(args, " maxconn {}", maxconn);
        }
        if self.send_proxy {
            args.push_str(" send-proxy");
        }
        if self.ssl {
            match &self.ca_file {
                Some(ca) => {
                    let _ = write!(args, " ssl verify required ca-file {}", ca);
                }
                None => args.push_str(" ssl verify none"),
            }
        }
        if let Some(crt) = &self.crt {
            let _ = write!(args, " crt {}", crt);
        }
        if let Some(proto) = &self.proto {
            let _ = write!(args, " proto {}", proto);
        }
        args
    }
}

impl Default for DefaultServer {
    fn default() -> Self {
        Self {
            check: true,
            inter: None,
            maxconn: None,
            send_proxy: false,
            ssl: false,
            crt: None,
            ca_file: None,
            proto: None,
        }
    }
}

/// One server line inside a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub addr: String,
    pub port: i32,
}

/// A backend section: a pool of servers plus annotation-driven options
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: String,
    pub mode: String,
    pub balance: String,
    pub options: BTreeMap<String, bool>,
    /// `option httpchk <...>`
    pub check_http: Option<String>,
    /// Milliseconds
    pub timeout_check: Option<i64>,
    /// Cookie name for session persistence
    pub cookie: Option<String>,
    pub default_server: DefaultServer,
    pub servers: Vec<Server>,
    /// Set only on synthetic rate-limit table backends
    pub stick_table: Option<String>,
}

impl Backend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: "http".to_string(),
            balance: "leastconn".to_string(),
            options: BTreeMap::new(),
            check_http: None,
            timeout_check: None,
            cookie: None,
            default_server: DefaultServer::default(),
            servers: Vec::new(),
            stick_table: None,
        }
    }

    /// A table backend carries only its stick-table directive.
    pub fn rate_limit_table(name: &str, stick_table: String) -> Self {
        let mut backend = Self::new(name);
        backend.stick_table = Some(stick_table);
        backend
    }

    pub fn render(&self, out: &mut String) {
        let _ = writeln!(out, "backend {}", self.name);
        if let Some(table) = &self.stick_table {
            let _ = writeln!(out, "    {}", table);
            return;
        }
        let _ = writeln!(out, "    mode {}", self.mode);
        let _ = writeln!(out, "    balance {}", self.balance);
        for (option, enabled) in &self.options {
            if *enabled {
                let _ = writeln!(out, "    option {}", option);
            } else {
                let _ = writeln!(out, "    no option {}", option);
            }
        }
        if let Some(uri) = &self.check_http {
            let _ = writeln!(out, "    option httpchk {}", uri);
        }
        if let Some(ms) = self.timeout_check {
            let _ = writeln!(out, "    timeout check {}", ms);
        }
        if let Some(cookie) = &self.cookie {
            let _ = writeln!(out, "    cookie {} insert indirect nocache", cookie);
        }
        let server_args = self.default_server.args();
        if !server_args.is_empty() {
            let _ = writeln!(out, "    default-server{}", server_args);
        }
        for server in &self.servers {
            let _ = write!(
                out,
                "    server {} {}:{} weight 1",
                server.name, server.addr, server.port
            );
            if self.default_server.check {
                let _ = write!(out, " check port {}", server.port);
            }
            if self.cookie.is_some() {
                let _ = write!(out, " cookie {}", server.name);
            }
            out.push('\n');
        }
    }
}

/// A named host ACL on a frontend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub name: String,
    pub expr: String,
}

/// A routing decision guarded by ACL conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseBackend {
    pub backend: String,
    pub condition: String,
}

/// A userlist section backing basic-auth rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Userlist {
    pub name: String,
    /// (user, encrypted password) pairs from the referenced Secret
    pub users: Vec<(String, String)>,
}

impl Userlist {
    pub fn render(&self, out: &mut String) {
        let _ = writeln!(out, "userlist {}", self.name);
        for (user, password) in &self.users {
            let _ = writeln!(out, "    user {} password {}", user, password);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_render() {
        let global = Global {
            nbthread: Some(4),
            maxconn: Some(1000),
            hard_stop_after: Some(30_000),
            syslog_servers: vec![LogTarget {
                address: "10.0.0.1:514".to_string(),
                facility: "local0".to_string(),
                level: Some("notice".to_string()),
            }],
            config_snippet: vec!["tune.ssl.default-dh-param 2048".to_string()],
        };

        let mut out = String::new();
        global.render(&mut out);

        assert!(out.starts_with("global\n    daemon\n"));
        assert!(out.contains("    nbthread 4\n"));
        assert!(out.contains("    maxconn 1000\n"));
        assert!(out.contains("    hard-stop-after 30000\n"));
        assert!(out.contains("    log 10.0.0.1:514 local0 notice\n"));
        assert!(out.contains("    tune.ssl.default-dh-param 2048\n"));
    }

    #[test]
    fn test_defaults_render_option_toggles() {
        let mut defaults = Defaults::default();
        defaults.options.insert("http-server-close".to_string(), true);
        defaults.options.insert("dontlognull".to_string(), false);
        defaults.timeouts.insert("connect".to_string(), 5000);

        let mut out = String::new();
        defaults.render(&mut out, false);

        assert!(out.contains("    option http-server-close\n"));
        assert!(out.contains("    no option dontlognull\n"));
        assert!(out.contains("    timeout connect 5000\n"));
    }

    #[test]
    fn test_backend_render_server_lines() {
        let mut backend = Backend::new("default-web-80");
        backend.servers.push(Server {
            name: "server000".to_string(),
            addr: "10.0.0.1".to_string(),
            port: 80,
        });

        let mut out = String::new();
        backend.render(&mut out);

        assert!(out.contains("backend default-web-80\n"));
        assert!(out.contains("    mode http\n"));
        assert!(out.contains("    balance leastconn\n"));
        assert!(out.contains("    server server000 10.0.0.1:80 weight 1 check port 80\n"));
    }

    #[test]
    fn test_backend_render_default_server() {
        let mut backend = Backend::new("default-web-80");
        backend.default_server.inter = Some(5000);
        backend.default_server.maxconn = Some(500);

        let mut out = String::new();
        backend.render(&mut out);

        assert!(out.contains("    default-server inter 5000 maxconn 500\n"));
    }

    #[test]
    fn test_backend_check_disabled() {
        let mut backend = Backend::new("default-web-80");
        backend.default_server.check = false;
        backend.servers.push(Server {
            name: "server000".to_string(),
            addr: "10.0.0.1".to_string(),
            port: 80,
        });

        let mut out = String::new();
        backend.render(&mut out);

        assert!(out.contains("    server server000 10.0.0.1:80 weight 1\n"));
        assert!(!out.contains("check port"));
    }

    #[test]
    fn test_backend_cookie_persistence() {
        let mut backend = Backend::new("default-web-80");
        backend.cookie = Some("WEB".to_string());
        backend.servers.push(Server {
            name: "server000".to_string(),
            addr: "10.0.0.1".to_string(),
            port: 80,
        });

        let mut out = String::new();
        backend.render(&mut out);

        assert!(out.contains("    cookie WEB insert indirect nocache\n"));
        assert!(out.contains(" cookie server000\n"));
    }
}
