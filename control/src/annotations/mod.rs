//! Annotation pipeline
//!
//! An [`Annotation`] is a named handler processed once per generation against
//! a precedence-ordered stack of annotation maps (ingress, then service, then
//! the global ConfigMap, then built-in defaults). Handlers mutate shared
//! settings records (global/defaults/backend) or append rules to the shared
//! frontend rule list. A parse failure is reported for that one annotation
//! and leaves the setting at its prior/default value; the generation always
//! proceeds.

mod global;
mod ingress;
mod service;

use std::cell::RefCell;
use std::collections::HashMap;
use std::num::ParseIntError;
use std::path::Path;
use std::rc::Rc;

use lazy_static::lazy_static;
use thiserror::Error;
use tracing::warn;

use crate::haproxy::models::{Backend, Defaults, Global, Userlist};
use crate::haproxy::rules::Rules;
use crate::store::{AnnotationMap, Ingress, Store};

use self::global::{
    ConfigSnippet, HardStopAfter, LogFormat, Maxconn, Nbthread, OptionFlag, SyslogServer,
    TimeoutAnn,
};
use self::ingress::{
    Blacklist, Cors, HostRedirect, HttpsRedirect, RateLimit, ReqAuth, ReqCapture, ReqPathRewrite,
    ReqSetHdr, ReqSetHost, ResSetHdr, SrcIpHdr, Whitelist,
};
use self::service::{
    AbortOnClose, Ca, Check, CheckHttp, CheckInter, Cookie, Crt, ForwardedFor, LoadBalance,
    PodMaxconn, Proto, SendProxy, Ssl, TimeoutCheck,
};

/// Shared mutable target record, scoped to one generation. The builder runs
/// single-threaded, so plain `Rc<RefCell<_>>` is the right tool here.
pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// A named annotation handler.
pub trait Annotation {
    fn name(&self) -> &'static str;

    /// Read this handler's key(s) from the annotation maps and apply them to
    /// the shared target record.
    fn process(&mut self, store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError>;
}

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("annotation '{name}': invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("annotation '{name}': secret {namespace}/{secret} not found")]
    MissingSecret {
        name: &'static str,
        namespace: String,
        secret: String,
    },
}

impl AnnotationError {
    pub(crate) fn invalid(name: &'static str, value: &str, reason: impl ToString) -> Self {
        AnnotationError::Invalid {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

lazy_static! {
    /// Built-in defaults, consulted after every annotation map came up empty.
    static ref DEFAULT_VALUES: HashMap<&'static str, &'static str> = HashMap::from([
        ("load-balance", "leastconn"),
        ("ssl-redirect-port", "443"),
        ("ssl-redirect-code", "302"),
        ("request-redirect-code", "302"),
        ("rate-limit-period", "1s"),
        ("rate-limit-size", "100k"),
        ("rate-limit-status-code", "403"),
        ("request-capture-len", "128"),
        ("auth-realm", "Protected Content"),
        ("timeout-http-request", "5s"),
        ("timeout-connect", "5s"),
        ("timeout-client", "50s"),
        ("timeout-queue", "5s"),
        ("timeout-server", "50s"),
    ]);
}

/// First non-empty value wins; an empty string means "not set" and falls
/// through to the next map, then to the built-in defaults.
pub fn get_value(name: &str, maps: &[&AnnotationMap]) -> Option<String> {
    for map in maps {
        if let Some(value) = map.get(name) {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }
    }
    DEFAULT_VALUES.get(name).map(|value| value.to_string())
}

/// Parse the accepted boolean spellings.
pub fn parse_bool(input: &str) -> Result<bool, String> {
    match input {
        "true" | "on" | "enabled" | "1" => Ok(true),
        "false" | "off" | "disabled" | "0" => Ok(false),
        other => Err(format!("'{}' is not a boolean value", other)),
    }
}

/// Parse a time value into milliseconds. Accepts `ms`, `s`, `m`, `h` and `d`
/// suffixes; a bare number is taken as milliseconds.
pub fn parse_time(input: &str) -> Result<i64, ParseIntError> {
    let trimmed = input.trim();
    let (digits, factor) = if let Some(v) = trimmed.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = trimmed.strip_suffix('s') {
        (v, 1000)
    } else if let Some(v) = trimmed.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = trimmed.strip_suffix('h') {
        (v, 3_600_000)
    } else if let Some(v) = trimmed.strip_suffix('d') {
        (v, 86_400_000)
    } else {
        (trimmed, 1)
    };
    digits.trim().parse::<i64>().map(|n| n * factor)
}

/// Split a `namespace/name` reference; a bare `name` resolves against the
/// object's own namespace.
pub fn parse_k8s_ref(input: &str, default_namespace: &str) -> Result<(String, String), String> {
    let mut parts = input.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(name), None) if !name.is_empty() => {
            Ok((default_namespace.to_string(), name.to_string()))
        }
        (Some(ns), Some(name)) if !name.is_empty() => {
            let ns = if ns.is_empty() { default_namespace } else { ns };
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(format!("'{}' is not a namespace/name reference", input)),
    }
}

/// Run every handler, absorbing per-annotation failures.
pub fn process_all(
    handlers: &mut [Box<dyn Annotation>],
    store: &Store,
    maps: &[&AnnotationMap],
) {
    for handler in handlers {
        if let Err(e) = handler.process(store, maps) {
            warn!("{}", e);
        }
    }
}

/// Handlers feeding the global section and the raw config snippets.
pub fn global_handlers(
    global: &Shared<Global>,
    http_snippet: &Shared<Vec<String>>,
    https_snippet: &Shared<Vec<String>>,
    stats_snippet: &Shared<Vec<String>>,
) -> Vec<Box<dyn Annotation>> {
    vec![
        Box::new(ConfigSnippet::global("global-config-snippet", global.clone())),
        Box::new(ConfigSnippet::frontend(
            "frontend-config-snippet",
            http_snippet.clone(),
        )),
        Box::new(ConfigSnippet::frontend(
            "frontend-config-snippet",
            https_snippet.clone(),
        )),
        Box::new(ConfigSnippet::frontend(
            "stats-config-snippet",
            stats_snippet.clone(),
        )),
        Box::new(SyslogServer::new("syslog-server", global.clone())),
        Box::new(Nbthread::new("nbthread", global.clone())),
        Box::new(Maxconn::new("maxconn", global.clone())),
        Box::new(HardStopAfter::new("hard-stop-after", global.clone())),
    ]
}

/// Handlers feeding the defaults section.
pub fn defaults_handlers(defaults: &Shared<Defaults>) -> Vec<Box<dyn Annotation>> {
    vec![
        Box::new(OptionFlag::new("http-server-close", defaults.clone())),
        Box::new(OptionFlag::new("http-keep-alive", defaults.clone())),
        Box::new(OptionFlag::new("dontlognull", defaults.clone())),
        Box::new(OptionFlag::new("logasap", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-http-request", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-connect", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-client", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-client-fin", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-queue", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-server", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-server-fin", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-tunnel", defaults.clone())),
        Box::new(TimeoutAnn::new("timeout-http-keep-alive", defaults.clone())),
        Box::new(LogFormat::new("log-format", defaults.clone())),
    ]
}

/// Handlers contributing frontend rules for one ingress.
///
/// Registration order is the canonical rule order: deny/allow lists, source
/// rewrite, host/path rewrites, header sets, rate limiting, auth, redirects,
/// captures, CORS. Factory-grouped keys share one parsed record and refine a
/// single rule.
pub fn frontend_handlers(
    ingress: &Ingress,
    rules: &Shared<Rules>,
    userlists: &Shared<Vec<Userlist>>,
) -> Vec<Box<dyn Annotation>> {
    let rate_limit = RateLimit::new(rules.clone());
    let auth = ReqAuth::new(rules.clone(), userlists.clone(), ingress);
    let https_redirect = HttpsRedirect::new(rules.clone());
    let host_redirect = HostRedirect::new(rules.clone());
    let capture = ReqCapture::new(rules.clone());
    let cors = Cors::new(rules.clone());
    vec![
        Box::new(Blacklist::new("blacklist", rules.clone())),
        Box::new(Whitelist::new("whitelist", rules.clone())),
        Box::new(SrcIpHdr::new("src-ip-header", rules.clone())),
        Box::new(ReqSetHost::new("set-host", rules.clone())),
        Box::new(ReqPathRewrite::new("path-rewrite", rules.clone())),
        Box::new(ReqSetHdr::new("request-set-header", rules.clone())),
        Box::new(ResSetHdr::new("response-set-header", rules.clone())),
        Box::new(rate_limit.annotation("rate-limit-requests")),
        Box::new(rate_limit.annotation("rate-limit-period")),
        Box::new(rate_limit.annotation("rate-limit-size")),
        Box::new(rate_limit.annotation("rate-limit-status-code")),
        Box::new(auth.annotation("auth-type")),
        Box::new(auth.annotation("auth-realm")),
        Box::new(auth.annotation("auth-secret")),
        Box::new(https_redirect.annotation("ssl-redirect")),
        Box::new(https_redirect.annotation("ssl-redirect-port")),
        Box::new(https_redirect.annotation("ssl-redirect-code")),
        Box::new(host_redirect.annotation("request-redirect")),
        Box::new(host_redirect.annotation("request-redirect-code")),
        Box::new(capture.annotation("request-capture")),
        Box::new(capture.annotation("request-capture-len")),
        Box::new(cors.annotation("cors-allow-origin")),
        Box::new(cors.annotation("cors-allow-method")),
        Box::new(cors.annotation("cors-allow-headers")),
        Box::new(cors.annotation("cors-max-age")),
    ]
}

/// Handlers mutating one backend's settings record.
pub fn backend_handlers(
    backend: &Shared<Backend>,
    default_namespace: &str,
    certs_dir: &Path,
) -> Vec<Box<dyn Annotation>> {
    let mode_http = backend.borrow().mode == "http";
    let mut handlers: Vec<Box<dyn Annotation>> = vec![
        Box::new(AbortOnClose::new("abortonclose", backend.clone())),
        Box::new(TimeoutCheck::new("timeout-check", backend.clone())),
        Box::new(LoadBalance::new("load-balance", backend.clone())),
        Box::new(Check::new("check", backend.clone())),
        Box::new(CheckInter::new("check-interval", backend.clone())),
        Box::new(Cookie::new("cookie-persistence", backend.clone())),
        Box::new(PodMaxconn::new("pod-maxconn", backend.clone())),
        Box::new(SendProxy::new("send-proxy-protocol", backend.clone())),
        // Order matters for the ssl annotations so they do not conflict
        Box::new(Ssl::new("server-ssl", backend.clone())),
        Box::new(Crt::new(
            "server-crt",
            backend.clone(),
            default_namespace,
            certs_dir,
        )),
        Box::new(Ca::new(
            "server-ca",
            backend.clone(),
            default_namespace,
            certs_dir,
        )),
        Box::new(Proto::new("server-proto", backend.clone())),
    ];
    if mode_http {
        handlers.push(Box::new(CheckHttp::new("check-http", backend.clone())));
        handlers.push(Box::new(ForwardedFor::new("forwarded-for", backend.clone())));
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map(entries: &[(&str, &str)]) -> AnnotationMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_value_precedence() {
        let ingress = map(&[("maxconn", "100")]);
        let service = map(&[("maxconn", "200")]);
        let config_map = map(&[("maxconn", "300")]);

        assert_eq!(
            get_value("maxconn", &[&ingress, &service, &config_map]),
            Some("100".to_string())
        );
        assert_eq!(
            get_value("maxconn", &[&service, &config_map]),
            Some("200".to_string())
        );
        assert_eq!(
            get_value("maxconn", &[&config_map]),
            Some("300".to_string())
        );
    }

    #[test]
    fn test_empty_value_falls_through() {
        let ingress = map(&[("maxconn", "")]);
        let config_map = map(&[("maxconn", "300")]);

        assert_eq!(
            get_value("maxconn", &[&ingress, &config_map]),
            Some("300".to_string())
        );
    }

    #[test]
    fn test_builtin_default_is_last_resort() {
        let empty = map(&[]);
        assert_eq!(
            get_value("load-balance", &[&empty]),
            Some("leastconn".to_string())
        );
        assert_eq!(get_value("nbthread", &[&empty]), None);
    }

    #[test]
    fn test_parse_bool_spellings() {
        for value in ["true", "on", "enabled", "1"] {
            assert_eq!(parse_bool(value), Ok(true), "{}", value);
        }
        for value in ["false", "off", "disabled", "0"] {
            assert_eq!(parse_bool(value), Ok(false), "{}", value);
        }
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn test_parse_time_units() {
        assert_eq!(parse_time("250ms"), Ok(250));
        assert_eq!(parse_time("5s"), Ok(5000));
        assert_eq!(parse_time("2m"), Ok(120_000));
        assert_eq!(parse_time("1h"), Ok(3_600_000));
        assert_eq!(parse_time("1d"), Ok(86_400_000));
        assert_eq!(parse_time("300"), Ok(300));
        assert!(parse_time("fast").is_err());
    }

    #[test]
    fn test_parse_k8s_ref() {
        assert_eq!(
            parse_k8s_ref("prod/creds", "default"),
            Ok(("prod".to_string(), "creds".to_string()))
        );
        assert_eq!(
            parse_k8s_ref("creds", "default"),
            Ok(("default".to_string(), "creds".to_string()))
        );
        assert!(parse_k8s_ref("prod/", "default").is_err());
    }
}
