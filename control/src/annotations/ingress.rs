//! Frontend (per-ingress) annotations
//!
//! Simple handlers contribute one rule from one key. Related annotations
//! (`ssl-redirect*`, `request-redirect*`, `rate-limit-*`, `auth-*`,
//! `request-capture*`, `cors-*`) share a factory: every key gets its own
//! sub-handler backed by one parsed record, and the factory assembles a
//! single rule once enough values are known, refining it in place as later
//! keys arrive.

use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;

use tracing::warn;

use crate::annotations::{
    get_value, parse_bool, parse_k8s_ref, parse_time, Annotation, AnnotationError, Shared,
};
use crate::haproxy::models::Userlist;
use crate::haproxy::rules::{Rule, Rules};
use crate::store::{AnnotationMap, Ingress, Store};

fn parse_networks(name: &'static str, value: &str) -> Result<Vec<String>, AnnotationError> {
    let mut networks = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let addr = item.split_once('/').map(|(ip, _)| ip).unwrap_or(item);
        if addr.parse::<IpAddr>().is_err() {
            return Err(AnnotationError::invalid(
                name,
                value,
                format!("'{}' is not an address or network", item),
            ));
        }
        networks.push(item.to_string());
    }
    if networks.is_empty() {
        return Err(AnnotationError::invalid(name, value, "empty address list"));
    }
    Ok(networks)
}

pub struct Blacklist {
    name: &'static str,
    rules: Shared<Rules>,
}

impl Blacklist {
    pub fn new(name: &'static str, rules: Shared<Rules>) -> Self {
        Self { name, rules }
    }
}

impl Annotation for Blacklist {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let networks = parse_networks(self.name, &value)?;
        self.rules.borrow_mut().add(Rule::ReqDeny {
            networks,
            whitelist: false,
        });
        Ok(())
    }
}

pub struct Whitelist {
    name: &'static str,
    rules: Shared<Rules>,
}

impl Whitelist {
    pub fn new(name: &'static str, rules: Shared<Rules>) -> Self {
        Self { name, rules }
    }
}

impl Annotation for Whitelist {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let networks = parse_networks(self.name, &value)?;
        self.rules.borrow_mut().add(Rule::ReqDeny {
            networks,
            whitelist: true,
        });
        Ok(())
    }
}

pub struct SrcIpHdr {
    name: &'static str,
    rules: Shared<Rules>,
}

impl SrcIpHdr {
    pub fn new(name: &'static str, rules: Shared<Rules>) -> Self {
        Self { name, rules }
    }
}

impl Annotation for SrcIpHdr {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        if let Some(header) = get_value(self.name, maps) {
            self.rules.borrow_mut().add(Rule::SetSrc { header });
        }
        Ok(())
    }
}

pub struct ReqSetHost {
    name: &'static str,
    rules: Shared<Rules>,
}

impl ReqSetHost {
    pub fn new(name: &'static str, rules: Shared<Rules>) -> Self {
        Self { name, rules }
    }
}

impl Annotation for ReqSetHost {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        if let Some(host) = get_value(self.name, maps) {
            self.rules.borrow_mut().add(Rule::SetHost { host });
        }
        Ok(())
    }
}

/// `path-rewrite` takes either a replacement (match defaults to `(.*)`) or an
/// explicit `<match> <fmt>` pair.
pub struct ReqPathRewrite {
    name: &'static str,
    rules: Shared<Rules>,
}

impl ReqPathRewrite {
    pub fn new(name: &'static str, rules: Shared<Rules>) -> Self {
        Self { name, rules }
    }
}

impl Annotation for ReqPathRewrite {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let parts: Vec<&str> = value.split_whitespace().collect();
        let rule = match parts.as_slice() {
            [fmt] => Rule::ReqPathRewrite {
                path_match: "(.*)".to_string(),
                path_fmt: fmt.to_string(),
            },
            [matcher, fmt] => Rule::ReqPathRewrite {
                path_match: matcher.to_string(),
                path_fmt: fmt.to_string(),
            },
            _ => {
                return Err(AnnotationError::invalid(
                    self.name,
                    &value,
                    "path-rewrite takes 1 or 2 params",
                ));
            }
        };
        self.rules.borrow_mut().add(rule);
        Ok(())
    }
}

fn set_header_rules(
    name: &'static str,
    value: &str,
    response: bool,
    rules: &Shared<Rules>,
) -> Result<(), AnnotationError> {
    for line in value.lines().filter(|line| !line.trim().is_empty()) {
        let Some((header, header_value)) = line.trim().split_once(' ') else {
            return Err(AnnotationError::invalid(
                name,
                line,
                "expected '<header> <value>'",
            ));
        };
        rules.borrow_mut().add(Rule::SetHeader {
            response,
            name: header.to_string(),
            value: header_value.trim().to_string(),
        });
    }
    Ok(())
}

pub struct ReqSetHdr {
    name: &'static str,
    rules: Shared<Rules>,
}

impl ReqSetHdr {
    pub fn new(name: &'static str, rules: Shared<Rules>) -> Self {
        Self { name, rules }
    }
}

impl Annotation for ReqSetHdr {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        match get_value(self.name, maps) {
            Some(value) => set_header_rules(self.name, &value, false, &self.rules),
            None => Ok(()),
        }
    }
}

pub struct ResSetHdr {
    name: &'static str,
    rules: Shared<Rules>,
}

impl ResSetHdr {
    pub fn new(name: &'static str, rules: Shared<Rules>) -> Self {
        Self { name, rules }
    }
}

impl Annotation for ResSetHdr {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        match get_value(self.name, maps) {
            Some(value) => set_header_rules(self.name, &value, true, &self.rules),
            None => Ok(()),
        }
    }
}

/// One key of a factory-grouped annotation. The closure parses this key into
/// the shared record; afterwards the factory re-assembles its rule.
pub struct FactoryKey<S> {
    name: &'static str,
    state: Rc<RefCell<S>>,
    apply: fn(&mut S, &'static str, &str, &Store) -> Result<(), AnnotationError>,
    assemble: fn(&mut S),
}

impl<S> Annotation for FactoryKey<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let mut state = self.state.borrow_mut();
        (self.apply)(&mut state, self.name, &value, store)?;
        (self.assemble)(&mut state);
        Ok(())
    }
}

/// `ssl-redirect`, `ssl-redirect-port`, `ssl-redirect-code`
pub struct HttpsRedirect {
    state: Rc<RefCell<HttpsRedirectState>>,
}

pub struct HttpsRedirectState {
    rules: Shared<Rules>,
    enabled: Option<bool>,
    port: i64,
    code: i64,
    slot: Option<usize>,
}

impl HttpsRedirect {
    pub fn new(rules: Shared<Rules>) -> Self {
        Self {
            state: Rc::new(RefCell::new(HttpsRedirectState {
                rules,
                enabled: None,
                port: 443,
                code: 302,
                slot: None,
            })),
        }
    }

    pub fn annotation(&self, name: &'static str) -> FactoryKey<HttpsRedirectState> {
        FactoryKey {
            name,
            state: self.state.clone(),
            apply: |state, name, value, _store| {
                match name {
                    "ssl-redirect" => {
                        state.enabled = Some(
                            parse_bool(value)
                                .map_err(|e| AnnotationError::invalid(name, value, e))?,
                        );
                    }
                    "ssl-redirect-port" => {
                        state.port = value
                            .parse()
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                    }
                    "ssl-redirect-code" => {
                        state.code = value
                            .parse()
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                    }
                    _ => {}
                }
                Ok(())
            },
            assemble: |state| {
                if state.enabled != Some(true) {
                    return;
                }
                let rule = Rule::SslRedirect {
                    port: state.port,
                    code: state.code,
                };
                let mut rules = state.rules.borrow_mut();
                match state.slot {
                    Some(slot) => rules.replace(slot, rule),
                    None => state.slot = Some(rules.add(rule)),
                }
            },
        }
    }
}

/// `request-redirect`, `request-redirect-code`
pub struct HostRedirect {
    state: Rc<RefCell<HostRedirectState>>,
}

pub struct HostRedirectState {
    rules: Shared<Rules>,
    host: Option<String>,
    code: i64,
    slot: Option<usize>,
}

impl HostRedirect {
    pub fn new(rules: Shared<Rules>) -> Self {
        Self {
            state: Rc::new(RefCell::new(HostRedirectState {
                rules,
                host: None,
                code: 302,
                slot: None,
            })),
        }
    }

    pub fn annotation(&self, name: &'static str) -> FactoryKey<HostRedirectState> {
        FactoryKey {
            name,
            state: self.state.clone(),
            apply: |state, name, value, _store| {
                match name {
                    "request-redirect" => state.host = Some(value.to_string()),
                    "request-redirect-code" => {
                        state.code = value
                            .parse()
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                    }
                    _ => {}
                }
                Ok(())
            },
            assemble: |state| {
                let Some(host) = state.host.clone() else {
                    return;
                };
                let rule = Rule::HostRedirect {
                    host,
                    code: state.code,
                };
                let mut rules = state.rules.borrow_mut();
                match state.slot {
                    Some(slot) => rules.replace(slot, rule),
                    None => state.slot = Some(rules.add(rule)),
                }
            },
        }
    }
}

/// `rate-limit-requests`, `rate-limit-period`, `rate-limit-size`,
/// `rate-limit-status-code`
pub struct RateLimit {
    state: Rc<RefCell<RateLimitState>>,
}

pub struct RateLimitState {
    rules: Shared<Rules>,
    requests: Option<i64>,
    period_ms: i64,
    size: String,
    status_code: i64,
    slot: Option<usize>,
}

impl RateLimit {
    pub fn new(rules: Shared<Rules>) -> Self {
        Self {
            state: Rc::new(RefCell::new(RateLimitState {
                rules,
                requests: None,
                period_ms: 1000,
                size: "100k".to_string(),
                status_code: 403,
                slot: None,
            })),
        }
    }

    pub fn annotation(&self, name: &'static str) -> FactoryKey<RateLimitState> {
        FactoryKey {
            name,
            state: self.state.clone(),
            apply: |state, name, value, _store| {
                match name {
                    "rate-limit-requests" => {
                        state.requests = Some(
                            value
                                .parse()
                                .map_err(|e| AnnotationError::invalid(name, value, e))?,
                        );
                    }
                    "rate-limit-period" => {
                        state.period_ms = parse_time(value)
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                    }
                    "rate-limit-size" => state.size = value.to_string(),
                    "rate-limit-status-code" => {
                        state.status_code = value
                            .parse()
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                    }
                    _ => {}
                }
                Ok(())
            },
            assemble: |state| {
                let Some(limit) = state.requests else {
                    return;
                };
                let rule = Rule::RateLimit {
                    table: format!("RateLimit-{}", state.period_ms),
                    period_ms: state.period_ms,
                    size: state.size.clone(),
                    limit,
                    status_code: state.status_code,
                };
                let mut rules = state.rules.borrow_mut();
                match state.slot {
                    Some(slot) => rules.replace(slot, rule),
                    None => state.slot = Some(rules.add(rule)),
                }
            },
        }
    }
}

/// `auth-type`, `auth-realm`, `auth-secret`
pub struct ReqAuth {
    state: Rc<RefCell<ReqAuthState>>,
}

pub struct ReqAuthState {
    rules: Shared<Rules>,
    userlists: Shared<Vec<Userlist>>,
    namespace: String,
    ingress_name: String,
    enabled: bool,
    realm: String,
    users: Option<Vec<(String, String)>>,
    rule_slot: Option<usize>,
    userlist_slot: Option<usize>,
}

impl ReqAuth {
    pub fn new(rules: Shared<Rules>, userlists: Shared<Vec<Userlist>>, ingress: &Ingress) -> Self {
        Self {
            state: Rc::new(RefCell::new(ReqAuthState {
                rules,
                userlists,
                namespace: ingress.namespace.clone(),
                ingress_name: ingress.name.clone(),
                enabled: false,
                realm: "Protected Content".to_string(),
                users: None,
                rule_slot: None,
                userlist_slot: None,
            })),
        }
    }

    pub fn annotation(&self, name: &'static str) -> FactoryKey<ReqAuthState> {
        FactoryKey {
            name,
            state: self.state.clone(),
            apply: |state, name, value, store| {
                match name {
                    "auth-type" => {
                        if value != "basic-auth" {
                            return Err(AnnotationError::invalid(
                                name,
                                value,
                                "only 'basic-auth' is supported",
                            ));
                        }
                        state.enabled = true;
                    }
                    "auth-realm" => state.realm = value.to_string(),
                    "auth-secret" => {
                        let (ns, secret_name) = parse_k8s_ref(value, &state.namespace)
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                        let Some(secret) = store.secret(&ns, &secret_name) else {
                            return Err(AnnotationError::MissingSecret {
                                name,
                                namespace: ns,
                                secret: secret_name,
                            });
                        };
                        let mut users = Vec::new();
                        for (user, password) in &secret.data {
                            match std::str::from_utf8(password) {
                                Ok(password) => {
                                    users.push((user.clone(), password.trim().to_string()));
                                }
                                Err(_) => {
                                    warn!(
                                        "auth-secret {}/{}: user '{}' has a non-UTF8 password, skipping",
                                        ns, secret_name, user
                                    );
                                }
                            }
                        }
                        state.users = Some(users);
                    }
                    _ => {}
                }
                Ok(())
            },
            assemble: |state| {
                if !state.enabled {
                    return;
                }
                let Some(users) = state.users.clone() else {
                    return;
                };
                let userlist_name = format!("{}-{}", state.namespace, state.ingress_name);
                let userlist = Userlist {
                    name: userlist_name.clone(),
                    users,
                };
                {
                    let mut userlists = state.userlists.borrow_mut();
                    match state.userlist_slot {
                        Some(slot) => userlists[slot] = userlist,
                        None => {
                            userlists.push(userlist);
                            state.userlist_slot = Some(userlists.len() - 1);
                        }
                    }
                }
                let rule = Rule::ReqAuth {
                    userlist: userlist_name,
                    realm: state.realm.clone(),
                };
                let mut rules = state.rules.borrow_mut();
                match state.rule_slot {
                    Some(slot) => rules.replace(slot, rule),
                    None => state.rule_slot = Some(rules.add(rule)),
                }
            },
        }
    }
}

/// `request-capture`, `request-capture-len`
pub struct ReqCapture {
    state: Rc<RefCell<ReqCaptureState>>,
}

pub struct ReqCaptureState {
    rules: Shared<Rules>,
    samples: Option<Vec<String>>,
    len: i64,
    slot: Option<usize>,
}

impl ReqCapture {
    pub fn new(rules: Shared<Rules>) -> Self {
        Self {
            state: Rc::new(RefCell::new(ReqCaptureState {
                rules,
                samples: None,
                len: 128,
                slot: None,
            })),
        }
    }

    pub fn annotation(&self, name: &'static str) -> FactoryKey<ReqCaptureState> {
        FactoryKey {
            name,
            state: self.state.clone(),
            apply: |state, name, value, _store| {
                match name {
                    "request-capture" => {
                        let samples: Vec<String> = value
                            .lines()
                            .map(str::trim)
                            .filter(|line| !line.is_empty())
                            .map(str::to_string)
                            .collect();
                        if samples.is_empty() {
                            return Err(AnnotationError::invalid(
                                name,
                                value,
                                "expected one sample expression per line",
                            ));
                        }
                        state.samples = Some(samples);
                    }
                    "request-capture-len" => {
                        state.len = value
                            .parse()
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                    }
                    _ => {}
                }
                Ok(())
            },
            assemble: |state| {
                let Some(samples) = state.samples.clone() else {
                    return;
                };
                let rule = Rule::ReqCapture {
                    samples,
                    len: state.len,
                };
                let mut rules = state.rules.borrow_mut();
                match state.slot {
                    Some(slot) => rules.replace(slot, rule),
                    None => state.slot = Some(rules.add(rule)),
                }
            },
        }
    }
}

/// `cors-allow-origin`, `cors-allow-method`, `cors-allow-headers`,
/// `cors-max-age`
pub struct Cors {
    state: Rc<RefCell<CorsState>>,
}

pub struct CorsState {
    rules: Shared<Rules>,
    origin: Option<String>,
    methods: Option<String>,
    headers: Option<String>,
    max_age: Option<i64>,
    slot: Option<usize>,
}

impl Cors {
    pub fn new(rules: Shared<Rules>) -> Self {
        Self {
            state: Rc::new(RefCell::new(CorsState {
                rules,
                origin: None,
                methods: None,
                headers: None,
                max_age: None,
                slot: None,
            })),
        }
    }

    pub fn annotation(&self, name: &'static str) -> FactoryKey<CorsState> {
        FactoryKey {
            name,
            state: self.state.clone(),
            apply: |state, name, value, _store| {
                match name {
                    "cors-allow-origin" => state.origin = Some(value.to_string()),
                    "cors-allow-method" => state.methods = Some(value.to_string()),
                    "cors-allow-headers" => state.headers = Some(value.to_string()),
                    "cors-max-age" => {
                        let ms = parse_time(value)
                            .map_err(|e| AnnotationError::invalid(name, value, e))?;
                        state.max_age = Some(ms / 1000);
                    }
                    _ => {}
                }
                Ok(())
            },
            assemble: |state| {
                let Some(origin) = state.origin.clone() else {
                    return;
                };
                let rule = Rule::Cors {
                    origin,
                    methods: state.methods.clone(),
                    headers: state.headers.clone(),
                    max_age: state.max_age,
                };
                let mut rules = state.rules.borrow_mut();
                match state.slot {
                    Some(slot) => rules.replace(slot, rule),
                    None => state.slot = Some(rules.add(rule)),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::shared;
    use crate::config::NamespacePolicy;
    use crate::store::Secret;
    use std::collections::BTreeMap;

    fn store() -> Store {
        Store::new(NamespacePolicy::Default)
    }

    fn ingress() -> Ingress {
        Ingress {
            name: "web".to_string(),
            namespace: "default".to_string(),
            annotations: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    fn map(entries: &[(&str, &str)]) -> AnnotationMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_blacklist_rejects_bad_address() {
        let rules = shared(Rules::default());
        let mut handler = Blacklist::new("blacklist", rules.clone());
        let data = map(&[("blacklist", "10.0.0.0/8, not-an-ip")]);

        assert!(handler.process(&store(), &[&data]).is_err());
        assert!(rules.borrow().is_empty());
    }

    #[test]
    fn test_whitelist_adds_inverted_deny() {
        let rules = shared(Rules::default());
        let mut handler = Whitelist::new("whitelist", rules.clone());
        let data = map(&[("whitelist", "192.168.0.0/16")]);

        handler.process(&store(), &[&data]).expect("should parse");
        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("deny if !{ src 192.168.0.0/16 }"));
    }

    #[test]
    fn test_path_rewrite_single_param() {
        let rules = shared(Rules::default());
        let mut handler = ReqPathRewrite::new("path-rewrite", rules.clone());
        let data = map(&[("path-rewrite", "/new")]);

        handler.process(&store(), &[&data]).expect("should parse");
        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("replace-path (.*) /new"));
    }

    #[test]
    fn test_path_rewrite_too_many_params() {
        let rules = shared(Rules::default());
        let mut handler = ReqPathRewrite::new("path-rewrite", rules.clone());
        let data = map(&[("path-rewrite", "a b c")]);

        assert!(handler.process(&store(), &[&data]).is_err());
    }

    #[test]
    fn test_https_redirect_keys_in_any_order() {
        let rules = shared(Rules::default());
        let factory = HttpsRedirect::new(rules.clone());
        let data = map(&[("ssl-redirect", "true"), ("ssl-redirect-code", "301")]);

        // Code key processed before the enabling key
        factory
            .annotation("ssl-redirect-code")
            .process(&store(), &[&data])
            .expect("code should parse");
        assert!(rules.borrow().is_empty(), "no rule until enabled");

        factory
            .annotation("ssl-redirect")
            .process(&store(), &[&data])
            .expect("enable should parse");

        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("redirect scheme https code 301"));
    }

    #[test]
    fn test_https_redirect_refines_in_place() {
        let rules = shared(Rules::default());
        let factory = HttpsRedirect::new(rules.clone());
        let data = map(&[("ssl-redirect", "true"), ("ssl-redirect-code", "308")]);

        factory
            .annotation("ssl-redirect")
            .process(&store(), &[&data])
            .expect("enable should parse");
        factory
            .annotation("ssl-redirect-code")
            .process(&store(), &[&data])
            .expect("code should parse");

        assert_eq!(rules.borrow().len(), 1, "one rule per factory");
        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("code 308"));
    }

    #[test]
    fn test_rate_limit_assembles_single_rule() {
        let rules = shared(Rules::default());
        let factory = RateLimit::new(rules.clone());
        let data = map(&[
            ("rate-limit-requests", "10"),
            ("rate-limit-period", "30s"),
            ("rate-limit-status-code", "429"),
        ]);

        for key in [
            "rate-limit-requests",
            "rate-limit-period",
            "rate-limit-size",
            "rate-limit-status-code",
        ] {
            factory
                .annotation(key)
                .process(&store(), &[&data])
                .expect("should parse");
        }

        assert_eq!(rules.borrow().len(), 1);
        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("track-sc0 src table RateLimit-30000"));
        assert!(out.contains("deny deny_status 429"));
        assert!(out.contains("sc0_http_req_rate(RateLimit-30000) gt 10"));
    }

    #[test]
    fn test_auth_requires_secret_in_store() {
        let rules = shared(Rules::default());
        let userlists = shared(Vec::new());
        let factory = ReqAuth::new(rules.clone(), userlists, &ingress());
        let data = map(&[("auth-type", "basic-auth"), ("auth-secret", "creds")]);

        factory
            .annotation("auth-type")
            .process(&store(), &[&data])
            .expect("type should parse");
        let err = factory
            .annotation("auth-secret")
            .process(&store(), &[&data])
            .expect_err("missing secret should fail");
        assert!(err.to_string().contains("default/creds"));
        assert!(rules.borrow().is_empty());
    }

    #[test]
    fn test_auth_builds_userlist_and_rule() {
        let mut st = store();
        st.upsert_secret(Secret {
            name: "creds".to_string(),
            namespace: "default".to_string(),
            data: BTreeMap::from([
                ("admin".to_string(), b"$6$hash".to_vec()),
                ("guest".to_string(), b"$6$other".to_vec()),
            ]),
        });

        let rules = shared(Rules::default());
        let userlists = shared(Vec::new());
        let factory = ReqAuth::new(rules.clone(), userlists.clone(), &ingress());
        let data = map(&[("auth-type", "basic-auth"), ("auth-secret", "creds")]);

        for key in ["auth-type", "auth-realm", "auth-secret"] {
            factory
                .annotation(key)
                .process(&st, &[&data])
                .expect("should parse");
        }

        let userlists = userlists.borrow();
        assert_eq!(userlists.len(), 1);
        assert_eq!(userlists[0].name, "default-web");
        assert_eq!(userlists[0].users.len(), 2);

        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("auth realm \"Protected Content\" if !{ http_auth(default-web) }"));
    }

    #[test]
    fn test_cors_assembles_after_origin() {
        let rules = shared(Rules::default());
        let factory = Cors::new(rules.clone());
        let data = map(&[
            ("cors-allow-origin", "https://example.com"),
            ("cors-allow-method", "GET, POST"),
            ("cors-max-age", "10m"),
        ]);

        for key in [
            "cors-allow-origin",
            "cors-allow-method",
            "cors-allow-headers",
            "cors-max-age",
        ] {
            factory
                .annotation(key)
                .process(&store(), &[&data])
                .expect("should parse");
        }

        assert_eq!(rules.borrow().len(), 1);
        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("Access-Control-Allow-Origin \"https://example.com\""));
        assert!(out.contains("Access-Control-Allow-Methods \"GET, POST\""));
        assert!(out.contains("Access-Control-Max-Age 600"));
    }

    #[test]
    fn test_request_capture_default_length() {
        let rules = shared(Rules::default());
        let factory = ReqCapture::new(rules.clone());
        let data = map(&[("request-capture", "hdr(User-Agent)")]);

        factory
            .annotation("request-capture")
            .process(&store(), &[&data])
            .expect("should parse");
        factory
            .annotation("request-capture-len")
            .process(&store(), &[&data])
            .expect("default length applies");

        let mut out = String::new();
        rules.borrow().render(&mut out);
        assert!(out.contains("http-request capture hdr(User-Agent) len 128"));
    }
}
