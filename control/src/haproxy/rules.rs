//! Frontend rules contributed by ingress annotations
//!
//! Rules accumulate on a shared, append-only list during one generation and
//! are emitted in insertion order. The registration order of the annotation
//! handlers therefore fixes the canonical rule order: deny/allow lists come
//! before rewrites, rewrites before auth, auth before redirects, redirects
//! before captures.

use std::fmt::Write;

/// One logical frontend rule. A single rule may render to several
/// configuration lines (rate limiting, CORS).
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Deny listed networks (blacklist) or everything but them (whitelist)
    ReqDeny { networks: Vec<String>, whitelist: bool },
    /// Trust a header as the client source address
    SetSrc { header: String },
    SetHost { host: String },
    ReqPathRewrite { path_match: String, path_fmt: String },
    SetHeader {
        response: bool,
        name: String,
        value: String,
    },
    RateLimit {
        table: String,
        period_ms: i64,
        size: String,
        limit: i64,
        status_code: i64,
    },
    ReqAuth { userlist: String, realm: String },
    SslRedirect { port: i64, code: i64 },
    HostRedirect { host: String, code: i64 },
    ReqCapture { samples: Vec<String>, len: i64 },
    Cors {
        origin: String,
        methods: Option<String>,
        headers: Option<String>,
        max_age: Option<i64>,
    },
}

impl Rule {
    pub fn render(&self, out: &mut String) {
        match self {
            Rule::ReqDeny {
                networks,
                whitelist,
            } => {
                let list = networks.join(" ");
                if *whitelist {
                    let _ = writeln!(out, "    http-request deny if !{{ src {} }}", list);
                } else {
                    let _ = writeln!(out, "    http-request deny if {{ src {} }}", list);
                }
            }
            Rule::SetSrc { header } => {
                let _ = writeln!(out, "    http-request set-src req.hdr({})", header);
            }
            Rule::SetHost { host } => {
                let _ = writeln!(out, "    http-request set-header Host {}", host);
            }
            Rule::ReqPathRewrite {
                path_match,
                path_fmt,
            } => {
                let _ = writeln!(
                    out,
                    "    http-request replace-path {} {}",
                    path_match, path_fmt
                );
            }
            Rule::SetHeader {
                response,
                name,
                value,
            } => {
                let directive = if *response {
                    "http-response"
                } else {
                    "http-request"
                };
                let _ = writeln!(out, "    {} set-header {} {}", directive, name, value);
            }
            Rule::RateLimit {
                table,
                limit,
                status_code,
                ..
            } => {
                let _ = writeln!(out, "    http-request track-sc0 src table {}", table);
                let _ = writeln!(
                    out,
                    "    http-request deny deny_status {} if {{ sc0_http_req_rate({}) gt {} }}",
                    status_code, table, limit
                );
            }
            Rule::ReqAuth { userlist, realm } => {
                let _ = writeln!(
                    out,
                    "    http-request auth realm \"{}\" if !{{ http_auth({}) }}",
                    realm, userlist
                );
            }
            Rule::SslRedirect { port, code } => {
                if *port == 443 {
                    let _ = writeln!(
                        out,
                        "    http-request redirect scheme https code {} if !{{ ssl_fc }}",
                        code
                    );
                } else {
                    let _ = writeln!(
                        out,
                        "    http-request redirect location https://%[hdr(host)]:{}%[capture.req.uri] code {} if !{{ ssl_fc }}",
                        port, code
                    );
                }
            }
            Rule::HostRedirect { host, code } => {
                let _ = writeln!(
                    out,
                    "    http-request redirect prefix http://{} code {}",
                    host, code
                );
            }
            Rule::ReqCapture { samples, len } => {
                for sample in samples {
                    let _ = writeln!(out, "    http-request capture {} len {}", sample, len);
                }
            }
            Rule::Cors {
                origin,
                methods,
                headers,
                max_age,
            } => {
                let _ = writeln!(
                    out,
                    "    http-response set-header Access-Control-Allow-Origin \"{}\"",
                    origin
                );
                if let Some(methods) = methods {
                    let _ = writeln!(
                        out,
                        "    http-response set-header Access-Control-Allow-Methods \"{}\"",
                        methods
                    );
                }
                if let Some(headers) = headers {
                    let _ = writeln!(
                        out,
                        "    http-response set-header Access-Control-Allow-Headers \"{}\"",
                        headers
                    );
                }
                if let Some(max_age) = max_age {
                    let _ = writeln!(
                        out,
                        "    http-response set-header Access-Control-Max-Age {}",
                        max_age
                    );
                }
            }
        }
    }
}

/// Append-only rule list owned by the builder for one generation.
///
/// Adding an already-present rule is a no-op returning the existing slot, so
/// several ingresses requesting the same behavior render it once. Slots stay
/// valid for the whole generation which lets factory-grouped annotations
/// refine their rule in place as later keys are parsed.
#[derive(Debug, Default)]
pub struct Rules {
    list: Vec<Rule>,
}

impl Rules {
    pub fn add(&mut self, rule: Rule) -> usize {
        if let Some(slot) = self.list.iter().position(|existing| *existing == rule) {
            return slot;
        }
        self.list.push(rule);
        self.list.len() - 1
    }

    pub fn replace(&mut self, slot: usize, rule: Rule) {
        if let Some(existing) = self.list.get_mut(slot) {
            *existing = rule;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn render(&self, out: &mut String) {
        for rule in &self.list {
            rule.render(out);
        }
    }
}
