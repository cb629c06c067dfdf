//! Backend (per-service) annotations

use std::path::{Path, PathBuf};

use crate::annotations::{
    get_value, parse_bool, parse_k8s_ref, parse_time, Annotation, AnnotationError, Shared,
};
use crate::haproxy::models::Backend;
use crate::store::{AnnotationMap, Store};

const BALANCE_ALGORITHMS: &[&str] = &[
    "roundrobin",
    "static-rr",
    "leastconn",
    "first",
    "source",
    "uri",
    "url_param",
    "random",
];

pub struct AbortOnClose {
    name: &'static str,
    backend: Shared<Backend>,
}

impl AbortOnClose {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for AbortOnClose {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let enabled =
            parse_bool(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend
            .borrow_mut()
            .options
            .insert("abortonclose".to_string(), enabled);
        Ok(())
    }
}

pub struct TimeoutCheck {
    name: &'static str,
    backend: Shared<Backend>,
}

impl TimeoutCheck {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for TimeoutCheck {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let ms = parse_time(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend.borrow_mut().timeout_check = Some(ms);
        Ok(())
    }
}

pub struct LoadBalance {
    name: &'static str,
    backend: Shared<Backend>,
}

impl LoadBalance {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for LoadBalance {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let algorithm = value.trim();
        // `hdr(...)` and `rdp-cookie(...)` carry arguments, everything else
        // must match the known set.
        let known = BALANCE_ALGORITHMS.contains(&algorithm)
            || algorithm.starts_with("hdr(")
            || algorithm.starts_with("rdp-cookie(");
        if !known {
            return Err(AnnotationError::invalid(
                self.name,
                &value,
                "unknown balance algorithm",
            ));
        }
        self.backend.borrow_mut().balance = algorithm.to_string();
        Ok(())
    }
}

pub struct Check {
    name: &'static str,
    backend: Shared<Backend>,
}

impl Check {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for Check {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let enabled =
            parse_bool(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend.borrow_mut().default_server.check = enabled;
        Ok(())
    }
}

pub struct CheckInter {
    name: &'static str,
    backend: Shared<Backend>,
}

impl CheckInter {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for CheckInter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            self.backend.borrow_mut().default_server.inter = None;
            return Ok(());
        };
        let ms = parse_time(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend.borrow_mut().default_server.inter = Some(ms);
        Ok(())
    }
}

pub struct Cookie {
    name: &'static str,
    backend: Shared<Backend>,
}

impl Cookie {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for Cookie {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let cookie = value.trim();
        if cookie.contains(char::is_whitespace) {
            return Err(AnnotationError::invalid(
                self.name,
                &value,
                "cookie name must not contain whitespace",
            ));
        }
        self.backend.borrow_mut().cookie = Some(cookie.to_string());
        Ok(())
    }
}

pub struct PodMaxconn {
    name: &'static str,
    backend: Shared<Backend>,
}

impl PodMaxconn {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for PodMaxconn {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let maxconn = value
            .parse::<i64>()
            .map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend.borrow_mut().default_server.maxconn = Some(maxconn);
        Ok(())
    }
}

pub struct SendProxy {
    name: &'static str,
    backend: Shared<Backend>,
}

impl SendProxy {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for SendProxy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let enabled =
            parse_bool(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend.borrow_mut().default_server.send_proxy = enabled;
        Ok(())
    }
}

pub struct Ssl {
    name: &'static str,
    backend: Shared<Backend>,
}

impl Ssl {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for Ssl {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let enabled =
            parse_bool(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend.borrow_mut().default_server.ssl = enabled;
        Ok(())
    }
}

/// Resolve a `namespace/name` Secret reference into a PEM path under the
/// certificate directory. The store lookup verifies the secret exists;
/// materializing the file is the certificate collaborator's job.
fn secret_pem_path(
    name: &'static str,
    value: &str,
    default_namespace: &str,
    certs_dir: &Path,
    store: &Store,
) -> Result<PathBuf, AnnotationError> {
    let (ns, secret_name) =
        parse_k8s_ref(value, default_namespace).map_err(|e| AnnotationError::invalid(name, value, e))?;
    if store.secret(&ns, &secret_name).is_none() {
        return Err(AnnotationError::MissingSecret {
            name,
            namespace: ns,
            secret: secret_name,
        });
    }
    Ok(certs_dir.join(format!("{}_{}.pem", ns, secret_name)))
}

pub struct Crt {
    name: &'static str,
    backend: Shared<Backend>,
    default_namespace: String,
    certs_dir: PathBuf,
}

impl Crt {
    pub fn new(
        name: &'static str,
        backend: Shared<Backend>,
        default_namespace: &str,
        certs_dir: &Path,
    ) -> Self {
        Self {
            name,
            backend,
            default_namespace: default_namespace.to_string(),
            certs_dir: certs_dir.to_path_buf(),
        }
    }
}

impl Annotation for Crt {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let path = secret_pem_path(
            self.name,
            &value,
            &self.default_namespace,
            &self.certs_dir,
            store,
        )?;
        let mut backend = self.backend.borrow_mut();
        // A client certificate implies server-side TLS.
        backend.default_server.ssl = true;
        backend.default_server.crt = Some(path.display().to_string());
        Ok(())
    }
}

pub struct Ca {
    name: &'static str,
    backend: Shared<Backend>,
    default_namespace: String,
    certs_dir: PathBuf,
}

impl Ca {
    pub fn new(
        name: &'static str,
        backend: Shared<Backend>,
        default_namespace: &str,
        certs_dir: &Path,
    ) -> Self {
        Self {
            name,
            backend,
            default_namespace: default_namespace.to_string(),
            certs_dir: certs_dir.to_path_buf(),
        }
    }
}

impl Annotation for Ca {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let path = secret_pem_path(
            self.name,
            &value,
            &self.default_namespace,
            &self.certs_dir,
            store,
        )?;
        let mut backend = self.backend.borrow_mut();
        backend.default_server.ssl = true;
        backend.default_server.ca_file = Some(path.display().to_string());
        Ok(())
    }
}

pub struct Proto {
    name: &'static str,
    backend: Shared<Backend>,
}

impl Proto {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for Proto {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let proto = value.trim();
        if proto != "h2" && proto != "h1" {
            return Err(AnnotationError::invalid(
                self.name,
                &value,
                "supported protocols are 'h1' and 'h2'",
            ));
        }
        // h1 is the implicit default on the server line.
        self.backend.borrow_mut().default_server.proto =
            (proto == "h2").then(|| proto.to_string());
        Ok(())
    }
}

pub struct CheckHttp {
    name: &'static str,
    backend: Shared<Backend>,
}

impl CheckHttp {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for CheckHttp {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        if let Some(value) = get_value(self.name, maps) {
            self.backend.borrow_mut().check_http = Some(value);
        }
        Ok(())
    }
}

pub struct ForwardedFor {
    name: &'static str,
    backend: Shared<Backend>,
}

impl ForwardedFor {
    pub fn new(name: &'static str, backend: Shared<Backend>) -> Self {
        Self { name, backend }
    }
}

impl Annotation for ForwardedFor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let enabled =
            parse_bool(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.backend
            .borrow_mut()
            .options
            .insert("forwardedfor".to_string(), enabled);
        Ok(())
    }
}
