//! Global and defaults section annotations (ConfigMap scope)

use tracing::debug;

use crate::annotations::{
    get_value, parse_bool, parse_time, Annotation, AnnotationError, Shared,
};
use crate::haproxy::models::{Defaults, Global, LogTarget};
use crate::store::{AnnotationMap, Store};

/// Verbatim configuration lines spliced into the global section or into one
/// of the frontends.
pub struct ConfigSnippet {
    name: &'static str,
    target: SnippetTarget,
}

enum SnippetTarget {
    Global(Shared<Global>),
    Frontend(Shared<Vec<String>>),
}

impl ConfigSnippet {
    pub fn global(name: &'static str, global: Shared<Global>) -> Self {
        Self {
            name,
            target: SnippetTarget::Global(global),
        }
    }

    pub fn frontend(name: &'static str, snippet: Shared<Vec<String>>) -> Self {
        Self {
            name,
            target: SnippetTarget::Frontend(snippet),
        }
    }
}

impl Annotation for ConfigSnippet {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let lines: Vec<String> = value.lines().map(|line| line.trim().to_string()).collect();
        match &self.target {
            SnippetTarget::Global(global) => global.borrow_mut().config_snippet = lines,
            SnippetTarget::Frontend(snippet) => *snippet.borrow_mut() = lines,
        }
        Ok(())
    }
}

/// `syslog-server`: one target per line, `key:value` pairs separated by
/// commas (`address:10.0.0.1:514, facility:local0, level:notice`).
pub struct SyslogServer {
    name: &'static str,
    global: Shared<Global>,
}

impl SyslogServer {
    pub fn new(name: &'static str, global: Shared<Global>) -> Self {
        Self { name, global }
    }
}

impl Annotation for SyslogServer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let mut targets = Vec::new();
        for line in value.lines().filter(|line| !line.trim().is_empty()) {
            let mut address = None;
            let mut facility = None;
            let mut level = None;
            for part in line.split(',') {
                let Some((key, val)) = part.trim().split_once(':') else {
                    return Err(AnnotationError::invalid(
                        self.name,
                        line,
                        "expected comma-separated key:value pairs",
                    ));
                };
                match key.trim() {
                    "address" => address = Some(val.trim().to_string()),
                    "facility" => facility = Some(val.trim().to_string()),
                    "level" => level = Some(val.trim().to_string()),
                    other => {
                        return Err(AnnotationError::invalid(
                            self.name,
                            line,
                            format!("unknown syslog parameter '{}'", other),
                        ));
                    }
                }
            }
            let (Some(address), Some(facility)) = (address, facility) else {
                return Err(AnnotationError::invalid(
                    self.name,
                    line,
                    "address and facility are required",
                ));
            };
            targets.push(LogTarget {
                address,
                facility,
                level,
            });
        }
        debug!("syslog-server: {} target(s) configured", targets.len());
        self.global.borrow_mut().syslog_servers = targets;
        Ok(())
    }
}

pub struct Nbthread {
    name: &'static str,
    global: Shared<Global>,
}

impl Nbthread {
    pub fn new(name: &'static str, global: Shared<Global>) -> Self {
        Self { name, global }
    }
}

impl Annotation for Nbthread {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let threads = value
            .parse::<i64>()
            .map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.global.borrow_mut().nbthread = Some(threads);
        Ok(())
    }
}

pub struct Maxconn {
    name: &'static str,
    global: Shared<Global>,
}

impl Maxconn {
    pub fn new(name: &'static str, global: Shared<Global>) -> Self {
        Self { name, global }
    }
}

impl Annotation for Maxconn {
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
        self.global.borrow_mut().maxconn = Some(maxconn);
        Ok(())
    }
}

pub struct HardStopAfter {
    name: &'static str,
    global: Shared<Global>,
}

impl HardStopAfter {
    pub fn new(name: &'static str, global: Shared<Global>) -> Self {
        Self { name, global }
    }
}

impl Annotation for HardStopAfter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let ms = parse_time(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.global.borrow_mut().hard_stop_after = Some(ms);
        Ok(())
    }
}

/// Boolean `option <name>` toggle on the defaults section; the annotation
/// name doubles as the option name.
pub struct OptionFlag {
    name: &'static str,
    defaults: Shared<Defaults>,
}

impl OptionFlag {
    pub fn new(name: &'static str, defaults: Shared<Defaults>) -> Self {
        Self { name, defaults }
    }
}

impl Annotation for OptionFlag {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let enabled =
            parse_bool(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        self.defaults
            .borrow_mut()
            .options
            .insert(self.name.to_string(), enabled);
        Ok(())
    }
}

/// `timeout-*` on the defaults section; the suffix after `timeout-` is the
/// haproxy timeout keyword.
pub struct TimeoutAnn {
    name: &'static str,
    defaults: Shared<Defaults>,
}

impl TimeoutAnn {
    pub fn new(name: &'static str, defaults: Shared<Defaults>) -> Self {
        Self { name, defaults }
    }
}

impl Annotation for TimeoutAnn {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        let Some(value) = get_value(self.name, maps) else {
            return Ok(());
        };
        let ms = parse_time(&value).map_err(|e| AnnotationError::invalid(self.name, &value, e))?;
        let suffix = self.name.trim_start_matches("timeout-");
        self.defaults
            .borrow_mut()
            .timeouts
            .insert(suffix.to_string(), ms);
        Ok(())
    }
}

pub struct LogFormat {
    name: &'static str,
    defaults: Shared<Defaults>,
}

impl LogFormat {
    pub fn new(name: &'static str, defaults: Shared<Defaults>) -> Self {
        Self { name, defaults }
    }
}

impl Annotation for LogFormat {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _store: &Store, maps: &[&AnnotationMap]) -> Result<(), AnnotationError> {
        if let Some(value) = get_value(self.name, maps) {
            self.defaults.borrow_mut().log_format = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::shared;
    use crate::config::NamespacePolicy;
    use std::collections::BTreeMap;

    fn store() -> Store {
        Store::new(NamespacePolicy::Default)
    }

    fn map(entries: &[(&str, &str)]) -> AnnotationMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_maxconn_sets_global() {
        let global = shared(Global::default());
        let mut handler = Maxconn::new("maxconn", global.clone());
        let data = map(&[("maxconn", "1000")]);

        handler.process(&store(), &[&data]).expect("should parse");
        assert_eq!(global.borrow().maxconn, Some(1000));
    }

    #[test]
    fn test_maxconn_parse_failure_keeps_prior_value() {
        let global = shared(Global::default());
        let mut handler = Maxconn::new("maxconn", global.clone());

        handler
            .process(&store(), &[&map(&[("maxconn", "1000")])])
            .expect("should parse");
        let err = handler
            .process(&store(), &[&map(&[("maxconn", "lots")])])
            .expect_err("should fail");

        assert!(err.to_string().contains("maxconn"));
        assert_eq!(global.borrow().maxconn, Some(1000), "prior value retained");
    }

    #[test]
    fn test_timeout_annotation_strips_prefix() {
        let defaults = shared(Defaults::default());
        let mut handler = TimeoutAnn::new("timeout-connect", defaults.clone());

        handler
            .process(&store(), &[&map(&[("timeout-connect", "5s")])])
            .expect("should parse");
        assert_eq!(defaults.borrow().timeouts.get("connect"), Some(&5000));
    }

    #[test]
    fn test_option_flag_disabled() {
        let defaults = shared(Defaults::default());
        let mut handler = OptionFlag::new("dontlognull", defaults.clone());

        handler
            .process(&store(), &[&map(&[("dontlognull", "off")])])
            .expect("should parse");
        assert_eq!(defaults.borrow().options.get("dontlognull"), Some(&false));
    }

    #[test]
    fn test_syslog_server_parsing() {
        let global = shared(Global::default());
        let mut handler = SyslogServer::new("syslog-server", global.clone());
        let data = map(&[(
            "syslog-server",
            "address:10.0.0.1:514, facility:local0, level:notice",
        )]);

        handler.process(&store(), &[&data]).expect("should parse");
        let global = global.borrow();
        assert_eq!(global.syslog_servers.len(), 1);
        assert_eq!(global.syslog_servers[0].address, "10.0.0.1:514");
        assert_eq!(global.syslog_servers[0].facility, "local0");
        assert_eq!(global.syslog_servers[0].level.as_deref(), Some("notice"));
    }

    #[test]
    fn test_syslog_server_rejects_unknown_keys() {
        let global = shared(Global::default());
        let mut handler = SyslogServer::new("syslog-server", global.clone());
        let data = map(&[("syslog-server", "address:10.0.0.1, protocol:udp")]);

        assert!(handler.process(&store(), &[&data]).is_err());
        assert!(global.borrow().syslog_servers.is_empty());
    }

    #[test]
    fn test_config_snippet_lines() {
        let global = shared(Global::default());
        let mut handler = ConfigSnippet::global("global-config-snippet", global.clone());
        let mut data = BTreeMap::new();
        data.insert(
            "global-config-snippet".to_string(),
            "tune.ssl.default-dh-param 2048\nssl-default-bind-options no-sslv3".to_string(),
        );

        handler.process(&store(), &[&data]).expect("should parse");
        assert_eq!(
            global.borrow().config_snippet,
            vec![
                "tune.ssl.default-dh-param 2048".to_string(),
                "ssl-default-bind-options no-sslv3".to_string()
            ]
        );
    }

    #[test]
    fn test_syslog_address_with_port_colon() {
        // split_once must only split on the first colon so addresses keep
        // their port.
        let global = shared(Global::default());
        let mut handler = SyslogServer::new("syslog-server", global.clone());
        let data = map(&[("syslog-server", "address:fluentd.logging:30514, facility:local1")]);

        handler.process(&store(), &[&data]).expect("should parse");
        assert_eq!(global.borrow().syslog_servers[0].address, "fluentd.logging:30514");
    }
}
