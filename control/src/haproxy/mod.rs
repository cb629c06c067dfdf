//! HAProxy configuration generation
//!
//! The builder walks the store and renders a line-oriented configuration
//! document: global, defaults, frontends, backends (plus userlists when
//! basic-auth is in play). The validator writes candidates to a temp file and
//! runs `haproxy -c` before anything reaches the proxy-control collaborator.

mod builder;
pub mod models;
pub mod rules;
mod validator;

pub use builder::Builder;
pub use validator::{ConfigPublisher, HaproxyPublisher, PublishOutcome, Reload, Validator};
