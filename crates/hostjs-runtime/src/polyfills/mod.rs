//! Bootstrap sources evaluated in every fresh context before user code.
//!
//! Polyfills run in registration order, so a later polyfill can replace what
//! an earlier one installed. The defaults expect the native `__hostjs` binding
//! object to be present already.

use std::borrow::Cow;

/// A named piece of bootstrap source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polyfill {
    pub name: String,
    pub source: Cow<'static, str>,
}

impl Polyfill {
    pub fn new(name: impl Into<String>, source: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// `global` alias for `globalThis`.
pub fn global() -> Polyfill {
    Polyfill::new("global", include_str!("global.js"))
}

/// `console` forwarding to `tracing` under the `hostjs::guest` target.
pub fn console() -> Polyfill {
    Polyfill::new("console", include_str!("console.js"))
}

/// CommonJS `require`, `__createRequire` and `__requireResolved`.
pub fn require() -> Polyfill {
    Polyfill::new("require", include_str!("require.js"))
}

/// `Host.package(name)`.
pub fn host() -> Polyfill {
    Polyfill::new("host", include_str!("host.js"))
}

/// The polyfills every runner starts with, in evaluation order.
pub fn defaults() -> Vec<Polyfill> {
    vec![global(), console(), require(), host()]
}
