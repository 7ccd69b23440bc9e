use std::{collections::HashMap, path::PathBuf, str::FromStr};

use thiserror::Error;

/// How to run the worker for one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub executable: PathBuf,
    /// Whether an idle worker of this protocol may be handed to a job
    /// targeting a different host or user.
    pub persistent: bool,
}

/// Maps a protocol name to its backend.
pub trait BackendResolver {
    fn resolve(&self, protocol: &str) -> Option<Backend>;
}

impl<F> BackendResolver for F
where
    F: Fn(&str) -> Option<Backend>,
{
    fn resolve(&self, protocol: &str) -> Option<Backend> {
        self(protocol)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Backend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, protocol: impl Into<String>, executable: impl Into<PathBuf>) {
        self.insert(protocol.into(), executable.into(), true);
    }

    /// Registers a protocol whose workers are only reused for the exact
    /// same host and user.
    pub fn register_stateless(
        &mut self,
        protocol: impl Into<String>,
        executable: impl Into<PathBuf>,
    ) {
        self.insert(protocol.into(), executable.into(), false);
    }

    pub fn add(&mut self, spec: BackendSpec) {
        self.backends.insert(spec.protocol, spec.backend);
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.backends.contains_key(protocol)
    }

    fn insert(&mut self, protocol: String, executable: PathBuf, persistent: bool) {
        self.backends.insert(
            protocol,
            Backend {
                executable,
                persistent,
            },
        );
    }
}

impl BackendResolver for BackendRegistry {
    fn resolve(&self, protocol: &str) -> Option<Backend> {
        self.backends.get(protocol).cloned()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendSpecError {
    #[error("expected PROTO=EXECUTABLE[:stateless], got '{0}'")]
    Syntax(String),
    #[error("invalid protocol name '{0}'")]
    Protocol(String),
}

/// One `proto=executable[:stateless]` registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub protocol: String,
    pub backend: Backend,
}

impl FromStr for BackendSpec {
    type Err = BackendSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = s
            .split_once('=')
            .ok_or_else(|| BackendSpecError::Syntax(s.to_string()))?;

        let valid_protocol = protocol.starts_with(|c: char| c.is_ascii_alphabetic())
            && protocol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
        if !valid_protocol {
            return Err(BackendSpecError::Protocol(protocol.to_string()));
        }

        let (executable, persistent) = match rest.strip_suffix(":stateless") {
            Some(executable) => (executable, false),
            None => (rest, true),
        };
        if executable.is_empty() {
            return Err(BackendSpecError::Syntax(s.to_string()));
        }

        Ok(Self {
            protocol: protocol.to_string(),
            backend: Backend {
                executable: PathBuf::from(executable),
                persistent,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves() {
        let mut registry = BackendRegistry::new();
        registry.register("file", "/usr/lib/conduit/file");
        registry.register_stateless("http", "/usr/lib/conduit/http");

        assert!(registry.resolve("file").unwrap().persistent);
        assert!(!registry.resolve("http").unwrap().persistent);
        assert!(registry.resolve("gopher").is_none());
    }

    #[test]
    fn spec_parsing() {
        let spec: BackendSpec = "ftp=/opt/ftp-worker".parse().unwrap();
        assert_eq!(spec.protocol, "ftp");
        assert_eq!(spec.backend.executable, PathBuf::from("/opt/ftp-worker"));
        assert!(spec.backend.persistent);

        let spec: BackendSpec = "http=http-worker:stateless".parse().unwrap();
        assert!(!spec.backend.persistent);
        assert_eq!(spec.backend.executable, PathBuf::from("http-worker"));
    }

    #[test]
    fn bad_specs() {
        assert!(matches!(
            "ftp".parse::<BackendSpec>(),
            Err(BackendSpecError::Syntax(_))
        ));
        assert!(matches!(
            "9p=x".parse::<BackendSpec>(),
            Err(BackendSpecError::Protocol(_))
        ));
        assert!(matches!(
            "ftp=:stateless".parse::<BackendSpec>(),
            Err(BackendSpecError::Syntax(_))
        ));
    }

    #[test]
    fn closures_resolve() {
        let resolver = |protocol: &str| {
            (protocol == "file").then(|| Backend {
                executable: "cat".into(),
                persistent: true,
            })
        };
        assert!(resolver.resolve("file").is_some());
        assert!(resolver.resolve("ftp").is_none());
    }
}
