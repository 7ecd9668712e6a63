//! Dependency bundles: side effects applied around a task invocation
//!
//! Three kinds: shell-command bundles, package-install bundles, and generic
//! callable bundles. Each serializes to a tagged record and rehydrates from
//! it; `apply()` yields a `(function, args, kwargs)` hook triple as
//! transportables, ready to hand to an executor's call-before/call-after
//! lists.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LatticeError, Result};
use crate::transport::{CallableRef, TransportableObject};

/// Builtin callable applied by shell-command bundles
pub const SHELL_CALLABLE: &str = ":shell:";

/// Builtin callable applied by package-install bundles
pub const PACKAGE_INSTALL_CALLABLE: &str = ":package_install:";

/// A rehydrated hook: serialized `(function, args, kwargs)` triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub apply_fn: TransportableObject,
    pub apply_args: TransportableObject,
    pub apply_kwargs: TransportableObject,
}

/// Tagged union of the three dependency-bundle kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Dep {
    /// Run shell commands before the task
    DepsBash {
        #[serde(default)]
        commands: Vec<String>,
    },

    /// Install packages before the task
    DepsPip {
        #[serde(default)]
        packages: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reqs_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requirements_content: Option<String>,
    },

    /// Apply an arbitrary registered callable
    DepsCall {
        apply_fn: CallableRef,
        #[serde(default)]
        apply_args: Vec<Value>,
        #[serde(default)]
        apply_kwargs: Map<String, Value>,
    },
}

impl Dep {
    pub fn bash(commands: Vec<String>) -> Self {
        Self::DepsBash { commands }
    }

    pub fn pip(packages: Vec<String>) -> Self {
        Self::DepsPip { packages, reqs_path: None, requirements_content: None }
    }

    /// Package bundle sourced from a requirements file; the file content is
    /// captured eagerly so the bundle stays self-contained on the wire
    pub fn pip_from_requirements(packages: Vec<String>, reqs_path: impl AsRef<Path>) -> Result<Self> {
        let path = reqs_path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LatticeError::Malformed(format!("cannot read requirements {}: {e}", path.display()))
        })?;
        Ok(Self::DepsPip {
            packages,
            reqs_path: Some(path.display().to_string()),
            requirements_content: Some(content),
        })
    }

    pub fn call(apply_fn: CallableRef, apply_args: Vec<Value>, apply_kwargs: Map<String, Value>) -> Self {
        Self::DepsCall { apply_fn, apply_args, apply_kwargs }
    }

    /// Rehydrate a bundle from its tagged JSON record
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Serialize the bundle to its tagged JSON record
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Yield the hook triple this bundle applies around a task
    pub fn apply(&self) -> Result<Hook> {
        let (callable, args, kwargs): (CallableRef, Vec<Value>, Map<String, Value>) = match self {
            Self::DepsBash { commands } => (
                CallableRef::new(SHELL_CALLABLE),
                vec![serde_json::to_value(commands)?],
                Map::new(),
            ),
            Self::DepsPip { packages, requirements_content, .. } => (
                CallableRef::new(PACKAGE_INSTALL_CALLABLE),
                vec![
                    serde_json::to_value(packages)?,
                    serde_json::to_value(requirements_content)?,
                ],
                Map::new(),
            ),
            Self::DepsCall { apply_fn, apply_args, apply_kwargs } => {
                (apply_fn.clone(), apply_args.clone(), apply_kwargs.clone())
            }
        };

        Ok(Hook {
            apply_fn: TransportableObject::wrap_callable(&callable)?,
            apply_args: TransportableObject::wrap(&args)?,
            apply_kwargs: TransportableObject::wrap(&kwargs)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bash_apply() {
        let dep = Dep::bash(vec!["pip list".into(), "echo ok".into()]);
        let hook = dep.apply().unwrap();

        let callable = hook.apply_fn.materialize_callable().unwrap();
        assert_eq!(callable.name, SHELL_CALLABLE);
        let args: Vec<Value> = hook.apply_args.materialize().unwrap();
        assert_eq!(args, vec![json!(["pip list", "echo ok"])]);
        let kwargs: Map<String, Value> = hook.apply_kwargs.materialize().unwrap();
        assert!(kwargs.is_empty());
    }

    #[test]
    fn test_bash_serialize_round_trip() {
        let dep = Dep::bash(vec!["yum install gcc".into()]);
        let value = dep.to_value().unwrap();
        assert_eq!(value["type"], "DepsBash");
        let back = Dep::from_value(&value).unwrap();
        assert_eq!(back, dep);
    }

    #[test]
    fn test_pip_apply_carries_requirements() {
        let dep = Dep::DepsPip {
            packages: vec!["numpy==1.23.0".into()],
            reqs_path: None,
            requirements_content: Some("scipy\n".into()),
        };
        let hook = dep.apply().unwrap();
        let callable = hook.apply_fn.materialize_callable().unwrap();
        assert_eq!(callable.name, PACKAGE_INSTALL_CALLABLE);
        let args: Vec<Value> = hook.apply_args.materialize().unwrap();
        assert_eq!(args[0], json!(["numpy==1.23.0"]));
        assert_eq!(args[1], json!("scipy\n"));
    }

    #[test]
    fn test_pip_from_requirements_reads_eagerly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "numpy\nscipy\n").unwrap();

        let dep = Dep::pip_from_requirements(vec!["pydash==5.1.0".into()], &path).unwrap();

        match &dep {
            Dep::DepsPip { requirements_content, .. } => {
                assert_eq!(requirements_content.as_deref(), Some("numpy\nscipy\n"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_call_apply_and_round_trip() {
        let dep = Dep::call(CallableRef::new("square"), vec![json!(5)], Map::new());
        let hook = dep.apply().unwrap();
        assert_eq!(hook.apply_fn.materialize_callable().unwrap().name, "square");
        let args: Vec<Value> = hook.apply_args.materialize().unwrap();
        assert_eq!(args, vec![json!(5)]);

        let value = dep.to_value().unwrap();
        assert_eq!(value["type"], "DepsCall");
        assert_eq!(Dep::from_value(&value).unwrap(), dep);
    }

    #[test]
    fn test_malformed_record_is_rejected() {
        assert!(Dep::from_value(&json!({"type": "DepsUnknown"})).is_err());
    }
}
