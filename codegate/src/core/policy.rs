//! Denylist of Python names, modules, attributes and literals.
//!
//! A policy is built once at startup and passed by reference to the safety
//! checker. Entries can be added on top of the defaults but never removed:
//! absence from the lists does not imply safety.

use std::collections::BTreeSet;

const FORBIDDEN_NAMES: &[&str] = &[
    "eval",
    "exec",
    "open",
    "compile",
    "__import__",
    "globals",
    "locals",
    "vars",
];

const FORBIDDEN_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "importlib",
    "pathlib",
    "shutil",
    "socket",
    "requests",
    "http",
    "urllib",
    "ftplib",
    "paramiko",
    "psutil",
];

const FORBIDDEN_ATTRIBUTES: &[&str] = &["system", "popen", "run", "remove", "unlink"];

const DYNAMIC_IMPORT_MODULES: &[&str] = &["importlib"];

/// Name of the builtins registry; any reference to it is rejected.
pub const BUILTINS_NAME: &str = "__builtins__";

/// Immutable denylist consulted by [`crate::core::safety::SafetyChecker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenPolicy {
    names: BTreeSet<String>,
    modules: BTreeSet<String>,
    attributes: BTreeSet<String>,
    dynamic_import_modules: BTreeSet<String>,
    strings: BTreeSet<String>,
}

impl Default for ForbiddenPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ForbiddenPolicy {
    /// Start from the default lists.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder {
            names: to_set(FORBIDDEN_NAMES),
            modules: to_set(FORBIDDEN_MODULES),
            attributes: to_set(FORBIDDEN_ATTRIBUTES),
            dynamic_import_modules: to_set(DYNAMIC_IMPORT_MODULES),
        }
    }

    pub fn is_forbidden_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_forbidden_module(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    /// Checks the root segment of a dotted module path (`os.path` -> `os`).
    pub fn is_forbidden_module_path(&self, path: &str) -> bool {
        let root = path.split('.').next().unwrap_or(path);
        self.is_forbidden_module(root)
    }

    pub fn is_forbidden_attribute(&self, attr: &str) -> bool {
        self.attributes.contains(attr)
    }

    pub fn is_dynamic_import_module(&self, module: &str) -> bool {
        self.dynamic_import_modules.contains(module)
    }

    /// Literal strings that spell a forbidden name or module.
    pub fn is_forbidden_string(&self, value: &str) -> bool {
        self.strings.contains(value)
    }
}

/// Extend-only builder for [`ForbiddenPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    names: BTreeSet<String>,
    modules: BTreeSet<String>,
    attributes: BTreeSet<String>,
    dynamic_import_modules: BTreeSet<String>,
}

impl PolicyBuilder {
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules.extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> ForbiddenPolicy {
        let strings = self.names.union(&self.modules).cloned().collect();
        ForbiddenPolicy {
            names: self.names,
            modules: self.modules,
            attributes: self.attributes,
            dynamic_import_modules: self.dynamic_import_modules,
            strings,
        }
    }
}

fn to_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
