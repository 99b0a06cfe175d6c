//! Argument and result shapes for `define` and `require`

use crate::domain::{Exports, Factory};

/// Module definition request, covering every `define` call shape
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub(crate) name: Option<String>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) factory: Factory,
}

impl ModuleSpec {
    /// An anonymous module with no dependencies
    pub fn new(factory: Factory) -> Self {
        Self {
            name: None,
            dependencies: Vec::new(),
            factory,
        }
    }

    /// A named module with no dependencies
    pub fn named(name: impl Into<String>, factory: Factory) -> Self {
        Self::new(factory).name(name)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

/// Names passed to `require`
///
/// Remembers whether the caller passed a single name so the result can be
/// handed back in the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNames {
    names: Vec<String>,
    scalar: bool,
}

impl ModuleNames {
    /// A single name
    pub fn one(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            scalar: true,
        }
    }

    /// An ordered list of names
    pub fn many<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            scalar: false,
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.names
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Shapes resolved exports to match how the names were passed
    pub(crate) fn shape(&self, mut exports: Vec<Exports>) -> Required {
        if self.scalar && exports.len() == 1 {
            Required::Single(exports.remove(0))
        } else {
            Required::Many(exports)
        }
    }
}

impl From<&str> for ModuleNames {
    fn from(name: &str) -> Self {
        Self::one(name)
    }
}

impl From<String> for ModuleNames {
    fn from(name: String) -> Self {
        Self::one(name)
    }
}

impl From<&String> for ModuleNames {
    fn from(name: &String) -> Self {
        Self::one(name.clone())
    }
}

impl From<Vec<String>> for ModuleNames {
    fn from(names: Vec<String>) -> Self {
        Self::many(names)
    }
}

impl From<Vec<&str>> for ModuleNames {
    fn from(names: Vec<&str>) -> Self {
        Self::many(names)
    }
}

impl From<&[String]> for ModuleNames {
    fn from(names: &[String]) -> Self {
        Self::many(names.iter().cloned())
    }
}

impl From<&[&str]> for ModuleNames {
    fn from(names: &[&str]) -> Self {
        Self::many(names.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for ModuleNames {
    fn from(names: [&str; N]) -> Self {
        Self::many(names)
    }
}

/// Exports returned by `require`
#[derive(Debug, Clone)]
pub enum Required {
    /// The caller passed a single name
    Single(Exports),

    /// The caller passed a list; exports follow the list order
    Many(Vec<Exports>),
}

impl Required {
    /// All exports as a slice, in request order
    pub fn as_slice(&self) -> &[Exports] {
        match self {
            Required::Single(exports) => std::slice::from_ref(exports),
            Required::Many(exports) => exports,
        }
    }

    /// The single export, if exactly one module was requested as a scalar
    pub fn single(self) -> Option<Exports> {
        match self {
            Required::Single(exports) => Some(exports),
            Required::Many(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<Exports> {
        match self {
            Required::Single(exports) => vec![exports],
            Required::Many(exports) => exports,
        }
    }
}
