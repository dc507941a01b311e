//! Stack to compiler mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which compiler artifact stages apps for each stack.
///
/// Fixed for the lifetime of a stager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompilerMapping(BTreeMap<String, String>);

impl CompilerMapping {
    /// Parse a JSON object of `{"stack": "compiler", ...}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Compiler artifact id for `stack`, if one is configured.
    pub fn compiler_for(&self, stack: &str) -> Option<&str> {
        self.0.get(stack).map(String::as_str)
    }

    pub fn stacks(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S, C> FromIterator<(S, C)> for CompilerMapping
where
    S: Into<String>,
    C: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (S, C)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(stack, compiler)| (stack.into(), compiler.into()))
                .collect(),
        )
    }
}
