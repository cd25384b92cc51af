//! Analysis collaborator boundary.
//!
//! The collaborator takes a local repository path and answers with generated
//! documents. Whatever shape its response has, it is normalized into a
//! [`DocumentBundle`] at this boundary.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::Result;

pub use http::HttpAnalysisClient;

/// Generated documentation: logical document name to markdown body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentBundle(BTreeMap<String, String>);

impl DocumentBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.0.insert(name.into(), body.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Documents in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DocumentBundle {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Remote code-analysis service.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Produce documents for the repository checked out at `repo_path`.
    async fn analyze(&self, repo_path: &Path) -> Result<DocumentBundle>;
}
