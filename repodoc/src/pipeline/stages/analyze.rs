//! Analyze stage: ask the collaborator for documents, degrading on failure.
//!
//! A collaborator failure never fails the job. The stage substitutes a
//! single placeholder document explaining what went wrong, so the job still
//! completes with a downloadable bundle.

use std::time::Duration;
use tracing::{info, warn};

use super::FileInventory;
use crate::Error;
use crate::analysis::{AnalysisClient, DocumentBundle};

/// Name of the placeholder document.
pub const DEGRADED_DOCUMENT_NAME: &str = "README.md";

/// What the Analyze stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub bundle: DocumentBundle,
    /// Why the placeholder was used, when it was.
    pub degraded: Option<String>,
}

/// One-document bundle explaining an analysis failure.
pub fn degraded_bundle(reason: &str) -> DocumentBundle {
    let mut bundle = DocumentBundle::new();
    bundle.insert(
        DEGRADED_DOCUMENT_NAME,
        format!("# Analysis Failed\n\nError: {}", reason),
    );
    bundle
}

fn degrade(job_id: &str, reason: String) -> AnalysisOutcome {
    warn!(job_id = %job_id, reason = %reason, "Analysis failed, using placeholder document");
    AnalysisOutcome {
        bundle: degraded_bundle(&reason),
        degraded: Some(reason),
    }
}

/// Run the collaborator under `timeout`. Always returns a non-empty bundle.
pub async fn analyze_stage(
    client: &dyn AnalysisClient,
    job_id: &str,
    inventory: &FileInventory,
    timeout: Duration,
) -> AnalysisOutcome {
    info!(
        job_id = %job_id,
        files = inventory.files.len(),
        bytes = inventory.total_bytes,
        "Starting analysis"
    );

    let result = tokio::time::timeout(timeout, client.analyze(&inventory.root)).await;
    match result {
        Ok(Ok(bundle)) if !bundle.is_empty() => AnalysisOutcome {
            bundle,
            degraded: None,
        },
        Ok(Ok(_)) => degrade(job_id, "analysis returned no documents".to_string()),
        Ok(Err(Error::Analysis(msg))) => degrade(job_id, msg),
        Ok(Err(e)) => degrade(job_id, e.to_string()),
        Err(_) => degrade(job_id, format!("analysis timed out after {:?}", timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    struct Fixed(crate::Result<DocumentBundle>);

    #[async_trait]
    impl AnalysisClient for Fixed {
        async fn analyze(&self, _repo_path: &Path) -> crate::Result<DocumentBundle> {
            match &self.0 {
                Ok(b) => Ok(b.clone()),
                Err(e) => Err(Error::Analysis(e.to_string())),
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl AnalysisClient for Hangs {
        async fn analyze(&self, _repo_path: &Path) -> crate::Result<DocumentBundle> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(DocumentBundle::new())
        }
    }

    #[tokio::test]
    async fn success_passes_documents_through() {
        let docs: DocumentBundle = [("a.md", "x"), ("b.md", "y")].into_iter().collect();
        let outcome = analyze_stage(
            &Fixed(Ok(docs.clone())),
            "j1",
            &FileInventory::default(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome.bundle, docs);
        assert!(outcome.degraded.is_none());
    }

    #[tokio::test]
    async fn failure_degrades_to_one_document() {
        let outcome = analyze_stage(
            &Fixed(Err(Error::Analysis("Agent error (500): boom".into()))),
            "j1",
            &FileInventory::default(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome.bundle.len(), 1);
        let body = outcome.bundle.get(DEGRADED_DOCUMENT_NAME).unwrap();
        assert!(body.starts_with("# Analysis Failed\n\nError: "));
        assert!(body.contains("boom"));
        assert!(outcome.degraded.is_some());
    }

    #[tokio::test]
    async fn empty_response_degrades() {
        let outcome = analyze_stage(
            &Fixed(Ok(DocumentBundle::new())),
            "j1",
            &FileInventory::default(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome.bundle.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_degrades() {
        let outcome = analyze_stage(
            &Hangs,
            "j1",
            &FileInventory::default(),
            Duration::from_secs(300),
        )
        .await;
        assert_eq!(outcome.bundle.len(), 1);
        assert!(outcome.degraded.unwrap().contains("timed out"));
    }
}
