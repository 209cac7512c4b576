// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact publication port.
//!
//! The deploy stage hands a built project directory to a publisher and gets
//! a preview URL back. Runtime lane selection is the caller's business (it
//! reads the agent's deploy intent); the publisher just honors it.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use wf_core::{ProjectId, VersionId};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish failed: {0}")]
    Failed(String),
}

/// Runtime lane for a published artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Static,
    Edge,
    Node,
}

impl Lane {
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Static => "static",
            Lane::Edge => "edge",
            Lane::Node => "node",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub project_id: ProjectId,
    pub version_id: VersionId,
    pub project_path: PathBuf,
    pub lane: Lane,
}

#[derive(Debug, Clone)]
pub struct PublishedSite {
    pub url: String,
    pub lane: Lane,
    pub deployment_id: String,
}

#[async_trait]
pub trait Publisher: Clone + Send + Sync + 'static {
    async fn publish(&self, request: PublishRequest) -> Result<PublishedSite, PublishError>;
}

/// Publisher that derives URLs from a base without uploading anywhere.
/// Suitable for single-host deployments serving the project tree directly.
#[derive(Clone)]
pub struct StaticSitePublisher {
    base_url: String,
}

impl StaticSitePublisher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Publisher for StaticSitePublisher {
    async fn publish(&self, request: PublishRequest) -> Result<PublishedSite, PublishError> {
        if !request.project_path.exists() {
            return Err(PublishError::Failed(format!(
                "project path missing: {}",
                request.project_path.display()
            )));
        }
        let url = format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            request.project_id,
            request.version_id
        );
        Ok(PublishedSite {
            url,
            lane: request.lane,
            deployment_id: format!("local-{}", request.version_id),
        })
    }
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Fake publisher recording requests, with an optional scripted failure.
    #[derive(Clone, Default)]
    pub struct FakePublisher {
        inner: Arc<Mutex<FakePublisherState>>,
    }

    #[derive(Default)]
    struct FakePublisherState {
        requests: Vec<PublishRequest>,
        fail_next: Option<String>,
    }

    impl FakePublisher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next(&self, message: &str) {
            self.inner.lock().fail_next = Some(message.to_string());
        }

        pub fn requests(&self) -> Vec<PublishRequest> {
            self.inner.lock().requests.clone()
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, request: PublishRequest) -> Result<PublishedSite, PublishError> {
            let mut inner = self.inner.lock();
            inner.requests.push(request.clone());
            if let Some(message) = inner.fail_next.take() {
                return Err(PublishError::Failed(message));
            }
            Ok(PublishedSite {
                url: format!(
                    "https://preview.test/{}/{}",
                    request.project_id, request.version_id
                ),
                lane: request.lane,
                deployment_id: format!("fake-{}", request.version_id),
            })
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakePublisher;

#[cfg(test)]
#[path = "publish_tests.rs"]
mod tests;
