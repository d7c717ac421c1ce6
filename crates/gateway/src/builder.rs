use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::task::TaskTracker;

use ferry_provider::{DynCredentialValidator, DynDeliverer, DynFetcher};
use ferry_state::StateStore;

use crate::error::GatewayError;
use crate::jobs::JobStore;
use crate::metrics::OrchestratorMetrics;
use crate::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorInner};
use crate::sessions::{SessionConfig, SessionManager};
use crate::staging::StagingArea;
use crate::transfer::{DeliveryGateway, RetrievalGateway, TransferConfig};

/// Fluent builder for constructing an [`Orchestrator`].
///
/// At minimum, a [`StateStore`], a fetch capability, and a delivery
/// capability must be supplied. All other fields have sensible defaults
/// (default limiter/breaker/retry settings, sequential item processing,
/// a staging directory under the system temp dir, no credential
/// validator).
pub struct OrchestratorBuilder {
    state: Option<Arc<dyn StateStore>>,
    fetcher: Option<Arc<dyn DynFetcher>>,
    deliverer: Option<Arc<dyn DynDeliverer>>,
    validator: Option<Arc<dyn DynCredentialValidator>>,
    staging_root: Option<PathBuf>,
    retrieval_config: TransferConfig,
    delivery_config: TransferConfig,
    session_config: SessionConfig,
    orchestrator_config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    /// Create a new builder with all optional fields set to their defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: None,
            fetcher: None,
            deliverer: None,
            validator: None,
            staging_root: None,
            retrieval_config: TransferConfig::default(),
            delivery_config: TransferConfig::default(),
            session_config: SessionConfig::default(),
            orchestrator_config: OrchestratorConfig::default(),
        }
    }

    /// Set the state store implementation.
    #[must_use]
    pub fn state(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Set the content fetch capability.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn DynFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Set the delivery capability.
    #[must_use]
    pub fn deliverer(mut self, deliverer: Arc<dyn DynDeliverer>) -> Self {
        self.deliverer = Some(deliverer);
        self
    }

    /// Set the credential validation capability.
    ///
    /// Without one, session submission and selection still work but
    /// `validate` reports a configuration error.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn DynCredentialValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set the staging directory root.
    #[must_use]
    pub fn staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    /// Set the retrieval gateway's limiter, breaker, and retry settings.
    #[must_use]
    pub fn retrieval_config(mut self, config: TransferConfig) -> Self {
        self.retrieval_config = config;
        self
    }

    /// Set the delivery gateway's limiter, breaker, and retry settings.
    #[must_use]
    pub fn delivery_config(mut self, config: TransferConfig) -> Self {
        self.delivery_config = config;
        self
    }

    /// Set the session manager configuration.
    #[must_use]
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Set the orchestrator configuration (bounded parallelism).
    #[must_use]
    pub fn orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator_config = config;
        self
    }

    /// Consume the builder and produce a configured [`Orchestrator`].
    ///
    /// Returns a [`GatewayError::Configuration`] if required components
    /// (state store, fetcher, deliverer) have not been set or any
    /// configuration fails validation.
    pub async fn build(self) -> Result<Orchestrator, GatewayError> {
        let state = self
            .state
            .ok_or_else(|| GatewayError::Configuration("state store is required".into()))?;
        let fetcher = self
            .fetcher
            .ok_or_else(|| GatewayError::Configuration("fetcher is required".into()))?;
        let deliverer = self
            .deliverer
            .ok_or_else(|| GatewayError::Configuration("deliverer is required".into()))?;

        self.orchestrator_config
            .validate()
            .map_err(GatewayError::Configuration)?;

        let staging_root = self
            .staging_root
            .unwrap_or_else(|| std::env::temp_dir().join("ferry-staging"));
        let staging = StagingArea::new(staging_root).await?;

        let retrieval = RetrievalGateway::new(fetcher, self.retrieval_config)?;
        let delivery = DeliveryGateway::new(deliverer, self.delivery_config)?;
        let metrics = Arc::new(OrchestratorMetrics::default());
        let sessions = SessionManager::new(Arc::clone(&state), self.validator, self.session_config)
            .with_metrics(Arc::clone(&metrics));

        Ok(Orchestrator {
            inner: Arc::new(OrchestratorInner {
                store: JobStore::new(state),
                sessions: Arc::new(sessions),
                retrieval,
                delivery,
                staging: Arc::new(staging),
                config: self.orchestrator_config,
                metrics,
                cancellations: DashMap::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use ferry_core::Session;
    use ferry_provider::{DeliveryReceipt, ProviderError, RemoteMedia};
    use ferry_state_memory::MemoryStateStore;

    use super::*;

    struct NullFetcher;

    #[async_trait]
    impl DynFetcher for NullFetcher {
        fn name(&self) -> &str {
            "null"
        }

        async fn resolve(
            &self,
            _reference: &str,
            _session: Option<&Session>,
        ) -> Result<Vec<RemoteMedia>, ProviderError> {
            Ok(Vec::new())
        }

        async fn fetch(
            &self,
            _media: &RemoteMedia,
            _session: Option<&Session>,
        ) -> Result<Bytes, ProviderError> {
            Ok(Bytes::new())
        }
    }

    struct NullDeliverer;

    #[async_trait]
    impl DynDeliverer for NullDeliverer {
        fn name(&self) -> &str {
            "null"
        }

        async fn deliver(
            &self,
            _destination: &str,
            _media: &RemoteMedia,
            _content: Bytes,
            _caption: Option<&str>,
        ) -> Result<DeliveryReceipt, ProviderError> {
            Ok(DeliveryReceipt::new("m"))
        }
    }

    #[tokio::test]
    async fn build_missing_state_returns_error() {
        let result = OrchestratorBuilder::new()
            .fetcher(Arc::new(NullFetcher))
            .deliverer(Arc::new(NullDeliverer))
            .build()
            .await;
        let err = result.err().expect("build should fail");
        assert!(err.to_string().contains("state store is required"));
    }

    #[tokio::test]
    async fn build_missing_fetcher_returns_error() {
        let result = OrchestratorBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .deliverer(Arc::new(NullDeliverer))
            .build()
            .await;
        let err = result.err().expect("build should fail");
        assert!(err.to_string().contains("fetcher is required"));
    }

    #[tokio::test]
    async fn build_missing_deliverer_returns_error() {
        let result = OrchestratorBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .fetcher(Arc::new(NullFetcher))
            .build()
            .await;
        let err = result.err().expect("build should fail");
        assert!(err.to_string().contains("deliverer is required"));
    }

    #[tokio::test]
    async fn build_with_required_fields_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let result = OrchestratorBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .fetcher(Arc::new(NullFetcher))
            .deliverer(Arc::new(NullDeliverer))
            .staging_root(dir.path().join("staging"))
            .build()
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn build_rejects_invalid_parallelism() {
        let dir = tempfile::tempdir().unwrap();
        let result = OrchestratorBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .fetcher(Arc::new(NullFetcher))
            .deliverer(Arc::new(NullDeliverer))
            .staging_root(dir.path().join("staging"))
            .orchestrator_config(OrchestratorConfig { max_in_flight: 0 })
            .build()
            .await;
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }
}
