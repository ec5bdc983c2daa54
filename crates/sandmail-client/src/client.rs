//! Client entry point.

use std::{path::Path, sync::Arc};

use sandmail_core::{ClientConfig, Environment, StrategyKind};
use sandmail_crypto::{KeyAgreementProvider, MlKemProvider, SERVER_SIG_PK_SIZE};
use sandmail_proto::{CreateInboxRequest, InboxExport, ProtocolError, ServerInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{ClientError, Result},
    inbox::{Inbox, InboxParts},
    monitor::InboxMonitor,
    strategy::{DeliveryStrategy, create_strategy},
    system_env::SystemEnv,
    transport::{HttpTransport, Transport},
};

/// Options for [`SandboxClient::create_inbox`].
#[derive(Debug, Clone, Default)]
pub struct CreateInboxOptions {
    /// Lifetime in seconds; the server default when unset
    pub ttl: Option<u64>,
    /// Requested address; server-assigned when unset
    pub email_address: Option<String>,
}

/// Creates, imports and exports inboxes against one server.
///
/// All inboxes from one client share its delivery strategy, and therefore
/// one event stream or one polling timer. Must be used from within a tokio
/// runtime.
pub struct SandboxClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    env: Arc<dyn Environment>,
    provider: Arc<dyn KeyAgreementProvider>,
    strategy: Arc<dyn DeliveryStrategy>,
    disposed: CancellationToken,
}

impl SandboxClient {
    /// Build a client over explicit collaborators.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidConfig` listing every violation
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        env: Arc<dyn Environment>,
    ) -> Result<Self> {
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(ClientError::InvalidConfig(violations));
        }

        let strategy =
            create_strategy(config.strategy, &config, Arc::clone(&transport), Arc::clone(&env));
        debug!(strategy = %config.strategy, base_url = %config.base_url, "client ready");

        Ok(Self {
            config,
            transport,
            env,
            provider: Arc::new(MlKemProvider),
            strategy,
            disposed: CancellationToken::new(),
        })
    }

    /// Build a client talking HTTP to `config.base_url`.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidConfig` listing every violation
    /// - `ClientError::Transport` if the HTTP client cannot be built
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(ClientError::InvalidConfig(violations));
        }
        let transport = HttpTransport::new(&config)?;
        Self::new(config, Arc::new(transport), Arc::new(SystemEnv::new()))
    }

    /// Replace the key agreement provider used for new and imported inboxes.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn KeyAgreementProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Delivery strategy in effect.
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Server capabilities and signing key.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the request fails
    /// - `ClientError::Protocol` for an unsupported server version
    pub async fn server_info(&self) -> Result<ServerInfo> {
        self.ensure_live()?;
        Ok(self.transport.server_info().await?)
    }

    /// Whether the configured API key is accepted.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the server cannot be reached
    pub async fn check_key(&self) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.transport.check_key().await?)
    }

    /// Create an inbox with a freshly generated keypair.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the server rejects the request
    /// - `ClientError::Protocol` if the response carries a bad signing key
    pub async fn create_inbox(&self, options: CreateInboxOptions) -> Result<Inbox> {
        self.ensure_live()?;
        let keypair = self.provider.generate_keypair(self.env.random_seed());
        let request = CreateInboxRequest {
            client_kem_pk: keypair.public_key().to_vec(),
            ttl: options.ttl,
            email_address: options.email_address,
        };

        let identity = self.transport.create_inbox(&request).await?.into_identity();
        if identity.server_sig_pk.len() != SERVER_SIG_PK_SIZE {
            return Err(ProtocolError::Malformed {
                field: "serverSigPk",
                reason: format!(
                    "expected {SERVER_SIG_PK_SIZE} bytes, got {}",
                    identity.server_sig_pk.len()
                ),
            }
            .into());
        }

        info!(inbox = %identity.inbox_hash, address = %identity.email_address, "inbox created");
        Ok(Inbox::new(identity, keypair, self.parts()))
    }

    /// Restore an exported inbox.
    ///
    /// Structure and expiry are checked before anything goes over the
    /// network; the server is then asked whether the inbox still exists.
    ///
    /// # Errors
    ///
    /// - `ClientError::Protocol` for a bad version, `encrypted: false` or
    ///   wrong key sizes
    /// - `ClientError::ExpiredInbox` if `expires_at` has passed
    /// - `ClientError::Transport` if the server no longer knows the inbox
    pub async fn import_inbox(&self, export: &InboxExport) -> Result<Inbox> {
        self.ensure_live()?;
        export.validate()?;
        let identity = export.identity();
        if identity.is_expired(self.env.wall_clock()) {
            return Err(ClientError::ExpiredInbox {
                inbox_hash: identity.inbox_hash,
                expired_at: identity.expires_at,
            });
        }
        let keypair = export.keypair()?;

        self.transport.sync_state(&identity.inbox_hash).await?;

        info!(inbox = %identity.inbox_hash, "inbox imported");
        Ok(Inbox::new(identity, keypair, self.parts()))
    }

    /// Restore an inbox from export JSON.
    ///
    /// # Errors
    ///
    /// See [`SandboxClient::import_inbox`]; unparseable JSON is
    /// `ClientError::Protocol`.
    pub async fn import_inbox_json(&self, json: &str) -> Result<Inbox> {
        let export = InboxExport::from_json(json)?;
        self.import_inbox(&export).await
    }

    /// Restore an inbox from an export file.
    ///
    /// # Errors
    ///
    /// - `ClientError::Io` if the file cannot be read
    /// - otherwise see [`SandboxClient::import_inbox_json`]
    pub async fn import_inbox_from_file(&self, path: impl AsRef<Path>) -> Result<Inbox> {
        let json = tokio::fs::read_to_string(path).await?;
        self.import_inbox_json(&json).await
    }

    /// Export an inbox, including its secret key.
    pub fn export_inbox(&self, inbox: &Inbox) -> InboxExport {
        inbox.export()
    }

    /// Write an inbox export to `path` as JSON.
    ///
    /// # Errors
    ///
    /// - `ClientError::Io` if the file cannot be written
    pub async fn export_inbox_to_file(&self, inbox: &Inbox, path: impl AsRef<Path>) -> Result<()> {
        let json = inbox.export().to_json()?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Watch several inboxes at once.
    pub fn monitor(&self, inboxes: &[Inbox]) -> InboxMonitor {
        InboxMonitor::new(
            inboxes,
            Arc::clone(&self.env),
            self.config.default_wait_timeout,
            &self.disposed,
        )
    }

    /// Dispose every inbox and monitor from this client and stop delivery.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.disposed.is_cancelled() {
            return;
        }
        self.disposed.cancel();
        self.strategy.dispose();
        debug!("client disposed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.is_cancelled() { Err(ClientError::Disposed) } else { Ok(()) }
    }

    fn parts(&self) -> InboxParts {
        InboxParts {
            provider: Arc::clone(&self.provider),
            transport: Arc::clone(&self.transport),
            env: Arc::clone(&self.env),
            strategy: Arc::clone(&self.strategy),
            default_wait: self.config.default_wait_timeout,
            parent: self.disposed.clone(),
        }
    }
}

impl Drop for SandboxClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SandboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxClient")
            .field("config", &self.config)
            .field("strategy", &self.strategy.kind())
            .finish_non_exhaustive()
    }
}
