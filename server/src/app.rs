//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::api::auth::AuthGate;
use crate::api::ApiServer;
use crate::broker::{BrokerService, sweeper};
use crate::bus::MailboxBus;
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::{AppConfig, is_all_interfaces};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::runfile::RunFile;
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::StoreService;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub store: Arc<StoreService>,
    pub bus: Arc<MailboxBus>,
    pub broker: Arc<BrokerService>,
    pub gate: Arc<AuthGate>,
    /// Process-wide cancellation, fanned out to long-polls and streams
    pub cancel: CancellationToken,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        match command {
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init()?;

        let store = Arc::new(
            StoreService::init(&storage)
                .await
                .context("Failed to initialize store")?,
        );
        let bus = Arc::new(MailboxBus::new());
        let broker = Arc::new(
            BrokerService::init(Arc::clone(&store), Arc::clone(&bus), config.broker.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize broker: {}", e))?,
        );
        let gate = Arc::new(
            AuthGate::init(
                Arc::clone(&store),
                broker.broadcast_topic_id().to_string(),
            )
            .await
            .context("Failed to initialize auth gate")?,
        );

        let shutdown = ShutdownService::new(Arc::clone(&store));
        let cancel = CancellationToken::new();

        Ok(Self {
            shutdown,
            config,
            storage,
            store,
            bus,
            broker,
            gate,
            cancel,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Signal handlers first, before anything can block
        app.shutdown.install_signal_handlers();

        // Bridge the shutdown watch into the cancellation tree so
        // long-polls and streams end promptly.
        {
            let wait = app.shutdown.wait();
            let cancel = app.cancel.clone();
            tokio::spawn(async move {
                wait.await;
                cancel.cancel();
            });
        }

        app.start_background_tasks().await;

        let host = app.config.server.host.clone();
        let port = app.config.server.port;
        let display_host = if is_all_interfaces(&host) {
            "localhost".to_string()
        } else {
            host.clone()
        };
        let url = format!("http://{}:{}", display_host, port);

        // Process state files live for exactly the serving span; the guard
        // releases them on every exit path out of this scope.
        let run_file = RunFile::acquire(
            app.storage.data_dir(),
            &app.config.server.addr_display(),
            &url,
        )?;

        banner::print_banner(
            &host,
            port,
            app.gate.bootstrap_token(),
            &app.storage.data_dir().display().to_string(),
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;
        drop(run_file);

        Ok(())
    }

    async fn start_background_tasks(&self) {
        self.shutdown
            .register(self.store.start_checkpoint_task(self.shutdown.subscribe()))
            .await;

        self.shutdown
            .register(sweeper::start(
                Arc::clone(&self.store),
                Arc::clone(&self.bus),
                self.config.broker.clone(),
                self.shutdown.subscribe(),
            ))
            .await;

        tracing::debug!("Background tasks started");
    }
}
