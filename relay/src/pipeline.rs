//! Pipeline composition: ordered stages plus named stores.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_config::shared::{PipelineConfig, StageConfig};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, RelayResult};
use crate::notifications::{NotificationRx, NotificationTx, create_notification_channel};
use crate::plugins::{StagePlugins, Store};
use crate::relay_error;
use crate::stage::Stage;
use crate::watch::EventWatch;

/// A replication pipeline: an ordered list of stages connected through named
/// stores.
///
/// Stages start in order and are released in order. Watch registrations
/// delegate to the final stage, whose progress is the pipeline's overall
/// position. An external holder of the pipeline's shutdown transmitter can
/// stop all stages without borrowing the pipeline itself.
pub struct Pipeline {
    config: PipelineConfig,
    stages: Vec<Stage>,
    stores: Vec<(String, Arc<dyn Store>)>,
    notifications_tx: NotificationTx,
    notifications_rx: Option<NotificationRx>,
    shutdown_tx: ShutdownTx,
    shutdown_monitor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("stages", &self.stages)
            .field("stores", &self.stores.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    /// Creates an empty pipeline from its configuration.
    pub fn new(config: PipelineConfig) -> RelayResult<Self> {
        if let Err(err) = config.validate() {
            return Err(relay_error!(
                ErrorKind::ConfigError,
                "Invalid pipeline configuration",
                err.to_string()
            ));
        }

        let (notifications_tx, notifications_rx) = create_notification_channel();
        let (shutdown_tx, _) = create_shutdown_channel();

        Ok(Self {
            config,
            stages: Vec::new(),
            stores: Vec::new(),
            notifications_tx,
            notifications_rx: Some(notifications_rx),
            shutdown_tx,
            shutdown_monitor: None,
        })
    }

    /// Pipeline name from configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Registers a named store.
    ///
    /// Stores are prepared in registration order before stages start and
    /// released after all stages have been released.
    pub fn add_store(&mut self, name: &str, store: Arc<dyn Store>) {
        self.stores.push((name.to_string(), store));
    }

    /// Looks up a registered store by name.
    pub fn store(&self, name: &str) -> Option<&Arc<dyn Store>> {
        self.stores
            .iter()
            .find(|(store_name, _)| store_name == name)
            .map(|(_, store)| store)
    }

    /// Appends a stage built from configuration and plugin wiring.
    ///
    /// Stages execute in the order they are added.
    pub fn add_stage(
        &mut self,
        name: &str,
        config: StageConfig,
        plugins: StagePlugins,
    ) -> RelayResult<()> {
        let stage = Stage::new(name, config, plugins, self.notifications_tx.clone())?;
        self.stages.push(stage);
        Ok(())
    }

    /// Takes the receiving end of the notification channel.
    ///
    /// The owner consumes in-sequence and error notifications from here;
    /// can only be taken once.
    pub fn take_notifications(&mut self) -> Option<NotificationRx> {
        self.notifications_rx.take()
    }

    /// Returns a handle that triggers pipeline shutdown from anywhere.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Prepares stores and starts every stage in order.
    pub async fn start(&mut self) -> RelayResult<()> {
        info!(
            pipeline_id = self.config.id,
            pipeline = %self.config.name,
            "starting pipeline"
        );

        if self.stages.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Pipeline has no stages",
                format!("pipeline={}", self.config.name)
            );
        }

        for (name, store) in &self.stores {
            info!(store = %name, "preparing store");
            store.prepare().await?;
        }

        // Relay an external shutdown trigger to every stage. The monitor
        // holds detached stage handles so it can outlive this borrow.
        let controllers: Vec<_> = self.stages.iter().map(Stage::controller).collect();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        shutdown_rx.mark_unchanged();
        let monitor_span = info_span!("pipeline_shutdown_monitor", pipeline_id = self.config.id);
        let monitor = async move {
            if shutdown_rx.changed().await.is_ok() {
                info!("shutdown signal received, stopping all stages");
                for controller in &controllers {
                    controller.shutdown(true);
                }
            }
        }
        .instrument(monitor_span);
        self.shutdown_monitor = Some(tokio::spawn(monitor));

        for stage in &mut self.stages {
            stage.start()?;
        }

        Ok(())
    }

    /// Broadcasts the shutdown signal to all stages.
    pub fn shutdown(&self) {
        info!(pipeline = %self.config.name, "trying to shut down the pipeline");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!(error = %err, "failed to send shutdown signal to the pipeline");
            return;
        }

        info!("shutdown signal successfully sent to all stages");
    }

    /// Waits for every stage's workers to finish, in stage order.
    pub async fn wait(&mut self) -> RelayResult<()> {
        let mut errors = Vec::new();

        for stage in &mut self.stages {
            info!(stage = %stage.name(), "waiting for stage to complete");
            if let Err(err) = stage.wait().await {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Shuts the pipeline down and waits for all stages to stop.
    pub async fn shutdown_and_wait(&mut self) -> RelayResult<()> {
        self.shutdown();
        self.wait().await
    }

    /// Releases every stage and store, in order.
    ///
    /// Stages are shut down if still running; their pending watches resolve
    /// as cancelled so no caller is left waiting.
    pub async fn release(&mut self) -> RelayResult<()> {
        let mut errors = Vec::new();

        for stage in &mut self.stages {
            if let Err(err) = stage.release().await {
                errors.push(err);
            }
        }

        for (name, store) in &self.stores {
            info!(store = %name, "releasing store");
            if let Err(err) = store.release().await {
                errors.push(err);
            }
        }

        if let Some(monitor) = self.shutdown_monitor.take() {
            monitor.abort();
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Sets a watch for a sequence number on the final stage.
    pub fn watch_for_processed_seqno(
        &self,
        seqno: u64,
        cancel_on_match: bool,
    ) -> RelayResult<EventWatch> {
        Ok(self
            .last_stage()?
            .watch_for_processed_seqno(seqno, cancel_on_match))
    }

    /// Sets a watch for a native event id on the final stage.
    pub fn watch_for_processed_event_id(
        &self,
        event_id: &str,
        cancel_on_match: bool,
    ) -> RelayResult<EventWatch> {
        Ok(self
            .last_stage()?
            .watch_for_processed_event_id(event_id, cancel_on_match))
    }

    /// Sets a watch for the next heartbeat on the final stage.
    pub fn watch_for_processed_heartbeat(
        &self,
        name: &str,
        cancel_on_match: bool,
    ) -> RelayResult<EventWatch> {
        Ok(self
            .last_stage()?
            .watch_for_processed_heartbeat(name, cancel_on_match))
    }

    /// Sets a watch for a source commit timestamp on the final stage.
    pub fn watch_for_processed_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        cancel_on_match: bool,
    ) -> RelayResult<EventWatch> {
        Ok(self
            .last_stage()?
            .watch_for_processed_timestamp(timestamp, cancel_on_match))
    }

    /// Read access to the stages, in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn last_stage(&self) -> RelayResult<&Stage> {
        self.stages.last().ok_or_else(|| {
            relay_error!(
                ErrorKind::InvalidState,
                "Pipeline has no stages to watch",
                format!("pipeline={}", self.config.name)
            )
        })
    }
}
