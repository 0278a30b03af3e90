use crate::{
    config::RelayConfig,
    general::{
        m_metrics_relay::MetricsRelay,
        m_poll_scheduler::PollScheduler,
        metrics::{backend::MetricsBackend, NodeIdentity},
        network::{http_handler::HttpHandler, m_nats::NatsSubscriber, m_rpc::RpcServer},
    },
    result::RelayResult,
    util::JoinHandleWrapper,
};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

pub struct Sys {
    logical_modules: Arc<LogicalModules>,
    sub_tasks: Mutex<Vec<JoinHandleWrapper>>,
}

impl Drop for Sys {
    fn drop(&mut self) {
        tracing::info!("drop sys");
    }
}

impl Sys {
    pub fn new(
        config: RelayConfig,
        node_id: NodeIdentity,
        backend: Arc<dyn MetricsBackend>,
    ) -> Sys {
        tracing::info!("data dir: {:?}", config.data_dir);
        Sys {
            logical_modules: LogicalModules::new(config, node_id, backend),
            sub_tasks: Vec::new().into(),
        }
    }

    /// Broadcasts [`BroadcastMsg::SysEnd`] to every module.
    pub fn end(&self) {
        if self.logical_modules.btx.send(BroadcastMsg::SysEnd).is_err() {
            tracing::debug!("no module listening for sys end");
        }
    }

    pub async fn start(&self) -> RelayResult<()> {
        self.logical_modules.start(self).await
    }

    /// Starts every module, waits for ctrl-c and joins the module tasks.
    pub async fn wait_for_end(&self) -> RelayResult<()> {
        self.start().await?;
        tracing::info!("modules all started, waiting for end");
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", err);
        }
        tracing::info!("shutting down");
        self.end();
        self.join_all().await;
        Ok(())
    }

    pub async fn join_all(&self) {
        for task in self.sub_tasks.lock().await.iter_mut() {
            if let Err(err) = task.join().await {
                tracing::error!("{} ended abnormally: {}", task.name(), err);
            }
        }
    }
}

#[derive(Clone)]
pub struct LogicalModuleNewArgs {
    pub logical_modules_ref: LogicalModulesRef,
    pub btx: BroadcastSender,
    pub config: RelayConfig,
    pub node_id: NodeIdentity,
    pub backend: Arc<dyn MetricsBackend>,
}

#[async_trait]
pub trait LogicalModule: Send + Sync + 'static {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized;
    async fn start(&self) -> RelayResult<Vec<JoinHandleWrapper>>;

    async fn init(&self) -> RelayResult<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum BroadcastMsg {
    SysEnd,
}

pub type BroadcastSender = tokio::sync::broadcast::Sender<BroadcastMsg>;

#[derive(Clone)]
pub struct LogicalModulesRef {
    pub inner: Weak<LogicalModules>,
}

/// Declares a view type, or adds an accessor for one module to it.
///
/// Accessors dereference the module table without upgrading; views must only
/// be used while the owning `Sys` is alive.
#[macro_export]
macro_rules! logical_module_view_impl {
    ($module:ident,$module_name:ident,$type:ty) => {
        impl $module {
            pub fn $module_name(&self) -> &$type {
                let res = unsafe { &(*self.inner.inner.as_ptr()).$module_name };

                // the module must be shareable across tasks
                let _: &dyn Send = res;
                res
            }
        }
    };
    ($module:ident) => {
        #[derive(Clone)]
        pub struct $module {
            inner: LogicalModulesRef,
        }
        impl $module {
            pub fn new(inner: LogicalModulesRef) -> Self {
                $module { inner }
            }
        }
    };
}

macro_rules! start_modules {
    ($( $module:ident,$modulety:ty ),*) => {
        pub struct LogicalModules {
            btx: BroadcastSender,
            $( pub $module : $modulety, )*
        }

        impl LogicalModules {
            pub fn new(
                config: RelayConfig,
                node_id: NodeIdentity,
                backend: Arc<dyn MetricsBackend>,
            ) -> Arc<LogicalModules> {
                let (broadcast_tx, _broadcast_rx) =
                    tokio::sync::broadcast::channel::<BroadcastMsg>(1);
                Arc::new_cyclic(|weak| {
                    let args = LogicalModuleNewArgs {
                        btx: broadcast_tx.clone(),
                        config,
                        node_id,
                        backend,
                        logical_modules_ref: LogicalModulesRef {
                            inner: weak.clone(),
                        },
                    };
                    LogicalModules {
                        btx: broadcast_tx,
                        $( $module : <$modulety>::new(args.clone()), )*
                    }
                })
            }

            pub async fn start(&self, sys: &Sys) -> RelayResult<()> {
                $(
                    self.$module.init().await?;
                )*
                $(
                    sys.sub_tasks
                        .lock()
                        .await
                        .append(&mut self.$module.start().await?);
                )*
                Ok(())
            }
        }
    };
}

start_modules!(
    metrics_relay,
    MetricsRelay,
    poll_scheduler,
    PollScheduler,
    nats_subscriber,
    NatsSubscriber,
    rpc_server,
    RpcServer,
    http_handler,
    HttpHandler
);
