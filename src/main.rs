//! # AppLaunch demo
//!
//! Serves a tiny TCP responder under a managed scope:
//!
//! 1. Reads `APP_*` variables into a [`ServiceConfig`](applaunch::ServiceConfig).
//! 2. Registers a [`TcpProbe`] against the responder's own address and a
//!    tracer that only logs what it instruments.
//! 3. Serves until Ctrl-C, then tears everything down.
//!
//! ```bash
//! APP_SERVICE_NAME=demo APP_PORT=8000 RUST_LOG=info cargo run
//! ```

use applaunch::error::{ApplicationError, ServiceError};
use applaunch::logging::setup_tracing_for;
use applaunch::probes::TcpProbe;
use applaunch::service::{InitContext, Service, ServedApp, TracerService};
use applaunch::table::TableManager;
use applaunch::{ApplicationManager, InitFlags, ServiceEnv, Startup};
use async_trait::async_trait;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Answers every connection with a fixed line and closes it.
struct Responder {
    name: String,
    listener: Mutex<Option<TcpListener>>,
    instrumentation: Mutex<Vec<String>>,
}

impl Responder {
    /// Binds up front so the health probe sees a listening socket during startup.
    async fn bind(name: &str, host: &str, port: u16) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Arc::new(Self {
            name: name.to_string(),
            listener: Mutex::new(Some(listener)),
            instrumentation: Mutex::new(Vec::new()),
        }))
    }
}

#[async_trait]
impl ServedApp for Responder {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach_instrumentation(&self, label: &str) {
        self.instrumentation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(label.to_string());
    }

    fn detach_instrumentation(&self, label: &str) {
        self.instrumentation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| l != label);
    }

    async fn serve(&self, host: &str, port: u16, reload: bool) -> Result<(), ServiceError> {
        let bound = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        let listener = match bound {
            Some(listener) => listener,
            None => TcpListener::bind((host, port)).await?,
        };
        info!(address = %listener.local_addr()?, reload, "Listening");

        loop {
            let (mut socket, peer) = listener.accept().await?;
            let traced = self
                .instrumentation
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .join(",");
            debug!(%peer, tracers = %traced, "Connection");
            let reply = format!("{} ok\n", self.name);
            tokio::spawn(async move {
                if let Err(e) = socket.write_all(reply.as_bytes()).await {
                    warn!(%peer, error = %e, "Write failed");
                }
            });
        }
    }
}

/// Tracer that only logs arm/disarm.
struct LogTracer;

impl Service for LogTracer {
    fn service_name(&self) -> &str {
        "log-tracer"
    }

    fn as_tracer(self: Arc<Self>) -> Option<Arc<dyn TracerService>> {
        Some(self)
    }
}

#[async_trait]
impl TracerService for LogTracer {
    async fn arm(&self, ctx: &InitContext) -> Result<(), ServiceError> {
        ctx.app().attach_instrumentation(self.service_name());
        info!(app = ctx.app().name(), "Tracing armed");
        Ok(())
    }

    async fn disarm(&self) -> Result<(), ServiceError> {
        info!("Tracing disarmed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServiceEnv::load()?;
    setup_tracing_for(&config)?;

    let responder = Responder::bind(config.service_name(), config.host(), config.port()).await?;
    let mut manager = ApplicationManager::new(responder)
        .with_table(TableManager::new().with_color(std::io::stdout().is_terminal()));
    manager.add_service(Arc::new(TcpProbe::new("self", config.host(), config.port())))?;
    manager.add_service(Arc::new(LogTracer))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            on_signal.cancel();
        }
    });

    let startup = Startup::new(config, InitFlags::new(true, true, false));
    let outcome = manager
        .scope(Some(startup), &cancel, |app| Box::pin(async move { app.serve().await }))
        .await;

    match outcome {
        Ok(()) | Err(ApplicationError::Cancelled) => {
            info!("Stopped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
