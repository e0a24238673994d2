//! SHARP node implementation
//!
//! The process-level orchestrator: owns the SHARP listener, the HTTP API and the
//! scheduler loops, all sharing one [`AppContext`].

use crate::api::create_router;
use crate::context::AppContext;
use crate::network::server::Server;
use crate::scheduler::Scheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Running state of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Stopped,
    Running {
        sharp_addr: SocketAddr,
        http_addr: SocketAddr,
    },
}

/// The main SHARP node
pub struct Node {
    ctx: Arc<AppContext>,
    status: NodeStatus,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Create a new node
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            status: NodeStatus::Stopped,
            tasks: Vec::new(),
        }
    }

    pub fn context(&self) -> Arc<AppContext> {
        self.ctx.clone()
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    /// Bind both listeners and start every background task
    pub async fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.status != NodeStatus::Stopped {
            return Ok(());
        }

        let config = &self.ctx.config;

        // SHARP listener
        let server = Server::bind(&config.bind_host, config.sharp_port)
            .await?
            .with_idle_timeout(config.idle_timeout());
        let sharp_addr = server.local_addr();
        self.tasks.push(tokio::spawn(
            server.run(config.domain.clone(), self.ctx.store.clone()),
        ));

        // HTTP API
        let listener = TcpListener::bind((config.bind_host.as_str(), config.http_port())).await?;
        let http_addr = listener.local_addr()?;
        let router = create_router(self.ctx.clone());
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                log::error!("HTTP server error: {}", e);
            }
        }));
        log::info!("HTTP API listening on {}", http_addr);

        // Scheduler
        let scheduler = Scheduler::new(
            self.ctx.store.clone(),
            self.ctx.delivery.clone(),
            self.ctx.attachments.clone(),
            &config.domain,
            config.scheduler.clone(),
        );
        self.tasks.extend(Arc::new(scheduler).spawn());

        log::info!(
            "Node for {} started (SHARP {}, HTTP {})",
            config.domain,
            sharp_addr,
            http_addr
        );
        self.status = NodeStatus::Running {
            sharp_addr,
            http_addr,
        };
        Ok(())
    }

    /// Start, then serve until Ctrl-C
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.start().await?;
        tokio::signal::ctrl_c().await?;
        log::info!("Node shutting down...");
        self.shutdown();
        Ok(())
    }

    /// Stop listeners and loops. In-flight deliveries are abandoned, never half-committed.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.status = NodeStatus::Stopped;
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}
