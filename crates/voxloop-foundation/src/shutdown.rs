use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Installs Ctrl-C handling and hands out the root cancellation token the
/// engine and its turn phases derive from.
pub struct ShutdownHandler {
    token: CancellationToken,
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub async fn install(self) -> ShutdownGuard {
        let token = self.token.clone();

        tokio::spawn(async move {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl-C handler: {}", e);
                return;
            }
            tracing::info!("Shutdown requested via Ctrl-C");
            token.cancel();
        });

        let original_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!("PANIC: {}", panic_info);
            original_panic(panic_info);
        }));

        ShutdownGuard { token: self.token }
    }
}

pub struct ShutdownGuard {
    token: CancellationToken,
}

impl ShutdownGuard {
    /// Root token; cancellation cascades into every child phase token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    pub fn request_shutdown(&self) {
        self.token.cancel();
    }
}
