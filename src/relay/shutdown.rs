use tokio::sync::watch;

/// Owner side of the shutdown signal.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Cloneable view of the shutdown signal, usable from async tasks and from
/// plain threads alike.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        ShutdownHandle { tx }
    }
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
    /// Resolves once shutdown has been triggered, or the handle dropped.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
