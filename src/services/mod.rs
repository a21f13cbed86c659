/*
    Command services:
    * A service is a type implementing one of the service traits below.
    * CommandServices lives in the ExecutionContext and fans calls out to every registered service,
      so commands never need to know which front-end is listening.

    Only the IO service exists for now: it is how `print-query` output leaves the engine.
*/
use crate::imports::*;

pub mod io;

#[derive(Clone, Default)]
pub struct CommandServices {
    io: Vec<Arc<dyn CommandIO>>,
}

impl std::fmt::Debug for CommandServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandServices")
            .field("io_count", &self.io.len())
            .finish()
    }
}

impl CommandServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_io<T: CommandIO + 'static>(&mut self, io: T) {
        self.io.push(Arc::new(io));
    }

    pub fn with_io<T: CommandIO + 'static>(mut self, io: T) -> Self {
        self.add_io(io);
        self
    }

    // Applies to all registered IO services; every one is tried before errors are reported.
    pub async fn notify(&self, message: &str) -> Result<()> {
        let mut errors = Vec::new();
        for io in &self.io {
            if let Err(e) = io.notify(message).await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            let msg = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(anyhow::anyhow!("IO service errors: {msg}"))
        }
    }

    pub fn defaults() -> Self {
        Self::new().with_io(io::StdoutInteraction)
    }
}

#[async_trait]
pub trait CommandIO: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}
