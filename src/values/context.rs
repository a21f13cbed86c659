use crate::imports::*;
use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;

/*
    Types:
    * ExecutionContext - Per-invocation handle: output services, the cancellation token and the
      reference time natural-language dates are resolved against. Cheap to clone.
*/
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    services: CommandServices,
    cancel_token: CancellationToken,
    reference_time: Option<DateTime<Local>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(CommandServices::defaults())
    }
}

impl ExecutionContext {
    pub fn new(services: CommandServices) -> Self {
        ExecutionContext {
            services,
            cancel_token: CancellationToken::new(),
            reference_time: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_reference_time(mut self, reference: DateTime<Local>) -> Self {
        self.reference_time = Some(reference);
        self
    }

    pub fn services(&self) -> &CommandServices {
        &self.services
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Reference time for relative dates, the wall clock unless pinned.
    pub fn reference_time(&self) -> DateTime<Local> {
        self.reference_time.unwrap_or_else(Local::now)
    }

    /// Runs `fut` to completion unless the token fires first.
    pub async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(SqlCommandError::Cancelled.into()),
            result = fut => result,
        }
    }
}
