use crate::imports::*;

/*
    Built-in IO services:
    * StdoutInteraction - Prints each message on its own line
    * CapturedOutput - Keeps messages in memory, for embedders that forward them elsewhere
*/
pub struct StdoutInteraction;

#[async_trait]
impl CommandIO for StdoutInteraction {
    async fn notify(&self, message: &str) -> Result<()> {
        println!("{message}");
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct CapturedOutput {
    messages: Arc<RwLock<Vec<String>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<String> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl CommandIO for CapturedOutput {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.write().await.push(message.to_string());
        Ok(())
    }
}
