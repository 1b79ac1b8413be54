//! 进程内执行器

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::TransportError;
use crate::executor::CommandExecutor;
use crate::protocol::{Catalogue, CommandRequest, CommandResponse, CommandRouter};

#[derive(Clone)]
pub struct LocalExecutor {
    router: Arc<CommandRouter>,
}

impl LocalExecutor {
    pub fn new(router: Arc<CommandRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandResponse, TransportError> {
        Ok(self.router.dispatch(&request.command, request.params.clone()).await)
    }

    async fn capabilities(&self) -> Result<Catalogue, TransportError> {
        Ok(self.router.catalogue())
    }
}
