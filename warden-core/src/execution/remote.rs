//! Remote transport: exec channels over one SSH session

use async_trait::async_trait;

use super::{CommandChannel, CommandOutput, ShellRequest};
use crate::error::Result;
use crate::session::RemoteSession;

pub struct RemoteChannel {
    session: RemoteSession,
}

impl RemoteChannel {
    pub fn new(session: RemoteSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl CommandChannel for RemoteChannel {
    async fn run(&mut self, request: ShellRequest) -> Result<CommandOutput> {
        self.session.exec(request).await
    }

    /// Only stderr decides over SSH
    fn strict_exit(&self) -> bool {
        false
    }

    async fn close(&mut self) -> Result<()> {
        self.session.disconnect().await
    }
}
