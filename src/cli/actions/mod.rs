pub mod client;
pub mod server;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    RegisterClient(client::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
            Self::RegisterClient(args) => client::execute(args).await,
        }
    }
}
