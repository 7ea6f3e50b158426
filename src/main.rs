use std::rc::Rc;

use dirserve::auth::CredentialStore;
use dirserve::config::Config;
use dirserve::server::Server;
use dirserve::share::ShareHandler;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let config = Rc::new(Config::load()?);
    config.validate()?;

    let credentials: Rc<dyn CredentialStore> = config.clone();
    let handler = ShareHandler::new(Rc::clone(&config));
    let mut server = Server::bind(&config, credentials, handler)?;
    server.run()
}
