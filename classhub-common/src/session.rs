use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// User/password pair presented to the Zenoh transport.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Connect to Zenoh using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    connect_with_credentials(config, None).await
}

/// Connect to Zenoh, authenticating with user/password when credentials are given.
pub async fn connect_with_credentials(
    config: &ZenohConfig,
    credentials: Option<&Credentials>,
) -> Result<Session> {
    let zenoh_config = build_config(config, credentials)?;

    tracing::debug!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        user = credentials.map(|c| c.user.as_str()),
        "Opening Zenoh session"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::debug!(zid = %session.zid(), "Zenoh session open");

    Ok(session)
}

/// Whether the session currently reaches at least one router.
///
/// Client-mode sessions lose all connectivity when this turns false.
pub async fn has_router(session: &Session) -> bool {
    session.info().routers_zid().await.next().is_some()
}

fn build_config(config: &ZenohConfig, credentials: Option<&Credentials>) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    let mode_str = match config.mode.as_str() {
        "client" | "peer" | "router" => format!("\"{}\"", config.mode),
        other => {
            return Err(Error::Config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    };

    zenoh_config
        .insert_json5("mode", &mode_str)
        .map_err(|e| Error::Config(format!("Failed to set mode: {}", e)))?;

    if !config.connect.is_empty() {
        let endpoints_json = serde_json::to_string(&config.connect)?;
        zenoh_config
            .insert_json5("connect/endpoints", &endpoints_json)
            .map_err(|e| Error::Config(format!("Failed to set connect endpoints: {}", e)))?;
    }

    if !config.listen.is_empty() {
        let endpoints_json = serde_json::to_string(&config.listen)?;
        zenoh_config
            .insert_json5("listen/endpoints", &endpoints_json)
            .map_err(|e| Error::Config(format!("Failed to set listen endpoints: {}", e)))?;
    }

    if let Some(creds) = credentials {
        let user = serde_json::to_string(&creds.user)?;
        let password = serde_json::to_string(&creds.password)?;
        zenoh_config
            .insert_json5("transport/auth/usrpwd/user", &user)
            .map_err(|e| Error::Config(format!("Failed to set auth user: {}", e)))?;
        zenoh_config
            .insert_json5("transport/auth/usrpwd/password", &password)
            .map_err(|e| Error::Config(format!("Failed to set auth password: {}", e)))?;
    }

    Ok(zenoh_config)
}
