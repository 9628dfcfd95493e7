//! Process entry point: loads `RuntimeEnv`, connects the control socket,
//! and runs the A-leg audio-socket listener until the process receives a
//! shutdown signal (spec.md §6's exit-code 0 for graceful shutdown).

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voicebridge_core::{SystemClock, VoiceError};
use voicebridge_server::config::{AUDIO_WS_PORT, OUTBOUND_CONTROL_PORT};
use voicebridge_server::{AudioSocketServer, EslControlClient, RuntimeEnv};
use voicebridge_session::{RealtimeSession, SessionRegistry, UnimplementedSqlConfigProvider};
use voicebridge_transfer::PresenceCache;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        error!(%err, "voicebridge-server exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), VoiceError> {
    let env = RuntimeEnv::from_env()?;
    info!(esl_host = %env.esl_host, esl_port = env.esl_port, "voicebridge-server starting");

    if env.redis_host.is_some() {
        info!("REDIS_HOST set but the presence cache is in-process only today; ignoring");
    }

    let control = Arc::new(
        EslControlClient::connect(&env.esl_host, env.esl_port, &env.esl_password, env.bridge_host.clone()).await?,
    );

    // Tenant/secretary configuration storage is a relational store outside
    // this subsystem's scope (spec.md §1); operators wire a real
    // `ConfigProvider` implementation in, this is the documented seam.
    let config_provider = Arc::new(UnimplementedSqlConfigProvider);

    let shell = Arc::new(AudioSocketServer {
        env: env.clone(),
        control: Arc::clone(&control),
        config_provider,
        presence_cache: PresenceCache::new(Arc::new(SystemClock)),
        sessions: Arc::new(SessionRegistry::<RealtimeSession>::new()),
    });

    let listener = {
        let shell = Arc::clone(&shell);
        tokio::spawn(async move { shell.run(AUDIO_WS_PORT).await })
    };

    info!(
        audio_port = AUDIO_WS_PORT,
        outbound_control_port = OUTBOUND_CONTROL_PORT,
        "voicebridge-server ready"
    );

    tokio::select! {
        result = listener => {
            result.map_err(|e| VoiceError::Internal { detail: format!("audio socket task panicked: {e}") })??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping gracefully");
        }
    }

    Ok(())
}
