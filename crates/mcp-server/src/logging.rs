use log::{Level, Log, Metadata, Record, SetLoggerError};
use rmcp::model::{LoggingLevel, LoggingMessageNotificationParam};
use rmcp::service::{Peer, RoleServer};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;

/// Only our own crates are forwarded; dependency chatter stays on stderr.
const FORWARDED_TARGET_PREFIX: &str = "recall";

/// Forwards memory log records to the connected client as `notifications/message`.
///
/// Records are dropped until a client has initialized, and below the level the client
/// asked for with `logging/setLevel` (default `info`).
pub struct ClientLogSink {
    client: RwLock<Option<ConnectedClient>>,
    min_level: RwLock<LoggingLevel>,
}

struct ConnectedClient {
    peer: Peer<RoleServer>,
    runtime: Handle,
}

impl Default for ClientLogSink {
    fn default() -> Self {
        Self {
            client: RwLock::new(None),
            min_level: RwLock::new(LoggingLevel::Info),
        }
    }
}

impl ClientLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called from within the runtime; log calls may come from any thread.
    pub fn connect(&self, peer: Peer<RoleServer>) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        *self.client.write().unwrap_or_else(PoisonError::into_inner) =
            Some(ConnectedClient { peer, runtime });
    }

    pub fn set_level(&self, level: LoggingLevel) {
        *self.min_level.write().unwrap_or_else(PoisonError::into_inner) = level;
    }

    fn should_forward(&self, target: &str, level: LoggingLevel) -> bool {
        let min_level = *self.min_level.read().unwrap_or_else(PoisonError::into_inner);
        target.starts_with(FORWARDED_TARGET_PREFIX) && severity(level) >= severity(min_level)
    }

    fn forward(&self, record: &Record<'_>) {
        let level = client_level(record.level());
        if !self.should_forward(record.target(), level) {
            return;
        }
        let client = self.client.read().unwrap_or_else(PoisonError::into_inner);
        let Some(client) = client.as_ref() else {
            return;
        };

        let peer = client.peer.clone();
        let param = LoggingMessageNotificationParam {
            level,
            logger: Some(record.target().to_string()),
            data: serde_json::Value::String(record.args().to_string()),
        };
        client.runtime.spawn(async move {
            // Logging here would feed back into this sink.
            if let Err(err) = peer.notify_logging_message(param).await {
                eprintln!("Failed to send log message to MCP client: {err}");
            }
        });
    }
}

pub fn client_level(level: Level) -> LoggingLevel {
    match level {
        Level::Error => LoggingLevel::Error,
        Level::Warn => LoggingLevel::Warning,
        Level::Info => LoggingLevel::Info,
        Level::Debug | Level::Trace => LoggingLevel::Debug,
    }
}

fn severity(level: LoggingLevel) -> u8 {
    match level {
        LoggingLevel::Debug => 0,
        LoggingLevel::Info => 1,
        LoggingLevel::Notice => 2,
        LoggingLevel::Warning => 3,
        LoggingLevel::Error => 4,
        LoggingLevel::Critical => 5,
        LoggingLevel::Alert => 6,
        LoggingLevel::Emergency => 7,
    }
}

/// `env_logger` to stderr (stdout carries the MCP protocol), plus the client sink.
struct ServerLogger {
    stderr: env_logger::Logger,
    client: Arc<ClientLogSink>,
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.stderr.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.stderr.matches(record) {
            return;
        }
        self.stderr.log(record);
        self.client.forward(record);
    }

    fn flush(&self) {
        self.stderr.flush();
    }
}

pub fn init(client: Arc<ClientLogSink>) -> Result<(), SetLoggerError> {
    let stderr = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .build();
    let max_level = stderr.filter();
    log::set_boxed_logger(Box::new(ServerLogger { stderr, client }))?;
    log::set_max_level(max_level);
    Ok(())
}
