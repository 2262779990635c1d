//! Process configuration, parsed once at startup from environment/CLI and passed by reference —
//! no global mutable config state.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "relay", about = "Trust-boundary relay between vessels and the apex API")]
pub struct Config {
    /// Address the HTTP/WS surface binds to.
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0:8088")]
    pub bind: String,

    /// Shared relay token presented by REST callers and vessel handshakes.
    #[arg(long, env = "RELAY_TOKEN")]
    pub relay_token: String,

    /// HMAC key used to verify spawn-gate artifacts. Absent => gate verifier fails closed
    /// rather than the process refusing to start, since read-only traffic
    /// should still be served.
    #[arg(long, env = "RELAY_GATE_SECRET")]
    pub gate_secret: Option<String>,

    /// Directory holding one `<worker>.gate.json` artifact per worker.
    #[arg(long, env = "RELAY_GATE_DIR", default_value = "./run/gates")]
    pub gate_dir: std::path::PathBuf,

    /// Confined executor binary invoked for local-mode spawns.
    #[arg(long, env = "RELAY_LOCAL_EXECUTOR_BIN", default_value = "relay-executor")]
    pub local_executor_bin: String,

    /// Scratch directory for per-session tool-broker config files.
    #[arg(long, env = "RELAY_LOCAL_CONFIG_DIR", default_value = "./run/local-sessions")]
    pub local_config_dir: std::path::PathBuf,

    /// Agent session timeout horizon.
    #[arg(long, env = "RELAY_SESSION_TIMEOUT_HOURS", default_value_t = 5)]
    pub session_timeout_hours: i64,

    /// Manager-role heartbeat timeout horizon.
    #[arg(long, env = "RELAY_MANAGER_TIMEOUT_HOURS", default_value_t = 5)]
    pub manager_timeout_hours: i64,

    /// Watchdog sweep cadence in seconds.
    #[arg(long, env = "RELAY_WATCHDOG_INTERVAL_SECS", default_value_t = 300)]
    pub watchdog_interval_secs: u64,

    /// Availability-snapshot write cadence in seconds.
    #[arg(long, env = "RELAY_SNAPSHOT_INTERVAL_SECS", default_value_t = 5)]
    pub snapshot_interval_secs: u64,

    /// Read-only trading-state file maintained by another process.
    #[arg(long, env = "RELAY_POSITION_STATE_PATH", default_value = "./run/position-state.json")]
    pub position_state_path: std::path::PathBuf,

    /// Atomically-written availability snapshot.
    #[arg(long, env = "RELAY_AVAILABILITY_SNAPSHOT_PATH", default_value = "./run/availability.json")]
    pub availability_snapshot_path: std::path::PathBuf,

    /// Append-only audit log.
    #[arg(long, env = "RELAY_AUDIT_LOG_PATH", default_value = "./run/audit.jsonl")]
    pub audit_log_path: std::path::PathBuf,

    /// `sqlx` connection string for the durable task store.
    #[arg(long, env = "RELAY_TASK_DATABASE_URL", default_value = "sqlite://./run/tasks.db?mode=rwc")]
    pub task_database_url: String,

    /// Base URL of the privileged backend that actually executes buys/sells/transfers.
    #[arg(long, env = "RELAY_APEX_BASE_URL", default_value = "http://127.0.0.1:9000")]
    pub apex_base_url: String,

    /// Operator notification webhook. Absent => notifications are logged and dropped.
    #[arg(long, env = "RELAY_NOTIFY_WEBHOOK_URL")]
    pub notify_webhook_url: Option<String>,
}
