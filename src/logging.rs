//! JSON-lines logging on stdout.

use std::io::Write;

use log::LevelFilter;

/// Installs the global logger. One JSON object per line:
/// `{"ts":<millis>,"level":"WARN","target":"v2mgr::manager","msg":"..."}`.
///
/// Returns an error if a logger is already installed; callers that share a
/// process with tests may ignore it.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    // dependency chatter stays at info and above regardless of our level
    builder.filter_module("hyper", LevelFilter::Info);
    builder.filter_module("reqwest", LevelFilter::Info);
    builder.filter_module("rustls", LevelFilter::Warn);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{{\"ts\":{},\"level\":\"{}\",\"target\":\"{}\",\"msg\":{}}}",
            chrono::Utc::now().timestamp_millis(),
            record.level(),
            record.target(),
            serde_json::to_string(&record.args().to_string()).unwrap_or_else(|_| "\"\"".into())
        )
    });
    builder.try_init()
}
