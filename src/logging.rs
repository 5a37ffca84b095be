use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

const LOG_CHANNEL_CAPACITY: usize = 500;

/// Tees formatted log lines to stdout and to a broadcast channel that the
/// gateway streams at `/api/logs`.
#[derive(Clone)]
pub(crate) struct LogMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for LogMakeWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct LogWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).trim_end().to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Parses a `log_level` value, falling back to INFO for anything unknown.
pub(crate) fn parse_level(raw: &str) -> Level {
    raw.trim().parse().unwrap_or(Level::INFO)
}

/// Installs the global subscriber and returns the sender feeding `/api/logs`.
pub(crate) fn init(level: Level, suppress_stdout: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
    let make_writer = LogMakeWriter {
        sender: log_tx.clone(),
        suppress_stdout,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Already set in tests
    log_tx
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn writer_broadcasts_trimmed_lines() {
        let (tx, mut rx) = broadcast::channel(4);
        let make = LogMakeWriter {
            sender: tx,
            suppress_stdout: true,
        };
        let mut writer = make.make_writer();
        writer.write_all(b"INFO runway: started\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "INFO runway: started");
    }

    #[test]
    fn writer_without_receivers_still_succeeds() {
        let (tx, rx) = broadcast::channel::<String>(4);
        drop(rx);
        let make = LogMakeWriter {
            sender: tx,
            suppress_stdout: true,
        };
        assert_eq!(make.make_writer().write(b"dropped").unwrap(), 7);
    }

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }
}
