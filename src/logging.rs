//! log4rs setup for the engine
//!
//! Logging goes to stdout and, best-effort, to a file under `data/`. A
//! working directory that can't take the log file (read-only media is
//! common on constrained devices) degrades to console-only output instead
//! of refusing to start.

use log::LevelFilter;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    init_config, Config,
};

/// Appender pattern: timestamp, level, module, message
const PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S)} {h({l})} {M}] {m}{n}";

/// Log file location, relative to the working directory
pub const LOG_FILE: &str = "data/engine.log";

fn encoder() -> Box<PatternEncoder> {
    Box::new(PatternEncoder::new(PATTERN))
}

/// Routes engine logging at the given level to the console and the log
/// file. A level of `Off` leaves logging uninitialized entirely.
pub fn setup(level: LevelFilter) {
    if level == LevelFilter::Off {
        return;
    }

    let console = ConsoleAppender::builder().encoder(encoder()).build();
    let mut builder =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(console)));
    let mut appenders = vec!["stdout"];

    match FileAppender::builder().encoder(encoder()).build(LOG_FILE) {
        Ok(file) => {
            builder = builder.appender(Appender::builder().build("file", Box::new(file)));
            appenders.push("file");
        }
        Err(err) => eprintln!("File logging to {} unavailable: {}", LOG_FILE, err),
    }

    let config = builder
        .logger(
            Logger::builder()
                .appenders(appenders.iter().copied())
                .additive(false)
                .build("zclip", level),
        )
        .build(Root::builder().appenders(appenders).build(LevelFilter::Warn));

    match config {
        Ok(config) => {
            if let Err(err) = init_config(config) {
                eprintln!("Failed to install logger: {}", err);
            }
        }
        Err(err) => eprintln!("Failed to assemble logging config: {}", err),
    }
}
