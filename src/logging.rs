use env_logger::{Builder, Env, Target};
use log::{Level, Log, Record};
use std::{fmt, io::Write};
use uuid::Uuid;

/// Install panic logging and the process logger
///
/// Debug builds default to `debug`, release builds to `info`; `RUST_LOG`
/// overrides both. Errors go to stderr, everything else to stdout.
pub fn init() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();
}

/// Logging handle owned by a single setup flow
///
/// Records are forwarded to `sink` with a target naming the flow, so every
/// line a flow emits can be traced back to it.
#[derive(Clone)]
pub struct FlowLogger {
    sink: &'static dyn Log,
    target: String,
}

impl FlowLogger {
    pub fn new(sink: &'static dyn Log, flow_id: Uuid) -> Self {
        Self {
            sink,
            target: format!("{}::flow::{flow_id}", env!("CARGO_CRATE_NAME")),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let metadata = log::Metadata::builder()
            .level(level)
            .target(&self.target)
            .build();

        if !self.sink.enabled(&metadata) {
            return;
        }

        self.sink.log(
            &Record::builder()
                .level(level)
                .target(&self.target)
                .args(args)
                .build(),
        );
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }
}

impl fmt::Debug for FlowLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowLogger")
            .field("target", &self.target)
            .finish()
    }
}
