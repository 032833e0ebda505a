use super::*;

#[derive(Debug, Parser)]
#[command(version, about = "Stratum proxy for the CryptoNight proof-of-work family")]
pub struct Arguments {
    #[arg(
        long,
        short = 'c',
        default_value = "config.json",
        help = "Load configuration from <CONFIG>."
    )]
    pub config: PathBuf,

    #[arg(
        long,
        short = 't',
        help = "Number of threads to be utilized (0 - automatic selection)."
    )]
    pub thread: Option<usize>,

    #[arg(
        long,
        short = 'l',
        help = "Log level (0 - off, 1 - fatal, 2 - error, 3 - info, 4 - debug, 5 - trace)."
    )]
    pub log_level: Option<u32>,
}

impl Arguments {
    pub fn run(self) -> Result {
        let mut config = Config::load(&self.config)?;

        if let Some(threads) = self.thread {
            config.threads = threads;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        init_logging(config.log_level);

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        if config.threads > 0 {
            builder.worker_threads(config.threads);
        }
        let runtime = builder.build().context("failed to build async runtime")?;

        runtime.block_on(proxy::run(config))
    }
}

pub fn log_directive(level: u32) -> &'static str {
    match level {
        0 => "off",
        1 | 2 => "error",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

fn init_logging(level: u32) {
    let filter = if env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(log_directive(level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let arguments = Arguments::try_parse_from(["cnproxy"]).unwrap();
        assert_eq!(arguments.config, PathBuf::from("config.json"));
        assert!(arguments.thread.is_none());
        assert!(arguments.log_level.is_none());
    }

    #[test]
    fn parses_short_and_long_flags() {
        let arguments =
            Arguments::try_parse_from(["cnproxy", "-c", "/etc/proxy.json", "--thread", "4"])
                .unwrap();
        assert_eq!(arguments.config, PathBuf::from("/etc/proxy.json"));
        assert_eq!(arguments.thread, Some(4));

        let arguments = Arguments::try_parse_from(["cnproxy", "-l", "5"]).unwrap();
        assert_eq!(arguments.log_level, Some(5));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(Arguments::try_parse_from(["cnproxy", "--thread", "lots"]).is_err());
        assert!(Arguments::try_parse_from(["cnproxy", "--no-such-flag"]).is_err());
    }

    #[test]
    fn log_levels_map_to_directives() {
        assert_eq!(log_directive(0), "off");
        assert_eq!(log_directive(1), "error");
        assert_eq!(log_directive(2), "error");
        assert_eq!(log_directive(3), "info");
        assert_eq!(log_directive(4), "debug");
        assert_eq!(log_directive(5), "trace");
        assert_eq!(log_directive(99), "trace");
    }
}
