//! Tracing subscriber setup for the `pmp` binary.

use tracing_subscriber::EnvFilter;

/// Initialize tracing from the `-v` count: none warn, `-v` info, `-vv`
/// debug, `-vvv` trace. `RUST_LOG` overrides the flag when set.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("pcmdi_metrics={level},pmp={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(default_directive(0), "pcmdi_metrics=warn,pmp=warn");
        assert_eq!(default_directive(2), "pcmdi_metrics=debug,pmp=debug");
        assert_eq!(default_directive(9), "pcmdi_metrics=trace,pmp=trace");
    }
}
