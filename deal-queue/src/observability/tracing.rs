/// Install a global `fmt` subscriber honouring `RUST_LOG` (default `info`).
///
/// Intended for binaries and integration harnesses; the library never installs
/// a subscriber itself. Returns an error if a global subscriber is already set.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        fmt().with_env_filter(filter).json().with_target(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    }
}
