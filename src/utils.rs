use indicatif::ProgressStyle;

/// Style of the sweep progress bar.
pub(crate) fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Installs a global subscriber printing `tracing` events to stderr, with
/// sweep progress bars drawn below them. The level is read from `RUST_LOG`
/// and defaults to `floopy=info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("floopy=info"));
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_style_builds() {
        let bar = indicatif::ProgressBar::hidden().with_style(progress_style());
        bar.inc(1);
        assert_eq!(bar.position(), 1);
    }
}
