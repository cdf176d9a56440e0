#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Panics caught during PDF extraction are reported as upload errors; keep
    // the default hook's backtrace out of the prompt.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(
            location = ?info.location(),
            "Panic: {}",
            pdf_chat_lib::documents::panic_message(info.payload())
        );
    }));

    tracing::debug!("Starting pdf-chat v{}", env!("CARGO_PKG_VERSION"));
    pdf_chat_lib::run().await
}
