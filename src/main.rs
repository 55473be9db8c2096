use anyhow::Context;
use ocr_gateway::{
    config::GatewayConfig, hashing::PasswordHasher, init_gateway, observability::init_tracing,
};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let first = args.next();

    // `ocr-gateway hash-password <password>` prints a PHC string for gateway.yaml
    if first.as_deref() == Some("hash-password") {
        let password = args
            .next()
            .context("usage: ocr-gateway hash-password <password>")?;
        println!("{}", PasswordHasher::new().hash(&password)?);
        return Ok(());
    }

    // Get config file path from command line or use default
    let config_path = first.unwrap_or_else(|| "config/gateway.yaml".to_string());

    // Load configuration
    let config = GatewayConfig::from_file(&config_path).with_context(|| {
        format!(
            "Failed to load configuration from {} (usage: ocr-gateway [config_file])",
            config_path
        )
    })?;

    init_tracing(config.logging.format)?;

    // Start the gateway
    init_gateway(config).await.context("Gateway error")?;

    Ok(())
}
