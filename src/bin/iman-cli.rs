use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "iman-cli")]
#[command(about = "Management CLI for the instance manager", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "IMAN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show client status and member counts
    Status,
    /// List every tracked instance
    Instances,
    /// Show the instance owning a key on the primary ring
    Holder { key: String },
    /// Show the instances owning a key across all rings
    Holders { key: String },
    /// Register an instance in the registry
    Register { hostname: String, address: String },
    /// Deregister an instance from the registry
    Deregister { hostname: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Instances => client.get(format!("{}/admin/instances", base)),
        Commands::Holder { key } => client.get(admin_url(base, &["holder", key.as_str()])?),
        Commands::Holders { key } => client.get(admin_url(base, &["holders", key.as_str()])?),
        Commands::Register { hostname, address } => client
            .post(format!("{}/admin/instances", base))
            .json(&serde_json::json!({ "hostname": hostname, "address": address })),
        Commands::Deregister { hostname } => {
            client.delete(admin_url(base, &["instances", hostname.as_str()])?)
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await?;
    Ok(())
}

/// `<base>/admin/<segments...>` with each segment percent-encoded.
fn admin_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, Box<dyn std::error::Error>> {
    let mut url = reqwest::Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| format!("{} cannot be used as a base URL", base))?
        .pop_if_empty()
        .push("admin")
        .extend(segments);
    Ok(url)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
