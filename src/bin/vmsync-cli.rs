use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "vmsync-cli")]
#[command(about = "Management and session CLI for vmsync-server", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(long, default_value = "http://localhost:8081")]
    admin_url: String,

    /// Session server base URL including the session prefix
    #[arg(long, default_value = "http://localhost:8080/vm")]
    url: String,

    /// Admin API key
    #[arg(short, long, env = "VMSYNC_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server status
    Status,
    /// Per-worker session statistics
    Sessions,
    /// Create a session and print its token
    Create,
    /// Print the full state of a session
    Get { token: String },
    /// Send a JSON-Patch document to a session
    Patch {
        token: String,
        /// Patch document, e.g. '[{"op":"replace","path":"/a","value":1}]'
        document: String,
        /// Ask for the full state instead of the response patch
        #[arg(long)]
        full: bool,
    },
    /// Destroy a session
    Delete { token: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    // The session server matches header names exactly.
    let client = reqwest::Client::builder().http1_title_case_headers().build()?;

    let mut admin_headers = HeaderMap::new();
    admin_headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", cli.key))?);

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.admin_url))
                .headers(admin_headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Sessions => {
            let res = client
                .get(format!("{}/admin/sessions", cli.admin_url))
                .headers(admin_headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Create => {
            let res = client.post(&cli.url).send().await?;
            let location = res
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            match location {
                Some(location) if res.status().is_success() => {
                    let token = location.rsplit('/').next().unwrap_or(&location);
                    println!("{}", token);
                }
                _ => print_response(res).await?,
            }
        }
        Commands::Get { token } => {
            let res = client
                .get(format!("{}/{}", cli.url, token))
                .header(ACCEPT, "application/json")
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Patch { token, document, full } => {
            let accept = if full { "application/json" } else { "application/json-patch+json" };
            let res = client
                .patch(format!("{}/{}", cli.url, token))
                .header(CONTENT_TYPE, "application/json-patch+json")
                .header(ACCEPT, accept)
                .body(document)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Delete { token } => {
            let res = client.delete(format!("{}/{}", cli.url, token)).send().await?;
            if res.status().is_success() {
                println!("deleted");
            } else {
                print_response(res).await?;
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
