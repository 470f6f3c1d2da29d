use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use homeguard_media::cleanup_old_files;
use homeguardd::alert::CallAlerter;
use homeguardd::auth::hash_password;
use homeguardd::config::{AlertConfig, Config};
use homeguardd::consent::ConsentStore;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "homeguard", about = "Homeguard intrusion detection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ServerArgs {
    /// Base URL of a running homeguardd
    #[arg(long, env = "HOMEGUARD_SERVER", default_value = "http://127.0.0.1:5050")]
    server: String,
    #[arg(long, env = "APP_USERNAME", default_value = "admin")]
    username: String,
    #[arg(long, env = "HOMEGUARD_PASSWORD")]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the hex SHA-256 to use as APP_PASSWORD_HASH
    HashPassword { password: String },
    /// Register a face variation from an image file
    Register {
        #[arg(short, long)]
        name: String,
        image: PathBuf,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Run one detection on an image file
    Detect {
        image: PathBuf,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// List names from the consent records
    Names,
    /// Delete files older than the retention age
    Cleanup {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = 30)]
        days: u64,
    },
    /// Place the intruder alert call once
    TestCall,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::HashPassword { password } => {
            println!("{}", hash_password(&password));
        }
        Commands::Register { name, image, server } => {
            let client = login(&server).await?;
            let form = Form::new()
                .text("name", name)
                .part("image", image_part(&image).await?);
            post_and_print(&client, &server, "/register", form).await?;
        }
        Commands::Detect { image, server } => {
            let client = login(&server).await?;
            let form = Form::new()
                .text("mode", "run")
                .part("image", image_part(&image).await?);
            post_and_print(&client, &server, "/detect", form).await?;
        }
        Commands::Names => {
            let config = Config::from_env();
            let store = ConsentStore::open(config.consents_csv(), config.signatures_dir())?;
            let names = store.names()?;
            if names.is_empty() {
                println!("No consent records");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Cleanup { dir, days } => {
            let summary = cleanup_old_files(&dir, Duration::from_secs(days * 24 * 60 * 60));
            println!(
                "Deleted {} file(s), freed {} bytes, {} error(s)",
                summary.files_deleted, summary.bytes_freed, summary.errors
            );
        }
        Commands::TestCall => {
            let alerter = CallAlerter::new(AlertConfig::from_env())?;
            match alerter.place_call().await? {
                Some(sid) => println!("Call initiated: {sid}"),
                None => println!("Call not placed (DEV_MODE or missing Twilio settings)"),
            }
        }
    }

    Ok(())
}

/// Log in so the server's login flag is set. Redirects are not followed: a
/// redirect means success, a re-rendered form means bad credentials.
async fn login(args: &ServerArgs) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(30))
        .build()?;

    let resp = client
        .post(format!("{}/login", args.server.trim_end_matches('/')))
        .form(&[("username", args.username.as_str()), ("password", args.password.as_str())])
        .send()
        .await
        .with_context(|| format!("connecting to {}", args.server))?;

    if !resp.status().is_redirection() {
        bail!("login rejected for user {}", args.username);
    }
    Ok(client)
}

async fn image_part(path: &Path) -> Result<Part> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
    Ok(Part::bytes(data).file_name(file_name))
}

async fn post_and_print(client: &reqwest::Client, args: &ServerArgs, route: &str, form: Form) -> Result<()> {
    let resp = client
        .post(format!("{}{route}", args.server.trim_end_matches('/')))
        .multipart(form)
        .send()
        .await?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await.context("server returned non-JSON body")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if status != StatusCode::OK {
        bail!("request failed with {status}");
    }
    Ok(())
}
