use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall face-recognition attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld HTTP API.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a class in the identity gallery
    CreateClass {
        /// Class name (e.g., "CS101")
        name: String,
    },
    /// Enroll a face image for a student
    Enroll {
        /// Class the student belongs to
        #[arg(short, long)]
        class: String,
        /// Student id within the class
        #[arg(short, long)]
        id: String,
        /// Path to the face image
        image: PathBuf,
    },
    /// Recognize enrolled identities in a group photo
    Recognize {
        /// Class whose gallery is searched
        #[arg(short, long)]
        class: String,
        /// Path to the group photo
        photo: PathBuf,
        /// Save the annotated photo here after recognition
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Download an annotated photo by name or server path
    Download {
        /// Output name as returned by recognize (bare name or /api/annotated/... path)
        name: String,
        /// Where to save the downloaded image
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::CreateClass { name } => {
            let response = client
                .post(format!("{}/api/classes", cli.server))
                .json(&serde_json::json!({ "class_name": name }))
                .send()
                .await
                .context("cannot reach rollcalld")?;
            print_response(response).await?;
        }
        Commands::Enroll { class, id, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("cannot read {}", image.display()))?;
            let form = reqwest::multipart::Form::new()
                .text("class_name", class)
                .text("id", id)
                .part(
                    "image",
                    reqwest::multipart::Part::bytes(bytes).file_name(
                        image
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| "image".to_string()),
                    ),
                );
            let response = client
                .post(format!("{}/api/enroll", cli.server))
                .multipart(form)
                .send()
                .await
                .context("cannot reach rollcalld")?;
            print_response(response).await?;
        }
        Commands::Recognize { class, photo, out } => {
            let bytes = std::fs::read(&photo)
                .with_context(|| format!("cannot read {}", photo.display()))?;
            let form = reqwest::multipart::Form::new()
                .text("class_name", class)
                .part("image", reqwest::multipart::Part::bytes(bytes).file_name("photo"));
            let response = client
                .post(format!("{}/api/recognize", cli.server))
                .multipart(form)
                .send()
                .await
                .context("cannot reach rollcalld")?;

            let status = response.status();
            let body: serde_json::Value = response
                .json()
                .await
                .context("rollcalld returned a non-JSON body")?;
            println!("{status}");
            println!("{}", serde_json::to_string_pretty(&body)?);

            if let (Some(out), Some(path)) = (
                out,
                body.get("annotated_image_path").and_then(|v| v.as_str()),
            ) {
                fetch_annotated(&client, &cli.server, path, &out).await?;
                println!("annotated photo saved to {}", out.display());
            }
        }
        Commands::Download { name, out } => {
            let path = if name.starts_with('/') {
                name
            } else {
                format!("/api/annotated/{name}")
            };
            fetch_annotated(&client, &cli.server, &path, &out).await?;
            println!("saved to {}", out.display());
        }
    }

    Ok(())
}

async fn fetch_annotated(
    client: &reqwest::Client,
    server: &str,
    path: &str,
    out: &PathBuf,
) -> Result<()> {
    let response = client
        .get(format!("{server}{path}"))
        .send()
        .await
        .context("cannot reach rollcalld")?;
    if !response.status().is_success() {
        anyhow::bail!("download failed: {}", response.status());
    }
    let bytes = response.bytes().await?;
    std::fs::write(out, &bytes).with_context(|| format!("cannot write {}", out.display()))?;
    Ok(())
}

async fn print_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    println!("{status}");
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}
