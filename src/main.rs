use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::info;

use s3gcs::client::PutObjectInput;
use s3gcs::config::{BridgeConfig, DEFAULT_ENDPOINT};
use s3gcs::credentials::{default_supplier, CredentialCache, ACCESS_TOKEN_ENV};
use s3gcs::transport::HttpTransport;
use s3gcs::utils::logging;
use s3gcs::{Pipeline, StorageClient};

#[derive(Parser)]
#[command(name = "s3gcs", version, about = "Drive a GCS bucket with S3 requests")]
struct AppCli {
    /// Bucket used by object commands
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Project sent as x-goog-project-id
    #[arg(long = "project-id", env = "GOOGLE_CLOUD_PROJECT", global = true)]
    project_id: Option<String>,

    /// Storage endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// JSON config file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use this bearer token instead of ambient credentials
    #[arg(long = "access-token", env = ACCESS_TOKEN_ENV, hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List buckets of the project
    List,
    /// Upload an object
    Put {
        key: String,
        /// Object content
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        /// Read content from a file
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value = "private")]
        acl: String,
        /// Metadata as key=value, repeatable
        #[arg(long = "meta", value_parser = parse_meta)]
        metadata: Vec<(String, String)>,
    },
    /// Download an object to stdout
    Get { key: String },
    /// Show object headers
    Head { key: String },
    /// Delete an object
    Delete { key: String },
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

fn load_config(args: &AppCli) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => Some(BridgeConfig::from_file(path)?),
        None => None,
    };
    if let Some(project) = &args.project_id {
        let endpoint = BridgeConfig::parse_endpoint(&args.endpoint)?;
        let region = config.as_ref().map(|c| c.region.clone());
        let mut cfg = BridgeConfig::new(project.clone(), endpoint)?;
        if let Some(region) = region {
            cfg = cfg.with_region(region);
        }
        config = Some(cfg);
    }
    config.context("a project id is required (--project-id, GOOGLE_CLOUD_PROJECT or --config)")
}

fn require_bucket(args: &AppCli) -> Result<&str> {
    args.bucket.as_deref().context("--bucket is required")
}

async fn run_demo(client: &StorageClient, bucket: &str) -> Result<()> {
    let buckets = client.list_buckets().await?;
    println!("{}", serde_json::to_string_pretty(&buckets)?);

    let put = client
        .put_object(PutObjectInput {
            bucket: bucket.to_string(),
            key: "/filename.txt".to_string(),
            body: Bytes::from_static(b"lorem ipsum"),
            acl: Some("private".to_string()),
            metadata: BTreeMap::from([
                ("key01".to_string(), "foo".to_string()),
                ("key02".to_string(), "bar".to_string()),
            ]),
            ..Default::default()
        })
        .await
        .context("put object")?;
    println!("put object: {}", serde_json::to_string_pretty(&put)?);

    let get = client.get_object(bucket, "/filename.txt").await.context("get object")?;
    println!("get object: {}", serde_json::to_string_pretty(&get)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    logging::init(&args.log_level);

    let config = load_config(&args)?;
    let supplier = default_supplier(args.access_token.clone()).context("resolving credentials")?;
    info!(
        project = %config.backend_identity,
        endpoint = %config.endpoint,
        credentials = supplier.name(),
        "starting"
    );

    let cache = CredentialCache::new(supplier);
    let transport = Arc::new(HttpTransport::with_timeout(Duration::from_secs(60))?);
    let client = StorageClient::new(&config, Pipeline::gcs(cache, &config), transport);

    match &args.command {
        Some(Commands::List) => {
            let out = client.list_buckets().await?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Some(Commands::Put {
            key,
            content,
            file,
            acl,
            metadata,
        }) => {
            let body = match (content, file) {
                (_, Some(path)) => Bytes::from(
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))?,
                ),
                (Some(text), None) => Bytes::from(text.clone()),
                (None, None) => Bytes::new(),
            };
            let out = client
                .put_object(PutObjectInput {
                    bucket: require_bucket(&args)?.to_string(),
                    key: key.clone(),
                    body,
                    acl: Some(acl.clone()),
                    content_type: None,
                    metadata: metadata.iter().cloned().collect(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Some(Commands::Get { key }) => {
            let out = client.get_object(require_bucket(&args)?, key).await?;
            use std::io::Write;
            std::io::stdout().write_all(&out.body)?;
        }
        Some(Commands::Head { key }) => {
            let out = client.head_object(require_bucket(&args)?, key).await?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Some(Commands::Delete { key }) => {
            client.delete_object(require_bucket(&args)?, key).await?;
            info!(key = %key, "deleted");
        }
        None => {
            // Default: the list / put / get walkthrough
            run_demo(&client, require_bucket(&args)?).await?;
        }
    }

    Ok(())
}
