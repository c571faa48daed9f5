use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::bail;
use clap::Parser;
use fake_user_agent::get_chrome_rua;
use iori_eme::{
    clearkey::{ClearKeyContainer, ClearKeySystem, CLEARKEY_KEY_SYSTEM},
    config::{PlayerConfig, DEFAULT_MIME_TYPE, DEFAULT_ROBUSTNESS},
    feeder::SegmentFeeder,
    license::HttpLicenseService,
    pipeline::SinkPipeline,
    player::{PlaybackSummary, Player},
    queue::AssetQueue,
    HttpClient,
};
use reqwest::ClientBuilder;
use tokio::io::AsyncWrite;
use tracing::level_filters::LevelFilter;
use url::Url;

type Output = Box<dyn AsyncWrite + Unpin + Send>;

#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
/// Streams a segmented asset into a file while acquiring its decryption keys.
pub struct EmePlayArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// MIME type and codec of the asset
    #[clap(long, default_value = DEFAULT_MIME_TYPE)]
    mime: String,

    /// License server the challenge is posted to
    ///
    /// Required for ClearKey, which has no public license server.
    #[clap(long, env = "EMEPLAY_LICENSE_URL")]
    license_url: Option<Url>,

    /// Key system to negotiate
    #[clap(long, default_value = CLEARKEY_KEY_SYSTEM)]
    key_system: String,

    /// Robustness requested for the audio capability
    #[clap(long, default_value = DEFAULT_ROBUSTNESS)]
    robustness: String,

    /// Output file path. Appended segments are discarded when omitted
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Cookies sent with segment and license requests
    #[clap(long)]
    cookies: Option<String>,

    /// HTTP Header sent with the license request
    ///
    /// Custom header. eg. "Authorization: Bearer xxxxx".
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Request timeout in seconds
    #[clap(long, default_value = "60")]
    timeout: u64,

    /// Segment urls in playback order, initialization segment first.
    ///
    /// Defaults to the bundled Opus sample.
    assets: Vec<Url>,
}

impl EmePlayArgs {
    fn config(&self) -> PlayerConfig {
        let mut config = PlayerConfig {
            mime_type: self.mime.clone(),
            license_url: self.license_url.clone(),
            key_system: self.key_system.clone(),
            robustness: self.robustness.clone(),
            ..Default::default()
        };
        if !self.assets.is_empty() {
            config.assets = self.assets.clone();
        }
        config
    }

    fn client(&self, config: &PlayerConfig, license_url: &Url) -> anyhow::Result<HttpClient> {
        let builder = ClientBuilder::new()
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(self.timeout));
        let client = HttpClient::new(builder)?;

        if let Some(cookies) = &self.cookies {
            let cookies: Vec<String> = cookies
                .split(';')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            for url in config.assets.iter().chain([license_url]) {
                client.add_cookies(cookies.clone(), url.clone())?;
            }
        }

        Ok(client)
    }

    async fn output(&self) -> anyhow::Result<Output> {
        Ok(match &self.output {
            Some(path) => Box::new(tokio::fs::File::create(path).await?),
            None => Box::new(tokio::io::sink()),
        })
    }
}

fn print_summary(summary: &PlaybackSummary, container: Option<Arc<ClearKeyContainer>>) {
    println!(
        "Appended {} segment(s), end of stream: {}",
        summary.segments_appended, summary.end_of_stream
    );
    if let Some(e) = &summary.feeder_error {
        println!("Feeding stopped: {e}");
    }
    if let Some(e) = &summary.key_system_error {
        println!("Key system unavailable: {e}");
    }

    for (id, state) in summary.registry.sessions() {
        match summary.registry.record(id).and_then(|r| r.failure) {
            Some((stage, reason)) => println!("Session {id}: {state:?} ({stage}: {reason})"),
            None => println!("Session {id}: {state:?}"),
        }
    }

    if let Some(container) = container {
        for key in container.keys() {
            println!("Key: {key}");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = EmePlayArgs::parse();

    let default_level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config();
    if config.key_system != CLEARKEY_KEY_SYSTEM {
        bail!(
            "Key system {} needs an external CDM, only {CLEARKEY_KEY_SYSTEM} is built in",
            config.key_system
        );
    }
    if !SinkPipeline::<Output>::is_type_supported(&config.mime_type) {
        bail!("Unsupported MIME type or codec: {}", config.mime_type);
    }

    let license_url = config.license_url()?;

    let client = args.client(&config, &license_url)?;
    let (pipeline, events) = SinkPipeline::new(args.output().await?);
    let pipeline = Arc::new(pipeline);

    let feeder = SegmentFeeder::new(
        client.clone(),
        AssetQueue::new(config.assets.clone()),
        config.mime_type.clone(),
    );
    let license = HttpLicenseService::new(client, license_url)
        .with_headers(args.headers.clone());

    let player = Player::new(
        pipeline.clone(),
        events,
        feeder,
        ClearKeySystem,
        config.key_system_configuration(),
        license,
    );
    let summary = player.play().await;
    print_summary(&summary, pipeline.key_container::<ClearKeyContainer>());

    if !summary.is_complete() {
        bail!("Playback did not complete");
    }
    Ok(())
}
