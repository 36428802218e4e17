use clap::{App, Arg};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wspr_beacon::config::BeaconConfig;
use wspr_beacon::gps::FastTimeSource;
use wspr_beacon::server::ControlServer;
use wspr_beacon::{
    Beacon, BeaconError, GpsTimeSource, JsonFileSettings, NmeaDecoder, NoGps, SimulatedSynthesizer, SntpClient,
    StopReason, TestPatternEncoder, TimeSyncChain, WallClock,
};

/// Exit status asking the supervisor to start the beacon again.
const EXIT_RESTART: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("wspr-beacon")
        .version("0.1.0")
        .about("WSPR beacon with GPS/SNTP time discipline and band hopping")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file"),
        )
        .get_matches();

    let path = matches.value_of("config").map(PathBuf::from);
    let config = match BeaconConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration rejected: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "WSPR beacon {} {} {} mW, control on {}",
        config.identity.callsign, config.identity.locator, config.identity.power_mw, config.control.listen_addr
    );

    let result = match config.sync.gps_device.clone() {
        Some(device) => match tokio::fs::File::open(&device).await {
            Ok(file) => {
                info!("GPS receiver on {}", device.display());
                run(&config, GpsTimeSource::new(file, NmeaDecoder::new())).await
            }
            Err(e) => {
                warn!("Cannot open GPS device {}: {}, using SNTP only", device.display(), e);
                run(&config, NoGps).await
            }
        },
        None => run(&config, NoGps).await,
    };

    match result {
        Ok(StopReason::Shutdown) => ExitCode::SUCCESS,
        Ok(StopReason::RestartRequired) => {
            info!("Restart required to apply the saved correction");
            ExitCode::from(EXIT_RESTART)
        }
        Err(e) => {
            error!("Beacon failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run<G: FastTimeSource>(config: &BeaconConfig, gps: G) -> Result<StopReason, BeaconError> {
    let chain = TimeSyncChain::new(
        config.sync.to_sync_config(),
        WallClock::from_system_time(),
        gps,
        SntpClient::new(),
    );
    let settings = JsonFileSettings::new(config.settings_path.clone());
    let mut beacon = Beacon::new(
        config,
        chain,
        SimulatedSynthesizer::new(),
        TestPatternEncoder,
        settings,
    )?;

    let server = ControlServer::bind(&config.control.listen_addr, beacon.control(), beacon.status_reader())
        .await?
        .spawn();
    if let Err(e) = beacon.boot().await {
        server.abort();
        return Err(e);
    }

    let control = beacon.control();
    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            control.request_shutdown();
        }
    });

    let reason = beacon.run().await;
    server.abort();
    signals.abort();
    Ok(reason)
}
