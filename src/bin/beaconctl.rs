use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use wspr_beacon::band::{BandIndex, WSPR_BANDS};
use wspr_beacon::control::Schedule;
use wspr_beacon::protocol::{Command, CommandResponse, CommandType, ResponseStatus, SettingsView};
use wspr_beacon::status::BeaconStatus;
use wspr_beacon::types::format_hhmmss;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("beaconctl")
        .version("0.1.0")
        .about("Control a running WSPR beacon")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Beacon control host")
                .default_value("127.0.0.1")
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Beacon control port")
                .default_value("8080")
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Verbose output")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("Check that the beacon answers"))
        .subcommand(SubCommand::with_name("status").about("Show the current beacon status"))
        .subcommand(SubCommand::with_name("settings").about("Show operator settings"))
        .subcommand(
            SubCommand::with_name("schedule")
                .about("Set the transmit interval in minutes")
                .arg(
                    Arg::with_name("minutes")
                        .required(true)
                        .possible_values(&["2", "4", "6", "8", "10"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("bands")
                .about("Set the enabled bands, e.g. 20m,40m or 1,3")
                .arg(
                    Arg::with_name("list")
                        .required(true)
                        .help("Comma separated band names or indices; 'none' disables all"),
                ),
        )
        .subcommand(SubCommand::with_name("interrupt").about("Abandon the pending slot or the current transmission"))
        .subcommand(
            SubCommand::with_name("calibrate")
                .about("Calibration mode")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("start")
                        .about("Enter calibration mode")
                        .arg(Arg::with_name("hz").help("Carrier frequency in Hz")),
                )
                .subcommand(
                    SubCommand::with_name("freq")
                        .about("Retune the calibration carrier")
                        .arg(Arg::with_name("hz").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("correction")
                        .about("Set the crystal correction in ppb")
                        .arg(Arg::with_name("ppb").required(true).allow_hyphen_values(true)),
                )
                .subcommand(
                    SubCommand::with_name("save")
                        .about("Persist the correction and leave calibration")
                        .arg(Arg::with_name("ppb").allow_hyphen_values(true)),
                ),
        )
        .subcommand(
            SubCommand::with_name("identity")
                .about("Change call sign, locator or power from the next slot")
                .arg(Arg::with_name("callsign").long("callsign").value_name("CALL"))
                .arg(Arg::with_name("locator").long("locator").value_name("GRID"))
                .arg(Arg::with_name("power").long("power").value_name("MW").help("Output power in mW")),
        )
        .subcommand(
            SubCommand::with_name("factory-reset")
                .about("Forget stored settings and return to the configured identity and correction"),
        )
        .subcommand(SubCommand::with_name("monitor").about("Stream status changes (Ctrl+C to stop)"))
        .subcommand(SubCommand::with_name("shutdown").about("Power down the output and stop the beacon"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or("127.0.0.1");
    let port = matches.value_of("port").unwrap_or("8080").parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    let command_type = match matches.subcommand() {
        ("ping", Some(_)) => CommandType::Ping,
        ("status", Some(_)) => CommandType::GetStatus,
        ("settings", Some(_)) => CommandType::GetSettings,
        ("schedule", Some(sub)) => {
            let minutes: u32 = sub.value_of("minutes").unwrap_or("2").parse()?;
            let schedule = Schedule::from_minutes(minutes).ok_or("unsupported interval")?;
            CommandType::SetSchedule { schedule }
        }
        ("bands", Some(sub)) => CommandType::SetBands {
            bands: parse_bands(sub.value_of("list").unwrap_or(""))?,
        },
        ("interrupt", Some(_)) => CommandType::InterruptTx,
        ("calibrate", Some(sub)) => calibration_command(sub)?,
        ("identity", Some(sub)) => CommandType::SetIdentity {
            callsign: sub.value_of("callsign").map(str::to_string),
            locator: sub.value_of("locator").map(str::to_string),
            power_mw: sub.value_of("power").map(str::parse::<u32>).transpose()?,
        },
        ("factory-reset", Some(_)) => CommandType::FactoryReset,
        ("monitor", Some(_)) => return monitor(host, port, format).await,
        ("shutdown", Some(_)) => CommandType::Shutdown,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            return Ok(());
        }
    };

    let command = Command {
        id: command_id(),
        command_type,
    };
    if verbose {
        println!("{} {}", "Sending".dimmed(), serde_json::to_string(&command)?);
    }
    let raw = send_command(host, port, &command).await?;
    print_response(&command.command_type, &raw, format)
}

fn calibration_command(matches: &ArgMatches<'_>) -> CliResult<CommandType> {
    let command = match matches.subcommand() {
        ("start", Some(sub)) => CommandType::StartCalibration {
            frequency_hz: sub.value_of("hz").map(str::parse::<u64>).transpose()?,
        },
        ("freq", Some(sub)) => CommandType::SetCalibrationFrequency {
            frequency_hz: sub.value_of("hz").unwrap_or("0").parse()?,
        },
        ("correction", Some(sub)) => CommandType::SetCorrection {
            ppb: sub.value_of("ppb").unwrap_or("0").parse()?,
        },
        ("save", Some(sub)) => CommandType::SaveCalibration {
            ppb: sub.value_of("ppb").map(str::parse::<i32>).transpose()?,
        },
        _ => return Err("calibrate subcommand required".into()),
    };
    Ok(command)
}

/// Accepts band names (`20m`) or catalog indices (`3`).
fn parse_bands(list: &str) -> CliResult<Vec<BandIndex>> {
    if list.trim().eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    let mut bands = Vec::new();
    for token in list.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        let index = WSPR_BANDS
            .iter()
            .position(|band| band.name.eq_ignore_ascii_case(token))
            .or_else(|| token.parse::<BandIndex>().ok())
            .ok_or_else(|| format!("unknown band '{}'", token))?;
        bands.push(index);
    }
    Ok(bands)
}

fn command_id() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(1);
    (millis % u128::from(u32::MAX)) as u32 | 1
}

async fn connect(host: &str, port: u16) -> CliResult<TcpStream> {
    let addr = format!("{}:{}", host, port);
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to beacon at {}", "✗".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("  Is it running? Start it with {}", "wspr-beacon".bright_cyan());
            } else {
                eprintln!("  Network error: {}", e.to_string().bright_red());
            }
            Err(e.into())
        }
    }
}

async fn send_command(host: &str, port: u16, command: &Command) -> CliResult<String> {
    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let line = serde_json::to_string(command)?;

    let exchange = async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        let mut response = String::new();
        if reader.read_line(&mut response).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed connection",
            ));
        }
        Ok(response)
    };

    match tokio::time::timeout(Duration::from_secs(5), exchange).await {
        Ok(result) => Ok(result?.trim_end().to_string()),
        Err(_) => {
            eprintln!("{} Command timed out after 5 seconds", "⏰".yellow());
            Err("command timeout".into())
        }
    }
}

fn print_response(command: &CommandType, raw: &str, format: &str) -> CliResult<()> {
    if format == "json" {
        println!("{}", raw);
        return Ok(());
    }
    let response: CommandResponse = serde_json::from_str(raw)?;
    let ok = matches!(response.status, ResponseStatus::Success | ResponseStatus::Acknowledged);

    if format == "compact" {
        let label = format!("{:?}", response.status);
        let label = if ok { label.bright_green() } else { label.bright_red() };
        match &response.message {
            Some(message) => println!("{} {}", label, message),
            None => println!("{}", label),
        }
        return Ok(());
    }

    if !ok {
        println!(
            "{} {:?}: {}",
            "✗".red(),
            response.status,
            response.message.as_deref().unwrap_or("no detail").bright_red()
        );
        return Ok(());
    }

    match (command, response.payload) {
        (CommandType::GetStatus, Some(payload)) => print_status(&serde_json::from_value(payload)?),
        (CommandType::GetSettings, Some(payload)) => print_settings(&serde_json::from_value(payload)?),
        _ => {
            let message = response.message.unwrap_or_else(|| "done".to_string());
            println!("{} {}", "✓".green(), message.bright_green());
        }
    }
    Ok(())
}

fn print_status(status: &BeaconStatus) {
    println!("{}", "WSPR Beacon Status".bright_blue().bold());
    println!("{}", "══════════════════".bright_blue());
    row("Phase", format!("{:?}", status.phase).bright_cyan());
    row(
        "Station",
        format!("{} {} {} dBm", status.callsign, status.locator, status.power_dbm).normal(),
    );
    row("Band", format!("{} ({})", status.band_name, status.reference_frequency).normal());
    if let Some(frequency) = status.operating_frequency {
        row("Output", frequency.to_string().bright_yellow());
    }
    row(
        "Next slot",
        format!("{} UTC, in {} s", format_hhmmss(status.next_tx_epoch), status.remaining_seconds).normal(),
    );
    row("Interval", format!("{} min", status.interval_seconds / 60).normal());
    if status.tx_elapsed_seconds > 0 {
        row("On air", format!("{} s", status.tx_elapsed_seconds).bright_yellow());
    }
    let sync = format!("{:?}", status.sync_source);
    row(
        "Time source",
        match status.last_sync_epoch {
            Some(epoch) => format!("{} at {} UTC", sync, format_hhmmss(epoch)).bright_green(),
            None => sync.bright_red(),
        },
    );
    row("Correction", format!("{} ppb", status.correction_ppb).normal());
    row(
        "Completed",
        format!("{} ({} aborted)", status.transmissions_completed, status.transmissions_aborted).normal(),
    );
    if let Some(error) = &status.last_error {
        row("Last error", error.bright_red());
    }
}

fn print_settings(settings: &SettingsView) {
    println!("{}", "Beacon Settings".bright_blue().bold());
    println!("{}", "═══════════════".bright_blue());
    row("Interval", format!("{} min", settings.interval_seconds / 60).normal());
    let names: Vec<&str> = settings
        .bands
        .indices()
        .filter_map(|i| WSPR_BANDS.get(i).map(|band| band.name))
        .collect();
    row(
        "Bands",
        if names.is_empty() {
            "none".bright_red()
        } else {
            names.join(", ").normal()
        },
    );
    row("Cal. carrier", settings.calibration_frequency.to_string().normal());
    row("Correction", format!("{} ppb", settings.correction_ppb).normal());
}

fn row(label: &str, value: ColoredString) {
    println!("{:<14} {}", format!("{}:", label).bright_white(), value);
}

async fn monitor(host: &str, port: u16, format: &str) -> CliResult<()> {
    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let request = serde_json::to_string(&Command {
        id: command_id(),
        command_type: CommandType::Monitor,
    })?;
    writer.write_all(request.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    println!("{}", "Monitoring beacon status (Ctrl+C to stop)".bright_blue().bold());
    while let Some(line) = lines.next_line().await? {
        if format == "json" {
            println!("{}", line);
            continue;
        }
        // The first line is the acknowledgement.
        let Ok(status) = serde_json::from_str::<BeaconStatus>(&line) else {
            continue;
        };
        let phase = format!("{:?}", status.phase);
        let output = status
            .operating_frequency
            .map_or_else(|| "-".to_string(), |f| f.to_string());
        println!(
            "[{}] {:<12} {:<4} next {} ({:>4} s) tx {:>3} s  {}",
            format_hhmmss(status.next_tx_epoch - status.remaining_seconds),
            phase.bright_cyan(),
            status.band_name,
            format_hhmmss(status.next_tx_epoch),
            status.remaining_seconds,
            status.tx_elapsed_seconds,
            output
        );
    }
    Ok(())
}
