mod dashboard;

use clap::{Args, Parser, Subcommand};
use log::error;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use tempctl::{
    decode_telemetry, encode_command, list_ports, parse_command, preferred_port, BaudRate, ChannelSetpoint, Config,
    Error, ProtocolVariant, Result, Session, LINE_DELIMITER, SIMULATION_PORT,
};

/// Host link for the two-channel Arduino PID temperature controller.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file. Command-line flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available serial ports.
    Ports,
    /// Connect and show the live dashboard.
    Run {
        #[command(flatten)]
        link: LinkArgs,
        /// Write the recorded telemetry to this CSV file on exit.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Print the command string for the given parameters.
    Encode {
        #[command(flatten)]
        variant: VariantArgs,
        /// Channel 0 as "setpoint,band,integral,rate".
        #[arg(long, value_parser = parse_setpoint)]
        ch0: Option<ChannelSetpoint>,
        /// Channel 1 as "setpoint,band,integral,rate".
        #[arg(long, value_parser = parse_setpoint)]
        ch1: Option<ChannelSetpoint>,
    },
    /// Decode telemetry lines read from stdin.
    Decode {
        #[command(flatten)]
        variant: VariantArgs,
    },
    /// Show the integers the firmware reads from a command string.
    Inspect {
        #[command(flatten)]
        variant: VariantArgs,
        command: String,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Serial port, or "Simulation". Defaults to the first Arduino found.
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// Read timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Poll interval in milliseconds (500-1000).
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Upper limit for setpoints, in °C.
    #[arg(long)]
    temperature_limit: Option<f64>,
    #[command(flatten)]
    variant: VariantArgs,
}

#[derive(Args, Debug)]
struct VariantArgs {
    /// Telemetry carries a ninth field, the sample temperature.
    #[arg(long)]
    sample: bool,
    /// Append the ",a" start trigger to commands.
    #[arg(long)]
    trigger: bool,
}

impl VariantArgs {
    fn apply(&self, variant: ProtocolVariant) -> ProtocolVariant {
        ProtocolVariant {
            sample_channel: variant.sample_channel || self.sample,
            start_trigger: variant.start_trigger || self.trigger,
        }
    }
}

fn parse_setpoint(text: &str) -> std::result::Result<ChannelSetpoint, String> {
    let values: Vec<f64> = text
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{:?}: {}", v, e)))
        .collect::<std::result::Result<_, _>>()?;
    match values.as_slice() {
        &[setpoint_c, band_c, integral_time_s, rate_per_s] => Ok(ChannelSetpoint {
            setpoint_c,
            band_c,
            integral_time_s,
            rate_per_s,
        }),
        _ => Err(format!("expected 4 comma-separated values, got {}", values.len())),
    }
}

// The main entry point for the command-line tool.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // The dashboard owns the terminal, so only warnings get through while it runs.
    let default_filter = match cli.command {
        Command::Run { .. } => "warn",
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Ports => list_serial_ports(),
        Command::Run { link, csv } => run_dashboard(config, &link, csv),
        Command::Encode { variant, ch0, ch1 } => {
            let mut channels = config.channels;
            if let Some(sp) = ch0 {
                channels[0] = sp;
            }
            if let Some(sp) = ch1 {
                channels[1] = sp;
            }
            let channels = channels.map(|sp| config.clamp(sp));
            println!("{}", encode_command(&channels, variant.apply(config.variant))?);
            Ok(())
        }
        Command::Decode { variant } => decode_stdin(variant.apply(config.variant)),
        Command::Inspect { variant, command } => inspect_command(&command, variant.apply(config.variant)),
    }
}

fn list_serial_ports() -> Result<()> {
    let ports = list_ports()?;
    let preferred = preferred_port(&ports).map(|p| p.name.clone());

    println!("Available serial ports:");
    for port in &ports {
        let marker = if Some(&port.name) == preferred.as_ref() { "*" } else { " " };
        println!(" {} {} : {}", marker, port.name, port.description);
    }
    println!("   {}", SIMULATION_PORT);
    Ok(())
}

fn run_dashboard(mut config: Config, args: &LinkArgs, csv: Option<PathBuf>) -> Result<()> {
    if let Some(port) = &args.port {
        config.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.baud_rate = BaudRate::try_from(baud)?;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.poll_interval_ms = interval_ms;
    }
    if let Some(limit) = args.temperature_limit {
        config.temperature_limit = limit;
    }
    config.variant = args.variant.apply(config.variant);
    config.validate()?;

    let mut session = Session::connect(&config)?;
    let result = dashboard::run(&mut session);
    let history = dashboard_then_disconnect(result, session.disconnect())?;

    if let Some(path) = csv {
        let mut out = BufWriter::new(File::create(&path)?);
        history.write_csv(&mut out)?;
        out.flush()?;
        println!("Wrote {} samples to {}", history.len(), path.display());
    }
    Ok(())
}

// The dashboard error wins; a disconnect failure behind it is only logged.
fn dashboard_then_disconnect<T>(dashboard: Result<()>, disconnect: Result<T>) -> Result<T> {
    match (dashboard, disconnect) {
        (Err(e), Err(disconnect_error)) => {
            error!("disconnect failed: {}", disconnect_error);
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), disconnect) => disconnect,
    }
}

// Reads one packet per line, as the firmware would send it, and prints what decodes.
fn decode_stdin(variant: ProtocolVariant) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let packet = format!("{}{}", line, LINE_DELIMITER);
        match decode_telemetry(packet.as_bytes(), variant) {
            Ok(frame) => {
                for (channel, reading) in frame.channels.iter().enumerate() {
                    println!(
                        "< ch{}: T={} °C  out={} %  P={}  I={}",
                        channel, reading.temperature_c, reading.output_pct, reading.proportional_term, reading.integral_term
                    );
                }
                if let Some(t) = frame.sample_temperature_c {
                    println!("< sample: T={} °C", t);
                }
            }
            Err(Error::DecodeFailed(failure)) => eprintln!("[ERROR] {}", failure),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn inspect_command(command: &str, variant: ProtocolVariant) -> Result<()> {
    let channels = parse_command(command, variant)?;
    for (channel, scaled) in channels.iter().enumerate() {
        let sp = scaled.to_setpoint();
        println!(
            "ch{}: setpoint {} ({} °C)  band {} ({} °C)  integral {} ({} s)  rate {} ({} /s)",
            channel,
            scaled.setpoint,
            sp.setpoint_c,
            scaled.band,
            sp.band_c,
            scaled.integral,
            sp.integral_time_s,
            scaled.rate,
            sp.rate_per_s
        );
    }
    Ok(())
}
