use std::num::ParseIntError;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use shutter_count::config::ShutterCountConfig;
use shutter_count::transport::UsbTransport;
use shutter_count::{query_camera, CameraInfo, SHUTTER_COUNT_UNAVAILABLE};

#[macro_use]
extern crate tracing;

#[macro_use]
extern crate prettytable;

fn parse_hex_u16(src: &str) -> Result<u16, ParseIntError> {
    u16::from_str_radix(src.trim_start_matches("0x"), 16)
}

#[derive(Debug, Parser)]
#[clap(name = "shutter-count")]
struct MainArgs {
    /// The path to the config file
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Only consider devices with this USB vendor id (hex)
    #[clap(long, parse(try_from_str = parse_hex_u16))]
    vid: Option<u16>,

    /// Only consider devices with this USB product id (hex)
    #[clap(long, parse(try_from_str = parse_hex_u16))]
    pid: Option<u16>,

    /// List candidate cameras instead of querying one
    #[clap(long)]
    list: bool,

    /// Print the result as JSON
    #[clap(long)]
    json: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // setup colorful backtraces
    color_backtrace::install();

    let mut targets = Targets::new();

    match std::env::var("RUST_LOG") {
        Ok(directives) => {
            for directive in directives.split(',') {
                if let Some((target, level)) = directive.split_once('=') {
                    targets = targets.with_target(
                        target,
                        level.parse::<LevelFilter>().context("invalid log level")?,
                    );
                } else {
                    targets = targets.with_default(
                        directive
                            .parse::<LevelFilter>()
                            .context("invalid log level")?,
                    );
                }
            }
        }
        Err(_) => {
            targets = targets.with_default(LevelFilter::INFO);
        }
    }

    let (writer, _guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::hourly("logs", "shutter-count"));

    tracing_subscriber::registry()
        // writer that outputs to console
        .with(tracing_subscriber::fmt::layer().with_filter(targets))
        // writer that outputs to files
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(
                    Targets::new().with_targets(vec![("shutter_count", LevelFilter::DEBUG)]),
                ),
        )
        .init();

    let args = MainArgs::parse();

    let mut config = match &args.config {
        Some(path) => {
            debug!("reading config from {:?}", path);
            ShutterCountConfig::read_from_path(path.clone())
                .context("failed to read config file")?
        }
        None => ShutterCountConfig::read().context("failed to read config")?,
    };

    if args.vid.is_some() {
        config.usb.vid = args.vid;
    }
    if args.pid.is_some() {
        config.usb.pid = args.pid;
    }

    if args.list {
        return list_cameras();
    }

    let cancellation_token = CancellationToken::new();

    ctrlc::set_handler({
        let cancellation_token = cancellation_token.clone();
        move || {
            info!("received interrupt, shutting down");
            cancellation_token.cancel();
        }
    })
    .expect("could not set ctrl+c handler");

    let query = tokio::task::spawn_blocking(move || -> anyhow::Result<CameraInfo> {
        let transport = UsbTransport::open_first(config.usb.vid, config.usb.pid, config.usb.timeout())
            .context("could not open camera transport")?;

        query_camera(Box::new(transport), &config)
    });

    let info = tokio::select! {
        _ = cancellation_token.cancelled() => {
            // an in-flight bulk transfer cannot be interrupted from here;
            // exiting tears the handle down with the process
            anyhow::bail!("interrupted");
        }
        res = query => res.context("query task panicked")??,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }

    Ok(())
}

fn list_cameras() -> anyhow::Result<()> {
    let devices = UsbTransport::list().context("could not list usb devices")?;

    if devices.is_empty() {
        println!("no ptp-capable devices found");
        return Ok(());
    }

    let mut table = table!(["bus", "addr", "vid", "pid", "product"]);

    for device in devices {
        table.add_row(row![
            format!("{:03}", device.bus),
            format!("{:03}", device.address),
            format!("{:04x}", device.vendor_id),
            format!("{:04x}", device.product_id),
            device.product.unwrap_or_else(|| "-".into()),
        ]);
    }

    table.printstd();

    Ok(())
}

fn print_info(info: &CameraInfo) {
    let shutter_count = if info.shutter_count == SHUTTER_COUNT_UNAVAILABLE {
        "unavailable".red().to_string()
    } else {
        info.shutter_count.to_string().green().to_string()
    };

    let mut table = table!(
        ["manufacturer", info.manufacturer],
        ["model", info.model],
        ["version", info.version],
        ["serial", info.serial],
        ["shutter count", shutter_count]
    );

    table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.printstd();
}
