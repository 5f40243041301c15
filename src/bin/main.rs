//! CLI tool for Mini Monitor (minimon)

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use minimon::{Config, Domain, HardwareMonitorService, MonitoringBackend, TelemetrySnapshot};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "minimon")]
#[command(about = "Mini Monitor: CPU, GPU, memory, disk and network telemetry for gauge dashboards", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to the per-user config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// List selectable devices per domain
    Devices {
        /// Only this domain (gpu, disk, network)
        #[arg(value_parser = parse_domain)]
        domain: Option<Domain>,
    },
    /// Sample every monitor on the configured interval (default)
    Watch {
        /// Override the tick interval in milliseconds
        #[arg(short, long)]
        interval: Option<u32>,
        /// Stop after this many ticks
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
    /// Select a device and persist the choice
    Select {
        /// gpu, disk or network
        #[arg(value_parser = parse_domain)]
        domain: Domain,
        /// Device id from `devices`; "all" returns to the default
        id: String,
    },
    /// Show where CPU temperature comes from and the current reading
    Temperature,
}

#[cfg(feature = "cli")]
fn parse_domain(s: &str) -> Result<Domain, String> {
    s.parse().map_err(|e: minimon::Error| e.to_string())
}

#[cfg(feature = "cli")]
fn load_config(path: Option<&PathBuf>) -> minimon::Result<Config> {
    match path {
        Some(path) if path.exists() => Config::load_from(path),
        Some(_) => Ok(Config::default()),
        None => Config::load(),
    }
}

#[cfg(feature = "cli")]
fn save_config(config: &Config, path: Option<&PathBuf>) -> minimon::Result<()> {
    match path {
        Some(path) => config.save_to(path),
        None => config.save(),
    }
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Commands::Watch {
        interval: None,
        count: None,
    }) {
        Commands::Devices { domain } => {
            let backend = MonitoringBackend::new(config);
            let domains = match domain {
                Some(domain) => vec![domain],
                None => Domain::ALL.to_vec(),
            };

            if cli.format == Format::Json {
                let listing: serde_json::Map<String, serde_json::Value> = domains
                    .iter()
                    .map(|d| {
                        let devices: Vec<_> = backend
                            .available_devices(*d)
                            .iter()
                            .map(|dev| {
                                serde_json::json!({
                                    "id": dev.id(),
                                    "name": dev.display_name(),
                                    "short_name": dev.short_name(),
                                    "type": dev.device_type().to_string(),
                                })
                            })
                            .collect();
                        (d.key().to_string(), serde_json::Value::Array(devices))
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for d in domains {
                    print_devices(&backend, d);
                }
            }
        }

        Commands::Watch { interval, count } => {
            let mut config = config;
            if let Some(ms) = interval {
                config.general.update_interval_ms = ms.max(1);
            }
            let mut backend = MonitoringBackend::new(config);
            let period = backend.update_interval();

            let mut ticks = 0u64;
            loop {
                let snapshot = backend.tick(None);
                match cli.format {
                    Format::Json => println!("{}", serde_json::to_string(&snapshot)?),
                    Format::Text => print_snapshot(&snapshot),
                }

                ticks += 1;
                if count.is_some_and(|n| ticks >= n) {
                    break;
                }
                std::thread::sleep(period);
            }
            backend.shutdown();
        }

        Commands::Select { domain, id } => {
            let mut backend = MonitoringBackend::new(config);
            if !backend.select(domain, Some(&id)) {
                eprintln!("No {} device with id '{}'", domain, id);
                print_devices(&backend, domain);
                backend.shutdown();
                std::process::exit(2);
            }
            save_config(backend.config(), cli.config.as_ref())?;

            let name = backend
                .selected_device(domain)
                .map(|d| d.display_name().to_string())
                .unwrap_or_default();
            println!("{} -> {}", domain, name);
        }

        Commands::Temperature => {
            let mut service = HardwareMonitorService::system();
            let source = service.source();
            let reading = service.get_cpu_temperature();

            if cli.format == Format::Json {
                let value = serde_json::json!({
                    "source": source,
                    "temperature": reading,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Source:      {:?}", source);
                let slots = service.slots();
                if let Some(id) = &slots.package {
                    println!("Package:     {}", id);
                }
                if let Some(id) = &slots.core_max {
                    println!("Core max:    {}", id);
                }
                if let Some(id) = &slots.motherboard {
                    println!("Motherboard: {}", id);
                }
                match reading {
                    Some(temp) => println!("Temperature: {}°C", temp),
                    None => println!("Temperature: --"),
                }
            }
            service.dispose();
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn print_devices(backend: &MonitoringBackend, domain: Domain) {
    let selected = backend.selected_device(domain).map(|d| d.id().to_string());
    println!("{}:", domain);
    let devices = backend.available_devices(domain);
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let marker = if selected.as_deref() == Some(device.id()) { "*" } else { " " };
        println!("  {} {:<22} {}", marker, device.id(), device.display_name());
    }
}

#[cfg(feature = "cli")]
fn print_snapshot(s: &TelemetrySnapshot) {
    let cpu_temp = s
        .cpu
        .temperature
        .map(|t| format!("{}°C", t))
        .unwrap_or_else(|| "--".to_string());
    let gpu_temp = s
        .gpu
        .temperature
        .map(|t| format!("{:.0}°C", t))
        .unwrap_or_else(|| "--".to_string());

    println!(
        "{}  CPU {:5.1}% {:>5}  MEM {:5.1}%  GPU {:5.1}% {:>5} [{}]  DISK R {:7.1} W {:7.1} Mbps /{:.0} [{}]  NET D {:7.1} U {:7.1} Mbps /{:.0} [{}]",
        s.timestamp.format("%H:%M:%S"),
        s.cpu.usage,
        cpu_temp,
        s.memory.percent,
        s.gpu.usage,
        gpu_temp,
        s.gpu_device,
        s.disk.read_mbps,
        s.disk.write_mbps,
        s.disk_scale,
        s.disk_device,
        s.network.download_mbps,
        s.network.upload_mbps,
        s.network_scale,
        s.network_device,
    );
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
