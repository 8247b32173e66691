use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use tonelink::audio::recorder::{self, AppShared};
use tonelink::audio::tone::render_bitstring;
use tonelink::audio::{FrequencyPlan, SlotDemodulator};
use tonelink::config::LinkConfig;
use tonelink::device::jack as jack_device;
use tonelink::error::LinkError;
use tonelink::mac::{TdmaNode, outbox};
use tonelink::phy::crc::bits_to_string;
use tonelink::phy::{Delivery, frame};
use tonelink::ui::print_banner;
use tonelink::utils::consts::{INPUT_PORT_NAME, JACK_CLIENT_NAME, OUTPUT_PORT_NAME};
use tonelink::utils::dump::write_wav;
use tonelink::utils::logging::init_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live TDMA node over the JACK audio server
    Node {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<String>,
        #[arg(long)]
        device_id: Option<u8>,
        #[arg(long)]
        total_devices: Option<u8>,
        /// Path of the line-delimited message outbox
        #[arg(long)]
        outbox: Option<String>,
    },
    /// Offline loopback: encode, modulate, demodulate, decode in-process
    Loopback {
        /// Message payload as a bit string
        #[arg(short, long)]
        message: String,
        /// Destination device id (0 broadcasts)
        #[arg(long, default_value_t = 1)]
        dest: u8,
        /// Dump the rendered waveform to a WAV file
        #[arg(long)]
        dump: Option<String>,
    },
}

fn main() {
    init_logging();
    print_banner();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Node {
            config,
            device_id,
            total_devices,
            outbox,
        } => run_node(config, device_id, total_devices, outbox),
        Commands::Loopback {
            message,
            dest,
            dump,
        } => run_loopback(&message, dest, dump.as_deref()),
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}

fn prompt_u8(prompt: &str) -> Result<u8, LinkError> {
    dialoguer::Input::<u8>::new()
        .with_prompt(prompt)
        .interact_text()
        .map_err(|e| LinkError::InvalidConfig(format!("{prompt}: {e}")))
}

fn audio_err(err: jack::Error) -> LinkError {
    LinkError::Audio(err.to_string())
}

fn run_node(
    config_path: Option<String>,
    device_id: Option<u8>,
    total_devices: Option<u8>,
    outbox_path: Option<String>,
) -> Result<(), LinkError> {
    let mut config = match &config_path {
        Some(path) => LinkConfig::from_file(path)?,
        None => LinkConfig::default(),
    };

    // Flags beat the file; prompt interactively for whatever is left open.
    match (device_id, &config_path) {
        (Some(id), _) => config.device_id = id,
        (None, None) => config.device_id = prompt_u8("Enter the device id")?,
        (None, Some(_)) => {}
    }
    match (total_devices, &config_path) {
        (Some(n), _) => config.total_devices = n,
        (None, None) => {
            config.total_devices = prompt_u8("Enter the total number of devices")?
        }
        (None, Some(_)) => {}
    }
    if let Some(path) = outbox_path {
        config.outbox_path = path;
    }
    config.validate()?;

    // Audio acquisition failures are the one fatal error class.
    let (client, status) =
        jack::Client::new(JACK_CLIENT_NAME, jack::ClientOptions::NO_START_SERVER)
            .map_err(|e| LinkError::Audio(format!("cannot open JACK client: {e}")))?;
    info!("JACK client status: {:?}", status);

    let (sample_rate, buffer_size) = jack_device::client_info(&client);
    if sample_rate as u32 != config.sample_rate {
        info!("following the server sample rate ({sample_rate} Hz)");
        config.sample_rate = sample_rate as u32;
        config.validate()?;
    }
    if buffer_size != config.chunk_size {
        info!(
            "server delivers {buffer_size}-sample chunks (configured {})",
            config.chunk_size
        );
    }

    let slot_samples = (config.sample_rate as f32 * config.slot_duration_secs) as usize;
    let shared = AppShared::new(slot_samples);

    let in_port = client
        .register_port(INPUT_PORT_NAME, jack::AudioIn::default())
        .map_err(audio_err)?;
    let out_port = client
        .register_port(OUTPUT_PORT_NAME, jack::AudioOut::default())
        .map_err(audio_err)?;
    let in_port_name = in_port.name().map_err(audio_err)?;
    let out_port_name = out_port.name().map_err(audio_err)?;

    let process = jack::contrib::ClosureProcessHandler::new(
        recorder::build_process_closure(in_port, out_port, shared.clone()),
    );
    let active_client = client.activate_async((), process).map_err(audio_err)?;
    jack_device::connect_physical_ports(
        active_client.as_client(),
        &in_port_name,
        &out_port_name,
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();
    let (delivered_tx, delivered_rx) = crossbeam_channel::unbounded::<tonelink::phy::Message>();

    let watcher = {
        let config = config.clone();
        let running = running.clone();
        std::thread::spawn(move || outbox::watch(config, outbound_tx, running))
    };
    let printer = std::thread::spawn(move || {
        for message in delivered_rx {
            println!(
                "[RECVD] {} (from device {})",
                bits_to_string(&message.data),
                message.source
            );
        }
    });

    let node = TdmaNode::new(config, shared);
    node.run(running.clone(), outbound_rx, delivered_tx);

    // Shutdown: stop the watcher, let the printer drain, release the audio
    // device on every path.
    running.store(false, Ordering::SeqCst);
    if watcher.join().is_err() {
        warn!("outbox watcher panicked");
    }
    if printer.join().is_err() {
        warn!("delivery printer panicked");
    }
    if let Err(err) = active_client.deactivate() {
        warn!("error deactivating JACK client: {err}");
    }
    info!("exiting gracefully");
    Ok(())
}

fn run_loopback(message: &str, dest: u8, dump: Option<&str>) -> Result<(), LinkError> {
    let config = LinkConfig {
        sample_rate: 16000,
        symbol_duration_secs: 0.05,
        slot_duration_secs: 2.0,
        pre_gain: 1.0,
        device_id: if dest == 0 { 1 } else { dest },
        ..Default::default()
    };
    config.validate()?;

    let outbound =
        outbox::validate(message, dest, &config).map_err(LinkError::InvalidConfig)?;

    let bits = frame::encode_message(&outbound.data, outbound.dest, &config);
    let plan = FrequencyPlan::from_config(&config);
    let mut samples = vec![0.0; 4000];
    samples.extend(render_bitstring(
        &bits,
        &plan,
        config.symbol_duration_secs,
        config.sample_rate,
    ));
    samples.extend(vec![0.0; 2000]);
    info!("{} frame bits rendered into {} samples", bits.len(), samples.len());

    if let Some(path) = dump {
        write_wav(path, &samples, config.sample_rate)
            .map_err(|e| LinkError::Audio(format!("wav dump: {e}")))?;
        info!("waveform dumped to {path}");
    }

    let demod = SlotDemodulator::new(&config);
    let recovered = demod
        .demodulate(&samples)
        .ok_or(LinkError::NoOnsetDetected)?;

    match frame::decode_message(&recovered, &config)? {
        Delivery::Accepted(delivered) => info!(
            "loopback delivered {} (device {} -> device {})",
            bits_to_string(&delivered.data),
            delivered.source,
            delivered.dest
        ),
        Delivery::NotForMe { dest } => warn!("loopback frame addressed to device {dest}"),
    }
    Ok(())
}
