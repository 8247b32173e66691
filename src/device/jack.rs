use tracing::{debug, error, info, warn};

/// Log the server parameters and hand back (sample_rate, buffer_size). The
/// server's sample rate overrides whatever the configuration asked for.
pub fn client_info(client: &jack::Client) -> (usize, usize) {
    let sample_rate = client.sample_rate();
    let buffer_size = client.buffer_size();
    info!("JACK server:");
    info!("  sample rate: {} Hz", sample_rate);
    info!(
        "  buffer: {} samples ({:.2} ms)",
        buffer_size,
        buffer_size as f64 / sample_rate as f64 * 1000.0
    );
    (sample_rate as usize, buffer_size as usize)
}

/// Wire our ports to the first physical capture/playback ports so the node
/// hears the room and drives the speaker without manual patching.
pub fn connect_physical_ports(client: &jack::Client, in_port_name: &str, out_port_name: &str) {
    let physical_sources = client.ports(
        None,
        None,
        jack::PortFlags::IS_OUTPUT | jack::PortFlags::IS_PHYSICAL,
    );
    let physical_sinks = client.ports(
        None,
        None,
        jack::PortFlags::IS_INPUT | jack::PortFlags::IS_PHYSICAL,
    );

    debug!(
        "{} physical sources, {} physical sinks",
        physical_sources.len(),
        physical_sinks.len()
    );

    if let Some(source) = physical_sources.first() {
        match client.connect_ports_by_name(source, in_port_name) {
            Ok(_) => info!("capture: {} -> {}", source, in_port_name),
            Err(e) => error!("failed to connect {} -> {}: {}", source, in_port_name, e),
        }
    }

    if let Some(sink) = physical_sinks.first() {
        match client.connect_ports_by_name(out_port_name, sink) {
            Ok(_) => info!("playback: {} -> {}", out_port_name, sink),
            Err(e) => error!("failed to connect {} -> {}: {}", out_port_name, sink, e),
        }
    }

    if physical_sources.is_empty() || physical_sinks.is_empty() {
        warn!("missing physical audio ports; the link is deaf or mute");
    }
}
