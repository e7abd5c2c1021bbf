//! Building a gateway from its configuration
//!
//! Only the repeater socket is essential. A network that does not resolve,
//! a reflector directory that cannot be read or a control socket that
//! cannot bind is logged and left out.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ControlSocketConfig, GatewayConfig, NetworkConfig, ReflectorConfig};
use crate::control::ControlSocket;
use crate::dispatcher::Gateway;
use crate::error::{GatewayError, LinkError};
use crate::linking::{ReflectorLink, ReflectorSettings};
use crate::network::{NetworkLink, NetworkSettings};
use crate::reflector::ReflectorDirectory;
use crate::repeater::RepeaterLink;
use crate::transport::{resolve, UdpConnector, UdpTransport};

fn any_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// Open the repeater socket and build every configured link
///
/// Must run inside a tokio runtime. The reflector directory reload task
/// stops when `cancel` fires.
pub fn build(config: &GatewayConfig, cancel: &CancellationToken) -> Result<Gateway, GatewayError> {
    let general = &config.general;

    let address = format!("{}:{}", config.repeater.address, config.repeater.port);
    let bind_error = |source: LinkError| GatewayError::RepeaterBind {
        address: address.clone(),
        source,
    };
    let local = resolve(&config.repeater.address, config.repeater.port).map_err(bind_error)?;
    let mut repeater = RepeaterLink::new(
        Box::new(UdpTransport::listen(local)),
        general.link_timeout(),
        config.repeater.debug,
    );
    repeater.open().map_err(bind_error)?;
    info!("Waiting for the repeater on {}", address);

    let mut gateway = Gateway::new(repeater, general.rf_timeout(), general.net_timeout());
    gateway.set_trace(general.trace);

    for network in &config.networks {
        if !network.enabled {
            info!("{} network is disabled in the configuration", network.name);
            continue;
        }
        match network_link(network, config) {
            Ok(link) => {
                gateway.add_network(link, &network.rewrite);
            }
            Err(e) => warn!("{} network not started: {}", network.name, e),
        }
    }

    if let Some(reflector) = config.reflector.as_ref().filter(|r| r.enabled) {
        match reflector_link(reflector, config, cancel) {
            Ok(link) => gateway.set_reflector(link),
            Err(e) => warn!("Reflector linking not started: {}", e),
        }
    }

    if let Some(socket) = &config.dynamic_control {
        match control_socket("DynTG", socket) {
            Ok(socket) => gateway.set_dynamic_control(socket),
            Err(e) => warn!("Dynamic talkgroup control not started: {}", e),
        }
    }
    if let Some(socket) = &config.remote_control {
        match control_socket("Remote", socket) {
            Ok(socket) => gateway.set_remote_control(socket),
            Err(e) => warn!("Remote control not started: {}", e),
        }
    }

    Ok(gateway)
}

fn network_link(network: &NetworkConfig, config: &GatewayConfig) -> Result<NetworkLink, LinkError> {
    // Fail early on hosts that will never resolve; later lookups run off the dispatcher
    let remote = resolve(&network.address, network.port)?;

    let mut settings = NetworkSettings::new(&network.name, &network.address, network.port, &network.password);
    settings.id = network.id;
    settings.options = network.options.clone();
    settings.location = network.location;
    settings.debug = network.debug;
    settings.ping_interval = config.general.ping_interval();
    settings.timeout = config.general.link_timeout();

    let transport = UdpTransport::connect(any_address(network.local_port), &network.address, network.port)
        .with_address(remote);
    Ok(NetworkLink::new(settings, Box::new(transport)))
}

fn reflector_link(
    reflector: &ReflectorConfig,
    config: &GatewayConfig,
    cancel: &CancellationToken,
) -> Result<ReflectorLink, GatewayError> {
    let directory = ReflectorDirectory::load(&reflector.hosts_file)?;
    directory.spawn_reload(reflector.reload_interval(), cancel.child_token());

    let settings = ReflectorSettings::from_config(reflector, &config.general);
    let connector = UdpConnector::new(any_address(reflector.local_port));
    let mut link = ReflectorLink::new(settings, directory, Box::new(connector), config.general.trace);
    link.start();
    Ok(link)
}

fn control_socket(name: &'static str, config: &ControlSocketConfig) -> Result<ControlSocket, LinkError> {
    let local = resolve(&config.address, config.port)?;
    let mut socket = ControlSocket::new(name, Box::new(UdpTransport::listen(local)));
    socket.open()?;
    info!("{} control listening on {}", name, local);
    Ok(socket)
}
