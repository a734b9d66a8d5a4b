//! mDNS discovery of peer controllers and lamps

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::lamp::LampEndpoint;
use crate::rank::Rank;
use crate::types::{NodeId, CONTROLLER_SERVICE_VERSION};

/// mDNS service type announced by controllers
pub const CONTROLLER_SERVICE_TYPE: &str = "_lsfcontroller._udp.local.";
/// mDNS service type announced by lamps
pub const LAMP_SERVICE_TYPE: &str = "_lsflamp._udp.local.";

/// Something appeared on or left the network
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    ControllerFound {
        node_id: NodeId,
        rank: Rank,
        addr: SocketAddr,
    },
    ControllerLost(NodeId),
    LampFound(LampEndpoint),
    LampLost(String),
}

/// Discovery service for controllers and lamps
pub struct Discovery {
    node_id: NodeId,
    daemon: ServiceDaemon,
}

fn instance_name(fullname: &str) -> String {
    fullname.split('.').next().unwrap_or("").to_string()
}

fn first_ipv4(info: &ServiceInfo) -> IpAddr {
    info.get_addresses()
        .iter()
        .find(|a| matches!(a, IpAddr::V4(_)))
        .copied()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

impl Discovery {
    pub fn new(node_id: NodeId) -> Result<Self, mdns_sd::Error> {
        let daemon = ServiceDaemon::new()?;
        Ok(Self { node_id, daemon })
    }

    /// Announce this controller with its rank and controller port
    pub fn announce(&self, rank: Rank, port: u16) -> Result<(), mdns_sd::Error> {
        let host = format!("{}.local.", self.node_id);

        let mut properties = HashMap::new();
        properties.insert("rank".to_string(), rank.to_string());
        properties.insert("version".to_string(), CONTROLLER_SERVICE_VERSION.to_string());

        let service_info = ServiceInfo::new(
            CONTROLLER_SERVICE_TYPE,
            &self.node_id,
            &host,
            (),
            port,
            properties,
        )?
        .enable_addr_auto();

        self.daemon.register(service_info)?;
        info!("mDNS: Announcing {} on {}", self.node_id, CONTROLLER_SERVICE_TYPE);
        Ok(())
    }

    /// Browse for controllers and lamps, forwarding what is found
    pub fn browse(&self, events: mpsc::Sender<DiscoveryEvent>) -> Result<(), mdns_sd::Error> {
        for service_type in [CONTROLLER_SERVICE_TYPE, LAMP_SERVICE_TYPE] {
            let receiver = self.daemon.browse(service_type)?;
            let events = events.clone();
            let my_id = self.node_id.clone();

            tokio::spawn(async move {
                loop {
                    match receiver.recv_async().await {
                        Ok(event) => {
                            if let Some(found) = Self::handle_event(&my_id, event) {
                                if events.send(found).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("mDNS browse error: {}", e);
                            break;
                        }
                    }
                }
            });
        }
        Ok(())
    }

    fn handle_event(my_id: &str, event: ServiceEvent) -> Option<DiscoveryEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let name = instance_name(info.get_fullname());
                let addr = SocketAddr::new(first_ipv4(&info), info.get_port());

                if info.get_type() == LAMP_SERVICE_TYPE {
                    let lamp_id = info
                        .get_properties()
                        .get("lamp_id")
                        .map(|v| v.val_str().to_string())
                        .unwrap_or(name);
                    info!("mDNS: Discovered lamp \"{}\" at {}", lamp_id, addr);
                    return Some(DiscoveryEvent::LampFound(LampEndpoint::new(
                        lamp_id,
                        addr.to_string(),
                    )));
                }

                // Don't add ourselves
                if name == my_id {
                    return None;
                }

                let rank = match info
                    .get_properties()
                    .get("rank")
                    .and_then(|v| v.val_str().parse::<Rank>().ok())
                {
                    Some(rank) => rank,
                    None => {
                        warn!("mDNS: Controller \"{}\" announced without a rank", name);
                        return None;
                    }
                };

                info!("mDNS: Discovered controller \"{}\" (rank {}) at {}", name, rank, addr);
                Some(DiscoveryEvent::ControllerFound {
                    node_id: name,
                    rank,
                    addr,
                })
            }
            ServiceEvent::ServiceRemoved(service_type, fullname) => {
                let name = instance_name(&fullname);
                debug!("mDNS: \"{}\" removed", name);
                if service_type == LAMP_SERVICE_TYPE {
                    Some(DiscoveryEvent::LampLost(name))
                } else if name != my_id {
                    Some(DiscoveryEvent::ControllerLost(name))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Shutdown the discovery service
    pub fn shutdown(&self) -> Result<(), mdns_sd::Error> {
        self.daemon.shutdown().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_events() {
        let lost = Discovery::handle_event(
            "me",
            ServiceEvent::ServiceRemoved(
                CONTROLLER_SERVICE_TYPE.to_string(),
                format!("peer.{}", CONTROLLER_SERVICE_TYPE),
            ),
        );
        assert_eq!(lost, Some(DiscoveryEvent::ControllerLost("peer".into())));

        let own = Discovery::handle_event(
            "me",
            ServiceEvent::ServiceRemoved(
                CONTROLLER_SERVICE_TYPE.to_string(),
                format!("me.{}", CONTROLLER_SERVICE_TYPE),
            ),
        );
        assert_eq!(own, None);

        let lamp = Discovery::handle_event(
            "me",
            ServiceEvent::ServiceRemoved(LAMP_SERVICE_TYPE.to_string(), format!("l7.{}", LAMP_SERVICE_TYPE)),
        );
        assert_eq!(lamp, Some(DiscoveryEvent::LampLost("l7".into())));
    }
}
