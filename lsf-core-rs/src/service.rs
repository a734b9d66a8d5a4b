//! Controller service: owns the stores, managers, dispatcher and elector
//! and wires their background workers together

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::discovery::DiscoveryEvent;
use crate::election::{run_elector_loop, ControllerMessage, Destination, ElectorEvent, LeaderElector, Outbound};
use crate::error::{LsfError, LsfResult};
use crate::fanout::{run_dispatch_loop, CallQueue, LampClients};
use crate::lamp::LampLink;
use crate::managers::{
    LampGroupManager, LampManager, MasterSceneManager, PresetManager, ReferenceLock, SceneManager,
};
use crate::notify::NotificationHub;
use crate::persistence::{run_persistence_loop, BlobFiles, PersistenceEvent, PersistenceScheduler};
use crate::rank::Rank;
use crate::store::{ReplicatedStore, VersionedStore, WriteTrigger};
use crate::transport::Transport;
use crate::types::{LampGroup, LampState, MasterScene, NodeId, Scene, CONTROLLER_SERVICE_VERSION};

/// Receivers consumed once by [`ControllerService::start`]
struct Workers {
    call_queue: CallQueue,
    persistence_rx: mpsc::UnboundedReceiver<PersistenceEvent>,
}

/// Channels between the elector and the controller network
pub struct ElectorHandle {
    pub inbound: mpsc::Sender<ElectorEvent>,
    pub outbound: mpsc::Receiver<Outbound>,
}

pub struct ControllerService {
    config: ControllerConfig,
    rank: Rank,
    notifications: NotificationHub,
    persistence: Arc<PersistenceScheduler>,
    lamp_clients: LampClients,

    lamps: LampManager,
    lamp_groups: Arc<LampGroupManager>,
    presets: PresetManager,
    scenes: Arc<SceneManager>,
    master_scenes: MasterSceneManager,

    elector: Arc<RwLock<LeaderElector>>,
    workers: Mutex<Option<Workers>>,
}

impl ControllerService {
    /// Build the service and load every store from disk
    pub fn new(config: ControllerConfig, link: Arc<dyn LampLink>, clock: Arc<dyn Clock>) -> LsfResult<Self> {
        let rank = config.rank.rank()?;
        let notifications = NotificationHub::default();
        let trigger = WriteTrigger::new();
        let max_blob_len = config.limits.max_blob_len;

        let preset_store = Arc::new(VersionedStore::<LampState>::new(max_blob_len, clock.clone(), trigger.clone()));
        let group_store = Arc::new(VersionedStore::<LampGroup>::new(max_blob_len, clock.clone(), trigger.clone()));
        let scene_store = Arc::new(VersionedStore::<Scene>::new(max_blob_len, clock.clone(), trigger.clone()));
        let master_store = Arc::new(VersionedStore::<MasterScene>::new(max_blob_len, clock.clone(), trigger.clone()));

        let stores: Vec<Arc<dyn ReplicatedStore>> = vec![
            preset_store.clone() as Arc<dyn ReplicatedStore>,
            group_store.clone() as Arc<dyn ReplicatedStore>,
            scene_store.clone() as Arc<dyn ReplicatedStore>,
            master_store.clone() as Arc<dyn ReplicatedStore>,
        ];
        let files = BlobFiles::new(&config.storage_dir)?;
        let (persistence_tx, persistence_rx) = mpsc::unbounded_channel();
        let persistence = Arc::new(PersistenceScheduler::new(
            files,
            stores,
            trigger,
            clock.clone(),
            persistence_tx,
        ));
        persistence.load_all();

        let (lamp_clients, call_queue) = LampClients::new(link, config.fanout.clone(), notifications.clone());

        let limits = config.limits.clone();
        let default_state = config.default_lamp_state;

        let lamps = LampManager::new(
            lamp_clients.clone(),
            preset_store.clone(),
            limits.clone(),
            default_state,
            notifications.clone(),
        );
        let references = ReferenceLock::default();
        let lamp_groups = Arc::new(LampGroupManager::new(
            group_store,
            scene_store.clone(),
            preset_store.clone(),
            lamp_clients.clone(),
            limits.clone(),
            default_state,
            notifications.clone(),
            references.clone(),
        ));
        let presets = PresetManager::new(
            preset_store.clone(),
            scene_store.clone(),
            limits.clone(),
            notifications.clone(),
            references,
        );
        let scenes = Arc::new(SceneManager::new(
            scene_store,
            lamp_groups.clone(),
            preset_store,
            master_store.clone(),
            lamp_clients.clone(),
            limits.clone(),
            notifications.clone(),
        ));
        let master_scenes = MasterSceneManager::new(
            master_store,
            scenes.clone(),
            lamp_clients.clone(),
            limits,
            notifications.clone(),
        );

        let elector = LeaderElector::new(
            config.node_id.clone(),
            rank,
            config.election.clone(),
            clock,
            persistence.clone(),
        );

        info!("Controller: {} ready (rank {})", config.node_id, rank);

        Ok(Self {
            config,
            rank,
            notifications,
            persistence,
            lamp_clients,
            lamps,
            lamp_groups,
            presets,
            scenes,
            master_scenes,
            elector: Arc::new(RwLock::new(elector)),
            workers: Mutex::new(Some(Workers {
                call_queue,
                persistence_rx,
            })),
        })
    }

    /// Spawn the dispatcher, persistence and elector workers. Returns the
    /// elector's channels for the network side.
    pub fn start(&self) -> LsfResult<ElectorHandle> {
        let workers = self
            .workers
            .lock()
            .take()
            .ok_or_else(|| LsfError::UnexpectedState("controller service already started".to_string()))?;

        tokio::spawn(run_dispatch_loop(self.lamp_clients.clone(), workers.call_queue));
        tokio::spawn(run_persistence_loop(self.persistence.clone()));

        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        tokio::spawn(run_elector_loop(
            self.elector.clone(),
            inbound_rx,
            workers.persistence_rx,
            outbound_tx,
        ));

        Ok(ElectorHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn notifications(&self) -> &NotificationHub {
        &self.notifications
    }

    pub fn persistence(&self) -> &Arc<PersistenceScheduler> {
        &self.persistence
    }

    pub fn lamp_clients(&self) -> &LampClients {
        &self.lamp_clients
    }

    pub fn lamps(&self) -> &LampManager {
        &self.lamps
    }

    pub fn lamp_groups(&self) -> &LampGroupManager {
        &self.lamp_groups
    }

    pub fn presets(&self) -> &PresetManager {
        &self.presets
    }

    pub fn scenes(&self) -> &SceneManager {
        &self.scenes
    }

    pub fn master_scenes(&self) -> &MasterSceneManager {
        &self.master_scenes
    }

    pub fn elector(&self) -> &Arc<RwLock<LeaderElector>> {
        &self.elector
    }

    pub fn get_version(&self) -> u32 {
        CONTROLLER_SERVICE_VERSION
    }

    pub async fn is_leader(&self) -> bool {
        self.elector.read().await.is_leader()
    }

    pub async fn leader(&self) -> Option<NodeId> {
        self.elector.read().await.leader().cloned()
    }

    /// Empty every entity table. Dependents go first so no table is ever
    /// left referring to a cleared one.
    pub fn reset_controller_service(&self) -> LsfResult<()> {
        info!("Controller: Resetting every entity table");
        self.master_scenes.table().reset()?;
        self.scenes.table().reset()?;
        self.lamp_groups.table().reset()?;
        self.presets.table().reset()
    }
}

/// Route elector traffic over UDP and feed discovery results into the
/// elector and the lamp session table
pub async fn run_controller_network(
    transport: Arc<Transport<ControllerMessage>>,
    mut incoming: mpsc::Receiver<(ControllerMessage, SocketAddr)>,
    mut discovery: mpsc::Receiver<DiscoveryEvent>,
    handle: ElectorHandle,
    lamps: LampClients,
) {
    let ElectorHandle {
        inbound,
        mut outbound,
    } = handle;
    let mut addrs: HashMap<NodeId, SocketAddr> = HashMap::new();

    loop {
        tokio::select! {
            Some((msg, src)) = incoming.recv() => {
                addrs.insert(msg.sender().clone(), src);
                if inbound.send(ElectorEvent::Message(msg)).await.is_err() {
                    break;
                }
            }

            Some(event) = discovery.recv() => match event {
                DiscoveryEvent::ControllerFound { node_id, addr, .. } => {
                    addrs.insert(node_id, addr);
                }
                DiscoveryEvent::ControllerLost(node_id) => {
                    addrs.remove(&node_id);
                    if inbound.send(ElectorEvent::PeerLost(node_id)).await.is_err() {
                        break;
                    }
                }
                DiscoveryEvent::LampFound(endpoint) => lamps.lamp_found(endpoint),
                DiscoveryEvent::LampLost(lamp_id) => lamps.lamp_lost(&lamp_id),
            },

            out = outbound.recv() => {
                let out = match out {
                    Some(out) => out,
                    None => break,
                };
                let targets: Vec<SocketAddr> = match &out.to {
                    Destination::Peer(node_id) => match addrs.get(node_id) {
                        Some(addr) => vec![*addr],
                        None => {
                            debug!("Network: No address for {}, dropping message", node_id);
                            continue;
                        }
                    },
                    Destination::AllPeers => addrs.values().copied().collect(),
                    Destination::AllExcept(skip) => addrs
                        .iter()
                        .filter(|(node_id, _)| *node_id != skip)
                        .map(|(_, addr)| *addr)
                        .collect(),
                };
                if let Err(e) = transport.broadcast(&out.message, &targets).await {
                    warn!("Network: Failed to send {:?}: {}", out.message, e);
                }
            }
        }
    }
    info!("Network: Elector channels closed, stopping");
}
