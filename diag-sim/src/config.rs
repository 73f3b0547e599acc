use diag_backend::{PortClass, RxPath};
use diag_common::{DevId, DevPort};

/// Pipe-local number of the PCIe CPU port on pipe 0.
pub const CPU_PORT_LOCAL: u16 = 64;
/// Pipe-local number of the Ethernet CPU port on pipe 0.
pub const ETH_CPU_PORT_LOCAL: u16 = 66;
/// Pipe-local number of the packet generator port on every pipe.
pub const PKTGEN_PORT_LOCAL: u16 = 68;
/// Pipe-local number of the first internal port.
pub const INTERNAL_PORT_BASE: u16 = 96;
/// Maximum number of forwarding hops before a packet is dropped as looping.
pub const DEFAULT_HOP_LIMIT: usize = 256;

/// Shape of the simulated devices.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Devices present in the switch.
    pub devices: Vec<DevId>,
    pub num_pipes: u16,
    /// Front-panel ports per pipe, numbered from 0.
    pub front_ports: u16,
    /// Ports without a connector per pipe, numbered from [`INTERNAL_PORT_BASE`].
    pub internal_ports: u16,
    /// The first `mesh_ports` front-panel ports of each pipe are cabled into the mesh.
    pub mesh_ports: u16,
    pub eth_cpu: bool,
    /// The receive path packets punted to the CPU are delivered on.
    pub punt_path: RxPath,
    pub hop_limit: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            devices: vec![DevId(0)],
            num_pipes: 2,
            front_ports: 16,
            internal_ports: 4,
            mesh_ports: 4,
            eth_cpu: true,
            punt_path: RxPath::Dma,
            hop_limit: DEFAULT_HOP_LIMIT,
        }
    }
}

impl SimConfig {
    pub fn devices(mut self, devices: Vec<DevId>) -> Self {
        self.devices = devices;
        self
    }

    pub fn pipes(mut self, num_pipes: u16) -> Self {
        self.num_pipes = num_pipes.max(1);
        self
    }

    pub fn front_ports(mut self, ports: u16) -> Self {
        self.front_ports = ports.min(CPU_PORT_LOCAL);
        self
    }

    pub fn internal_ports(mut self, ports: u16) -> Self {
        self.internal_ports = ports.min(128 - INTERNAL_PORT_BASE);
        self
    }

    pub fn mesh_ports(mut self, ports: u16) -> Self {
        self.mesh_ports = ports;
        self
    }

    pub fn eth_cpu(mut self, enabled: bool) -> Self {
        self.eth_cpu = enabled;
        self
    }

    pub fn punt_path(mut self, path: RxPath) -> Self {
        self.punt_path = path;
        self
    }

    pub(crate) fn has_device(&self, dev: DevId) -> bool {
        self.devices.contains(&dev)
    }

    pub(crate) fn cpu_port(&self) -> DevPort {
        DevPort::new(0, CPU_PORT_LOCAL)
    }

    pub(crate) fn eth_cpu_port(&self) -> Option<DevPort> {
        self.eth_cpu.then(|| DevPort::new(0, ETH_CPU_PORT_LOCAL))
    }

    pub(crate) fn pktgen_port(&self, pipe: u16) -> DevPort {
        DevPort::new(pipe, PKTGEN_PORT_LOCAL)
    }

    pub(crate) fn ports(&self, class: PortClass) -> Vec<DevPort> {
        let mut ports = Vec::new();
        for pipe in 0..self.num_pipes {
            let (front, internal) = match class {
                PortClass::All => (self.front_ports, self.internal_ports),
                PortClass::Internal => (0, self.internal_ports),
                PortClass::Mesh => (self.mesh_ports.min(self.front_ports), 0),
            };
            ports.extend((0..front).map(|local| DevPort::new(pipe, local)));
            ports.extend(
                (INTERNAL_PORT_BASE..INTERNAL_PORT_BASE + internal).map(|l| DevPort::new(pipe, l)),
            );
        }
        ports
    }

    /// Whether `port` can carry traffic: device ports plus the CPU and generator ports.
    pub(crate) fn port_exists(&self, port: DevPort) -> bool {
        if port.pipe() >= self.num_pipes {
            return false;
        }
        let local = port.local();
        local < self.front_ports
            || (INTERNAL_PORT_BASE..INTERNAL_PORT_BASE + self.internal_ports).contains(&local)
            || port == self.cpu_port()
            || Some(port) == self.eth_cpu_port()
            || local == PKTGEN_PORT_LOCAL
    }
}
