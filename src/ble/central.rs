//! SoftDevice central glue (embedded builds only).
//!
//! Bridges the synchronous [`PairingStack`] command interface onto the
//! async SoftDevice central API. Commands are submitted to a channel and
//! executed by [`link_task`]; completions come back through the shared
//! link scratch and the flag bus, exactly as the pairing machine
//! expects. The machine never sees this module.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use defmt::{info, warn};
use heapless::Vec;
use nrf_softdevice::ble::{central, gatt_client, Address, Connection, Uuid};
use nrf_softdevice::{raw, Softdevice};

use crate::ble::shared::{
    on_advert, on_attribute, on_connected, on_disconnected, on_notification, LinkShared,
    ScanVerdict,
};
use crate::ble::{
    ConnHandle, ConnectionParams, DataLength, DiscoverKind, DisconnectReason, GattAttribute,
    PairingStack, PeerAddress, Uuid128, CCC_UUID16, READ_CHAR_UUID, WRITE_CHAR_UUID,
};
use crate::bus::FlagBus;
use crate::config::{SCAN_CMD_LEN, SCAN_INTERVAL, SCAN_WINDOW};
use crate::error::StackError;
use crate::power::idle::{publish_radio_budget, publish_radio_negotiating};

/// 0.625 ms advertising/scan units to 32.768 kHz ticks.
const fn scan_units_to_ticks(units: u32) -> u32 {
    units * 512 / 25
}

/// 1.25 ms connection-interval units to 32.768 kHz ticks.
const fn conn_units_to_ticks(units: u32) -> u32 {
    units * 1024 / 25
}

/// Command queue depth. The machine issues at most one command per
/// processed flag, so a small queue suffices.
pub const LINK_CMD_DEPTH: usize = 4;

/// Notification payloads are tiny ("OK" and the empty ack).
const NOTIFY_MAX: usize = 8;

pub type LinkCommandChannel = Channel<CriticalSectionRawMutex, LinkCommand, LINK_CMD_DEPTH>;

/// One submitted BLE operation. Mirrors the `PairingStack` surface.
pub enum LinkCommand {
    StartScan,
    Connect(PeerAddress, ConnectionParams),
    /// Cancel a pending connect or drop the live connection; covers
    /// both `cancel_connect` and `disconnect`.
    Teardown,
    SetDataLength(DataLength),
    Discover(DiscoverKind),
    Subscribe { ccc: u16 },
    Write { handle: u16, payload: Vec<u8, SCAN_CMD_LEN> },
}

/// `PairingStack` implementation over the command channel.
///
/// Submissions are non-blocking: a full queue maps to `Busy`, which the
/// machine treats like any other rejected command.
pub struct SoftdeviceLink {
    cmd_tx: Sender<'static, CriticalSectionRawMutex, LinkCommand, LINK_CMD_DEPTH>,
    local: PeerAddress,
}

impl SoftdeviceLink {
    pub fn new(
        sd: &Softdevice,
        cmd_tx: Sender<'static, CriticalSectionRawMutex, LinkCommand, LINK_CMD_DEPTH>,
    ) -> Self {
        let local = PeerAddress(nrf_softdevice::ble::get_address(sd).bytes());
        Self { cmd_tx, local }
    }

    fn submit(&self, cmd: LinkCommand) -> Result<(), StackError> {
        self.cmd_tx.try_send(cmd).map_err(|_| StackError::Busy)
    }
}

impl PairingStack for SoftdeviceLink {
    fn start_scan(&mut self) -> Result<(), StackError> {
        self.submit(LinkCommand::StartScan)
    }

    fn connect(&mut self, peer: PeerAddress, params: &ConnectionParams) -> Result<(), StackError> {
        self.submit(LinkCommand::Connect(peer, *params))
    }

    fn cancel_connect(&mut self) {
        let _ = self.submit(LinkCommand::Teardown);
    }

    fn disconnect(&mut self, _conn: ConnHandle, _reason: DisconnectReason) {
        let _ = self.submit(LinkCommand::Teardown);
    }

    fn set_data_length(&mut self, _conn: ConnHandle, len: DataLength) -> Result<(), StackError> {
        self.submit(LinkCommand::SetDataLength(len))
    }

    fn discover(
        &mut self,
        _conn: ConnHandle,
        kind: DiscoverKind,
        _start_handle: u16,
    ) -> Result<(), StackError> {
        self.submit(LinkCommand::Discover(kind))
    }

    fn subscribe(
        &mut self,
        _conn: ConnHandle,
        _notify_handle: u16,
        ccc_handle: u16,
    ) -> Result<(), StackError> {
        self.submit(LinkCommand::Subscribe { ccc: ccc_handle })
    }

    fn write(&mut self, _conn: ConnHandle, handle: u16, payload: &[u8]) -> Result<(), StackError> {
        let payload = Vec::from_slice(payload).map_err(|_| StackError::WriteFailed)?;
        self.submit(LinkCommand::Write { handle, payload })
    }

    fn local_address(&self) -> PeerAddress {
        self.local
    }
}

/// GATT client that forwards every discovered attribute into the shared
/// scratch. Keyed on the train peer's primary service UUID
/// (`00070000-...`, the base of both characteristic UUIDs).
struct TrainClient {
    shared: &'static LinkShared,
    bus: &'static FlagBus,
    write_uuid: Uuid,
    read_uuid: Uuid,
    notify_handle: u16,
}

const SERVICE_UUID: Uuid128 = Uuid128([
    0x00, 0x07, 0x00, 0x00, 0x07, 0x45, 0x46, 0x50, 0x8d, 0x93, 0xdf, 0x59, 0xbe, 0x2f, 0xc1, 0x0a,
]);

impl gatt_client::Client for TrainClient {
    type Event = Vec<u8, NOTIFY_MAX>;

    fn on_hvx(
        &self,
        _conn: &Connection,
        _type_: gatt_client::HvxType,
        handle: u16,
        data: &[u8],
    ) -> Option<Self::Event> {
        if handle == self.notify_handle {
            Vec::from_slice(data).ok()
        } else {
            None
        }
    }

    fn uuid() -> Uuid {
        // The stack registers vendor UUIDs least-significant byte
        // first; the canonical constants must be reversed here.
        Uuid::new_128(&SERVICE_UUID.to_le_bytes())
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self {
            shared: link_shared(),
            bus: event_bus(),
            write_uuid: Uuid::new_128(&WRITE_CHAR_UUID.to_le_bytes()),
            read_uuid: Uuid::new_128(&READ_CHAR_UUID.to_le_bytes()),
            notify_handle: 0,
        }
    }

    fn discovered_characteristic(
        &mut self,
        characteristic: &gatt_client::Characteristic,
        descriptors: &[gatt_client::Descriptor],
    ) {
        let uuid = match characteristic.uuid {
            Some(u) => u,
            None => return,
        };

        let mapped = if uuid == self.write_uuid {
            Some(WRITE_CHAR_UUID)
        } else if uuid == self.read_uuid {
            self.notify_handle = characteristic.handle_value;
            Some(READ_CHAR_UUID)
        } else {
            None
        };

        if let Some(mapped) = mapped {
            on_attribute(
                self.shared,
                GattAttribute::Characteristic {
                    uuid: mapped,
                    value_handle: characteristic.handle_value,
                },
            );
            for desc in descriptors {
                if desc.uuid == Some(Uuid::new_16(CCC_UUID16)) {
                    on_attribute(
                        self.shared,
                        GattAttribute::Descriptor {
                            uuid16: CCC_UUID16,
                            handle: desc.handle,
                        },
                    );
                }
            }
        }
    }

    fn discovery_complete(&mut self) -> Result<(), gatt_client::DiscoverError> {
        crate::ble::shared::on_discovery_complete(self.shared, self.bus);
        Ok(())
    }
}

// The `Client` trait constructs instances with no extra context, so the
// scratch and bus the callbacks write into live here.
static LINK_SHARED: LinkShared = LinkShared::new();
static EVENT_BUS: FlagBus = FlagBus::new();

pub fn link_shared() -> &'static LinkShared {
    &LINK_SHARED
}

pub fn event_bus() -> &'static FlagBus {
    &EVENT_BUS
}

/// The BLE worker task: executes submitted commands against the
/// SoftDevice, one at a time. Long-running operations (scan, connect,
/// the notification pump) are cancelled by the next teardown-class
/// command arriving on the queue.
pub async fn link_task(
    sd: &'static Softdevice,
    cmd_rx: Receiver<'static, CriticalSectionRawMutex, LinkCommand, LINK_CMD_DEPTH>,
) -> ! {
    let shared = link_shared();
    let bus = event_bus();

    let mut session: Option<Session> = None;
    let mut pending: Option<LinkCommand> = None;

    loop {
        let cmd = match pending.take() {
            Some(cmd) => cmd,
            None => match &session {
                // While discovered, pump notifications between commands.
                Some(s) if s.client.is_some() => {
                    match select(cmd_rx.receive(), s.pump(bus)).await {
                        Either::First(cmd) => cmd,
                        Either::Second(()) => {
                            info!("link closed by peer");
                            on_disconnected(shared);
                            session = None;
                            publish_radio_negotiating();
                            continue;
                        }
                    }
                }
                _ => cmd_rx.receive().await,
            },
        };

        match cmd {
            LinkCommand::StartScan => {
                session = None;
                match run_scan(sd, shared, bus, &cmd_rx).await {
                    ScanOutcome::PeerFound => {}
                    ScanOutcome::Interrupted(cmd) => pending = Some(cmd),
                    ScanOutcome::Failed => warn!("scan ended with error"),
                }
            }
            LinkCommand::Connect(peer, params) => {
                session = None;
                publish_radio_negotiating();
                match run_connect(sd, peer, &params, &cmd_rx).await {
                    ConnectOutcome::Up(conn) => {
                        info!("connected to train peer");
                        publish_radio_budget(conn_units_to_ticks(u32::from(params.interval_max)));
                        on_connected(shared, bus, ConnHandle(0));
                        session = Some(Session { conn, client: None });
                    }
                    ConnectOutcome::Interrupted(cmd) => pending = Some(cmd),
                    // The machine's bounded wait notices the silence.
                    ConnectOutcome::Failed => warn!("connect failed"),
                }
            }
            LinkCommand::Teardown => {
                // Dropping the Connection releases the link; an aborted
                // connect was already cancelled when its future dropped.
                if session.take().is_some() {
                    info!("link torn down");
                }
                publish_radio_negotiating();
            }
            LinkCommand::SetDataLength(len) => {
                if let Some(s) = &session {
                    s.request_data_length(len);
                }
            }
            LinkCommand::Discover(_kind) => {
                // The SoftDevice walks characteristics and descriptors
                // in a single pass, so both discovery kinds map to the
                // same full-service run.
                if let Some(s) = &mut session {
                    match gatt_client::discover::<TrainClient>(&s.conn).await {
                        Ok(client) => s.client = Some(client),
                        Err(_) => {
                            warn!("service discovery failed");
                            // No completion flag arrives; the bounded
                            // wait recovers.
                        }
                    }
                }
            }
            LinkCommand::Subscribe { ccc } => {
                if let Some(s) = &session {
                    // Notifications on: CCC value 0x0001, little-endian.
                    if gatt_client::write(&s.conn, ccc, &[0x01, 0x00]).await.is_err() {
                        warn!("CCC write failed");
                    }
                    // The ack is the peer's empty notification, pumped
                    // between commands.
                }
            }
            LinkCommand::Write { handle, payload } => {
                if let Some(s) = &session {
                    if gatt_client::write(&s.conn, handle, &payload).await.is_err() {
                        warn!("handshake write failed");
                    }
                }
            }
        }
    }
}

/// One live connection plus its discovered client, if any.
struct Session {
    conn: Connection,
    client: Option<TrainClient>,
}

impl Session {
    /// Run the notification pump until the connection drops. Resolves
    /// only on disconnect; notifications are forwarded as a side effect.
    /// Only called once discovery has produced a client.
    async fn pump(&self, bus: &'static FlagBus) {
        if let Some(client) = &self.client {
            let _ = gatt_client::run(&self.conn, client, |payload| {
                on_notification(bus, &payload);
            })
            .await;
        }
    }

    fn request_data_length(&self, len: DataLength) {
        let params = raw::ble_gap_data_length_params_t {
            max_tx_octets: len.tx_octets,
            max_rx_octets: len.tx_octets,
            max_tx_time_us: len.tx_time_us,
            max_rx_time_us: len.tx_time_us,
        };
        // Advisory: a refusal leaves the default 27-octet PDUs.
        if let Some(handle) = self.conn.handle() {
            let ret = unsafe {
                raw::sd_ble_gap_data_length_update(handle, &params, core::ptr::null_mut())
            };
            if ret != raw::NRF_SUCCESS {
                warn!("data length update refused: {}", ret);
            }
        }
    }
}

enum ScanOutcome {
    PeerFound,
    Interrupted(LinkCommand),
    Failed,
}

/// Scan until a train peer is spotted or another command arrives.
async fn run_scan(
    sd: &'static Softdevice,
    shared: &'static LinkShared,
    bus: &'static FlagBus,
    cmd_rx: &Receiver<'static, CriticalSectionRawMutex, LinkCommand, LINK_CMD_DEPTH>,
) -> ScanOutcome {
    info!("scanning for train peer");

    // While scanning the next radio event is at most one scan interval
    // away; sleeps are clamped to that.
    publish_radio_budget(scan_units_to_ticks(SCAN_INTERVAL as u32));

    let config = central::ScanConfig {
        // Active scan so named scan responses are seen too.
        active: true,
        interval: SCAN_INTERVAL as u32,
        window: SCAN_WINDOW as u32,
        ..Default::default()
    };

    let scan = central::scan(sd, &config, |params| {
        let data =
            unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };
        let addr = PeerAddress(params.peer_addr.addr);
        match on_advert(shared, bus, addr, data) {
            ScanVerdict::Stop => Some(()),
            ScanVerdict::Continue => None,
        }
    });

    match select(cmd_rx.receive(), scan).await {
        Either::First(cmd) => ScanOutcome::Interrupted(cmd),
        Either::Second(Ok(())) => ScanOutcome::PeerFound,
        Either::Second(Err(_)) => ScanOutcome::Failed,
    }
}

enum ConnectOutcome {
    Up(Connection),
    Interrupted(LinkCommand),
    Failed,
}

async fn run_connect(
    sd: &'static Softdevice,
    peer: PeerAddress,
    params: &ConnectionParams,
    cmd_rx: &Receiver<'static, CriticalSectionRawMutex, LinkCommand, LINK_CMD_DEPTH>,
) -> ConnectOutcome {
    let address = Address::new(nrf_softdevice::ble::AddressType::Public, peer.0);
    let whitelist = [&address];
    let config = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: params.interval_min,
            max_conn_interval: params.interval_max,
            slave_latency: params.latency,
            conn_sup_timeout: params.supervision_timeout,
        },
        ..Default::default()
    };

    match select(cmd_rx.receive(), central::connect(sd, &config)).await {
        Either::First(cmd) => ConnectOutcome::Interrupted(cmd),
        Either::Second(Ok(conn)) => ConnectOutcome::Up(conn),
        Either::Second(Err(_)) => ConnectOutcome::Failed,
    }
}
