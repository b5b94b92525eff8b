//! Send-packet adapter, component B: the two-egress model over live
//! interfaces, backed by `pnet_datalink` the way `network_project/src/main.rs`
//! opens interfaces for raw send/receive.

use etherparse::SlicedPacket;
use pnet_datalink::{self, Channel, DataLinkSender, NetworkInterface};
use tracing::debug;

use crate::error::ReplayError;
use crate::types::LinkType;

/// A single open egress: send raw frames, report link type, and support an
/// abort that unblocks any in-flight send.
pub trait SendPacket: Send {
    fn send(&mut self, data: &[u8]) -> Result<(), ReplayError>;
    fn dlt(&self) -> LinkType;
    fn close(&mut self);
}

/// `pnet_datalink`-backed egress, opened on a named live interface.
pub struct DatalinkSendPacket {
    tx: Box<dyn DataLinkSender>,
    dlt: LinkType,
}

/// Ethernet is the only link type this crate's live send path supports;
/// `pcap`-reported DLTs for other encapsulations are rejected at
/// `ReplayContext::init` time instead of here.
const DLT_EN10MB: i32 = 1;

impl DatalinkSendPacket {
    pub fn open(interface_name: &str) -> Result<Self, ReplayError> {
        let interfaces = pnet_datalink::interfaces();
        let interface = interfaces
            .into_iter()
            .find(|iface: &NetworkInterface| iface.name == interface_name)
            .ok_or_else(|| {
                ReplayError::configuration(format!("no such interface: {interface_name}"))
            })?;

        let channel = pnet_datalink::channel(&interface, Default::default())
            .map_err(|e| ReplayError::io(format!("opening {interface_name}: {e}")))?;

        let tx = match channel {
            Channel::Ethernet(tx, _rx) => tx,
            _ => {
                return Err(ReplayError::configuration(format!(
                    "unsupported channel type on {interface_name}"
                )))
            }
        };

        Ok(Self {
            tx,
            dlt: LinkType(DLT_EN10MB),
        })
    }
}

impl SendPacket for DatalinkSendPacket {
    fn send(&mut self, data: &[u8]) -> Result<(), ReplayError> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(sliced) = SlicedPacket::from_ethernet(data) {
                debug!(link = ?sliced.link, "sending frame");
            }
        }
        match self.tx.send_to(data, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(ReplayError::io(format!("send failed: {e}"))),
            None => Err(ReplayError::io("send_to returned no result".to_string())),
        }
    }

    fn dlt(&self) -> LinkType {
        self.dlt
    }

    fn close(&mut self) {
        // `DataLinkSender` has no explicit close; dropping the trait object
        // releases the underlying socket.
    }
}

/// In-memory mock egress for tests: records every frame it was handed and
/// can simulate a short write / failure on a chosen packet index, the way
/// the original test harness used a loopback `sendpacket_t`.
pub struct LoopbackSendPacket {
    pub sent: Vec<Vec<u8>>,
    pub dlt: LinkType,
    pub fail_at: Option<usize>,
}

impl LoopbackSendPacket {
    pub fn new(dlt: LinkType) -> Self {
        Self {
            sent: Vec::new(),
            dlt,
            fail_at: None,
        }
    }

    pub fn fail_at_index(mut self, idx: usize) -> Self {
        self.fail_at = Some(idx);
        self
    }
}

impl SendPacket for LoopbackSendPacket {
    fn send(&mut self, data: &[u8]) -> Result<(), ReplayError> {
        let idx = self.sent.len();
        if self.fail_at == Some(idx) {
            self.sent.push(data.to_vec());
            return Err(ReplayError::io("simulated short write".to_string()));
        }
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn dlt(&self) -> LinkType {
        self.dlt
    }

    fn close(&mut self) {}
}
