//! SNMP Trap Listener for trapsink
//!
//! Binds the UDP socket described by validated listener parameters and
//! accepts trap datagrams whose message header carries the configured
//! version and one of the configured community strings. PDU decoding is
//! left to whoever consumes the accepted packets.

use crate::config::{SnmpVersion, TrapListenerConfig, TrapListenerParams, UDP_TRANSPORT};
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;
const OCTET_STRING_TAG: u8 = 0x04;

/// Version and community read from the front of an SNMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: SnmpVersion,
    pub community: String,
    /// Offset of the PDU that follows the community string.
    pub pdu_offset: usize,
    /// Length of the outer SEQUENCE including its header. Bytes past it are
    /// not part of the message.
    pub message_len: usize,
}

#[derive(Debug, Clone)]
pub struct TrapPacket {
    pub source: SocketAddr,
    pub version: SnmpVersion,
    pub community: String,
    /// The SNMP message, without any trailing bytes from the datagram.
    pub data: Vec<u8>,
    pub pdu_offset: usize,
}

impl TrapPacket {
    /// The undecoded trap PDU.
    pub fn pdu(&self) -> &[u8] {
        &self.data[self.pdu_offset..]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketRejection {
    Unparseable { reason: String },
    VersionMismatch { expected: SnmpVersion, received: SnmpVersion },
    UnknownCommunity { received: String },
}

impl fmt::Display for PacketRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable { reason } => write!(f, "SNMP parsing failed: {}", reason),
            Self::VersionMismatch { expected, received } => {
                write!(f, "SNMP {} not accepted by a {} listener", received, expected)
            }
            Self::UnknownCommunity { received } => {
                write!(f, "Invalid community string '{}'", received)
            }
        }
    }
}

pub struct TrapListener {
    config: TrapListenerConfig,
    params: TrapListenerParams,
    socket: UdpSocket,
    trap_sender: mpsc::UnboundedSender<TrapPacket>,
}

impl TrapListener {
    /// Bind the listener socket. `config` must be the configuration `params`
    /// were built from; its community strings gate incoming packets.
    pub async fn bind(
        config: TrapListenerConfig,
        params: TrapListenerParams,
        trap_sender: mpsc::UnboundedSender<TrapPacket>,
    ) -> Result<Self> {
        if params.transport != UDP_TRANSPORT {
            anyhow::bail!("Unsupported transport: {}", params.transport);
        }

        let ip: IpAddr = config
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", config.bind_address))?;
        let bind_addr = SocketAddr::new(ip, params.port);

        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        Ok(Self {
            config,
            params,
            socket,
            trap_sender,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to read listener socket address")
    }

    /// Receive traps until the receiving side of the trap channel is dropped.
    /// Everything is logged through the dispatcher carried in the parameters.
    pub async fn run(self) -> Result<()> {
        let dispatch = self.params.logger.clone();
        self.receive_loop().with_subscriber(dispatch).await
    }

    async fn receive_loop(self) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!(
            "SNMP {} trap listener started on {}/{}",
            self.params.version, local_addr, self.params.transport
        );

        let mut buffer = vec![0u8; self.config.max_packet_size];
        let mut packet_count = 0u64;

        loop {
            let received = tokio::select! {
                _ = self.trap_sender.closed() => {
                    info!("Trap channel closed, stopping listener on {}", local_addr);
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buffer) => received,
            };

            let (len, src_addr) = match received {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive UDP packet: {}", e);
                    continue;
                }
            };

            packet_count += 1;
            if packet_count % 1000 == 0 {
                info!("Processed {} UDP packets on {}", packet_count, local_addr);
            }

            match self.accept_packet(&buffer[..len], src_addr) {
                Ok(packet) => {
                    debug!("Accepted SNMP {} trap from {} ({} bytes)", packet.version, src_addr, len);
                    if self.trap_sender.send(packet).is_err() {
                        info!("Trap channel closed, stopping listener on {}", local_addr);
                        return Ok(());
                    }
                }
                Err(rejection) => {
                    warn!("Rejected SNMP packet from {}: {}", src_addr, rejection);
                }
            }
        }
    }

    /// Check a datagram's header against the listener's version and
    /// configured community strings.
    pub fn accept_packet(&self, data: &[u8], source: SocketAddr) -> Result<TrapPacket, PacketRejection> {
        let header = parse_message_header(data).map_err(|e| PacketRejection::Unparseable {
            reason: format!("{:#}", e),
        })?;

        if header.version != self.params.version {
            return Err(PacketRejection::VersionMismatch {
                expected: self.params.version,
                received: header.version,
            });
        }

        if !self.config.accepts_community(&header.community) {
            return Err(PacketRejection::UnknownCommunity {
                received: header.community,
            });
        }

        Ok(TrapPacket {
            source,
            version: header.version,
            community: header.community,
            data: data[..header.message_len].to_vec(),
            pdu_offset: header.pdu_offset,
        })
    }
}

/// Parse the message SEQUENCE, version INTEGER and community OCTET STRING.
/// Every field must lie inside the SEQUENCE, and a PDU must follow the
/// community string.
pub fn parse_message_header(data: &[u8]) -> Result<MessageHeader> {
    let (tag, seq_len, mut offset) =
        read_tlv_header(data, 0, data.len()).context("message SEQUENCE")?;
    if tag != SEQUENCE_TAG {
        anyhow::bail!("Not a valid SNMP message");
    }
    let end = offset + seq_len;

    let (tag, len, header_len) = read_tlv_header(data, offset, end).context("version field")?;
    if tag != INTEGER_TAG {
        anyhow::bail!("Expected INTEGER tag for SNMP version");
    }
    if len != 1 {
        anyhow::bail!("Invalid SNMP version field length: {}", len);
    }
    let raw_version = data[offset + header_len];
    let version = SnmpVersion::from_wire(raw_version)
        .ok_or_else(|| anyhow!("Unknown SNMP version: {}", raw_version))?;
    offset += header_len + len;

    let (tag, len, header_len) = read_tlv_header(data, offset, end).context("community field")?;
    if tag != OCTET_STRING_TAG {
        anyhow::bail!("Expected community string for SNMP {}", version);
    }
    let start = offset + header_len;
    let community = std::str::from_utf8(&data[start..start + len])
        .context("Community string contains invalid UTF-8")?
        .to_string();

    let pdu_offset = start + len;
    if pdu_offset >= end {
        anyhow::bail!("No PDU after community string");
    }

    Ok(MessageHeader {
        version,
        community,
        pdu_offset,
        message_len: end,
    })
}

/// Read a BER tag and length at `offset`. Returns the tag, the content
/// length and the header length. Header and content must end at or before
/// `end`, which is never past `data.len()`.
fn read_tlv_header(data: &[u8], offset: usize, end: usize) -> Result<(u8, usize, usize)> {
    if offset + 2 > end {
        anyhow::bail!("Truncated header at offset {}", offset);
    }

    let tag = data[offset];
    let first = data[offset + 1];
    let (len, header_len) = if first & 0x80 == 0 {
        (first as usize, 2)
    } else {
        let len_bytes = (first & 0x7F) as usize;
        if len_bytes == 0 || len_bytes > 4 {
            anyhow::bail!("Invalid length encoding at offset {}", offset);
        }
        if offset + 2 + len_bytes > end {
            anyhow::bail!("Truncated length at offset {}", offset);
        }
        let len = data[offset + 2..offset + 2 + len_bytes]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, 2 + len_bytes)
    };

    if offset + header_len + len > end {
        anyhow::bail!(
            "Length {} at offset {} runs past the enclosing end {}",
            len,
            offset,
            end
        );
    }

    Ok((tag, len, header_len))
}
