//! The typed event model.
//!
//! Each event is a Rust struct with a `build` constructor that validates
//! its own shape, a `prepare` step that converts it to the wire tuple
//! form (code first, then fields in a fixed order), and a
//! `restore` step that is the inverse, validating arity and field types
//! and failing with [`ProtoError::MalformedEvent`] on any mismatch.

use ciborium::value::Value;
use uuid::Uuid;

use crate::value::{
    as_bytes, as_str, as_u16, as_u32, as_u64, as_u8, as_uuid, bytes_val, expect_arity, field,
    str_val, u16_val, u32_val, u64_val, u8_val, uuid_val,
};
use crate::{
    ProtoError, Result, CODE_ACK, CODE_ALIVE, CODE_ANTI_ENTROPY, CODE_DEAD, CODE_INDIRECT_ACK,
    CODE_INDIRECT_PING, CODE_JOIN, CODE_LEFT, CODE_NEW_CLUSTER_SIZE, CODE_PAYLOAD, CODE_PING,
    CODE_PROBE, CODE_PROBE_ACK, CODE_SUSPECT,
};

/// A single prepared event, ready for the wire codec: a CBOR array
/// whose first element is the event code.
pub type PreparedEvent = Vec<Value>;

/// A node's membership status, as carried on the wire (AntiEntropy
/// entries, IndirectAck's sender status, ProbeAck's declared status).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Stop,
    Join,
    Alive,
    Suspect,
    Left,
    Dead,
    Unknown,
}

impl NodeStatus {
    pub fn code(self) -> u8 {
        match self {
            NodeStatus::Stop => 0,
            NodeStatus::Join => 1,
            NodeStatus::Alive => 2,
            NodeStatus::Suspect => 3,
            NodeStatus::Left => 4,
            NodeStatus::Dead => 5,
            NodeStatus::Unknown => 6,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => NodeStatus::Stop,
            1 => NodeStatus::Join,
            2 => NodeStatus::Alive,
            3 => NodeStatus::Suspect,
            4 => NodeStatus::Left,
            5 => NodeStatus::Dead,
            _ => NodeStatus::Unknown,
        }
    }
}

/// Access method by which a neighbour was last confirmed reachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Direct,
    Indirect,
}

impl Access {
    pub fn code(self) -> u8 {
        match self {
            Access::Direct => 0,
            Access::Indirect => 1,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Access::Indirect,
            _ => Access::Direct,
        }
    }
}

macro_rules! validate_port {
    ($port:expr) => {
        if $port == 0 {
            return Err(ProtoError::Validation("port must be in 1..=65535".into()));
        }
    };
}

macro_rules! validate_attempt {
    ($n:expr) => {
        if $n < 1 {
            return Err(ProtoError::Validation("attempt_number must be >= 1".into()));
        }
    };
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ping {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub restart_counter: u64,
    pub tx: u64,
    pub neighbour_id: Uuid,
    pub attempt_number: u32,
    pub ts: u64,
}

impl Ping {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        id: Uuid,
        host: String,
        port: u16,
        restart_counter: u64,
        tx: u64,
        neighbour_id: Uuid,
        attempt_number: u32,
        ts: u64,
    ) -> Result<Self> {
        validate_port!(port);
        validate_attempt!(attempt_number);
        Ok(Self {
            id,
            host,
            port,
            restart_counter,
            tx,
            neighbour_id,
            attempt_number,
            ts,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ack {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub neighbour_id: Uuid,
    pub neighbour_tx: u64,
    pub attempt_number: u32,
    pub ts: u64,
}

impl Ack {
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        neighbour_id: Uuid,
        neighbour_tx: u64,
        attempt_number: u32,
        ts: u64,
    ) -> Result<Self> {
        validate_attempt!(attempt_number);
        Ok(Self {
            id,
            restart_counter,
            tx,
            neighbour_id,
            neighbour_tx,
            attempt_number,
            ts,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndirectPing {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub neighbour_id: Uuid,
    pub attempt_number: u32,
    pub ts: u64,
    pub intermediate_id: Uuid,
    pub intermediate_host: String,
    pub intermediate_port: u16,
    pub neighbour_host: String,
    pub neighbour_port: u16,
}

impl IndirectPing {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        neighbour_id: Uuid,
        attempt_number: u32,
        ts: u64,
        intermediate_id: Uuid,
        intermediate_host: String,
        intermediate_port: u16,
        neighbour_host: String,
        neighbour_port: u16,
    ) -> Result<Self> {
        validate_attempt!(attempt_number);
        validate_port!(intermediate_port);
        validate_port!(neighbour_port);
        Ok(Self {
            id,
            restart_counter,
            tx,
            neighbour_id,
            attempt_number,
            ts,
            intermediate_id,
            intermediate_host,
            intermediate_port,
            neighbour_host,
            neighbour_port,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndirectAck {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub neighbour_id: Uuid,
    pub neighbour_tx: u64,
    pub attempt_number: u32,
    pub ts: u64,
    pub intermediate_id: Uuid,
    pub intermediate_host: String,
    pub intermediate_port: u16,
    pub neighbour_host: String,
    pub neighbour_port: u16,
    pub sender_status: NodeStatus,
}

impl IndirectAck {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        neighbour_id: Uuid,
        neighbour_tx: u64,
        attempt_number: u32,
        ts: u64,
        intermediate_id: Uuid,
        intermediate_host: String,
        intermediate_port: u16,
        neighbour_host: String,
        neighbour_port: u16,
        sender_status: NodeStatus,
    ) -> Result<Self> {
        validate_attempt!(attempt_number);
        validate_port!(intermediate_port);
        validate_port!(neighbour_port);
        Ok(Self {
            id,
            restart_counter,
            tx,
            neighbour_id,
            neighbour_tx,
            attempt_number,
            ts,
            intermediate_id,
            intermediate_host,
            intermediate_port,
            neighbour_host,
            neighbour_port,
            sender_status,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub host: String,
    pub port: u16,
}

impl Join {
    pub fn build(id: Uuid, restart_counter: u64, tx: u64, host: String, port: u16) -> Result<Self> {
        validate_port!(port);
        Ok(Self {
            id,
            restart_counter,
            tx,
            host,
            port,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Alive {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub neighbour_id: Uuid,
    pub neighbour_restart_counter: u64,
    pub neighbour_tx: u64,
    pub neighbour_host: String,
    pub neighbour_port: u16,
}

impl Alive {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        neighbour_id: Uuid,
        neighbour_restart_counter: u64,
        neighbour_tx: u64,
        neighbour_host: String,
        neighbour_port: u16,
    ) -> Result<Self> {
        validate_port!(neighbour_port);
        Ok(Self {
            id,
            restart_counter,
            tx,
            neighbour_id,
            neighbour_restart_counter,
            neighbour_tx,
            neighbour_host,
            neighbour_port,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Suspect {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub neighbour_id: Uuid,
    pub neighbour_restart_counter: u64,
    pub neighbour_tx: u64,
}

impl Suspect {
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        neighbour_id: Uuid,
        neighbour_restart_counter: u64,
        neighbour_tx: u64,
    ) -> Result<Self> {
        Ok(Self {
            id,
            restart_counter,
            tx,
            neighbour_id,
            neighbour_restart_counter,
            neighbour_tx,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dead {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub neighbour_id: Uuid,
    pub neighbour_restart_counter: u64,
    pub neighbour_tx: u64,
}

impl Dead {
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        neighbour_id: Uuid,
        neighbour_restart_counter: u64,
        neighbour_tx: u64,
    ) -> Result<Self> {
        Ok(Self {
            id,
            restart_counter,
            tx,
            neighbour_id,
            neighbour_restart_counter,
            neighbour_tx,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Left {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
}

impl Left {
    pub fn build(id: Uuid, restart_counter: u64, tx: u64) -> Result<Self> {
        Ok(Self {
            id,
            restart_counter,
            tx,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PayloadEvent {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub payload: Vec<u8>,
}

impl PayloadEvent {
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        payload: Vec<u8>,
        max_payload_size: usize,
    ) -> Result<Self> {
        if payload.len() > max_payload_size {
            return Err(ProtoError::Validation(format!(
                "payload of {} bytes exceeds max {max_payload_size}",
                payload.len()
            )));
        }
        Ok(Self {
            id,
            restart_counter,
            tx,
            payload,
        })
    }
}

/// One compact neighbour tuple inside an AntiEntropy event:
/// `[id, host, port, status_code, access, restart_counter, events_tx, payload]`.
#[derive(Clone, Debug, PartialEq)]
pub struct AntiEntropyEntry {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub access: Access,
    pub restart_counter: u64,
    /// Per-event-code highest observed `tx`, as `(code, tx)` pairs.
    pub events_tx: Vec<(u8, u64)>,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AntiEntropy {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub entries: Vec<AntiEntropyEntry>,
}

impl AntiEntropy {
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        entries: Vec<AntiEntropyEntry>,
    ) -> Result<Self> {
        Ok(Self {
            id,
            restart_counter,
            tx,
            entries,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Probe {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub probe_key: Uuid,
    pub host: String,
    pub port: u16,
}

impl Probe {
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        probe_key: Uuid,
        host: String,
        port: u16,
    ) -> Result<Self> {
        validate_port!(port);
        Ok(Self {
            id,
            restart_counter,
            tx,
            probe_key,
            host,
            port,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProbeAck {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub probe_key: Uuid,
    pub neighbour_id: Uuid,
    pub status: NodeStatus,
    pub host: String,
    pub port: u16,
}

impl ProbeAck {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        probe_key: Uuid,
        neighbour_id: Uuid,
        status: NodeStatus,
        host: String,
        port: u16,
    ) -> Result<Self> {
        validate_port!(port);
        Ok(Self {
            id,
            restart_counter,
            tx,
            probe_key,
            neighbour_id,
            status,
            host,
            port,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewClusterSize {
    pub id: Uuid,
    pub restart_counter: u64,
    pub tx: u64,
    pub old_size: u32,
    pub new_size: u32,
}

impl NewClusterSize {
    pub fn build(
        id: Uuid,
        restart_counter: u64,
        tx: u64,
        old_size: u32,
        new_size: u32,
    ) -> Result<Self> {
        Ok(Self {
            id,
            restart_counter,
            tx,
            old_size,
            new_size,
        })
    }
}

/// The sum type over all protocol event variants, dispatched by code at
/// decode time. `Unknown`
/// carries the undecoded code for events the receiving node doesn't
/// recognize; those are dropped individually, not the whole batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Ping(Ping),
    Ack(Ack),
    Join(Join),
    Alive(Alive),
    Suspect(Suspect),
    Left(Left),
    Dead(Dead),
    Payload(PayloadEvent),
    AntiEntropy(AntiEntropy),
    Probe(Probe),
    ProbeAck(ProbeAck),
    NewClusterSize(NewClusterSize),
    IndirectPing(IndirectPing),
    IndirectAck(IndirectAck),
    Unknown(u8),
}

impl Event {
    /// The event's sender id (`id` field), if the variant carries one.
    /// `Unknown` events have none.
    pub fn sender_id(&self) -> Option<Uuid> {
        match self {
            Event::Ping(e) => Some(e.id),
            Event::Ack(e) => Some(e.id),
            Event::Join(e) => Some(e.id),
            Event::Alive(e) => Some(e.id),
            Event::Suspect(e) => Some(e.id),
            Event::Left(e) => Some(e.id),
            Event::Dead(e) => Some(e.id),
            Event::Payload(e) => Some(e.id),
            Event::AntiEntropy(e) => Some(e.id),
            Event::Probe(e) => Some(e.id),
            Event::ProbeAck(e) => Some(e.id),
            Event::NewClusterSize(e) => Some(e.id),
            Event::IndirectPing(e) => Some(e.id),
            Event::IndirectAck(e) => Some(e.id),
            Event::Unknown(_) => None,
        }
    }

    /// The event's sender-asserted incarnation, if the variant carries
    /// one.
    pub fn sender_incarnation(&self) -> Option<(u64, u64)> {
        match self {
            Event::Ping(e) => Some((e.restart_counter, e.tx)),
            Event::Ack(e) => Some((e.restart_counter, e.tx)),
            Event::Join(e) => Some((e.restart_counter, e.tx)),
            Event::Alive(e) => Some((e.restart_counter, e.tx)),
            Event::Suspect(e) => Some((e.restart_counter, e.tx)),
            Event::Left(e) => Some((e.restart_counter, e.tx)),
            Event::Dead(e) => Some((e.restart_counter, e.tx)),
            Event::Payload(e) => Some((e.restart_counter, e.tx)),
            Event::AntiEntropy(e) => Some((e.restart_counter, e.tx)),
            Event::Probe(e) => Some((e.restart_counter, e.tx)),
            Event::ProbeAck(e) => Some((e.restart_counter, e.tx)),
            Event::NewClusterSize(e) => Some((e.restart_counter, e.tx)),
            Event::IndirectPing(e) => Some((e.restart_counter, e.tx)),
            Event::IndirectAck(e) => Some((e.restart_counter, e.tx)),
            Event::Unknown(_) => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Event::Ping(_) => CODE_PING,
            Event::Ack(_) => CODE_ACK,
            Event::Join(_) => CODE_JOIN,
            Event::Alive(_) => CODE_ALIVE,
            Event::Suspect(_) => CODE_SUSPECT,
            Event::Left(_) => CODE_LEFT,
            Event::Dead(_) => CODE_DEAD,
            Event::Payload(_) => CODE_PAYLOAD,
            Event::AntiEntropy(_) => CODE_ANTI_ENTROPY,
            Event::Probe(_) => CODE_PROBE,
            Event::ProbeAck(_) => CODE_PROBE_ACK,
            Event::NewClusterSize(_) => CODE_NEW_CLUSTER_SIZE,
            Event::IndirectPing(_) => CODE_INDIRECT_PING,
            Event::IndirectAck(_) => CODE_INDIRECT_ACK,
            Event::Unknown(code) => *code,
        }
    }

    /// Convert to the wire tuple form: `[code, field1, field2, ...]`.
    pub fn prepare(&self) -> PreparedEvent {
        match self {
            Event::Ping(e) => vec![
                u8_val(CODE_PING),
                uuid_val(e.id),
                str_val(&e.host),
                u16_val(e.port),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.neighbour_id),
                u32_val(e.attempt_number),
                u64_val(e.ts),
            ],
            Event::Ack(e) => vec![
                u8_val(CODE_ACK),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.neighbour_id),
                u64_val(e.neighbour_tx),
                u32_val(e.attempt_number),
                u64_val(e.ts),
            ],
            Event::Join(e) => vec![
                u8_val(CODE_JOIN),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                str_val(&e.host),
                u16_val(e.port),
            ],
            Event::Alive(e) => vec![
                u8_val(CODE_ALIVE),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.neighbour_id),
                u64_val(e.neighbour_restart_counter),
                u64_val(e.neighbour_tx),
                str_val(&e.neighbour_host),
                u16_val(e.neighbour_port),
            ],
            Event::Suspect(e) => vec![
                u8_val(CODE_SUSPECT),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.neighbour_id),
                u64_val(e.neighbour_restart_counter),
                u64_val(e.neighbour_tx),
            ],
            Event::Dead(e) => vec![
                u8_val(CODE_DEAD),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.neighbour_id),
                u64_val(e.neighbour_restart_counter),
                u64_val(e.neighbour_tx),
            ],
            Event::Left(e) => vec![
                u8_val(CODE_LEFT),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
            ],
            Event::Payload(e) => vec![
                u8_val(CODE_PAYLOAD),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                bytes_val(&e.payload),
            ],
            Event::AntiEntropy(e) => vec![
                u8_val(CODE_ANTI_ENTROPY),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                Value::Array(e.entries.iter().map(prepare_anti_entropy_entry).collect()),
            ],
            Event::Probe(e) => vec![
                u8_val(CODE_PROBE),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.probe_key),
                str_val(&e.host),
                u16_val(e.port),
            ],
            Event::ProbeAck(e) => vec![
                u8_val(CODE_PROBE_ACK),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.probe_key),
                uuid_val(e.neighbour_id),
                u8_val(e.status.code()),
                str_val(&e.host),
                u16_val(e.port),
            ],
            Event::NewClusterSize(e) => vec![
                u8_val(CODE_NEW_CLUSTER_SIZE),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                u32_val(e.old_size),
                u32_val(e.new_size),
            ],
            Event::IndirectPing(e) => vec![
                u8_val(CODE_INDIRECT_PING),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.neighbour_id),
                u32_val(e.attempt_number),
                u64_val(e.ts),
                uuid_val(e.intermediate_id),
                str_val(&e.intermediate_host),
                u16_val(e.intermediate_port),
                str_val(&e.neighbour_host),
                u16_val(e.neighbour_port),
            ],
            Event::IndirectAck(e) => vec![
                u8_val(CODE_INDIRECT_ACK),
                uuid_val(e.id),
                u64_val(e.restart_counter),
                u64_val(e.tx),
                uuid_val(e.neighbour_id),
                u64_val(e.neighbour_tx),
                u32_val(e.attempt_number),
                u64_val(e.ts),
                uuid_val(e.intermediate_id),
                str_val(&e.intermediate_host),
                u16_val(e.intermediate_port),
                str_val(&e.neighbour_host),
                u16_val(e.neighbour_port),
                u8_val(e.sender_status.code()),
            ],
            Event::Unknown(code) => vec![u8_val(*code)],
        }
    }

    /// The inverse of [`Event::prepare`]: validate arity and field
    /// types, and reconstruct the typed event. An unrecognized code
    /// yields `Event::Unknown`, not an error — only a genuinely
    /// malformed *known* code fails.
    pub fn restore(tuple: PreparedEvent) -> Result<Event> {
        let code = as_u8(field(&tuple, 0, "Event", "code")?, "code")?;

        match code {
            CODE_PING => {
                expect_arity(&tuple, 9, "Ping")?;
                Ok(Event::Ping(Ping {
                    id: as_uuid(field(&tuple, 1, "Ping", "id")?, "id")?,
                    host: as_str(field(&tuple, 2, "Ping", "host")?, "host")?,
                    port: as_u16(field(&tuple, 3, "Ping", "port")?, "port")?,
                    restart_counter: as_u64(
                        field(&tuple, 4, "Ping", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 5, "Ping", "tx")?, "tx")?,
                    neighbour_id: as_uuid(
                        field(&tuple, 6, "Ping", "neighbour_id")?,
                        "neighbour_id",
                    )?,
                    attempt_number: as_u32(
                        field(&tuple, 7, "Ping", "attempt_number")?,
                        "attempt_number",
                    )?,
                    ts: as_u64(field(&tuple, 8, "Ping", "ts")?, "ts")?,
                }))
            }
            CODE_ACK => {
                expect_arity(&tuple, 8, "Ack")?;
                Ok(Event::Ack(Ack {
                    id: as_uuid(field(&tuple, 1, "Ack", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Ack", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Ack", "tx")?, "tx")?,
                    neighbour_id: as_uuid(field(&tuple, 4, "Ack", "neighbour_id")?, "neighbour_id")?,
                    neighbour_tx: as_u64(
                        field(&tuple, 5, "Ack", "neighbour_tx")?,
                        "neighbour_tx",
                    )?,
                    attempt_number: as_u32(
                        field(&tuple, 6, "Ack", "attempt_number")?,
                        "attempt_number",
                    )?,
                    ts: as_u64(field(&tuple, 7, "Ack", "ts")?, "ts")?,
                }))
            }
            CODE_JOIN => {
                expect_arity(&tuple, 6, "Join")?;
                Ok(Event::Join(Join {
                    id: as_uuid(field(&tuple, 1, "Join", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Join", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Join", "tx")?, "tx")?,
                    host: as_str(field(&tuple, 4, "Join", "host")?, "host")?,
                    port: as_u16(field(&tuple, 5, "Join", "port")?, "port")?,
                }))
            }
            CODE_ALIVE => {
                expect_arity(&tuple, 9, "Alive")?;
                Ok(Event::Alive(Alive {
                    id: as_uuid(field(&tuple, 1, "Alive", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Alive", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Alive", "tx")?, "tx")?,
                    neighbour_id: as_uuid(
                        field(&tuple, 4, "Alive", "neighbour_id")?,
                        "neighbour_id",
                    )?,
                    neighbour_restart_counter: as_u64(
                        field(&tuple, 5, "Alive", "neighbour_restart_counter")?,
                        "neighbour_restart_counter",
                    )?,
                    neighbour_tx: as_u64(
                        field(&tuple, 6, "Alive", "neighbour_tx")?,
                        "neighbour_tx",
                    )?,
                    neighbour_host: as_str(
                        field(&tuple, 7, "Alive", "neighbour_host")?,
                        "neighbour_host",
                    )?,
                    neighbour_port: as_u16(
                        field(&tuple, 8, "Alive", "neighbour_port")?,
                        "neighbour_port",
                    )?,
                }))
            }
            CODE_SUSPECT => {
                expect_arity(&tuple, 7, "Suspect")?;
                Ok(Event::Suspect(Suspect {
                    id: as_uuid(field(&tuple, 1, "Suspect", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Suspect", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Suspect", "tx")?, "tx")?,
                    neighbour_id: as_uuid(
                        field(&tuple, 4, "Suspect", "neighbour_id")?,
                        "neighbour_id",
                    )?,
                    neighbour_restart_counter: as_u64(
                        field(&tuple, 5, "Suspect", "neighbour_restart_counter")?,
                        "neighbour_restart_counter",
                    )?,
                    neighbour_tx: as_u64(
                        field(&tuple, 6, "Suspect", "neighbour_tx")?,
                        "neighbour_tx",
                    )?,
                }))
            }
            CODE_DEAD => {
                expect_arity(&tuple, 7, "Dead")?;
                Ok(Event::Dead(Dead {
                    id: as_uuid(field(&tuple, 1, "Dead", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Dead", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Dead", "tx")?, "tx")?,
                    neighbour_id: as_uuid(field(&tuple, 4, "Dead", "neighbour_id")?, "neighbour_id")?,
                    neighbour_restart_counter: as_u64(
                        field(&tuple, 5, "Dead", "neighbour_restart_counter")?,
                        "neighbour_restart_counter",
                    )?,
                    neighbour_tx: as_u64(
                        field(&tuple, 6, "Dead", "neighbour_tx")?,
                        "neighbour_tx",
                    )?,
                }))
            }
            CODE_LEFT => {
                expect_arity(&tuple, 4, "Left")?;
                Ok(Event::Left(Left {
                    id: as_uuid(field(&tuple, 1, "Left", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Left", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Left", "tx")?, "tx")?,
                }))
            }
            CODE_PAYLOAD => {
                expect_arity(&tuple, 5, "Payload")?;
                Ok(Event::Payload(PayloadEvent {
                    id: as_uuid(field(&tuple, 1, "Payload", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Payload", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Payload", "tx")?, "tx")?,
                    payload: as_bytes(field(&tuple, 4, "Payload", "payload")?, "payload")?,
                }))
            }
            CODE_ANTI_ENTROPY => {
                expect_arity(&tuple, 5, "AntiEntropy")?;
                let entries_val = field(&tuple, 4, "AntiEntropy", "anti_entropy_data")?;
                let entries_arr = entries_val
                    .as_array()
                    .ok_or_else(|| ProtoError::MalformedEvent("AntiEntropy: entries not an array".into()))?;
                let mut entries = Vec::with_capacity(entries_arr.len());
                for entry in entries_arr {
                    entries.push(restore_anti_entropy_entry(entry)?);
                }
                Ok(Event::AntiEntropy(AntiEntropy {
                    id: as_uuid(field(&tuple, 1, "AntiEntropy", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "AntiEntropy", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "AntiEntropy", "tx")?, "tx")?,
                    entries,
                }))
            }
            CODE_PROBE => {
                expect_arity(&tuple, 7, "Probe")?;
                Ok(Event::Probe(Probe {
                    id: as_uuid(field(&tuple, 1, "Probe", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "Probe", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "Probe", "tx")?, "tx")?,
                    probe_key: as_uuid(field(&tuple, 4, "Probe", "probe_key")?, "probe_key")?,
                    host: as_str(field(&tuple, 5, "Probe", "host")?, "host")?,
                    port: as_u16(field(&tuple, 6, "Probe", "port")?, "port")?,
                }))
            }
            CODE_PROBE_ACK => {
                expect_arity(&tuple, 9, "ProbeAck")?;
                Ok(Event::ProbeAck(ProbeAck {
                    id: as_uuid(field(&tuple, 1, "ProbeAck", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "ProbeAck", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "ProbeAck", "tx")?, "tx")?,
                    probe_key: as_uuid(field(&tuple, 4, "ProbeAck", "probe_key")?, "probe_key")?,
                    neighbour_id: as_uuid(
                        field(&tuple, 5, "ProbeAck", "neighbour_id")?,
                        "neighbour_id",
                    )?,
                    status: NodeStatus::from_code(as_u8(
                        field(&tuple, 6, "ProbeAck", "status")?,
                        "status",
                    )?),
                    host: as_str(field(&tuple, 7, "ProbeAck", "host")?, "host")?,
                    port: as_u16(field(&tuple, 8, "ProbeAck", "port")?, "port")?,
                }))
            }
            CODE_NEW_CLUSTER_SIZE => {
                expect_arity(&tuple, 6, "NewClusterSize")?;
                Ok(Event::NewClusterSize(NewClusterSize {
                    id: as_uuid(field(&tuple, 1, "NewClusterSize", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "NewClusterSize", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "NewClusterSize", "tx")?, "tx")?,
                    old_size: as_u32(field(&tuple, 4, "NewClusterSize", "old_size")?, "old_size")?,
                    new_size: as_u32(field(&tuple, 5, "NewClusterSize", "new_size")?, "new_size")?,
                }))
            }
            CODE_INDIRECT_PING => {
                expect_arity(&tuple, 12, "IndirectPing")?;
                Ok(Event::IndirectPing(IndirectPing {
                    id: as_uuid(field(&tuple, 1, "IndirectPing", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "IndirectPing", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "IndirectPing", "tx")?, "tx")?,
                    neighbour_id: as_uuid(
                        field(&tuple, 4, "IndirectPing", "neighbour_id")?,
                        "neighbour_id",
                    )?,
                    attempt_number: as_u32(
                        field(&tuple, 5, "IndirectPing", "attempt_number")?,
                        "attempt_number",
                    )?,
                    ts: as_u64(field(&tuple, 6, "IndirectPing", "ts")?, "ts")?,
                    intermediate_id: as_uuid(
                        field(&tuple, 7, "IndirectPing", "intermediate_id")?,
                        "intermediate_id",
                    )?,
                    intermediate_host: as_str(
                        field(&tuple, 8, "IndirectPing", "intermediate_host")?,
                        "intermediate_host",
                    )?,
                    intermediate_port: as_u16(
                        field(&tuple, 9, "IndirectPing", "intermediate_port")?,
                        "intermediate_port",
                    )?,
                    neighbour_host: as_str(
                        field(&tuple, 10, "IndirectPing", "neighbour_host")?,
                        "neighbour_host",
                    )?,
                    neighbour_port: as_u16(
                        field(&tuple, 11, "IndirectPing", "neighbour_port")?,
                        "neighbour_port",
                    )?,
                }))
            }
            CODE_INDIRECT_ACK => {
                expect_arity(&tuple, 14, "IndirectAck")?;
                Ok(Event::IndirectAck(IndirectAck {
                    id: as_uuid(field(&tuple, 1, "IndirectAck", "id")?, "id")?,
                    restart_counter: as_u64(
                        field(&tuple, 2, "IndirectAck", "restart_counter")?,
                        "restart_counter",
                    )?,
                    tx: as_u64(field(&tuple, 3, "IndirectAck", "tx")?, "tx")?,
                    neighbour_id: as_uuid(
                        field(&tuple, 4, "IndirectAck", "neighbour_id")?,
                        "neighbour_id",
                    )?,
                    neighbour_tx: as_u64(
                        field(&tuple, 5, "IndirectAck", "neighbour_tx")?,
                        "neighbour_tx",
                    )?,
                    attempt_number: as_u32(
                        field(&tuple, 6, "IndirectAck", "attempt_number")?,
                        "attempt_number",
                    )?,
                    ts: as_u64(field(&tuple, 7, "IndirectAck", "ts")?, "ts")?,
                    intermediate_id: as_uuid(
                        field(&tuple, 8, "IndirectAck", "intermediate_id")?,
                        "intermediate_id",
                    )?,
                    intermediate_host: as_str(
                        field(&tuple, 9, "IndirectAck", "intermediate_host")?,
                        "intermediate_host",
                    )?,
                    intermediate_port: as_u16(
                        field(&tuple, 10, "IndirectAck", "intermediate_port")?,
                        "intermediate_port",
                    )?,
                    neighbour_host: as_str(
                        field(&tuple, 11, "IndirectAck", "neighbour_host")?,
                        "neighbour_host",
                    )?,
                    neighbour_port: as_u16(
                        field(&tuple, 12, "IndirectAck", "neighbour_port")?,
                        "neighbour_port",
                    )?,
                    sender_status: NodeStatus::from_code(as_u8(
                        field(&tuple, 13, "IndirectAck", "sender_status")?,
                        "sender_status",
                    )?),
                }))
            }
            other => Ok(Event::Unknown(other)),
        }
    }
}

fn prepare_anti_entropy_entry(entry: &AntiEntropyEntry) -> Value {
    Value::Array(vec![
        uuid_val(entry.id),
        str_val(&entry.host),
        u16_val(entry.port),
        u8_val(entry.status.code()),
        u8_val(entry.access.code()),
        u64_val(entry.restart_counter),
        Value::Array(
            entry
                .events_tx
                .iter()
                .map(|(code, tx)| Value::Array(vec![u8_val(*code), u64_val(*tx)]))
                .collect(),
        ),
        bytes_val(&entry.payload),
    ])
}

fn restore_anti_entropy_entry(v: &Value) -> Result<AntiEntropyEntry> {
    let arr = v
        .as_array()
        .ok_or_else(|| ProtoError::MalformedEvent("AntiEntropy entry: not an array".into()))?;
    expect_arity(arr, 8, "AntiEntropyEntry")?;

    let events_tx_val = field(arr, 6, "AntiEntropyEntry", "events_tx")?;
    let events_tx_arr = events_tx_val
        .as_array()
        .ok_or_else(|| ProtoError::MalformedEvent("AntiEntropyEntry: events_tx not an array".into()))?;
    let mut events_tx = Vec::with_capacity(events_tx_arr.len());
    for pair in events_tx_arr {
        let pair_arr = pair
            .as_array()
            .ok_or_else(|| ProtoError::MalformedEvent("AntiEntropyEntry: events_tx pair not an array".into()))?;
        expect_arity(pair_arr, 2, "AntiEntropyEntryEventsTxPair")?;
        events_tx.push((
            as_u8(field(pair_arr, 0, "EventsTxPair", "code")?, "code")?,
            as_u64(field(pair_arr, 1, "EventsTxPair", "tx")?, "tx")?,
        ));
    }

    Ok(AntiEntropyEntry {
        id: as_uuid(field(arr, 0, "AntiEntropyEntry", "id")?, "id")?,
        host: as_str(field(arr, 1, "AntiEntropyEntry", "host")?, "host")?,
        port: as_u16(field(arr, 2, "AntiEntropyEntry", "port")?, "port")?,
        status: NodeStatus::from_code(as_u8(
            field(arr, 3, "AntiEntropyEntry", "status")?,
            "status",
        )?),
        access: Access::from_code(as_u8(
            field(arr, 4, "AntiEntropyEntry", "access")?,
            "access",
        )?),
        restart_counter: as_u64(
            field(arr, 5, "AntiEntropyEntry", "restart_counter")?,
            "restart_counter",
        )?,
        events_tx,
        payload: as_bytes(field(arr, 7, "AntiEntropyEntry", "payload")?, "payload")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn test_ping_roundtrip() {
        let ping = Ping::build(uid(1), "127.0.0.1".into(), 5376, 0, 1, uid(2), 1, 1000)
            .expect("build");
        let prepared = Event::Ping(ping.clone()).prepare();
        let restored = Event::restore(prepared).expect("restore");
        assert_eq!(restored, Event::Ping(ping));
    }

    #[test]
    fn test_ack_roundtrip() {
        let ack = Ack::build(uid(1), 0, 3, uid(2), 5, 1, 1000).expect("build");
        let prepared = Event::Ack(ack.clone()).prepare();
        assert_eq!(Event::restore(prepared).expect("restore"), Event::Ack(ack));
    }

    #[test]
    fn test_join_roundtrip() {
        let join = Join::build(uid(1), 0, 0, "10.0.0.1".into(), 5377).expect("build");
        let prepared = Event::Join(join.clone()).prepare();
        assert_eq!(Event::restore(prepared).expect("restore"), Event::Join(join));
    }

    #[test]
    fn test_anti_entropy_roundtrip() {
        let entry = AntiEntropyEntry {
            id: uid(3),
            host: "10.0.0.2".into(),
            port: 5378,
            status: NodeStatus::Alive,
            access: Access::Direct,
            restart_counter: 2,
            events_tx: vec![(0, 5), (2, 1)],
            payload: vec![1, 2, 3],
        };
        let ae = AntiEntropy::build(uid(1), 0, 4, vec![entry.clone()]).expect("build");
        let prepared = Event::AntiEntropy(ae.clone()).prepare();
        assert_eq!(
            Event::restore(prepared).expect("restore"),
            Event::AntiEntropy(ae)
        );
    }

    #[test]
    fn test_indirect_ack_roundtrip() {
        let ia = IndirectAck::build(
            uid(1),
            0,
            5,
            uid(2),
            6,
            2,
            1234,
            uid(3),
            "10.0.0.3".into(),
            5379,
            "10.0.0.4".into(),
            5380,
            NodeStatus::Alive,
        )
        .expect("build");
        let prepared = Event::IndirectAck(ia.clone()).prepare();
        assert_eq!(
            Event::restore(prepared).expect("restore"),
            Event::IndirectAck(ia)
        );
    }

    #[test]
    fn test_unknown_code_is_not_an_error() {
        let tuple = vec![u8_val(99)];
        assert_eq!(Event::restore(tuple).expect("restore"), Event::Unknown(99));
    }

    #[test]
    fn test_malformed_event_wrong_arity() {
        let tuple = vec![u8_val(CODE_PING), uuid_val(uid(1))];
        assert!(Event::restore(tuple).is_err());
    }

    #[test]
    fn test_malformed_event_wrong_type() {
        let mut tuple = Event::Ping(
            Ping::build(uid(1), "h".into(), 1, 0, 0, uid(2), 1, 0).expect("build"),
        )
        .prepare();
        // Corrupt the port field (index 3) to a string.
        tuple[3] = str_val("not-a-port");
        assert!(Event::restore(tuple).is_err());
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(Ping::build(uid(1), "h".into(), 0, 0, 0, uid(2), 1, 0).is_err());
    }

    #[test]
    fn test_attempt_number_zero_rejected() {
        assert!(Ping::build(uid(1), "h".into(), 1, 0, 0, uid(2), 0, 0).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        assert!(PayloadEvent::build(uid(1), 0, 0, vec![0u8; 300], 256).is_err());
    }

    #[test]
    fn test_suspect_dead_left_roundtrip() {
        let suspect = Suspect::build(uid(1), 0, 1, uid(2), 0, 3).expect("build");
        assert_eq!(
            Event::restore(Event::Suspect(suspect.clone()).prepare()).expect("restore"),
            Event::Suspect(suspect)
        );

        let dead = Dead::build(uid(1), 0, 1, uid(2), 0, 3).expect("build");
        assert_eq!(
            Event::restore(Event::Dead(dead.clone()).prepare()).expect("restore"),
            Event::Dead(dead)
        );

        let left = Left::build(uid(1), 2, 9).expect("build");
        assert_eq!(
            Event::restore(Event::Left(left.clone()).prepare()).expect("restore"),
            Event::Left(left)
        );
    }
}
