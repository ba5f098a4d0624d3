use metrad_types::LTime;
use metrad_wire::{WireDecode, WireEncode, WireError};

use crate::agreement::{Agreement, Member, PluginSpec};

/// Single-byte wire discriminator for tribe messages. The numeric values
/// are part of the protocol and never reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    AddPlugin = 0,
    RemovePlugin = 1,
    AddAgreement = 2,
    RemoveAgreement = 3,
    FullState = 4,
    JoinAgreement = 5,
    LeaveAgreement = 6,
    AddTask = 7,
    RemoveTask = 8,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<MsgType> {
        match value {
            0 => Some(MsgType::AddPlugin),
            1 => Some(MsgType::RemovePlugin),
            2 => Some(MsgType::AddAgreement),
            3 => Some(MsgType::RemoveAgreement),
            4 => Some(MsgType::FullState),
            5 => Some(MsgType::JoinAgreement),
            6 => Some(MsgType::LeaveAgreement),
            7 => Some(MsgType::AddTask),
            8 => Some(MsgType::RemoveTask),
            _ => None,
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MsgType::AddPlugin => "add-plugin",
            MsgType::RemovePlugin => "remove-plugin",
            MsgType::AddAgreement => "add-agreement",
            MsgType::RemoveAgreement => "remove-agreement",
            MsgType::FullState => "full-state",
            MsgType::JoinAgreement => "join-agreement",
            MsgType::LeaveAgreement => "leave-agreement",
            MsgType::AddTask => "add-task",
            MsgType::RemoveTask => "remove-task",
        };
        f.write_str(name)
    }
}

/// Add/remove of a plugin within an agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMsg {
    pub ltime: LTime,
    pub uuid: String,
    pub agreement: String,
    pub plugin: PluginSpec,
    pub msg_type: MsgType,
}

/// Agreement lifecycle and membership changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementMsg {
    pub ltime: LTime,
    pub uuid: String,
    pub agreement: String,
    /// Member involved for join/leave; empty for add/remove agreement.
    pub member: String,
    pub msg_type: MsgType,
}

/// Add/remove of a task within an agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMsg {
    pub ltime: LTime,
    pub uuid: String,
    pub agreement: String,
    pub task_id: String,
    pub msg_type: MsgType,
}

/// Any broadcastable tribe message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TribeMsg {
    Plugin(PluginMsg),
    Agreement(AgreementMsg),
    Task(TaskMsg),
}

impl TribeMsg {
    pub fn ltime(&self) -> LTime {
        match self {
            TribeMsg::Plugin(m) => m.ltime,
            TribeMsg::Agreement(m) => m.ltime,
            TribeMsg::Task(m) => m.ltime,
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            TribeMsg::Plugin(m) => &m.uuid,
            TribeMsg::Agreement(m) => &m.uuid,
            TribeMsg::Task(m) => &m.uuid,
        }
    }

    pub fn agreement(&self) -> &str {
        match self {
            TribeMsg::Plugin(m) => &m.agreement,
            TribeMsg::Agreement(m) => &m.agreement,
            TribeMsg::Task(m) => &m.agreement,
        }
    }

    pub fn msg_type(&self) -> MsgType {
        match self {
            TribeMsg::Plugin(m) => m.msg_type,
            TribeMsg::Agreement(m) => m.msg_type,
            TribeMsg::Task(m) => m.msg_type,
        }
    }
}

/// The state exchanged on push/pull: the clock, every agreement's full
/// contents, every member's bindings, and the pending intents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullStateMsg {
    pub ltime: LTime,
    pub agreements: Vec<(String, Agreement)>,
    pub members: Vec<Member>,
    pub intents: Vec<TribeMsg>,
}

impl WireEncode for PluginSpec {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.name.encode(buf);
        self.version.encode(buf);
    }
}

impl WireDecode for PluginSpec {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            name: String::decode(buf, offset)?,
            version: u32::decode(buf, offset)?,
        })
    }
}

fn encode_header(ltime: LTime, uuid: &str, agreement: &str, buf: &mut Vec<u8>) {
    (*ltime).encode(buf);
    uuid.to_string().encode(buf);
    agreement.to_string().encode(buf);
}

fn decode_header(buf: &[u8], offset: &mut usize) -> Result<(LTime, String, String), WireError> {
    let ltime = LTime(u64::decode(buf, offset)?);
    let uuid = String::decode(buf, offset)?;
    let agreement = String::decode(buf, offset)?;
    Ok((ltime, uuid, agreement))
}

/// Encode a message for the wire: one discriminator byte, then the body.
pub fn encode_message(msg: &TribeMsg) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(msg.msg_type() as u8);
    match msg {
        TribeMsg::Plugin(m) => {
            encode_header(m.ltime, &m.uuid, &m.agreement, &mut buf);
            m.plugin.encode(&mut buf);
        }
        TribeMsg::Agreement(m) => {
            encode_header(m.ltime, &m.uuid, &m.agreement, &mut buf);
            m.member.encode(&mut buf);
        }
        TribeMsg::Task(m) => {
            encode_header(m.ltime, &m.uuid, &m.agreement, &mut buf);
            m.task_id.encode(&mut buf);
        }
    }
    buf
}

/// Decode a broadcast received from the membership layer.
pub fn decode_message(data: &[u8]) -> Result<TribeMsg, WireError> {
    let mut offset = 0;
    let tag = u8::decode(data, &mut offset)?;
    let msg_type = MsgType::from_u8(tag).ok_or(WireError::InvalidTag {
        what: "tribe message",
        value: tag,
    })?;
    let (ltime, uuid, agreement) = decode_header(data, &mut offset)?;
    match msg_type {
        MsgType::AddPlugin | MsgType::RemovePlugin => Ok(TribeMsg::Plugin(PluginMsg {
            ltime,
            uuid,
            agreement,
            plugin: PluginSpec::decode(data, &mut offset)?,
            msg_type,
        })),
        MsgType::AddAgreement
        | MsgType::RemoveAgreement
        | MsgType::JoinAgreement
        | MsgType::LeaveAgreement => Ok(TribeMsg::Agreement(AgreementMsg {
            ltime,
            uuid,
            agreement,
            member: String::decode(data, &mut offset)?,
            msg_type,
        })),
        MsgType::AddTask | MsgType::RemoveTask => Ok(TribeMsg::Task(TaskMsg {
            ltime,
            uuid,
            agreement,
            task_id: String::decode(data, &mut offset)?,
            msg_type,
        })),
        MsgType::FullState => Err(WireError::InvalidTag {
            what: "tribe broadcast (full state travels on push/pull)",
            value: tag,
        }),
    }
}

impl WireEncode for TribeMsg {
    fn encode(&self, buf: &mut Vec<u8>) {
        let body = encode_message(self);
        (body.len() as u32).encode(buf);
        buf.extend(body);
    }
}

impl WireDecode for TribeMsg {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, offset)? as usize;
        if buf.len() - *offset < len {
            return Err(WireError::InsufficientData {
                need: len,
                have: buf.len() - *offset,
            });
        }
        let body = &buf[*offset..*offset + len];
        *offset += len;
        decode_message(body)
    }
}

impl WireEncode for FullStateMsg {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(MsgType::FullState as u8);
        (*self.ltime).encode(buf);
        (self.agreements.len() as u32).encode(buf);
        for (name, agreement) in &self.agreements {
            name.encode(buf);
            agreement.encode(buf);
        }
        self.members.encode(buf);
        self.intents.encode(buf);
    }
}

impl WireDecode for FullStateMsg {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let tag = u8::decode(buf, offset)?;
        if tag != MsgType::FullState as u8 {
            return Err(WireError::InvalidTag {
                what: "full state",
                value: tag,
            });
        }
        let ltime = LTime(u64::decode(buf, offset)?);
        let count = u32::decode(buf, offset)? as usize;
        let mut agreements = Vec::new();
        for _ in 0..count {
            let name = String::decode(buf, offset)?;
            let agreement = Agreement::decode(buf, offset)?;
            agreements.push((name, agreement));
        }
        let members = Vec::<Member>::decode(buf, offset)?;
        let intents = Vec::<TribeMsg>::decode(buf, offset)?;
        Ok(Self {
            ltime,
            agreements,
            members,
            intents,
        })
    }
}
