use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use metrad_types::status_code::TribeCode;
use metrad_types::{make_error, make_error_msg, LTime, Result};
use metrad_wire::{WireDecode, WireEncode};

use crate::agreement::{Agreement, Member, PluginSpec, TaskSpec};
use crate::clock::LamportClock;
use crate::config::TribeConfig;
use crate::membership::Membership;
use crate::messages::{
    decode_message, encode_message, AgreementMsg, FullStateMsg, MsgType, PluginMsg, TaskMsg,
    TribeMsg,
};

/// The replicated world: agreements plus member bindings.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct World {
    pub agreements: BTreeMap<String, Agreement>,
    pub members: BTreeMap<String, Member>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Done,
    Parked,
}

/// Attempt one message against the world.
///
/// `Done` means the state reflects the message (including the no-op cases
/// the protocol treats as applied); `Parked` means a precondition is not yet
/// satisfied and the message belongs in the intent buffer.
fn try_apply(world: &mut World, msg: &TribeMsg) -> Applied {
    match msg {
        TribeMsg::Agreement(m) => match m.msg_type {
            MsgType::AddAgreement => {
                if world.agreements.contains_key(&m.agreement) {
                    return Applied::Parked;
                }
                world.agreements.insert(m.agreement.clone(), Agreement::new());
                Applied::Done
            }
            MsgType::RemoveAgreement => {
                // Removing an unknown agreement is settled either way.
                world.agreements.remove(&m.agreement);
                Applied::Done
            }
            MsgType::JoinAgreement => {
                if can_join(world, &m.agreement, &m.member).is_err() {
                    return Applied::Parked;
                }
                let member = world.members.get_mut(&m.member).expect("checked");
                member.plugin_agreement = Some(m.agreement.clone());
                member.task_agreements.insert(m.agreement.clone());
                world
                    .agreements
                    .get_mut(&m.agreement)
                    .expect("checked")
                    .members
                    .insert(m.member.clone());
                Applied::Done
            }
            MsgType::LeaveAgreement => {
                if can_leave(world, &m.agreement, &m.member).is_err() {
                    return Applied::Parked;
                }
                let member = world.members.get_mut(&m.member).expect("checked");
                member.plugin_agreement = None;
                member.task_agreements.remove(&m.agreement);
                world
                    .agreements
                    .get_mut(&m.agreement)
                    .expect("checked")
                    .members
                    .remove(&m.member);
                Applied::Done
            }
            _ => Applied::Parked,
        },
        TribeMsg::Plugin(m) => {
            let Some(agreement) = world.agreements.get_mut(&m.agreement) else {
                return Applied::Parked;
            };
            match m.msg_type {
                MsgType::AddPlugin => {
                    // A duplicate add is a settled no-op.
                    agreement.add_plugin(m.plugin.clone());
                    Applied::Done
                }
                MsgType::RemovePlugin => {
                    if agreement.remove_plugin(&m.plugin) {
                        Applied::Done
                    } else {
                        Applied::Parked
                    }
                }
                _ => Applied::Parked,
            }
        }
        TribeMsg::Task(m) => {
            let Some(agreement) = world.agreements.get_mut(&m.agreement) else {
                return Applied::Parked;
            };
            match m.msg_type {
                MsgType::AddTask => {
                    agreement.add_task(m.task_id.clone());
                    Applied::Done
                }
                MsgType::RemoveTask => {
                    if agreement.remove_task(&m.task_id) {
                        Applied::Done
                    } else {
                        Applied::Parked
                    }
                }
                _ => Applied::Parked,
            }
        }
    }
}

/// Run the intent buffer to fixed-point: repeatedly sweep in insertion
/// order, applying every intent whose preconditions now hold, until a full
/// sweep makes no progress. Returns the surviving intents.
pub fn apply_intents(world: &mut World, mut intents: Vec<TribeMsg>) -> Vec<TribeMsg> {
    loop {
        let mut progressed = false;
        let mut idx = 0;
        while idx < intents.len() {
            if try_apply(world, &intents[idx]) == Applied::Done {
                intents.remove(idx);
                progressed = true;
            } else {
                idx += 1;
            }
        }
        if !progressed {
            return intents;
        }
    }
}

fn can_join(world: &World, agreement: &str, member: &str) -> Result<()> {
    if !world.agreements.contains_key(agreement) {
        return make_error_msg(TribeCode::AGREEMENT_DOES_NOT_EXIST, agreement.to_string());
    }
    let Some(m) = world.members.get(member) else {
        return make_error_msg(TribeCode::UNKNOWN_MEMBER, member.to_string());
    };
    if let Some(ref bound) = m.plugin_agreement {
        let plugins_bound = world
            .agreements
            .get(bound)
            .map(|a| !a.plugins.is_empty())
            .unwrap_or(false);
        if plugins_bound {
            return make_error_msg(
                TribeCode::ALREADY_MEMBER_OF_PLUGIN_AGREEMENT,
                format!("{} bound to {}", member, bound),
            );
        }
    }
    Ok(())
}

fn can_leave(world: &World, agreement: &str, member: &str) -> Result<()> {
    if !world.agreements.contains_key(agreement) {
        return make_error_msg(TribeCode::AGREEMENT_DOES_NOT_EXIST, agreement.to_string());
    }
    let Some(m) = world.members.get(member) else {
        return make_error_msg(TribeCode::UNKNOWN_MEMBER, member.to_string());
    };
    if m.plugin_agreement.is_none() {
        return make_error_msg(
            TribeCode::NOT_A_MEMBER,
            format!("{} not bound to {}", member, agreement),
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct RingEntry {
    ltime: LTime,
    uuid: String,
}

struct TribeState {
    world: World,
    ring: Vec<Option<RingEntry>>,
    intents: Vec<TribeMsg>,
}

impl TribeState {
    fn is_duplicate(&self, msg: &TribeMsg, now: LTime) -> bool {
        let ring_len = self.ring.len() as u64;
        // Older than the ring can remember.
        if *now > ring_len && *msg.ltime() < *now - ring_len {
            return true;
        }
        let idx = (*msg.ltime() % ring_len) as usize;
        match &self.ring[idx] {
            Some(entry) => entry.uuid == msg.uuid(),
            None => false,
        }
    }

    fn record(&mut self, msg: &TribeMsg) {
        let ring_len = self.ring.len() as u64;
        let idx = (*msg.ltime() % ring_len) as usize;
        self.ring[idx] = Some(RingEntry {
            ltime: msg.ltime(),
            uuid: msg.uuid().to_string(),
        });
    }
}

/// The gossip-replicated agreement store.
///
/// Every mutation, local or remote, flows through the same handler: witness
/// the clock, reject duplicates, apply or park as an intent, then drain the
/// intent buffer to fixed-point.
pub struct Tribe {
    config: TribeConfig,
    clock: LamportClock,
    membership: Arc<dyn Membership>,
    state: Mutex<TribeState>,
    convergence: Mutex<Option<mpsc::Sender<()>>>,
}

impl Tribe {
    pub fn new(config: TribeConfig, membership: Arc<dyn Membership>) -> Arc<Self> {
        let ring_size = config.ring_size.max(1);
        let local = membership.local_name();
        let tribe = Arc::new(Self {
            config,
            clock: LamportClock::new(),
            membership,
            state: Mutex::new(TribeState {
                world: World::default(),
                ring: vec![None; ring_size],
                intents: Vec::new(),
            }),
            convergence: Mutex::new(None),
        });
        // The local node is always a member of its own view.
        tribe.handle_member_join(&local);
        tribe
    }

    pub fn config(&self) -> &TribeConfig {
        &self.config
    }

    pub fn ltime(&self) -> LTime {
        self.clock.time()
    }

    pub fn local_name(&self) -> String {
        self.membership.local_name()
    }

    /// Register the channel the convergence worker listens on.
    pub fn set_convergence_notifier(&self, tx: mpsc::Sender<()>) {
        *self.convergence.lock() = Some(tx);
    }

    fn signal_convergence(&self) {
        if let Some(tx) = self.convergence.lock().as_ref() {
            let _ = tx.try_send(());
        }
    }

    fn next_uuid() -> String {
        Uuid::new_v4().to_string()
    }

    /// Apply a message exactly as a remote broadcast would be applied.
    ///
    /// The second delivery of the same message fails with
    /// `DuplicateMessage` and leaves state untouched.
    pub fn handle(&self, msg: TribeMsg) -> Result<()> {
        self.clock.witness(msg.ltime());
        let mut state = self.state.lock();
        if state.is_duplicate(&msg, self.clock.time()) {
            return make_error(TribeCode::DUPLICATE_MESSAGE);
        }
        state.record(&msg);

        match try_apply(&mut state.world, &msg) {
            Applied::Done => {
                let intents = std::mem::take(&mut state.intents);
                state.intents = apply_intents(&mut state.world, intents);
            }
            Applied::Parked => {
                debug!(msg_type = %msg.msg_type(), agreement = msg.agreement(), "out of order msg");
                state.intents.push(msg);
            }
        }
        drop(state);
        self.signal_convergence();
        Ok(())
    }

    fn issue(&self, msg: TribeMsg) -> Result<()> {
        self.handle(msg.clone())?;
        self.membership.broadcast(encode_message(&msg));
        Ok(())
    }

    pub fn add_agreement(&self, name: &str) -> Result<()> {
        if self.state.lock().world.agreements.contains_key(name) {
            return make_error_msg(TribeCode::AGREEMENT_ALREADY_EXISTS, name.to_string());
        }
        self.issue(TribeMsg::Agreement(AgreementMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: name.to_string(),
            member: String::new(),
            msg_type: MsgType::AddAgreement,
        }))
    }

    pub fn remove_agreement(&self, name: &str) -> Result<()> {
        if !self.state.lock().world.agreements.contains_key(name) {
            return make_error_msg(TribeCode::AGREEMENT_DOES_NOT_EXIST, name.to_string());
        }
        self.issue(TribeMsg::Agreement(AgreementMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: name.to_string(),
            member: String::new(),
            msg_type: MsgType::RemoveAgreement,
        }))
    }

    pub fn join_agreement(&self, agreement: &str, member: &str) -> Result<()> {
        can_join(&self.state.lock().world, agreement, member)?;
        self.issue(TribeMsg::Agreement(AgreementMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: agreement.to_string(),
            member: member.to_string(),
            msg_type: MsgType::JoinAgreement,
        }))
    }

    pub fn leave_agreement(&self, agreement: &str, member: &str) -> Result<()> {
        can_leave(&self.state.lock().world, agreement, member)?;
        self.issue(TribeMsg::Agreement(AgreementMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: agreement.to_string(),
            member: member.to_string(),
            msg_type: MsgType::LeaveAgreement,
        }))
    }

    pub fn add_plugin(&self, agreement: &str, name: &str, version: u32) -> Result<()> {
        if !self.state.lock().world.agreements.contains_key(agreement) {
            return make_error_msg(TribeCode::AGREEMENT_DOES_NOT_EXIST, agreement.to_string());
        }
        self.issue(TribeMsg::Plugin(PluginMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: agreement.to_string(),
            plugin: PluginSpec {
                name: name.to_string(),
                version,
            },
            msg_type: MsgType::AddPlugin,
        }))
    }

    pub fn remove_plugin(&self, agreement: &str, name: &str, version: u32) -> Result<()> {
        if !self.state.lock().world.agreements.contains_key(agreement) {
            return make_error_msg(TribeCode::AGREEMENT_DOES_NOT_EXIST, agreement.to_string());
        }
        self.issue(TribeMsg::Plugin(PluginMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: agreement.to_string(),
            plugin: PluginSpec {
                name: name.to_string(),
                version,
            },
            msg_type: MsgType::RemovePlugin,
        }))
    }

    pub fn add_task(&self, agreement: &str, task_id: &str) -> Result<()> {
        {
            let state = self.state.lock();
            let Some(a) = state.world.agreements.get(agreement) else {
                return make_error_msg(TribeCode::AGREEMENT_DOES_NOT_EXIST, agreement.to_string());
            };
            if a.contains_task(task_id) {
                return make_error_msg(TribeCode::TASK_ALREADY_EXISTS, task_id.to_string());
            }
        }
        self.issue(TribeMsg::Task(TaskMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: agreement.to_string(),
            task_id: task_id.to_string(),
            msg_type: MsgType::AddTask,
        }))
    }

    pub fn remove_task(&self, agreement: &str, task_id: &str) -> Result<()> {
        {
            let state = self.state.lock();
            let Some(a) = state.world.agreements.get(agreement) else {
                return make_error_msg(TribeCode::AGREEMENT_DOES_NOT_EXIST, agreement.to_string());
            };
            if !a.contains_task(task_id) {
                return make_error_msg(TribeCode::TASK_DOES_NOT_EXIST, task_id.to_string());
            }
        }
        self.issue(TribeMsg::Task(TaskMsg {
            ltime: self.clock.increment(),
            uuid: Self::next_uuid(),
            agreement: agreement.to_string(),
            task_id: task_id.to_string(),
            msg_type: MsgType::RemoveTask,
        }))
    }

    /// Entry point for raw bytes delivered by the membership layer.
    pub fn handle_broadcast(&self, data: &[u8]) {
        match decode_message(data) {
            Ok(msg) => {
                if let Err(e) = self.handle(msg) {
                    // Duplicates are routine under gossip retransmission.
                    debug!(error = %e, "broadcast discarded");
                }
            }
            Err(e) => warn!(error = %e, "undecodable tribe broadcast discarded"),
        }
    }

    pub fn handle_member_join(&self, name: &str) {
        let mut state = self.state.lock();
        state
            .world
            .members
            .entry(name.to_string())
            .or_insert_with(|| Member::new(name));
        let intents = std::mem::take(&mut state.intents);
        state.intents = apply_intents(&mut state.world, intents);
        drop(state);
        self.signal_convergence();
    }

    pub fn handle_member_leave(&self, name: &str) {
        self.state.lock().world.members.remove(name);
    }

    /// Encode this node's full state for a push/pull exchange.
    pub fn local_state(&self) -> Vec<u8> {
        let state = self.state.lock();
        let full = FullStateMsg {
            ltime: self.clock.time(),
            agreements: state
                .world
                .agreements
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            members: state.world.members.values().cloned().collect(),
            intents: state.intents.clone(),
        };
        let mut buf = Vec::new();
        full.encode(&mut buf);
        buf
    }

    /// Fold a remote node's full state into ours.
    ///
    /// Set-level containment checks make the merge idempotent; the remote's
    /// pending intents run through the normal handler, where the duplicate
    /// ring suppresses anything already seen.
    pub fn merge_remote_state(&self, data: &[u8]) {
        let mut offset = 0;
        let full = match FullStateMsg::decode(data, &mut offset) {
            Ok(full) => full,
            Err(e) => {
                warn!(error = %e, "undecodable remote state discarded");
                return;
            }
        };
        self.clock.witness(full.ltime);

        {
            let mut state = self.state.lock();
            for (name, remote) in &full.agreements {
                let local = state
                    .world
                    .agreements
                    .entry(name.clone())
                    .or_insert_with(Agreement::new);
                for plugin in &remote.plugins {
                    local.add_plugin(plugin.clone());
                }
                for task in &remote.tasks {
                    local.add_task(task.id.clone());
                }
                for member in &remote.members {
                    local.members.insert(member.clone());
                }
            }
            for remote in &full.members {
                let member = state
                    .world
                    .members
                    .entry(remote.name.clone())
                    .or_insert_with(|| Member::new(&remote.name));
                if member.plugin_agreement.is_none() {
                    member.plugin_agreement = remote.plugin_agreement.clone();
                }
                member
                    .task_agreements
                    .extend(remote.task_agreements.iter().cloned());
            }
            let intents = std::mem::take(&mut state.intents);
            state.intents = apply_intents(&mut state.world, intents);
        }

        for intent in full.intents {
            if let Err(e) = self.handle(intent) {
                debug!(error = %e, "remote intent discarded");
            }
        }
        self.signal_convergence();
    }

    pub fn agreement(&self, name: &str) -> Option<Agreement> {
        self.state.lock().world.agreements.get(name).cloned()
    }

    pub fn agreements(&self) -> BTreeMap<String, Agreement> {
        self.state.lock().world.agreements.clone()
    }

    pub fn member(&self, name: &str) -> Option<Member> {
        self.state.lock().world.members.get(name).cloned()
    }

    pub fn intent_count(&self) -> usize {
        self.state.lock().intents.len()
    }

    /// The plugins and tasks agreements demand of the local node.
    pub fn local_requirements(&self) -> (Vec<PluginSpec>, Vec<TaskSpec>) {
        let state = self.state.lock();
        let Some(member) = state.world.members.get(&self.membership.local_name()) else {
            return (Vec::new(), Vec::new());
        };
        let mut plugins = Vec::new();
        if let Some(ref bound) = member.plugin_agreement {
            if let Some(agreement) = state.world.agreements.get(bound) {
                plugins.extend(agreement.plugins.iter().cloned());
            }
        }
        let mut tasks = Vec::new();
        for name in &member.task_agreements {
            if let Some(agreement) = state.world.agreements.get(name) {
                tasks.extend(agreement.tasks.iter().cloned());
            }
        }
        (plugins, tasks)
    }
}
