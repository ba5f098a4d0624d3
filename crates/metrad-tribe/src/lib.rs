pub mod agreement;
pub mod clock;
pub mod config;
pub mod membership;
pub mod messages;
pub mod tribe;
pub mod worker;

pub use agreement::{Agreement, Member, PluginSpec, TaskSpec};
pub use clock::LamportClock;
pub use config::TribeConfig;
pub use membership::{LoopbackHub, LoopbackMembership, Membership, SoloMembership};
pub use messages::{
    decode_message, encode_message, AgreementMsg, FullStateMsg, MsgType, PluginMsg, TaskMsg,
    TribeMsg,
};
pub use tribe::{apply_intents, Tribe, World};
pub use worker::{ConvergenceWorker, Materializer};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use metrad_types::status_code::TribeCode;

    fn tribe_on_hub(hub: &Arc<LoopbackHub>, name: &str) -> Arc<tribe::Tribe> {
        let t = tribe::Tribe::new(TribeConfig::named(name), hub.membership_for(name));
        hub.register(Arc::clone(&t));
        t
    }

    #[test]
    fn test_agreement_lifecycle_guards() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");

        tribe.add_agreement("clan").unwrap();
        let err = tribe.add_agreement("clan").unwrap_err();
        assert_eq!(err.code(), TribeCode::AGREEMENT_ALREADY_EXISTS);

        let err = tribe.remove_agreement("ghost").unwrap_err();
        assert_eq!(err.code(), TribeCode::AGREEMENT_DOES_NOT_EXIST);

        tribe.remove_agreement("clan").unwrap();
        assert!(tribe.agreement("clan").is_none());
    }

    #[test]
    fn test_join_guards() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.add_agreement("clan").unwrap();

        let err = tribe.join_agreement("ghost", "node-a").unwrap_err();
        assert_eq!(err.code(), TribeCode::AGREEMENT_DOES_NOT_EXIST);

        let err = tribe.join_agreement("clan", "stranger").unwrap_err();
        assert_eq!(err.code(), TribeCode::UNKNOWN_MEMBER);

        tribe.join_agreement("clan", "node-a").unwrap();
        assert!(tribe
            .agreement("clan")
            .unwrap()
            .members
            .contains("node-a"));

        // Once the bound agreement carries plugins, a second join is barred.
        tribe.add_plugin("clan", "dummy", 1).unwrap();
        tribe.add_agreement("other").unwrap();
        let err = tribe.join_agreement("other", "node-a").unwrap_err();
        assert_eq!(err.code(), TribeCode::ALREADY_MEMBER_OF_PLUGIN_AGREEMENT);
    }

    #[test]
    fn test_leave_guards() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.add_agreement("clan").unwrap();

        let err = tribe.leave_agreement("clan", "node-a").unwrap_err();
        assert_eq!(err.code(), TribeCode::NOT_A_MEMBER);

        tribe.join_agreement("clan", "node-a").unwrap();
        tribe.leave_agreement("clan", "node-a").unwrap();
        assert!(tribe.agreement("clan").unwrap().members.is_empty());
        // An agreement with no members still exists.
        assert!(tribe.agreement("clan").is_some());
    }

    #[test]
    fn test_task_guards() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.add_agreement("clan").unwrap();

        tribe.add_task("clan", "t-1").unwrap();
        let err = tribe.add_task("clan", "t-1").unwrap_err();
        assert_eq!(err.code(), TribeCode::TASK_ALREADY_EXISTS);

        let err = tribe.remove_task("clan", "t-9").unwrap_err();
        assert_eq!(err.code(), TribeCode::TASK_DOES_NOT_EXIST);

        tribe.remove_task("clan", "t-1").unwrap();
        assert!(tribe.agreement("clan").unwrap().tasks.is_empty());
    }

    #[test]
    fn test_duplicate_message_rejected_and_idempotent() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.add_agreement("clan").unwrap();

        let msg = TribeMsg::Plugin(PluginMsg {
            ltime: metrad_types::LTime(*tribe.ltime() + 1),
            uuid: "fixed-uuid".into(),
            agreement: "clan".into(),
            plugin: PluginSpec {
                name: "dummy".into(),
                version: 1,
            },
            msg_type: MsgType::AddPlugin,
        });

        tribe.handle(msg.clone()).unwrap();
        let state_after_first = tribe.agreement("clan").unwrap();

        let err = tribe.handle(msg).unwrap_err();
        assert_eq!(err.code(), TribeCode::DUPLICATE_MESSAGE);
        assert_eq!(tribe.agreement("clan").unwrap(), state_after_first);
    }

    #[test]
    fn test_out_of_order_messages_park_then_apply() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");

        // AddPlugin for an agreement nobody created yet parks as an intent.
        tribe
            .handle(TribeMsg::Plugin(PluginMsg {
                ltime: metrad_types::LTime(10),
                uuid: "u-plugin".into(),
                agreement: "clan".into(),
                plugin: PluginSpec {
                    name: "dummy".into(),
                    version: 3,
                },
                msg_type: MsgType::AddPlugin,
            }))
            .unwrap();
        assert_eq!(tribe.intent_count(), 1);
        assert!(tribe.agreement("clan").is_none());

        // The agreement arriving unblocks the parked intent.
        tribe
            .handle(TribeMsg::Agreement(AgreementMsg {
                ltime: metrad_types::LTime(11),
                uuid: "u-agreement".into(),
                agreement: "clan".into(),
                member: String::new(),
                msg_type: MsgType::AddAgreement,
            }))
            .unwrap();
        assert_eq!(tribe.intent_count(), 0);
        let agreement = tribe.agreement("clan").unwrap();
        assert_eq!(agreement.plugins.len(), 1);
        assert_eq!(agreement.plugins[0].version, 3);
    }

    #[test]
    fn test_intent_fixed_point_chains() {
        // remove-plugin intent waits for add-plugin, which waits for the
        // agreement; one AddAgreement resolves the whole chain.
        let mut world = World::default();
        let intents = vec![
            TribeMsg::Plugin(PluginMsg {
                ltime: metrad_types::LTime(5),
                uuid: "u-remove".into(),
                agreement: "clan".into(),
                plugin: PluginSpec {
                    name: "dummy".into(),
                    version: 1,
                },
                msg_type: MsgType::RemovePlugin,
            }),
            TribeMsg::Plugin(PluginMsg {
                ltime: metrad_types::LTime(6),
                uuid: "u-add".into(),
                agreement: "clan".into(),
                plugin: PluginSpec {
                    name: "dummy".into(),
                    version: 1,
                },
                msg_type: MsgType::AddPlugin,
            }),
        ];
        world.agreements.insert("clan".into(), Agreement::new());
        let leftover = apply_intents(&mut world, intents);
        assert!(leftover.is_empty());
        assert!(world.agreements["clan"].plugins.is_empty());
    }

    #[test]
    fn test_broadcast_converges_two_nodes() {
        let hub = LoopbackHub::new();
        let a = tribe_on_hub(&hub, "node-a");
        let b = tribe_on_hub(&hub, "node-b");

        a.add_agreement("clan").unwrap();
        a.add_plugin("clan", "dummy", 2).unwrap();
        b.join_agreement("clan", "node-b").unwrap();

        assert_eq!(a.agreements(), b.agreements());
        assert!(a.agreement("clan").unwrap().members.contains("node-b"));
    }

    #[test]
    fn test_lost_broadcast_corrected_by_push_pull() {
        let hub = LoopbackHub::new();
        let a = tribe_on_hub(&hub, "node-a");
        let b = tribe_on_hub(&hub, "node-b");
        let c = tribe_on_hub(&hub, "node-c");

        // node-c misses the AddAgreement broadcast.
        hub.drop_next_to("node-c", 1);
        a.add_agreement("x").unwrap();
        b.join_agreement("x", "node-b").unwrap();

        assert!(c.agreement("x").is_some() == false || c.agreement("x").unwrap().members.is_empty());

        // The next push/pull exchange with the seed corrects it.
        hub.push_pull("node-a", "node-c");
        let agreement = c.agreement("x").unwrap();
        assert!(agreement.members.contains("node-b"));
        assert_eq!(a.agreements(), c.agreements());
    }

    #[test]
    fn test_late_joiner_converges_via_full_state() {
        let hub = LoopbackHub::new();
        let a = tribe_on_hub(&hub, "node-a");
        let b = tribe_on_hub(&hub, "node-b");

        a.add_agreement("x").unwrap();
        b.join_agreement("x", "node-b").unwrap();
        a.add_plugin("x", "dummy", 1).unwrap();
        a.add_task("x", "t-1").unwrap();

        // node-c joins the cluster afterwards and syncs through the seed.
        let c = tribe_on_hub(&hub, "node-c");
        hub.push_pull("node-a", "node-c");

        let agreement = c.agreement("x").unwrap();
        assert!(agreement.members.contains("node-b"));
        assert_eq!(agreement.plugins.len(), 1);
        assert_eq!(agreement.tasks.len(), 1);
        assert_eq!(a.agreements(), c.agreements());

        // Merging the same state again changes nothing.
        hub.push_pull("node-a", "node-c");
        assert_eq!(a.agreements(), c.agreements());
    }

    #[test]
    fn test_ltimes_strictly_increase_in_program_order() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        let t0 = tribe.ltime();
        tribe.add_agreement("one").unwrap();
        let t1 = tribe.ltime();
        tribe.add_agreement("two").unwrap();
        let t2 = tribe.ltime();
        assert!(t0 < t1 && t1 < t2);
    }

    #[test]
    fn test_member_leave_drops_member() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.handle_member_join("node-b");
        assert!(tribe.member("node-b").is_some());
        tribe.handle_member_leave("node-b");
        assert!(tribe.member("node-b").is_none());
    }
}
