use super::*;
use chrono::Duration;

use crate::models::{SquadState, MAX_SLOTS};
use crate::platform::{MemoryPlatform, PlatformOp};
use crate::storage::{Database, Expiration};

const GUILD: GuildId = GuildId(1);
const HOST: UserId = UserId(100);
const B: UserId = UserId(101);
const C: UserId = UserId(102);
const D: UserId = UserId(103);

struct Harness {
    platform: Arc<MemoryPlatform>,
    db: SharedDatabase,
    manager: SquadManager,
    _due_rx: mpsc::UnboundedReceiver<SquadKey>,
}

fn harness() -> Harness {
    let platform = Arc::new(MemoryPlatform::new());
    let db = Database::open_in_memory().unwrap().shared();
    let config = SquadConfig {
        name_pool: vec!["Mamba".into(), "Cobra".into(), "Viper".into()],
        ..Default::default()
    };
    let (manager, due_rx) = SquadManager::new(db.clone(), platform.clone(), config);
    Harness {
        platform,
        db,
        manager,
        _due_rx: due_rx,
    }
}

fn request(slots: u8) -> OpenRequest {
    OpenRequest {
        mode: "Rec".into(),
        platform: "PS5".into(),
        positions: "PG, C".into(),
        slots,
        crossplay: None,
        name: None,
        note: None,
        ttl_minutes: None,
    }
}

async fn open(h: &Harness, slots: u8) -> SquadKey {
    h.manager.open(GUILD, HOST, &request(slots)).await.unwrap().key
}

fn stored(h: &Harness, key: &SquadKey) -> Squad {
    h.manager.load(key.message_id).unwrap().unwrap().1
}

fn version(h: &Harness, key: &SquadKey) -> u64 {
    storage::lock(&h.db)
        .squads()
        .find(key.message_id)
        .unwrap()
        .unwrap()
        .version
}

fn make_due(h: &Harness, key: &SquadKey) {
    storage::lock(&h.db)
        .expirations()
        .upsert(&Expiration {
            message_id: key.message_id,
            guild_id: key.guild_id,
            channel_id: key.channel_id,
            due_at: Utc::now() - Duration::minutes(1),
        })
        .unwrap();
}

#[tokio::test]
async fn test_open_join_leave_close_scenario() {
    let h = harness();
    let opened = h.manager.open(GUILD, HOST, &request(2)).await.unwrap();
    let key = opened.key;
    let squad = opened.squad;

    assert_eq!(squad.name, "Squad Mamba");
    assert_eq!(squad.joined, vec![HOST]);
    assert_eq!(squad.state(), SquadState::Forming);
    assert!(opened.url.ends_with(&key.message_id.to_string()));
    let role = squad.role_id.unwrap();
    assert!(h.platform.has_role(GUILD, HOST, role));
    let public = squad.thread_id.unwrap();
    assert_eq!(h.platform.channel(public).unwrap().name, "[Rec] Squad Mamba chat");

    // Join by B fills the squad and provisions the private rooms
    let squad = h.manager.join(&key, B).await.unwrap();
    assert_eq!(squad.joined, vec![HOST, B]);
    assert_eq!(squad.state(), SquadState::Full);
    let voice = squad.voice_id.unwrap();
    let private = squad.thread_id.unwrap();
    assert_ne!(private, public);
    assert!(squad.thread_private);
    assert!(h.platform.channel(public).unwrap().archived);
    assert_eq!(h.platform.channel(private).unwrap().members, vec![HOST, B]);
    assert!(h.platform.has_role(GUILD, B, role));

    // Leave returns to Forming but keeps the rooms
    let squad = h.manager.leave(&key, B).await.unwrap();
    assert_eq!(squad.joined, vec![HOST]);
    assert_eq!(squad.state(), SquadState::Forming);
    assert_eq!(squad.voice_id, Some(voice));
    assert_eq!(squad.thread_id, Some(private));
    assert!(!h.platform.has_role(GUILD, B, role));

    let squad = h.manager.close(&key).await.unwrap();
    assert_eq!(squad.state(), SquadState::Closed);
    assert!(squad.role_id.is_none() && squad.voice_id.is_none());
    assert!(h.platform.channel(voice).is_none());
    assert!(h.platform.role_name(role).is_none());
    assert!(h.platform.channel(private).unwrap().locked);

    let post = h.platform.post(key.message_id).unwrap();
    assert!(post.embed.as_ref().unwrap().title.starts_with("🔒 [CLOSED]"));
    assert!(post.buttons.iter().all(|b| b.disabled));
    assert_eq!(codec::decode(post.footer().unwrap()).unwrap(), stored(&h, &key));
    assert!(storage::lock(&h.db)
        .expirations()
        .find(key.message_id)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_failed_join_and_leave_do_not_mutate() {
    let h = harness();
    let key = open(&h, 3).await;
    let before = version(&h, &key);

    assert!(matches!(h.manager.join(&key, HOST).await, Err(Error::AlreadyJoined)));
    assert!(matches!(h.manager.leave(&key, B).await, Err(Error::NotJoined)));
    assert_eq!(version(&h, &key), before);
    assert_eq!(stored(&h, &key).joined, vec![HOST]);
}

#[tokio::test]
async fn test_join_rejected_when_full_or_closed() {
    let h = harness();
    let key = open(&h, 2).await;
    h.manager.join(&key, B).await.unwrap();
    assert!(matches!(h.manager.join(&key, C).await, Err(Error::SquadFull)));

    h.manager.close(&key).await.unwrap();
    assert!(matches!(h.manager.leave(&key, B).await, Err(Error::SquadClosed)));
    assert!(matches!(h.manager.close(&key).await, Err(Error::SquadClosed)));
}

#[tokio::test]
async fn test_roster_never_exceeds_slots() {
    let h = harness();
    let key = open(&h, 3).await;
    for (i, user) in (200..215u64).map(UserId).enumerate() {
        let _ = h.manager.join(&key, user).await;
        if i % 2 == 1 {
            let _ = h.manager.leave(&key, UserId(user.get() - 1)).await;
        }
        let squad = stored(&h, &key);
        assert!(squad.joined.len() <= squad.slots as usize);
        assert!(squad.validate().is_ok());
    }
}

#[tokio::test]
async fn test_full_provisions_once() {
    let h = harness();
    let key = open(&h, 2).await;
    let voice = h.manager.join(&key, B).await.unwrap().voice_id;
    assert!(voice.is_some());

    h.manager.leave(&key, B).await.unwrap();
    let squad = h.manager.join(&key, C).await.unwrap();
    assert_eq!(squad.voice_id, voice);
    assert_eq!(h.platform.calls(PlatformOp::CreateVoiceRoom), 1);
    assert_eq!(h.platform.calls(PlatformOp::CreatePrivateThread), 1);
    // The new member still gets into the private thread
    let thread = h.platform.channel(squad.thread_id.unwrap()).unwrap();
    assert!(thread.members.contains(&C));
}

#[tokio::test]
async fn test_provisioning_failures_are_swallowed() {
    let h = harness();
    let key = open(&h, 2).await;
    h.platform.fail(PlatformOp::CreateVoiceRoom);
    h.platform.fail(PlatformOp::CreatePrivateThread);
    h.platform.fail(PlatformOp::AddMemberRole);

    let squad = h.manager.join(&key, B).await.unwrap();
    assert_eq!(squad.joined, vec![HOST, B]);
    assert!(squad.voice_id.is_none());
    assert!(!squad.thread_private);

    h.platform.recover(PlatformOp::CreateVoiceRoom);
    h.platform.recover(PlatformOp::CreatePrivateThread);
    let squad = h.manager.request_private_room(&key, None, None).await.unwrap();
    assert!(squad.voice_id.is_some());
    assert!(squad.thread_private);
}

#[tokio::test]
async fn test_private_room_on_request() {
    let h = harness();
    let key = open(&h, 4).await;

    let squad = h.manager.request_private_room(&key, Some(true), Some(false)).await.unwrap();
    assert!(squad.voice_id.is_some());
    assert!(!squad.thread_private);

    let squad = h.manager.request_private_room(&key, None, None).await.unwrap();
    assert!(squad.thread_private);
    assert_eq!(h.platform.calls(PlatformOp::CreateVoiceRoom), 1);

    assert!(matches!(
        h.manager.request_private_room(&key, Some(false), Some(false)).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_edit_shrinks_slots_keeping_host_first() {
    let h = harness();
    let key = open(&h, 4).await;
    h.manager.join(&key, B).await.unwrap();
    h.manager.join(&key, C).await.unwrap();
    let role = stored(&h, &key).role_id.unwrap();

    let changes = SquadEdit {
        slots: Some(2),
        ..Default::default()
    };
    let squad = h.manager.edit(&key, &changes).await.unwrap();
    assert_eq!(squad.slots, 2);
    assert_eq!(squad.joined, vec![HOST, B]);
    assert!(!h.platform.has_role(GUILD, C, role));
    // Shrinking to the roster size makes the squad full
    assert!(squad.voice_id.is_some());
}

#[tokio::test]
async fn test_manual_add_requires_force_when_full() {
    let h = harness();
    let key = open(&h, 2).await;
    h.manager.join(&key, B).await.unwrap();
    let voice = stored(&h, &key).voice_id.unwrap();

    assert!(matches!(
        h.manager.add_member(&key, C, false).await,
        Err(Error::SquadFull)
    ));
    let squad = h.manager.add_member(&key, C, true).await.unwrap();
    assert_eq!(squad.slots, 3);
    assert_eq!(squad.joined, vec![HOST, B, C]);
    assert_eq!(h.platform.channel(voice).unwrap().user_limit, Some(3));
    assert!(h.platform.has_role(GUILD, C, squad.role_id.unwrap()));
    assert!(matches!(
        h.manager.add_member(&key, C, true).await,
        Err(Error::AlreadyJoined)
    ));
}

#[tokio::test]
async fn test_manual_add_stops_at_max_slots() {
    let h = harness();
    let key = open(&h, MAX_SLOTS).await;
    for user in [B, C, D, UserId(104)] {
        h.manager.join(&key, user).await.unwrap();
    }
    assert!(matches!(
        h.manager.add_member(&key, UserId(105), true).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_manual_remove() {
    let h = harness();
    let key = open(&h, 2).await;
    h.manager.join(&key, B).await.unwrap();
    let squad = h.manager.remove_member(&key, B).await.unwrap();
    assert_eq!(squad.joined, vec![HOST]);
    let thread = h.platform.channel(squad.thread_id.unwrap()).unwrap();
    assert!(!thread.members.contains(&B));
    assert!(matches!(
        h.manager.remove_member(&key, B).await,
        Err(Error::NotJoined)
    ));
}

#[tokio::test]
async fn test_rename_moves_role_and_voice_room() {
    let h = harness();
    let key = open(&h, 2).await;
    let squad = h.manager.join(&key, B).await.unwrap();
    let old_role = squad.role_id.unwrap();
    let voice = squad.voice_id.unwrap();

    let changes = SquadEdit {
        name: Some("cobra".into()),
        ..Default::default()
    };
    let squad = h.manager.edit(&key, &changes).await.unwrap();
    assert_eq!(squad.name, "Squad Cobra");
    let new_role = squad.role_id.unwrap();
    assert_ne!(new_role, old_role);
    assert!(h.platform.has_role(GUILD, HOST, new_role));
    assert!(h.platform.has_role(GUILD, B, new_role));
    assert!(h.platform.role_name(old_role).is_none());

    let room = h.platform.channel(voice).unwrap();
    assert_eq!(room.name, "Squad Cobra");
    assert_eq!(room.access_role, Some(new_role));

    let free = h.manager.autocomplete_names(GUILD, "").await.unwrap();
    assert!(free.contains(&"Squad Mamba".to_string()));
    assert!(!free.contains(&"Squad Cobra".to_string()));
}

#[tokio::test]
async fn test_rename_to_taken_name_changes_nothing() {
    let h = harness();
    let first = open(&h, 2).await;
    let second = open(&h, 2).await;
    assert_eq!(stored(&h, &second).name, "Squad Cobra");

    let changes = SquadEdit {
        name: Some("Squad Cobra".into()),
        mode: Some("Park".into()),
        ..Default::default()
    };
    assert!(matches!(
        h.manager.edit(&first, &changes).await,
        Err(Error::NameTaken(_))
    ));
    let squad = stored(&h, &first);
    assert_eq!(squad.name, "Squad Mamba");
    assert_eq!(squad.mode, "Rec");
}

#[tokio::test]
async fn test_edit_of_closed_squad_is_rejected() {
    let h = harness();
    let key = open(&h, 2).await;
    h.manager.close(&key).await.unwrap();

    let changes = SquadEdit {
        name: Some("Viper".into()),
        ..Default::default()
    };
    assert!(matches!(
        h.manager.edit(&key, &changes).await,
        Err(Error::SquadClosed)
    ));
    assert!(matches!(
        h.manager.edit(&key, &SquadEdit::default()).await,
        Err(Error::Validation(_))
    ));
    let free = h.manager.autocomplete_names(GUILD, "viper").await.unwrap();
    assert_eq!(free, vec!["Squad Viper"]);
}

#[tokio::test]
async fn test_edit_ttl_reschedules() {
    let h = harness();
    let key = open(&h, 2).await;

    let changes = SquadEdit {
        ttl_minutes: Some(0),
        ..Default::default()
    };
    h.manager.edit(&key, &changes).await.unwrap();
    assert!(storage::lock(&h.db).expirations().find(key.message_id).unwrap().is_none());

    let changes = SquadEdit {
        ttl_minutes: Some(30),
        ..Default::default()
    };
    let squad = h.manager.edit(&key, &changes).await.unwrap();
    assert_eq!(squad.ttl_minutes, 30);
    let due = storage::lock(&h.db)
        .expirations()
        .find(key.message_id)
        .unwrap()
        .unwrap()
        .due_at;
    assert!(due > Utc::now() + Duration::minutes(29));

    let changes = SquadEdit {
        ttl_minutes: Some(3),
        ..Default::default()
    };
    assert!(matches!(
        h.manager.edit(&key, &changes).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_expire_releases_resources() {
    let h = harness();
    let key = open(&h, 2).await;
    let role = h.manager.join(&key, B).await.unwrap().role_id.unwrap();

    // Not due yet
    assert!(h.manager.expire(&key).await.unwrap().is_none());

    make_due(&h, &key);
    let squad = h.manager.expire(&key).await.unwrap().unwrap();
    assert_eq!(squad.state(), SquadState::Expired);
    assert!(h.platform.role_name(role).is_none());
    let post = h.platform.post(key.message_id).unwrap();
    assert!(post.embed.unwrap().title.starts_with("⏲️ [EXPIRED]"));

    assert!(h.manager.expire(&key).await.unwrap().is_none());
    assert_eq!(h.platform.calls(PlatformOp::DeleteRole), 1);
}

#[tokio::test]
async fn test_expire_after_close_is_noop() {
    let h = harness();
    let key = open(&h, 2).await;
    make_due(&h, &key);
    h.manager.close(&key).await.unwrap();
    assert!(h.manager.expire(&key).await.unwrap().is_none());

    // A timer row that survived the close still finds a terminal squad
    make_due(&h, &key);
    assert!(h.manager.expire(&key).await.unwrap().is_none());
    assert_eq!(stored(&h, &key).status, SquadStatus::Closed);
    assert_eq!(h.platform.calls(PlatformOp::DeleteRole), 1);
}

#[tokio::test]
async fn test_failed_expire_stays_scheduled() {
    let h = harness();
    let key = open(&h, 2).await;
    make_due(&h, &key);
    storage::lock(&h.db)
        .conn()
        .execute_batch(
            "CREATE TRIGGER squads_frozen BEFORE UPDATE ON squads
             BEGIN SELECT RAISE(ABORT, 'squads frozen'); END;",
        )
        .unwrap();

    assert!(h.manager.expire(&key).await.is_err());
    assert_eq!(stored(&h, &key).status, SquadStatus::Open);
    let pending = storage::lock(&h.db)
        .expirations()
        .find(key.message_id)
        .unwrap()
        .unwrap();
    assert!(pending.due_at > Utc::now());

    storage::lock(&h.db)
        .conn()
        .execute_batch("DROP TRIGGER squads_frozen")
        .unwrap();
    make_due(&h, &key);
    let squad = h.manager.expire(&key).await.unwrap().unwrap();
    assert_eq!(squad.status, SquadStatus::Expired);
}

#[tokio::test]
async fn test_ttl_zero_never_schedules() {
    let h = harness();
    let mut req = request(2);
    req.ttl_minutes = Some(0);
    let key = h.manager.open(GUILD, HOST, &req).await.unwrap().key;
    assert!(storage::lock(&h.db).expirations().find(key.message_id).unwrap().is_none());
}

#[tokio::test]
async fn test_open_validation() {
    let h = harness();
    let mut req = request(0);
    assert!(matches!(h.manager.open(GUILD, HOST, &req).await, Err(Error::Validation(_))));
    req.slots = 2;
    req.mode = "  ".into();
    assert!(matches!(h.manager.open(GUILD, HOST, &req).await, Err(Error::Validation(_))));
    req.mode = "Rec".into();
    req.name = Some("Hydra".into());
    assert!(matches!(h.manager.open(GUILD, HOST, &req).await, Err(Error::Validation(_))));
    req.name = None;
    req.ttl_minutes = Some(5000);
    assert!(matches!(h.manager.open(GUILD, HOST, &req).await, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_overlong_text_fields_rejected() {
    let h = harness();
    let mut req = request(2);
    req.mode = "x".repeat(MAX_LABEL_CHARS + 1);
    assert!(matches!(h.manager.open(GUILD, HOST, &req).await, Err(Error::Validation(_))));
    req.mode = "Rec".into();
    req.positions = "y".repeat(MAX_POSITIONS_CHARS + 1);
    assert!(matches!(h.manager.open(GUILD, HOST, &req).await, Err(Error::Validation(_))));
    assert_eq!(h.manager.autocomplete_names(GUILD, "").await.unwrap().len(), 3);

    let key = open(&h, 2).await;
    let changes = SquadEdit {
        platform: Some("z".repeat(MAX_LABEL_CHARS + 1)),
        ..Default::default()
    };
    assert!(matches!(
        h.manager.edit(&key, &changes).await,
        Err(Error::Validation(_))
    ));
    assert_eq!(stored(&h, &key).platform, "PS5");

    let changes = SquadEdit {
        mode: Some("m".repeat(MAX_LABEL_CHARS)),
        ..Default::default()
    };
    let squad = h.manager.edit(&key, &changes).await.unwrap();
    let post = h.platform.post(key.message_id).unwrap();
    assert_eq!(post.embed.unwrap().title, render::title(&squad));
}

#[tokio::test]
async fn test_open_names() {
    let h = harness();
    let mut req = request(2);
    req.name = Some("viper".into());
    let squad = h.manager.open(GUILD, HOST, &req).await.unwrap().squad;
    assert_eq!(squad.name, "Squad Viper");

    assert!(matches!(
        h.manager.open(GUILD, B, &req).await,
        Err(Error::NameTaken(_))
    ));

    open(&h, 2).await;
    open(&h, 2).await;
    assert!(matches!(
        h.manager.open(GUILD, C, &request(2)).await,
        Err(Error::NamePoolExhausted)
    ));
}

#[tokio::test]
async fn test_failed_post_gives_name_back() {
    let h = harness();
    h.platform.fail(PlatformOp::SendPost);
    assert!(matches!(
        h.manager.open(GUILD, HOST, &request(2)).await,
        Err(Error::Platform(_))
    ));
    h.platform.recover(PlatformOp::SendPost);

    let free = h.manager.autocomplete_names(GUILD, "mamba").await.unwrap();
    assert_eq!(free, vec!["Squad Mamba"]);
}

#[tokio::test]
async fn test_commit_retries_on_conflict() {
    let h = harness();
    let key = open(&h, 3).await;
    let db = h.db.clone();
    let message = key.message_id;

    let mut interfered = false;
    let (squad, ()) = h
        .manager
        .commit(message, |s| {
            if !interfered {
                interfered = true;
                let record = storage::lock(&db).squads().find(message).unwrap().unwrap();
                storage::lock(&db)
                    .squads()
                    .compare_and_swap(message, record.version, &record.blob)
                    .unwrap();
            }
            s.positions = "C".into();
            Ok(())
        })
        .unwrap();
    assert_eq!(squad.positions, "C");
    assert_eq!(version(&h, &key), 3);

    let result = h.manager.commit(message, |s| {
        let record = storage::lock(&db).squads().find(message).unwrap().unwrap();
        storage::lock(&db)
            .squads()
            .compare_and_swap(message, record.version, &record.blob)
            .unwrap();
        s.positions = "SF".into();
        Ok(())
    });
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_resources_that_lose_a_race_are_discarded() {
    let h = harness();
    let key = open(&h, 2).await;
    let snapshot = stored(&h, &key);
    h.manager.close(&key).await.unwrap();

    h.manager.provision(&key, &snapshot, true, true).await;
    let squad = stored(&h, &key);
    assert!(squad.voice_id.is_none());
    assert!(!squad.thread_private);
    assert!(h.platform.channels_of_kind(ChannelKind::Voice).is_empty());
    for thread in h.platform.channels_of_kind(ChannelKind::PrivateThread) {
        assert!(h.platform.channel(thread).unwrap().archived);
    }
}

#[tokio::test]
async fn test_resolve_message_reference() {
    let h = harness();
    let key = open(&h, 2).await;
    let general = h.platform.add_text_channel(GUILD, "general");

    let by_link = MessageRef {
        message_id: key.message_id,
        channel_id: Some(key.channel_id),
    };
    let (found, squad) = h.manager.resolve(GUILD, general, by_link).await.unwrap();
    assert_eq!(found, key);
    assert_eq!(squad.name, "Squad Mamba");

    let by_id = MessageRef {
        message_id: key.message_id,
        channel_id: None,
    };
    assert!(h.manager.resolve(GUILD, key.channel_id, by_id).await.is_ok());
    assert!(matches!(
        h.manager.resolve(GUILD, general, by_id).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        h.manager.resolve(GuildId(2), key.channel_id, by_id).await,
        Err(Error::NotFound(_))
    ));

    // A link to an unknown channel falls back to the invoking channel
    let stale_link = MessageRef {
        message_id: key.message_id,
        channel_id: Some(ChannelId(4242)),
    };
    assert!(h.manager.resolve(GUILD, key.channel_id, stale_link).await.is_ok());
}

#[tokio::test]
async fn test_setup_refreshes_guide_post() {
    let h = harness();
    let channel = h.manager.setup(GUILD).await.unwrap();
    open(&h, 2).await;
    assert_eq!(h.manager.setup(GUILD).await.unwrap(), channel);

    let posts = h.platform.recent_posts(channel, 20).await.unwrap();
    let guides = posts
        .iter()
        .filter(|(_, p)| p.content.as_deref().is_some_and(|c| c.contains(PIN_MARKER)))
        .count();
    assert_eq!(guides, 1);
}

#[tokio::test]
async fn test_autocomplete_filters_free_names() {
    let h = harness();
    open(&h, 2).await;
    assert_eq!(
        h.manager.autocomplete_names(GUILD, "").await.unwrap(),
        vec!["Squad Cobra", "Squad Viper"]
    );
    assert_eq!(
        h.manager.autocomplete_names(GUILD, "VIP").await.unwrap(),
        vec!["Squad Viper"]
    );
}

#[tokio::test]
async fn test_run_expiry_consumes_due_squads() {
    let platform = Arc::new(MemoryPlatform::new());
    let db = Database::open_in_memory().unwrap().shared();
    let (manager, due_rx) = SquadManager::new(db.clone(), platform.clone(), SquadConfig::default());
    let manager = Arc::new(manager);
    let key = manager.open(GUILD, HOST, &request(2)).await.unwrap().key;

    storage::lock(&db)
        .expirations()
        .upsert(&Expiration {
            message_id: key.message_id,
            guild_id: key.guild_id,
            channel_id: key.channel_id,
            due_at: Utc::now() - Duration::minutes(1),
        })
        .unwrap();
    assert_eq!(manager.rehydrate().unwrap(), 1);

    let pump = tokio::spawn(manager.clone().run_expiry(due_rx));
    for _ in 0..50 {
        if manager.load(key.message_id).unwrap().unwrap().1.status == SquadStatus::Expired {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(
        manager.load(key.message_id).unwrap().unwrap().1.status,
        SquadStatus::Expired
    );
    pump.abort();
}
