//! Room-level control arbitration through the hub: the host hand-off
//! walk-through, protection, concurrency and broadcast isolation.

use std::sync::Arc;
use std::thread;

use cohost_desktop::mock::{MockDesktop, MockDesktopHandle, MockSink};
use cohost_desktop::HeadlessCapture;
use cohost_protocol::mock::MockRtcBackend;
use cohost_server::config::{Config, MemberConfig};
use cohost_server::member::from_config;
use cohost_server::{
    Backends, ControlOutcome, Credentials, Hub, Registry, RegistryEvent, ServerError, Session,
    Transport,
};
use cohost_types::{MemberProfile, ServerMessage, SessionId, Settings};
use parking_lot::Mutex;
use tokio::sync::mpsc;

struct Room {
    hub: Arc<Hub>,
    desktop: MockDesktopHandle,
}

fn room(config: Config) -> Room {
    let desktop = MockDesktop::new();
    let handle = desktop.handle();
    let (rtc, _) = MockRtcBackend::new();
    let members = from_config(&MemberConfig::default());
    let hub = Hub::new(
        config,
        Backends {
            desktop: Arc::new(desktop),
            capture: Arc::new(HeadlessCapture::new("video/VP8", "audio/opus")),
            sink: Arc::new(MockSink::new()),
            rtc: Arc::new(rtc),
            members,
        },
    )
    .unwrap();
    Room {
        hub,
        desktop: handle,
    }
}

/// Log in and attach a transport; returns the session and its outbound queue.
fn join(hub: &Hub, name: &str, admin: bool) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
    let password = if admin { "admin" } else { "neighbor" };
    let session = hub
        .login(&Credentials {
            username: name.into(),
            password: password.into(),
        })
        .unwrap();
    let (transport, rx) = Transport::channel(64);
    hub.connect(&session, transport).unwrap();
    (session, rx)
}

fn received(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).unwrap());
    }
    out
}

fn host_messages(messages: &[ServerMessage]) -> Vec<Option<SessionId>> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::ControlHost(host) => Some(host.host_id.clone()),
            _ => None,
        })
        .collect()
}

fn explicit_hosting() -> Config {
    let mut config = Config::default();
    config.session.implicit_hosting = false;
    config
}

#[test]
fn host_hand_off_walkthrough() {
    let room = room(explicit_hosting());
    let registry = room.hub.registry();
    let (a, mut rx_a) = join(&room.hub, "a", false);
    let (b, mut rx_b) = join(&room.hub, "b", false);
    let (c, mut rx_c) = join(&room.hub, "c", true);
    received(&mut rx_a);
    received(&mut rx_b);
    received(&mut rx_c);

    // A requests with nobody in control.
    assert_eq!(registry.request_control(a.id()).unwrap(), ControlOutcome::Granted);
    assert_eq!(registry.host_id(), Some(a.id().clone()));
    assert_eq!(host_messages(&received(&mut rx_b)), vec![Some(a.id().clone())]);
    received(&mut rx_a);
    received(&mut rx_c);

    // B asks while A holds control.
    assert_eq!(
        registry.request_control(b.id()).unwrap(),
        ControlOutcome::HostBusy(a.id().clone())
    );
    assert!(received(&mut rx_a)
        .iter()
        .any(|m| matches!(m, ServerMessage::ControlRequesting { id } if id == b.id())));
    assert_eq!(host_messages(&received(&mut rx_b)), vec![Some(a.id().clone())]);
    assert_eq!(registry.host_id(), Some(a.id().clone()));

    // Admin C hands control to B.
    registry.give_control(c.id(), b.id()).unwrap();
    assert_eq!(registry.host_id(), Some(b.id().clone()));
    assert_eq!(host_messages(&received(&mut rx_a)), vec![Some(b.id().clone())]);
    assert_eq!(host_messages(&received(&mut rx_c)), vec![Some(b.id().clone())]);
    let resets_before = room.desktop.reset_count();

    // B drops off.
    registry.disconnect(b.id(), "bye").unwrap();
    assert_eq!(registry.host_id(), None);
    assert_eq!(host_messages(&received(&mut rx_a)), vec![None]);
    assert_eq!(room.desktop.reset_count(), resets_before + 1);
}

#[test]
fn deleting_the_host_releases_before_the_next_request() {
    let room = room(explicit_hosting());
    let registry = room.hub.registry();
    let (a, _rx_a) = join(&room.hub, "a", false);
    let (b, _rx_b) = join(&room.hub, "b", false);

    registry.request_control(a.id()).unwrap();
    registry.delete(a.id()).unwrap();
    assert_eq!(registry.request_control(b.id()).unwrap(), ControlOutcome::Granted);
}

#[test]
fn unknown_sessions_are_harmless() {
    let room = room(explicit_hosting());
    let registry = room.hub.registry();
    let ghost = SessionId::new("ghost");
    assert!(matches!(
        registry.request_control(&ghost),
        Err(ServerError::NotFound(_))
    ));
    assert!(matches!(
        registry.release_control(&ghost),
        Err(ServerError::NotFound(_))
    ));
    assert!(matches!(registry.take_control(&ghost), Err(ServerError::NotFound(_))));
    assert!(registry.host_id().is_none());
}

#[test]
fn protection_follows_admin_presence() {
    let mut config = explicit_hosting();
    config.session.control_protection = true;
    let room = room(config);
    let registry = room.hub.registry();
    let (a, mut rx_a) = join(&room.hub, "a", false);
    received(&mut rx_a);

    assert!(matches!(
        registry.request_control(a.id()),
        Err(ServerError::Forbidden(_))
    ));
    assert!(received(&mut rx_a)
        .iter()
        .any(|m| matches!(m, ServerMessage::ControlLocked { .. })));

    let (_admin, _rx) = join(&room.hub, "root", true);
    assert_eq!(registry.request_control(a.id()).unwrap(), ControlOutcome::Granted);
}

#[test]
fn one_stuck_recipient_does_not_block_the_rest() {
    let room = room(explicit_hosting());
    let registry = room.hub.registry();

    let stuck = room
        .hub
        .login(&Credentials {
            username: "stuck".into(),
            password: "neighbor".into(),
        })
        .unwrap();
    let (transport, _never_read) = Transport::channel(1);
    room.hub.connect(&stuck, transport).unwrap();

    let mut others: Vec<_> = (0..3)
        .map(|i| join(&room.hub, &format!("peer{i}"), false))
        .collect();
    for (_, rx) in &mut others {
        received(rx);
    }

    registry.broadcast(&ServerMessage::Heartbeat, &[]);
    registry.broadcast(&ServerMessage::Heartbeat, &[]);
    for (_, rx) in &mut others {
        let got = received(rx);
        assert_eq!(
            got.iter()
                .filter(|m| matches!(m, ServerMessage::Heartbeat))
                .count(),
            2
        );
    }
}

#[test]
fn concurrent_transitions_keep_a_single_host() {
    let registry = Arc::new(Registry::new(Settings::default()));
    let ids: Vec<SessionId> = (0..6).map(|i| SessionId::new(format!("s{i}"))).collect();
    let mut queues = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        let profile = if i == 0 {
            MemberProfile::admin(id.as_str())
        } else {
            MemberProfile::user(id.as_str())
        };
        registry.create(id.clone(), profile).unwrap();
        let (transport, rx) = Transport::channel(4096);
        queues.push(rx);
        registry.connect(id, transport).unwrap();
    }

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    let observer = Arc::downgrade(&registry);
    registry.subscribe(move |event| {
        if let RegistryEvent::HostChanged { old, new } = event {
            // The event must reflect the state after the transition.
            let current = observer.upgrade().and_then(|r| r.host_id());
            assert_eq!(&current, new);
            sink.lock().push((old.clone(), new.clone()));
        }
    });

    let admin = ids[0].clone();
    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .enumerate()
        .map(|(n, id)| {
            let registry = Arc::clone(&registry);
            let admin = admin.clone();
            let target = SessionId::new(format!("s{}", (n + 1) % 6));
            thread::spawn(move || {
                for round in 0..200 {
                    match (round + n) % 5 {
                        0 | 1 => {
                            let _ = registry.request_control(&id);
                        }
                        2 => {
                            let _ = registry.release_control(&id);
                        }
                        3 => {
                            let _ = registry.take_control(&admin);
                        }
                        _ => {
                            let _ = registry.give_control(&admin, &target);
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every hand-off starts from where the previous one ended.
    let changes = changes.lock();
    assert!(!changes.is_empty());
    let mut previous: Option<SessionId> = None;
    for (old, new) in changes.iter() {
        assert_eq!(old, &previous);
        assert_ne!(old, new);
        previous.clone_from(new);
    }
    assert_eq!(registry.host_id(), previous);
}

#[test]
fn user_password_login_leaves_a_connected_admin_alone() {
    let room = room(Config::default());
    let (root, _rx_root) = join(&room.hub, "root", true);
    let (other, _rx_other) = join(&room.hub, "root", false);

    assert_ne!(root.id(), other.id());
    assert!(root.is_admin());
    assert!(root.is_connected());
    assert!(!other.is_admin());
    assert_eq!(room.hub.registry().list().len(), 2);
}

#[test]
fn deleting_the_last_admin_relocks_a_protected_room() {
    let mut config = explicit_hosting();
    config.session.control_protection = true;
    let room = room(config);
    let registry = room.hub.registry();
    let (a, mut rx_a) = join(&room.hub, "a", false);
    let (root, _rx) = join(&room.hub, "root", true);
    assert!(!registry.settings().locked_controls);
    received(&mut rx_a);

    registry.delete(root.id()).unwrap();
    assert!(registry.settings().locked_controls);
    assert!(received(&mut rx_a)
        .iter()
        .any(|m| matches!(m, ServerMessage::SystemSettings(s) if s.locked_controls)));
    assert!(matches!(
        registry.request_control(a.id()),
        Err(ServerError::Forbidden(_))
    ));
}
