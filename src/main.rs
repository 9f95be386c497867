use shared_anchor::{
    init_tracing, LoopbackRoom, LoopbackTransport, Pose, SceneGraph, SceneTree, ScriptedSource,
    SessionConfig, SessionEvent, SharedSpaceSession, TrackingSample, Transport,
};
use tracing::info;

type Device = SharedSpaceSession<LoopbackTransport, SceneTree>;

const TICK_MS: u64 = 50;
const TARGET: &str = "ARMascot";

/// A device that sees the target at `position` (metres, device space) from `at_ms` on
fn device(
    room: &LoopbackRoom,
    config: &SessionConfig,
    position: [f32; 3],
    at_ms: u64,
) -> Result<Device, Box<dyn std::error::Error>> {
    let mut transport = room.create_transport();
    transport.join();

    let source = ScriptedSource::new("scripted-camera")
        .with_sample(at_ms, TrackingSample::tracked(TARGET, position, [0.0, 0.0, 0.0, 1.0]));
    let mut session = SharedSpaceSession::new(config.clone(), transport, SceneTree::new())?
        .with_source(Box::new(source));

    // Something to keep anchored: a cube one metre above the device origin
    let cube = session.scene_mut().create_node("cube", None)?;
    session
        .scene_mut()
        .set_local_pose(cube, Pose::from_translation(0.0, 1.0, 0.0))?;
    session.bind_content(cube)?;
    Ok(session)
}

fn describe(id: usize, event: &SessionEvent) -> Option<String> {
    let text = match event {
        SessionEvent::AnchorPublished { version } => format!("published anchor v{}", version),
        SessionEvent::AlignmentChanged { frame } if frame.is_aligned() => {
            format!("alignment frame {}", frame.pose)
        }
        SessionEvent::LocallyAligned => "locally aligned".to_string(),
        SessionEvent::EveryoneReady { participants } => {
            format!("everyone ready ({} participants)", participants)
        }
        SessionEvent::BarrierTimedOut { ready, expected } => {
            format!("gave up waiting: {}/{} ready", ready, expected)
        }
        SessionEvent::AcquisitionTimedOut => "reference never seen".to_string(),
        SessionEvent::Error { error, .. } => format!("error: {}", error),
        _ => return None,
    };
    Some(format!("device {}: {}", id + 1, text))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default().with_image_target(TARGET),
    };

    let room = LoopbackRoom::new();
    let mut devices = vec![
        device(&room, &config, [0.0, 0.0, 1.5], 100)?,
        device(&room, &config, [0.8, 0.0, 2.0], 300)?,
        device(&room, &config, [-0.5, 0.2, 1.0], 900)?,
    ];

    let mut now = 0;
    while now <= 2_000 {
        for (id, session) in devices.iter_mut().enumerate() {
            for event in session.tick(now) {
                if let Some(line) = describe(id, &event) {
                    println!("[{:>5} ms] {}", now, line);
                }
            }
        }
        now += TICK_MS;
    }

    for (id, session) in devices.iter().enumerate() {
        let status = session.status();
        info!(
            device = id + 1,
            participant = %status.participant,
            anchor = ?status.anchor_version,
            released = status.gameplay_released,
            "final state"
        );
        if let Some(cube) = session.scene().find_node("cube") {
            println!(
                "device {} ({}): cube in shared frame at {}",
                id + 1,
                session.transport().local_id(),
                session.scene().world_pose(cube)?
            );
        }
    }

    if let Some(session) = devices.first() {
        println!("{}", session.status_json()?);
    }
    Ok(())
}
