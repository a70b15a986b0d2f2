// Cube reached through a zenoh bridge
//
// The bridge (BLE side) subscribes to the cmd topics and publishes link state and
// trigger events. Drive and sound are fire-and-forget puts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::pubsub::Publisher;

use super::handle::{CubeError, CubeHandle};
use crate::config::{
    TOPIC_CMD_DRIVE, TOPIC_CMD_SOUND, TOPIC_EVENT_TRIGGER, TOPIC_STATE_LINK, topic,
};
use crate::messages::{CubeStatus, DriveCommand, SoundCommand, TriggerKind};

const TRIGGER_CAPACITY: usize = 16;

// Link state shared with the listener task
#[derive(Default)]
struct Link {
    reported: AtomicBool,
    connected: AtomicBool,
    sound: AtomicBool,
}

pub struct ZenohCube {
    name: String,
    // Keeps the session alive for as long as any cube uses it
    _session: Session,
    drive_pub: Publisher<'static>,
    sound_pub: Publisher<'static>,
    link: Arc<Link>,
    trigger_tx: broadcast::Sender<TriggerKind>,
    listeners: Vec<JoinHandle<()>>,
}

impl ZenohCube {
    async fn declare(session: &Session, index: usize) -> Result<Self, zenoh::Error> {
        let drive_pub = session
            .declare_publisher(topic(TOPIC_CMD_DRIVE, index))
            .await?;
        let sound_pub = session
            .declare_publisher(topic(TOPIC_CMD_SOUND, index))
            .await?;
        let link_sub = session
            .declare_subscriber(topic(TOPIC_STATE_LINK, index))
            .await?;
        let trigger_sub = session
            .declare_subscriber(topic(TOPIC_EVENT_TRIGGER, index))
            .await?;

        let name = format!("cube-{}", index);
        let link = Arc::new(Link::default());
        let (trigger_tx, _) = broadcast::channel(TRIGGER_CAPACITY);

        let link_task = {
            let link = link.clone();
            let name = name.clone();
            tokio::spawn(async move {
                while let Ok(sample) = link_sub.recv_async().await {
                    let payload = sample.payload().to_bytes();
                    match serde_json::from_slice::<CubeStatus>(&payload) {
                        Ok(status) => {
                            if link.connected.load(Ordering::SeqCst) != status.connected {
                                let state = if status.connected { "up" } else { "down" };
                                info!("{}: link {}", name, state);
                            }
                            link.connected.store(status.connected, Ordering::SeqCst);
                            link.sound.store(status.sound, Ordering::SeqCst);
                            link.reported.store(true, Ordering::SeqCst);
                        }
                        Err(e) => warn!("{}: failed to parse link state: {}", name, e),
                    }
                }
            })
        };

        let trigger_task = {
            let tx = trigger_tx.clone();
            let name = name.clone();
            tokio::spawn(async move {
                while let Ok(sample) = trigger_sub.recv_async().await {
                    let payload = sample.payload().to_bytes();
                    match serde_json::from_slice::<TriggerKind>(&payload) {
                        Ok(kind) => {
                            debug!("{}: trigger {:?}", name, kind);
                            // No listeners is fine
                            let _ = tx.send(kind);
                        }
                        Err(e) => warn!("{}: failed to parse trigger: {}", name, e),
                    }
                }
            })
        };

        Ok(Self {
            name,
            _session: session.clone(),
            drive_pub,
            sound_pub,
            link,
            trigger_tx,
            listeners: vec![link_task, trigger_task],
        })
    }

    fn has_reported(&self) -> bool {
        self.link.reported.load(Ordering::SeqCst)
    }
}

impl Drop for ZenohCube {
    fn drop(&mut self) {
        for task in &self.listeners {
            task.abort();
        }
    }
}

#[async_trait]
impl CubeHandle for ZenohCube {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    async fn drive(&self, cmd: DriveCommand) -> Result<(), CubeError> {
        if !self.is_connected() {
            return Err(CubeError::NotConnected);
        }
        let json =
            serde_json::to_string(&cmd).map_err(|e| CubeError::Transport(e.to_string()))?;
        self.drive_pub
            .put(json)
            .await
            .map_err(|e| CubeError::Transport(e.to_string()))
    }

    async fn play_sound(&self, preset: u8) -> Result<(), CubeError> {
        if !self.is_connected() {
            return Err(CubeError::NotConnected);
        }
        if !self.link.sound.load(Ordering::SeqCst) {
            return Err(CubeError::Unsupported);
        }
        let json = serde_json::to_string(&SoundCommand { preset })
            .map_err(|e| CubeError::Transport(e.to_string()))?;
        self.sound_pub
            .put(json)
            .await
            .map_err(|e| CubeError::Transport(e.to_string()))
    }

    fn triggers(&self) -> Option<broadcast::Receiver<TriggerKind>> {
        Some(self.trigger_tx.subscribe())
    }
}

/// Open a zenoh session and look for `count` cubes.
///
/// Waits `window` for each bridge to publish a link state. Cubes that stay
/// silent come back as `None`.
pub async fn connect_zenoh(
    count: usize,
    window: Duration,
) -> Result<Vec<Option<Arc<dyn CubeHandle>>>, Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    let mut cubes = Vec::with_capacity(count);
    for i in 0..count {
        cubes.push(ZenohCube::declare(&session, i).await?);
    }

    info!(
        "Scanning for {} cube(s) for {}ms... press cube buttons to wake them",
        count,
        window.as_millis()
    );
    tokio::time::sleep(window).await;

    let found = cubes
        .into_iter()
        .map(|cube| {
            if cube.has_reported() {
                Some(Arc::new(cube) as Arc<dyn CubeHandle>)
            } else {
                warn!("{}: no link state received", cube.name);
                None
            }
        })
        .collect();
    Ok(found)
}
