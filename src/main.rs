use log::{info, warn};
use std::error::Error;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio_stream::{StreamExt, StreamMap, wrappers::ReceiverStream};

use pinwatch::{
    Edge, EdgeEvent, EdgeMode, EdgeTrigger, Pin, PinBackend, TriggerControl, WatchConfig,
    WatchMode,
};

#[cfg(not(feature = "sysfs"))]
use pinwatch::MockBackend;
#[cfg(feature = "sysfs")]
use pinwatch::SysfsBackend;

enum Watch<B: PinBackend> {
    Notify(Pin<B>),
    Poll(Arc<Pin<B>>, TriggerControl),
}

#[derive(Serialize)]
struct EventRecord {
    pin: u32,
    timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    edge: Option<Edge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&EdgeEvent> for EventRecord {
    fn from(event: &EdgeEvent) -> Self {
        let transition = event.transition();
        Self {
            pin: event.pin,
            timestamp_ms: event.timestamp_ms(),
            edge: transition.and_then(|t| t.edge()),
            previous: transition.map(|t| t.previous),
            current: transition.map(|t| t.current),
            error: event.error().map(|e| e.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PINWATCH_CONFIG").ok())
        .unwrap_or_else(|| "pinwatch.json".to_string());
    let config = WatchConfig::load_from_file(&config_path)?;

    let backend = {
        #[cfg(feature = "sysfs")]
        {
            Arc::new(SysfsBackend::new(config.sysfs.clone()))
        }
        #[cfg(not(feature = "sysfs"))]
        {
            Arc::new(MockBackend::new())
        }
    };

    watch(backend, config).await?;

    Ok(())
}

async fn watch<B: PinBackend>(backend: Arc<B>, config: WatchConfig) -> pinwatch::Result<()> {
    let mut streams = StreamMap::new();
    let mut edges: FxHashMap<u32, EdgeMode> = FxHashMap::default();
    let mut watches = Vec::with_capacity(config.pins.len());

    for wp in &config.pins {
        let pin = Pin::new_input(Arc::clone(&backend), wp.id)?;
        match wp.mode {
            WatchMode::Notify => {
                let rx = pin.arm_edge(wp.edge, config.event_buffer, config.poll_timeout())?;
                streams.insert(wp.id, ReceiverStream::new(rx));
                watches.push(Watch::Notify(pin));
            }
            WatchMode::Poll => {
                let pin = Arc::new(pin);
                let (rx, control) = EdgeTrigger::start(Arc::clone(&pin), config.event_buffer)?;
                streams.insert(wp.id, ReceiverStream::new(rx));
                watches.push(Watch::Poll(pin, control));
            }
        }
        edges.insert(wp.id, wp.edge);
        info!("watching pin {} for {} edges ({:?})", wp.id, wp.edge, wp.mode);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = streams.next() => {
                let Some((id, event)) = next else { break; };

                // the polling trigger reports every change
                if let Some(t) = event.transition()
                    && !edges.get(&id).is_some_and(|e| e.matches(t.previous, t.current))
                {
                    continue;
                }

                match serde_json::to_string(&EventRecord::from(&event)) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("failed to encode event from pin {id}: {e}"),
                }
            }
        }
    }

    info!("shutting down");
    for watch in watches {
        match watch {
            Watch::Notify(pin) => {
                if let Err(e) = pin.disarm_edge() {
                    warn!("{e}");
                }
                pin.close()?;
            }
            Watch::Poll(pin, control) => {
                control.stop();
                control.join();
                match Arc::try_unwrap(pin) {
                    Ok(pin) => pin.close()?,
                    Err(_) => warn!("pin still shared after trigger stopped"),
                }
            }
        }
    }

    Ok(())
}
