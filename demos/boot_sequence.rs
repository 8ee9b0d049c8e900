//! Boot sequence driven by a simulated frame loop.
//!
//! Run with: cargo run --example boot_sequence
//!
//! Three steps load configuration, stream assets over a few frames and hand
//! over to the main loop. Progress is announced on the event bus, and a
//! delayed "splash done" event fires once enough simulated time has passed.

use async_trait::async_trait;
use stagehand::event::{expect_param, listener, EventBus, IntParam, StringParam};
use stagehand::logging::LogSettings;
use stagehand::procedure::{Procedure, ProcedureStatus, Step, StepContext};
use stagehand::tick::{TickClock, TickDriver};
use stagehand::{CoreConfig, FailureSink, LogLevel, StateError};
use std::sync::Arc;
use std::time::Duration;

const STEP_ENTERED: i32 = 1;
const ASSET_LOADED: i32 = 2;
const SPLASH_DONE: i32 = 3;

const FRAME: Duration = Duration::from_millis(250);

struct LoadConfig {
    bus: Arc<EventBus>,
}

struct LoadAssets {
    bus: Arc<EventBus>,
    clock: TickClock,
}

struct RunMain {
    bus: Arc<EventBus>,
}

fn announce(bus: &EventBus, cx: &StepContext<'_>) {
    let mut param = bus.acquire_param::<StringParam>();
    param.value = cx.step().name().to_string();
    if let Err(e) = bus.fire_event(STEP_ENTERED, Some(&*param)) {
        tracing::warn!(error = %e, "step announcement failed");
    }
    if let Err(e) = bus.release_param(param) {
        tracing::warn!(error = %e, "parameter was not returned to its cache");
    }
}

#[async_trait]
impl Step for LoadConfig {
    async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
        announce(&self.bus, cx);
        cx.blackboard()
            .write("assets", &vec!["atlas.png", "music.ogg", "level1.map"])?;
        cx.finish();
        Ok(())
    }
}

#[async_trait]
impl Step for LoadAssets {
    async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
        announce(&self.bus, cx);
        let assets: Vec<String> = cx.blackboard().read("assets")?;
        let bus = Arc::clone(&self.bus);
        let clock = self.clock.clone();
        let procedure = cx.procedure().clone();

        // One asset per frame.
        tokio::spawn(async move {
            for (i, asset) in assets.iter().enumerate() {
                if clock.next_frame().await.is_err() {
                    procedure.request_abort();
                    return;
                }
                tracing::info!(%asset, "asset loaded");
                let loaded = IntParam::new(i as i64 + 1);
                bus.fire_event_next_frame(ASSET_LOADED, Some(Box::new(loaded)));
            }
            procedure.request_next();
        });
        Ok(())
    }
}

#[async_trait]
impl Step for RunMain {
    async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
        announce(&self.bus, cx);
        self.bus
            .fire_event_delay(SPLASH_DONE, None, Duration::from_secs(1));
        cx.finish();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CoreConfig::from_json_str(r#"{ "logging": { "min_level": "Info" } }"#)?;
    config.check()?;
    let logging: LogSettings = config
        .logging
        .clone()
        .override_tag("stagehand::event", LogLevel::Warning);
    logging.init()?;

    let mut driver = TickDriver::new();
    let failures = FailureSink::new();
    let bus = Arc::new(EventBus::new(driver.clock(), failures.clone()));
    driver.register(&bus);

    bus.add_listener(
        STEP_ENTERED,
        &listener(|_, param| {
            let step = expect_param::<StringParam>(param)?;
            println!("-> entering {}", step.value);
            Ok(())
        }),
    );
    bus.add_listener(
        ASSET_LOADED,
        &listener(|_, param| {
            let count = expect_param::<IntParam>(param)?;
            println!("   {} asset(s) ready", count.value);
            Ok(())
        }),
    );
    bus.add_listener(
        SPLASH_DONE,
        &listener(|_, _| {
            println!("   splash screen dismissed");
            Ok(())
        }),
    );

    let procedure = Procedure::builder("Boot")
        .step(LoadConfig {
            bus: Arc::clone(&bus),
        })
        .step(LoadAssets {
            bus: Arc::clone(&bus),
            clock: driver.clock(),
        })
        .step(RunMain {
            bus: Arc::clone(&bus),
        })
        .build()?;

    let handle = procedure.spawn(failures);
    let mut frames = 0;
    while !handle.is_terminal() || bus.pending_count() > 0 {
        let tick = driver.tick(FRAME);
        tokio::time::sleep(Duration::from_millis(10)).await;
        frames += 1;
        tracing::debug!(frame = tick.frame, status = %handle.status(), "frame");
        if frames > 40 {
            handle.request_abort();
            break;
        }
    }

    let status = handle.wait_terminal().await;
    println!("boot ended as {status} after {frames} frame(s)");
    bus.shutdown();

    if status == ProcedureStatus::Finished {
        Ok(())
    } else {
        Err(format!("boot did not finish: {status}").into())
    }
}
