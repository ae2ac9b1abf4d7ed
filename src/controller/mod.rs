use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::{
    config::{ConfigStore, KeyValueStore, SettingsOutcome},
    dmx,
    ota::OtaService,
    output::LedOutput,
    topology::ChannelMap,
    transport::FrameSource,
    watchdog::{Liveness, Watchdog},
    ControlMessage,
};

/// Settings commands handled per iteration. Updates are rare and
/// operator-triggered; the bound keeps a chatty settings client from
/// starving the frame path.
const COMMANDS_PER_TICK: usize = 4;

/// The control loop. Owns every piece of mutable state: the settings,
/// the watchdog, the channel map, and the sinks. One `tick` is one
/// iteration; the binary drives it from a timer.
pub struct Controller<S, F, O, U> {
    settings: ConfigStore<S>,
    map: ChannelMap,
    watchdog: Watchdog,
    source: F,
    output: O,
    ota: U,
    commands: mpsc::Receiver<ControlMessage>,
}

impl<S, F, O, U> Controller<S, F, O, U>
where
    S: KeyValueStore,
    F: FrameSource,
    O: LedOutput,
    U: OtaService,
{
    pub fn new(
        settings: ConfigStore<S>,
        map: ChannelMap,
        source: F,
        output: O,
        ota: U,
        commands: mpsc::Receiver<ControlMessage>,
    ) -> Self {
        Controller {
            settings,
            map,
            watchdog: Watchdog::new(),
            source,
            output,
            ota,
            commands,
        }
    }

    /// Puts the default state on the strip before the first frame; the
    /// watchdog starts failed over, so this is the boot-time render of
    /// that state.
    pub fn start(&mut self) {
        info!(
            "controller up: {} LEDs, timeout {}ms",
            self.map.len(),
            self.settings.current().failover_timeout_ms
        );
        self.render_default();
    }

    /// One control loop iteration: updater slice, liveness judgment,
    /// settings commands, then at most one frame.
    pub fn tick(&mut self, now: Instant) {
        self.ota.service();

        let timeout = self.settings.current().failover_timeout();
        if self.watchdog.check(now, timeout) {
            info!("control stream lost, switching to the default state");
            self.render_default();
        }

        self.drain_commands();

        if let Some(frame) = self.source.poll() {
            match dmx::decode(&frame, &self.map) {
                Ok(pixels) => {
                    if self.watchdog.frame_received(now) {
                        info!("control stream live");
                    }
                    let brightness = self.settings.current().brightness;
                    if let Err(e) = self.output.render(&pixels, brightness) {
                        error!("failed to render frame: {}", e);
                    }
                }
                // Drop the frame, keep whatever is on the strip; the
                // watchdog alone decides when to give up on the stream.
                Err(e) => warn!("dropping frame: {}", e),
            }
        }
    }

    fn drain_commands(&mut self) {
        for _ in 0..COMMANDS_PER_TICK {
            match self.commands.try_recv() {
                Ok(ControlMessage::UpdateSettings {
                    request,
                    respond_to,
                }) => {
                    let (update, rejected) = request.parse();
                    for field_error in &rejected {
                        warn!(
                            "rejecting settings field {}: {}",
                            field_error.field, field_error.reason
                        );
                    }

                    let appearance_changed =
                        update.default_color.is_some() || update.brightness.is_some();
                    let persisted = if update.is_empty() {
                        Ok(())
                    } else {
                        self.settings.update(update)
                    };
                    if let Err(e) = &persisted {
                        error!("failed to persist settings: {}", e);
                    }

                    // While failed over the strip shows the default
                    // state, so a changed color or brightness should be
                    // visible right away.
                    if appearance_changed && self.watchdog.state() == Liveness::FailedOver {
                        self.render_default();
                    }

                    let outcome = SettingsOutcome {
                        rejected,
                        persisted,
                        config: self.settings.current(),
                    };
                    if respond_to.send(outcome).is_err() {
                        debug!("settings caller went away before the reply");
                    }
                }
                Ok(ControlMessage::ReadSettings { respond_to }) => {
                    let _ = respond_to.send(self.settings.current());
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn render_default(&mut self) {
        let config = self.settings.current();
        let pixels = vec![config.default_color; self.map.len()];
        if let Err(e) = self.output.render(&pixels, config.brightness) {
            error!("failed to render the default state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use tokio::sync::oneshot;

    use super::*;
    use crate::config::{ConfigUpdate, MemoryStore, SettingsRequest};
    use crate::dmx::Rgb;
    use crate::ota::NoopOta;
    use crate::topology::{Segment, Topology};

    /// Hands out pre-scripted frames, one per poll.
    struct ScriptSource {
        frames: VecDeque<Vec<u8>>,
    }

    impl ScriptSource {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            ScriptSource {
                frames: frames.into(),
            }
        }
    }

    impl FrameSource for ScriptSource {
        fn poll(&mut self) -> Option<Vec<u8>> {
            self.frames.pop_front()
        }
    }

    type Rendered = Arc<Mutex<Vec<(Vec<Rgb>, u8)>>>;

    struct RecordingOutput {
        rendered: Rendered,
    }

    impl LedOutput for RecordingOutput {
        fn render(&mut self, pixels: &[Rgb], brightness: u8) -> Result<(), anyhow::Error> {
            self.rendered
                .lock()
                .unwrap()
                .push((pixels.to_vec(), brightness));
            Ok(())
        }
    }

    struct Rig {
        controller: Controller<MemoryStore, ScriptSource, RecordingOutput, NoopOta>,
        commands: mpsc::Sender<ControlMessage>,
        rendered: Rendered,
        base: Instant,
    }

    fn rig(frames: Vec<Vec<u8>>) -> Rig {
        // Four straight LEDs reading from channel 0.
        let map = Topology {
            segments: vec![Segment::Normal {
                count: 4,
                channel: 0,
            }],
        }
        .resolve(4)
        .unwrap();

        let rendered: Rendered = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(8);

        let controller = Controller::new(
            ConfigStore::load(MemoryStore::new()),
            map,
            ScriptSource::new(frames),
            RecordingOutput {
                rendered: rendered.clone(),
            },
            NoopOta,
            rx,
        );

        Rig {
            controller,
            commands: tx,
            rendered,
            base: Instant::now(),
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_boot_renders_default_state_once() {
        let mut rig = rig(vec![]);
        rig.controller.start();

        let rendered = rig.rendered.lock().unwrap();
        assert_eq!(rendered.len(), 1);
        // Default is pure blue at brightness 128.
        assert_eq!(rendered[0].0, vec![Rgb::new(0, 0, 255); 4]);
        assert_eq!(rendered[0].1, 128);
    }

    #[test]
    fn test_frame_is_decoded_and_rendered() {
        let mut rig = rig(vec![vec![
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
        ]]);

        rig.controller.tick(rig.base);

        let rendered = rig.rendered.lock().unwrap();
        assert_eq!(rendered.len(), 1);
        assert_eq!(
            rendered[0].0,
            vec![
                Rgb::new(1, 2, 3),
                Rgb::new(4, 5, 6),
                Rgb::new(7, 8, 9),
                Rgb::new(10, 11, 12),
            ]
        );
    }

    #[test]
    fn test_quiet_stream_fails_over_once() {
        let mut rig = rig(vec![vec![9; 12]]);

        rig.controller.tick(rig.base);
        assert_eq!(rig.rendered.lock().unwrap().len(), 1);

        // Quiet iterations inside the timeout: nothing new renders.
        rig.controller.tick(rig.base + ms(1000));
        rig.controller.tick(rig.base + ms(2000));
        assert_eq!(rig.rendered.lock().unwrap().len(), 1);

        // Past the timeout: exactly one default render, then silence.
        rig.controller.tick(rig.base + ms(2001));
        rig.controller.tick(rig.base + ms(3000));
        rig.controller.tick(rig.base + ms(4000));

        let rendered = rig.rendered.lock().unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[1].0, vec![Rgb::new(0, 0, 255); 4]);
    }

    #[test]
    fn test_malformed_frames_do_not_render_or_fail_over() {
        // Every frame is 3 bytes short of what the map needs.
        let mut rig = rig(vec![vec![5; 9], vec![5; 9], vec![5; 9]]);

        rig.controller.tick(rig.base);
        rig.controller.tick(rig.base + ms(500));
        rig.controller.tick(rig.base + ms(1000));

        // No render happened and the watchdog never saw a frame, so it
        // stays in its boot failover state with nothing new to report.
        assert!(rig.rendered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bad_frames_between_good_ones_keep_prior_state() {
        let good = vec![1u8; 12];
        let bad = vec![1u8; 5];
        let mut rig = rig(vec![good.clone(), bad.clone(), bad, good]);

        rig.controller.tick(rig.base);
        rig.controller.tick(rig.base + ms(500));
        rig.controller.tick(rig.base + ms(1000));
        rig.controller.tick(rig.base + ms(1500));

        // Only the two good frames rendered; the bad ones in between
        // neither drew nor tripped the failover.
        assert_eq!(rig.rendered.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_settings_update_applies_and_replies() {
        let mut rig = rig(vec![vec![9; 12]]);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        rig.commands
            .try_send(ControlMessage::UpdateSettings {
                request: SettingsRequest {
                    timeout: Some("5000".to_string()),
                    color: Some("zzz".to_string()),
                    brightness: Some("200".to_string()),
                },
                respond_to: reply_tx,
            })
            .unwrap();

        rig.controller.tick(rig.base);

        let outcome = reply_rx.try_recv().unwrap();
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].field, "color");
        assert!(outcome.persisted.is_ok());
        assert_eq!(outcome.config.failover_timeout_ms, 5000);
        assert_eq!(outcome.config.brightness, 200);

        // The frame in the same iteration rendered with the new
        // brightness, since commands drain before the frame.
        assert_eq!(rig.rendered.lock().unwrap()[0].1, 200);
    }

    #[test]
    fn test_color_change_while_failed_over_redraws() {
        let mut rig = rig(vec![]);
        rig.controller.start();

        let (reply_tx, _reply_rx) = oneshot::channel();
        rig.commands
            .try_send(ControlMessage::UpdateSettings {
                request: SettingsRequest {
                    color: Some("FF0000".to_string()),
                    ..Default::default()
                },
                respond_to: reply_tx,
            })
            .unwrap();

        rig.controller.tick(rig.base);

        let rendered = rig.rendered.lock().unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[1].0, vec![Rgb::new(255, 0, 0); 4]);
    }

    #[test]
    fn test_read_settings_reports_current_values() {
        let mut rig = rig(vec![]);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        rig.commands
            .try_send(ControlMessage::ReadSettings {
                respond_to: reply_tx,
            })
            .unwrap();

        rig.controller.tick(rig.base);

        let config = reply_rx.try_recv().unwrap();
        assert_eq!(config.failover_timeout_ms, 2000);
        assert_eq!(config.brightness, 128);
    }

    #[test]
    fn test_longer_timeout_takes_effect_immediately() {
        let mut rig = rig(vec![vec![9; 12]]);
        rig.controller.tick(rig.base);

        let (reply_tx, _reply_rx) = oneshot::channel();
        rig.commands
            .try_send(ControlMessage::UpdateSettings {
                request: SettingsRequest {
                    timeout: Some("10000".to_string()),
                    ..Default::default()
                },
                respond_to: reply_tx,
            })
            .unwrap();
        rig.controller.tick(rig.base + ms(100));

        // Would have failed over under the default 2000ms.
        rig.controller.tick(rig.base + ms(5000));
        assert_eq!(rig.rendered.lock().unwrap().len(), 1);

        rig.controller.tick(rig.base + ms(10001));
        assert_eq!(rig.rendered.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_update_is_persisted_for_restart() {
        let mut settings = ConfigStore::load(MemoryStore::new());
        settings
            .update(ConfigUpdate {
                brightness: Some(77),
                ..Default::default()
            })
            .unwrap();

        let reloaded = ConfigStore::load(settings.into_store());
        assert_eq!(reloaded.current().brightness, 77);
    }
}
