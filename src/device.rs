use crate::{
    error::{Result, TreadmillError},
    protocol::{
        clamp_elevation, clamp_speed_kmh, CommandFrame, Response, ResponseFrame, AUTO_STOP_SEQUENCE,
        POLL_SEQUENCE,
    },
    serial::{SerialTransport, Transport},
    types::{BeltState, DeviceEvent, DeviceModel, DeviceStatus, PollConfig, SpeedUnit},
};
use std::{path::Path, sync::Arc, time::SystemTime};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Main interface for controlling a TrackMaster-protocol treadmill
///
/// `Treadmill` drives one physical device over one serial session. It owns the
/// cached readings (current speed, current elevation, belt state), translates
/// high-level commands into protocol frames, and keeps the device's
/// communication-disconnect-stop watchdog fed with a periodic status poll.
///
/// Commands are expected to arrive sequentially from one caller: the device's
/// input buffer holds a single command, so no internal queueing or locking of
/// the command path is attempted. Transmission is fire-and-forget; readings
/// come back asynchronously and are folded into the cached status.
///
/// # Examples
///
/// ```no_run
/// use trackmaster::{DeviceModel, SpeedUnit, Treadmill};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let treadmill = Treadmill::open("/dev/ttyUSB0", DeviceModel::TrackMaster)?;
///
///     // Start the session; this also begins the periodic status poll
///     treadmill.start().await?;
///
///     // Run the belt at 5 km/h
///     treadmill.set_speed(5.0, SpeedUnit::Kilometers).await?;
///
///     // End the session; the device auto-stops and levels out
///     treadmill.stop().await?;
///
///     Ok(())
/// }
/// ```
pub struct Treadmill {
    transport: Arc<dyn Transport>,
    model: DeviceModel,
    status: Arc<RwLock<DeviceStatus>>,
    active: Arc<RwLock<bool>>,
    events: broadcast::Sender<DeviceEvent>,
    poll: PollConfig,
}

impl Treadmill {
    /// Open a serial port and build a driver for the given model
    ///
    /// The session is not yet active; call [`start`](Self::start) before
    /// issuing commands.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::Io`] if the serial port cannot be opened.
    pub fn open(path: impl AsRef<Path>, model: DeviceModel) -> Result<Self> {
        Self::open_with_poll(path, model, PollConfig::default())
    }

    /// Open a serial port with a custom status poll configuration
    ///
    /// The default 1000 ms interval matches the historical controller but
    /// exceeds the device's 500 ms communication-disconnect-stop threshold;
    /// pass a tighter interval when running with CDS enabled.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::Io`] if the serial port cannot be opened.
    pub fn open_with_poll(
        path: impl AsRef<Path>,
        model: DeviceModel,
        poll: PollConfig,
    ) -> Result<Self> {
        let (transport, frames) = SerialTransport::open(path)?;
        let device = Self::with_transport_and_poll(Arc::new(transport), model, poll);
        device.attach_response_stream(frames);
        Ok(device)
    }

    /// Build a driver on top of an externally owned transport
    ///
    /// Responses must be delivered through [`handle_response`](Self::handle_response)
    /// or [`attach_response_stream`](Self::attach_response_stream).
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, model: DeviceModel) -> Self {
        Self::with_transport_and_poll(transport, model, PollConfig::default())
    }

    /// Build a driver on an external transport with a custom poll configuration
    #[must_use]
    pub fn with_transport_and_poll(
        transport: Arc<dyn Transport>,
        model: DeviceModel,
        poll: PollConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            model,
            status: Arc::new(RwLock::new(DeviceStatus::default())),
            active: Arc::new(RwLock::new(false)),
            events,
            poll,
        }
    }

    /// Consume response frames from a channel on a background task
    pub fn attach_response_stream(&self, mut frames: mpsc::UnboundedReceiver<ResponseFrame>) {
        let status = self.status.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                apply_response(&status, &events, &frame).await;
            }
            debug!("Response stream ended");
        });
    }

    /// Device model this driver encodes for
    #[must_use]
    pub const fn model(&self) -> DeviceModel {
        self.model
    }

    /// Get the cached device status
    pub async fn status(&self) -> DeviceStatus {
        self.status.read().await.clone()
    }

    /// Last known belt speed
    pub async fn current_speed(&self) -> f32 {
        self.status.read().await.speed
    }

    /// Last known elevation in percent grade
    pub async fn current_elevation(&self) -> f32 {
        self.status.read().await.elevation
    }

    /// Belt state as tracked by issued commands
    pub async fn belt_state(&self) -> BeltState {
        self.status.read().await.belt
    }

    /// Check if an ergometry session is active
    pub async fn is_active(&self) -> bool {
        *self.active.read().await
    }

    /// Subscribe to state-change and data-exchange events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Start an ergometry session and the periodic status poll
    ///
    /// Each poll tick requests belt status, current speed and current
    /// elevation, which doubles as the keep-alive for the device's
    /// communication-disconnect-stop watchdog.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` matches the command surface.
    pub async fn start(&self) -> Result<()> {
        {
            let mut active = self.active.write().await;
            if *active {
                debug!("Session already active");
                return Ok(());
            }
            *active = true;
        }

        info!("Session started, polling every {:?}", self.poll.interval);

        let transport = self.transport.clone();
        let active = self.active.clone();
        let interval = self.poll.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !*active.read().await {
                    debug!("Poll loop stopped");
                    break;
                }
                if let Err(e) = send_status_requests(transport.as_ref()).await {
                    warn!("Status poll failed: {}", e);
                }
            }
        });

        Ok(())
    }

    /// End the session, auto-stopping the device
    ///
    /// Sends the two-byte auto-stop sequence (the device drops speed and
    /// elevation to minimum and stops the belt) and cancels the status poll.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::Io`] if the auto-stop bytes cannot be sent.
    pub async fn stop(&self) -> Result<()> {
        *self.active.write().await = false;

        for byte in AUTO_STOP_SEQUENCE {
            self.transport.send(&[byte]).await?;
        }

        info!("Session stopped");
        Ok(())
    }

    /// Set the belt speed
    ///
    /// Miles-per-hour input is converted to km/h; the result is clamped to
    /// [0, 16 mph] and encoded per the device model. A non-zero speed starts
    /// the belt, zero stops it; the corresponding start/stop byte is always
    /// transmitted, which the protocol tolerates regardless of belt state.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::SessionInactive`] if no session is active,
    /// or [`TreadmillError::Io`] if transmission fails.
    pub async fn set_speed(&self, value: f32, unit: SpeedUnit) -> Result<()> {
        self.check_active().await?;

        let speed_kmh = clamp_speed_kmh(value, unit);
        let device_units = self.model.speed_device_units(speed_kmh);

        info!(
            "Setting speed to {:.1} km/h ({:04} wire units)",
            speed_kmh, device_units
        );

        let frame = CommandFrame::set_speed(device_units);
        self.transport.send(&frame.to_bytes()).await?;

        {
            let mut status = self.status.write().await;
            status.speed = speed_kmh;
            status.timestamp = SystemTime::now();
        }

        if device_units > 0 {
            self.run_belt_unchecked().await?;
        } else {
            self.stop_belt_unchecked().await?;
        }

        self.notify_changed().await;
        Ok(())
    }

    /// Set the elevation in percent grade
    ///
    /// Input is clamped to [0, 25] percent; out-of-range values are never
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::SessionInactive`] if no session is active,
    /// or [`TreadmillError::Io`] if transmission fails.
    pub async fn set_elevation(&self, value: f32) -> Result<()> {
        self.check_active().await?;

        let elevation = clamp_elevation(value);
        let tenths = (elevation * 10.0).round() as u16;

        info!("Setting elevation to {:.1}% grade", elevation);

        let frame = CommandFrame::set_elevation(tenths);
        self.transport.send(&frame.to_bytes()).await?;

        {
            let mut status = self.status.write().await;
            status.elevation = elevation;
            status.timestamp = SystemTime::now();
        }

        self.notify_changed().await;
        Ok(())
    }

    /// Start the belt
    ///
    /// The start byte is transmitted even when the belt is already tracked as
    /// running; a state transition and change event fire only when the state
    /// actually changes.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::SessionInactive`] if no session is active,
    /// or [`TreadmillError::Io`] if transmission fails.
    pub async fn run_belt(&self) -> Result<()> {
        self.check_active().await?;
        self.run_belt_unchecked().await
    }

    /// Stop the belt
    ///
    /// The stop byte is transmitted unconditionally, like
    /// [`run_belt`](Self::run_belt).
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::SessionInactive`] if no session is active,
    /// or [`TreadmillError::Io`] if transmission fails.
    pub async fn stop_belt(&self) -> Result<()> {
        self.check_active().await?;
        self.stop_belt_unchecked().await
    }

    /// Send one round of status requests
    ///
    /// Called by the poll task on every tick; exposed for callers that manage
    /// their own polling cadence.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::SessionInactive`] if no session is active,
    /// or [`TreadmillError::Io`] if transmission fails.
    pub async fn poll_once(&self) -> Result<()> {
        self.check_active().await?;
        send_status_requests(self.transport.as_ref()).await
    }

    /// Deliver a response frame from an external transport
    ///
    /// Recognized readings update the cached status; anything else is ignored
    /// without error. Every delivered frame raises a
    /// [`DeviceEvent::DataExchanged`] event.
    pub async fn handle_response(&self, frame: &ResponseFrame) {
        apply_response(&self.status, &self.events, frame).await;
    }

    async fn run_belt_unchecked(&self) -> Result<()> {
        self.transport
            .send(&CommandFrame::run_belt().to_bytes())
            .await?;

        let changed = {
            let mut status = self.status.write().await;
            if status.belt == BeltState::Running {
                false
            } else {
                status.belt = BeltState::Running;
                status.timestamp = SystemTime::now();
                true
            }
        };

        if changed {
            info!("Belt started");
            self.notify_changed().await;
        }
        Ok(())
    }

    async fn stop_belt_unchecked(&self) -> Result<()> {
        self.transport
            .send(&CommandFrame::stop_belt().to_bytes())
            .await?;

        let changed = {
            let mut status = self.status.write().await;
            if status.belt == BeltState::Stopped {
                false
            } else {
                status.belt = BeltState::Stopped;
                status.timestamp = SystemTime::now();
                true
            }
        };

        if changed {
            info!("Belt stopped");
            self.notify_changed().await;
        }
        Ok(())
    }

    async fn check_active(&self) -> Result<()> {
        if *self.active.read().await {
            Ok(())
        } else {
            Err(TreadmillError::SessionInactive)
        }
    }

    async fn notify_changed(&self) {
        let status = self.status.read().await.clone();
        let _ = self.events.send(DeviceEvent::Changed(status));
    }
}

impl Drop for Treadmill {
    fn drop(&mut self) {
        let active = self.active.clone();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                *active.write().await = false;
            });
        }
    }
}

async fn send_status_requests(transport: &dyn Transport) -> Result<()> {
    for request in POLL_SEQUENCE {
        transport.send(&[request as u8]).await?;
    }
    Ok(())
}

/// Fold one response frame into the cached status
///
/// The 0xD1 reading is cached as parsed / 10 without converting out of the
/// device's native units; on the TrackMaster that differs from the km/h value
/// `set_speed` caches. Deployed controllers behave this way and downstream
/// consumers expect it, so it is preserved rather than reconciled.
async fn apply_response(
    status: &Arc<RwLock<DeviceStatus>>,
    events: &broadcast::Sender<DeviceEvent>,
    frame: &ResponseFrame,
) {
    match Response::from_frame(frame) {
        Ok(Response::CurrentSpeed(value)) => {
            let mut status = status.write().await;
            status.speed = value;
            status.timestamp = SystemTime::now();
        }
        Ok(Response::CurrentElevation(value)) => {
            let mut status = status.write().await;
            status.elevation = value;
            status.timestamp = SystemTime::now();
        }
        Ok(Response::BeltStatus(report)) => {
            // informational only; belt state follows issued commands
            debug!("Belt status report: {}", report);
        }
        Ok(Response::Ack(code)) => {
            debug!("Command acknowledged: {:02X}", code);
        }
        Err(e) => {
            debug!("Ignoring response: {}", e);
        }
    }

    let _ = events.send(DeviceEvent::DataExchanged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct MockTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        async fn frames(&self) -> Vec<Vec<u8>> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, bytes: &[u8]) -> Result<()> {
            self.sent.lock().await.push(bytes.to_vec());
            Ok(())
        }
    }

    async fn started(model: DeviceModel) -> (Arc<MockTransport>, Treadmill) {
        let transport = MockTransport::new();
        // long poll interval so the poll task cannot interleave with the
        // frames asserted below
        let poll = PollConfig {
            interval: std::time::Duration::from_secs(3600),
        };
        let device = Treadmill::with_transport_and_poll(transport.clone(), model, poll);
        device.start().await.unwrap();
        // discard nothing: start() itself transmits nothing
        assert!(transport.frames().await.is_empty());
        (transport, device)
    }

    #[tokio::test]
    async fn test_commands_require_active_session() {
        let device = Treadmill::with_transport(MockTransport::new(), DeviceModel::TrackMaster);

        assert!(matches!(
            device.set_speed(5.0, SpeedUnit::Kilometers).await,
            Err(TreadmillError::SessionInactive)
        ));
        assert!(matches!(
            device.set_elevation(5.0).await,
            Err(TreadmillError::SessionInactive)
        ));
        assert!(matches!(
            device.run_belt().await,
            Err(TreadmillError::SessionInactive)
        ));
        assert!(matches!(
            device.stop_belt().await,
            Err(TreadmillError::SessionInactive)
        ));
        assert!(matches!(
            device.poll_once().await,
            Err(TreadmillError::SessionInactive)
        ));
    }

    #[tokio::test]
    async fn test_set_speed_starts_belt() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.set_speed(5.0, SpeedUnit::Kilometers).await.unwrap();

        let frames = transport.frames().await;
        // round(5.0 / 1.609 * 10) = 31 mph-tenths, then the start byte
        assert_eq!(frames[0], vec![0xA3, b'0', b'0', b'3', b'1']);
        assert_eq!(frames[1], vec![0xA1]);

        assert_eq!(device.belt_state().await, BeltState::Running);
        assert_eq!(device.current_speed().await, 5.0);
    }

    #[tokio::test]
    async fn test_set_speed_zero_stops_belt() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.set_speed(5.0, SpeedUnit::Kilometers).await.unwrap();
        device.set_speed(0.0, SpeedUnit::Kilometers).await.unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames[2], vec![0xA3, b'0', b'0', b'0', b'0']);
        assert_eq!(frames[3], vec![0xA2]);

        assert_eq!(device.belt_state().await, BeltState::Stopped);
        assert_eq!(device.current_speed().await, 0.0);
    }

    #[tokio::test]
    async fn test_set_speed_trackmaster_encoding() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        // 8.045 km/h is exactly 5 mph
        device.set_speed(8.045, SpeedUnit::Kilometers).await.unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames[0], vec![0xA3, b'0', b'0', b'5', b'0']);
    }

    #[tokio::test]
    async fn test_set_speed_axelero_encoding() {
        let (transport, device) = started(DeviceModel::AxeleroCardio).await;

        device.set_speed(8.0, SpeedUnit::Kilometers).await.unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames[0], vec![0xA3, b'0', b'0', b'8', b'0']);
    }

    #[tokio::test]
    async fn test_set_speed_mph_input() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.set_speed(5.0, SpeedUnit::Miles).await.unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames[0], vec![0xA3, b'0', b'0', b'5', b'0']);
        assert!((device.current_speed().await - 8.045).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_set_speed_clamps_to_range() {
        let (_, device) = started(DeviceModel::TrackMaster).await;

        device.set_speed(100.0, SpeedUnit::Kilometers).await.unwrap();
        let max_kmh = 16.0 * 1.609;
        assert!((device.current_speed().await - max_kmh).abs() < 0.001);

        device.set_speed(-4.0, SpeedUnit::Kilometers).await.unwrap();
        assert_eq!(device.current_speed().await, 0.0);
    }

    #[tokio::test]
    async fn test_set_elevation() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.set_elevation(12.5).await.unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames[0], vec![0xA4, b'0', b'1', b'2', b'5']);
        assert_eq!(device.current_elevation().await, 12.5);
    }

    #[tokio::test]
    async fn test_set_elevation_clamps_to_range() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.set_elevation(30.0).await.unwrap();
        assert_eq!(device.current_elevation().await, 25.0);

        let frames = transport.frames().await;
        assert_eq!(frames[0], vec![0xA4, b'0', b'2', b'5', b'0']);
    }

    #[tokio::test]
    async fn test_run_belt_transmits_unconditionally() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.run_belt().await.unwrap();
        device.run_belt().await.unwrap();

        // both calls hit the wire even though only the first changes state
        let frames = transport.frames().await;
        assert_eq!(frames, vec![vec![0xA1], vec![0xA1]]);
        assert_eq!(device.belt_state().await, BeltState::Running);
    }

    #[tokio::test]
    async fn test_belt_transition_events() {
        let (_, device) = started(DeviceModel::TrackMaster).await;
        let mut events = device.subscribe();

        device.run_belt().await.unwrap();
        device.run_belt().await.unwrap();
        device.stop_belt().await.unwrap();

        // one Changed per actual transition, none for the repeated run
        let mut changed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DeviceEvent::Changed(_)) {
                changed += 1;
            }
        }
        assert_eq!(changed, 2);
    }

    #[tokio::test]
    async fn test_poll_once_sends_status_requests() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.poll_once().await.unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames, vec![vec![0xC0], vec![0xC1], vec![0xC2]]);
    }

    #[tokio::test]
    async fn test_stop_sends_auto_stop_pair() {
        let (transport, device) = started(DeviceModel::TrackMaster).await;

        device.stop().await.unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames, vec![vec![0xAA], vec![0xAA]]);
        assert!(!device.is_active().await);

        // session is gone; further commands fail
        assert!(matches!(
            device.set_speed(5.0, SpeedUnit::Kilometers).await,
            Err(TreadmillError::SessionInactive)
        ));
    }

    #[tokio::test]
    async fn test_response_updates_cached_speed() {
        let (_, device) = started(DeviceModel::TrackMaster).await;

        device
            .handle_response(&ResponseFrame {
                status: 0xD1,
                payload: b"0123".to_vec(),
            })
            .await;

        assert_eq!(device.current_speed().await, 12.3);
    }

    #[tokio::test]
    async fn test_response_updates_cached_elevation() {
        let (_, device) = started(DeviceModel::TrackMaster).await;

        device
            .handle_response(&ResponseFrame {
                status: 0xD2,
                payload: b"0050".to_vec(),
            })
            .await;

        assert_eq!(device.current_elevation().await, 5.0);
    }

    #[tokio::test]
    async fn test_malformed_response_leaves_state_unchanged() {
        let (_, device) = started(DeviceModel::TrackMaster).await;
        device.set_speed(5.0, SpeedUnit::Kilometers).await.unwrap();

        device
            .handle_response(&ResponseFrame {
                status: 0xD1,
                payload: b"12x4".to_vec(),
            })
            .await;
        device
            .handle_response(&ResponseFrame {
                status: 0x42,
                payload: Vec::new(),
            })
            .await;

        assert_eq!(device.current_speed().await, 5.0);
        assert_eq!(device.belt_state().await, BeltState::Running);
    }

    #[tokio::test]
    async fn test_belt_status_response_does_not_drive_state() {
        let (_, device) = started(DeviceModel::TrackMaster).await;

        device
            .handle_response(&ResponseFrame {
                status: 0xD0,
                payload: vec![b'2'],
            })
            .await;

        assert_eq!(device.belt_state().await, BeltState::Stopped);
    }

    #[tokio::test]
    async fn test_every_response_raises_data_exchanged() {
        let (_, device) = started(DeviceModel::TrackMaster).await;
        let mut events = device.subscribe();

        device
            .handle_response(&ResponseFrame {
                status: 0xD1,
                payload: b"0080".to_vec(),
            })
            .await;
        device
            .handle_response(&ResponseFrame {
                status: 0x42,
                payload: Vec::new(),
            })
            .await;

        let mut exchanged = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DeviceEvent::DataExchanged) {
                exchanged += 1;
            }
        }
        assert_eq!(exchanged, 2);
    }

    #[tokio::test]
    async fn test_attached_stream_delivers_responses() {
        let (_, device) = started(DeviceModel::TrackMaster).await;

        let (tx, rx) = mpsc::unbounded_channel();
        device.attach_response_stream(rx);

        tx.send(ResponseFrame {
            status: 0xD1,
            payload: b"0200".to_vec(),
        })
        .unwrap();

        // let the pump task run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(device.current_speed().await, 20.0);
    }
}
