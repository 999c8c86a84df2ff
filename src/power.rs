// power.rs
//
// Each boot rebuilds the station from the retained block and the stored
// configuration. Nothing else survives a deep sleep, so every decision below
// is derived from those two plus the uptime of this boot.

use crate::*;

/// No deep sleep during the first two minutes after power-on.
pub const NO_DEEP_SLEEP_STARTUP_TIME: u32 = 120;
/// Longest single deep sleep, longer requests are split into several.
pub const MAX_DEEP_SLEEP_TIME_SEC: u32 = 60 * 60;
/// The sleep timer runs fast, stretch the requested time by this factor.
pub const DEEP_SLEEP_CORRECT: f64 = 1.09;

pub const VOLTAGE_CHECK_INTERVAL_SEC: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Active,
    PreparingSleep,
    Asleep,
}

/// Outcome of the sleep bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SleepPlan {
    pub sleep_secs: u32,
    pub rest_secs: u32,
    pub duration_us: u64,
}

/// Splits a sleep request at [`MAX_DEEP_SLEEP_TIME_SEC`].
///
/// A pending remainder wins over the configured time. Returns the seconds to
/// sleep now and the new remainder.
pub fn split_sleep(pending_rest: u32, configured: u32) -> (u32, u32) {
    let requested = if pending_rest > 0 { pending_rest } else { configured };
    if requested >= MAX_DEEP_SLEEP_TIME_SEC {
        (MAX_DEEP_SLEEP_TIME_SEC, requested - MAX_DEEP_SLEEP_TIME_SEC)
    } else {
        (requested, 0)
    }
}

pub fn sleep_duration_us(secs: u32) -> u64 {
    (f64::from(secs) * DEEP_SLEEP_CORRECT * 1_000_000.0) as u64
}

/// Time accounting of one boot. Pure bookkeeping, the hardware is passed in.
pub struct PowerCycle {
    pub config: Configuration,
    pub retained: RetainedState,
    pub data: Measurements,
    state: CycleState,
}

impl PowerCycle {
    pub fn new(config: Configuration, retained: RetainedState) -> Self {
        Self {
            config,
            retained,
            data: Measurements::default(),
            state: CycleState::Active,
        }
    }

    /// Restores the retained block; invalid contents yield the defaults.
    pub fn begin<M: RetentionMemory + ?Sized>(config: Configuration, memory: &mut M) -> Self {
        info!("Restoring retained state");
        Self::new(config, RetainedState::load(memory))
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Seconds in the current awake window.
    pub fn active_secs(&self, session_secs: u32) -> u32 {
        session_secs.saturating_sub(self.data.awake_time_offset_sec)
    }

    /// Station seconds: active time of all boots including this one.
    pub fn station_secs(&self, session_secs: u32) -> u32 {
        self.retained.active_time_sum_sec.saturating_add(session_secs)
    }

    /// Continuation of a split sleep is pending.
    pub fn sleep_pending(&self) -> bool {
        self.retained.deep_sleep_time_rest_sec > 0
    }

    pub fn have_to_sleep(&self, session_secs: u32) -> bool {
        if self.sleep_pending() {
            return true;
        }
        self.config.is_deep_sleep_enabled
            && self.station_secs(session_secs) > NO_DEEP_SLEEP_STARTUP_TIME
            && self.active_secs(session_secs) >= self.config.active_time_sec
    }

    /// Stores and returns the expected time until the next sleep.
    pub fn update_time_to_sleep(&mut self, session_secs: u32) -> Option<i64> {
        self.data.seconds_to_deep_sleep = self.config.is_deep_sleep_enabled.then(|| {
            let awake_left = i64::from(self.config.active_time_sec) - i64::from(self.active_secs(session_secs));
            let grace_left = i64::from(NO_DEEP_SLEEP_STARTUP_TIME) - i64::from(self.station_secs(session_secs));
            awake_left.max(grace_left)
        });
        self.data.seconds_to_deep_sleep
    }

    /// Starts a new awake window, used after the operator changed settings.
    pub fn restart_awake_window(&mut self, session_secs: u32) {
        self.data.awake_time_offset_sec = session_secs;
    }

    /// Time bookkeeping before deep sleep: splits oversized requests and adds
    /// this boot to the sums. Does not touch the hardware.
    pub fn prepare_sleep(&mut self, session_secs: u32) -> SleepPlan {
        self.state = CycleState::PreparingSleep;

        let (sleep_secs, rest_secs) =
            split_sleep(self.retained.deep_sleep_time_rest_sec, self.config.deep_sleep_time_sec);
        let r = &mut self.retained;
        r.deep_sleep_time_rest_sec = rest_secs;
        r.active_time_sum_sec = r.active_time_sum_sec.saturating_add(session_secs);
        r.deep_sleep_time_sum_sec = r.deep_sleep_time_sum_sec.saturating_add(sleep_secs);
        r.deep_sleep_start_sec = r.active_time_sum_sec;

        SleepPlan {
            sleep_secs,
            rest_secs,
            duration_us: sleep_duration_us(sleep_secs),
        }
    }

    /// Persists the retained block, switches the radio off and suspends.
    pub fn sleep<B: Board + ?Sized>(&mut self, board: &mut B) -> SleepPlan {
        let plan = self.prepare_sleep(board.uptime_secs());

        if let Err(e) = self.retained.persist(board) {
            // sleep anyway
            error!("Cannot write RtcData: {e:#}");
        }
        board.power_down();

        info!(
            "Entering deep sleep for: {} sec (rest {} sec)",
            plan.sleep_secs, plan.rest_secs
        );
        self.state = CycleState::Asleep;
        board.deep_sleep(plan.duration_us);
        plan
    }
}

/// The whole station: power cycle plus the throttled sub tasks.
pub struct Station<B, S, A, M> {
    pub cycle: PowerCycle,
    board: B,
    sensor: SensorReader<S>,
    voltage: VoltageMonitor<A>,
    publisher: Option<Publisher<M>>,
    last_voltage_read_sec: u32,
}

impl<B, S, A, M> Station<B, S, A, M>
where
    B: Board,
    S: EnvSensor,
    A: AnalogInput,
    M: Broker,
{
    /// `broker` is only used when MQTT is enabled in `config`.
    pub fn new(config: Configuration, mut board: B, sensor: S, analog: A, broker: Option<M>) -> Self {
        let publisher = broker.filter(|_| config.is_mqtt_enabled).map(Publisher::new);
        let mut cycle = PowerCycle::begin(config, &mut board);
        let mut voltage = VoltageMonitor::new(analog);

        cycle.data.voltage = voltage.read_voltage();
        let last_voltage_read_sec = cycle.station_secs(board.uptime_secs());
        info!("Voltage: {:.2}V", cycle.data.voltage);

        Self {
            cycle,
            board,
            sensor: SensorReader::new(sensor),
            voltage,
            publisher,
            last_voltage_read_sec,
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn publisher(&self) -> Option<&Publisher<M>> {
        self.publisher.as_ref()
    }

    /// Late broker hookup, once the network is up. Ignored with MQTT disabled.
    pub fn attach_broker(&mut self, broker: M) {
        if self.cycle.config.is_mqtt_enabled {
            self.publisher = Some(Publisher::new(broker));
        }
    }

    /// Whether the network is needed this boot. A pending sleep continuation
    /// goes straight back to sleep.
    pub fn needs_network(&self) -> bool {
        !self.cycle.sleep_pending() && self.cycle.config.connect_wifi_ap
    }

    fn report(&self, now: u32) -> Report {
        let data = &self.cycle.data;
        Report {
            temperature: data.temperature,
            humidity: data.humidity,
            pressure: data.pressure,
            voltage: data.voltage,
            consumption_mah: power_consumption_mah(now, self.cycle.retained.deep_sleep_time_sum_sec),
            alive_secs: now,
            rssi: self.board.rssi(),
        }
    }

    /// One pass of the control loop. Returns the cycle state afterwards,
    /// [`CycleState::Asleep`] only on targets where deep sleep returns.
    pub async fn tick(&mut self) -> CycleState {
        if let Some(publisher) = self.publisher.as_mut() {
            publisher.handle_inbound(&mut self.cycle.config);
        }

        if self.cycle.sleep_pending() {
            self.cycle.sleep(&mut self.board);
            return self.cycle.state();
        }

        let now = self.cycle.station_secs(self.board.uptime_secs());

        let cycle = &mut self.cycle;
        self.sensor
            .read_values(now, &cycle.config, &mut cycle.retained, &mut cycle.data)
            .await;

        if seconds_elapsed_and_update(now, &mut self.last_voltage_read_sec, VOLTAGE_CHECK_INTERVAL_SEC) {
            self.cycle.data.voltage = self.voltage.read_voltage();
            debug!("Voltage: {:.2}V", self.cycle.data.voltage);
        }

        let report = self.report(now);
        let cycle = &mut self.cycle;
        match self.publisher.as_mut() {
            Some(publisher) => {
                publisher
                    .handle_client(now, &mut cycle.config, &mut cycle.retained, &report)
                    .await;
            }
            None if cycle.config.is_mqtt_enabled => {
                count_unreachable_round(now, &cycle.config, &mut cycle.retained);
            }
            None => {}
        }

        // publishing may have taken a while
        let session = self.board.uptime_secs();
        if let Some(secs) = self.cycle.update_time_to_sleep(session) {
            debug!("Seconds to deep sleep: {secs}");
        }

        // a round due at `now` already ran above
        let waiting = self
            .publisher
            .as_ref()
            .is_some_and(|p| p.waiting_for_publish(now, &self.cycle.config, &self.cycle.retained));
        if self.cycle.have_to_sleep(session) && !waiting {
            self.cycle.sleep(&mut self.board);
        }
        self.cycle.state()
    }

    /// Stores the configuration and opens a fresh awake window.
    pub fn save_configuration<C: ConfigStore + ?Sized>(&mut self, store: &mut C) -> bool {
        let saved = self.cycle.config.save(store);
        if saved {
            self.cycle.restart_awake_window(self.board.uptime_secs());
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeAdc, FakeBoard, FakeBroker, FakeSensor, MemConfigStore};

    const MAX: u32 = MAX_DEEP_SLEEP_TIME_SEC;

    fn sleepy_config() -> Configuration {
        Configuration {
            is_deep_sleep_enabled: true,
            active_time_sec: 60,
            deep_sleep_time_sec: 900,
            ..Default::default()
        }
    }

    fn cycle_with(config: Configuration, active_sum: u32) -> PowerCycle {
        let mut retained = RetainedState::default();
        retained.active_time_sum_sec = active_sum;
        PowerCycle::new(config, retained)
    }

    #[test]
    fn no_sleep_during_startup_grace() {
        let cycle = cycle_with(sleepy_config(), 0);
        for session in [60, 90, 119, 120] {
            assert!(!cycle.have_to_sleep(session), "session {session}");
        }
        assert!(cycle.have_to_sleep(121));
    }

    #[test]
    fn no_sleep_when_disabled_or_too_early() {
        let mut config = sleepy_config();
        config.is_deep_sleep_enabled = false;
        assert!(!cycle_with(config, 1000).have_to_sleep(600));

        assert!(!cycle_with(sleepy_config(), 1000).have_to_sleep(59));
        assert!(cycle_with(sleepy_config(), 1000).have_to_sleep(60));
    }

    #[test]
    fn pending_rest_sleeps_at_once() {
        let mut config = sleepy_config();
        config.is_deep_sleep_enabled = false;
        let mut cycle = cycle_with(config, 0);
        cycle.retained.deep_sleep_time_rest_sec = 10;
        assert!(cycle.have_to_sleep(0));
    }

    #[test]
    fn regular_sleep_below_max() {
        let mut cycle = cycle_with(sleepy_config(), 100);
        assert!(cycle.have_to_sleep(61));

        let plan = cycle.prepare_sleep(61);
        assert_eq!(plan.sleep_secs, 900);
        assert_eq!(plan.rest_secs, 0);
        assert_eq!(plan.duration_us, 981_000_000);
        assert_eq!(cycle.retained.deep_sleep_time_rest_sec, 0);
        assert_eq!(cycle.retained.deep_sleep_time_sum_sec, 900);
        assert_eq!(cycle.retained.active_time_sum_sec, 161);
        assert_eq!(cycle.retained.deep_sleep_start_sec, 161);
        assert_eq!(cycle.state(), CycleState::PreparingSleep);
    }

    #[test]
    fn oversized_sleep_is_split_across_wakes() {
        let mut config = sleepy_config();
        config.deep_sleep_time_sec = 3 * MAX + 10;
        let mut cycle = cycle_with(config, 500);

        let mut requests = Vec::new();
        let mut rests = Vec::new();
        for _ in 0..4 {
            let plan = cycle.prepare_sleep(5);
            requests.push(plan.sleep_secs);
            rests.push(cycle.retained.deep_sleep_time_rest_sec);
        }
        assert_eq!(requests, vec![MAX, MAX, MAX, 10]);
        assert_eq!(rests, vec![2 * MAX + 10, MAX + 10, 10, 0]);
        assert_eq!(cycle.retained.deep_sleep_time_sum_sec, 3 * MAX + 10);

        // back to the configured time afterwards
        assert_eq!(cycle.prepare_sleep(5).sleep_secs, MAX);
    }

    #[test]
    fn exact_max_leaves_no_rest() {
        assert_eq!(split_sleep(0, MAX), (MAX, 0));
        assert_eq!(split_sleep(MAX, 900), (MAX, 0));
        assert_eq!(split_sleep(0, MAX + 1), (MAX, 1));
        assert_eq!(split_sleep(0, 0), (0, 0));
    }

    #[test]
    fn time_to_sleep() {
        let mut config = sleepy_config();
        config.is_deep_sleep_enabled = false;
        let mut cycle = cycle_with(config, 0);
        assert_eq!(cycle.update_time_to_sleep(10), None);

        cycle.config.is_deep_sleep_enabled = true;
        // held back by the startup grace
        assert_eq!(cycle.update_time_to_sleep(10), Some(110));
        cycle.retained.active_time_sum_sec = 1000;
        assert_eq!(cycle.update_time_to_sleep(10), Some(50));
        assert_eq!(cycle.data.seconds_to_deep_sleep, Some(50));
        assert_eq!(cycle.update_time_to_sleep(75), Some(-15));
    }

    #[test]
    fn awake_window_restarts() {
        let mut cycle = cycle_with(sleepy_config(), 1000);
        assert!(cycle.have_to_sleep(70));
        cycle.restart_awake_window(50);
        assert_eq!(cycle.active_secs(70), 20);
        assert!(!cycle.have_to_sleep(70));
        assert!(cycle.have_to_sleep(110));
    }

    #[test]
    fn sleep_persists_and_suspends() {
        let mut board = FakeBoard::at(61);
        let mut cycle = cycle_with(sleepy_config(), 100);

        let plan = cycle.sleep(&mut board);
        assert_eq!(cycle.state(), CycleState::Asleep);
        assert_eq!(board.slept_us, vec![plan.duration_us]);
        assert!(board.radio_off);

        let restored = RetainedState::load(&mut board);
        assert_eq!(restored, cycle.retained);
        assert_eq!(restored.deep_sleep_time_sum_sec, 900);
        assert_eq!(restored.active_time_sum_sec, 161);
    }

    #[test]
    fn write_failure_still_sleeps() {
        let mut board = FakeBoard::at(61);
        board.fail_write = true;
        let mut cycle = cycle_with(sleepy_config(), 100);

        cycle.sleep(&mut board);
        assert_eq!(board.slept_us.len(), 1);
        assert_eq!(cycle.state(), CycleState::Asleep);
    }

    type TestStation = Station<FakeBoard, FakeSensor, FakeAdc, FakeBroker>;

    fn station(config: Configuration, board: FakeBoard, broker: FakeBroker) -> TestStation {
        Station::new(config, board, FakeSensor::working(BME280_ADDR_DEFAULT), FakeAdc(130), Some(broker))
    }

    #[tokio::test(start_paused = true)]
    async fn boot_restores_retained_block() {
        let mut board = FakeBoard::at(0);
        let mut retained = RetainedState::default();
        retained.active_time_sum_sec = 4242;
        retained.send_count = 7;
        retained.persist(&mut board).unwrap();

        let st = station(sleepy_config(), board, FakeBroker::online());
        assert_eq!(st.cycle.retained, retained);
        assert!(st.cycle.data.voltage > 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_reads_publishes_and_sleeps() {
        let mut board = FakeBoard::at(61);
        let mut retained = RetainedState::default();
        retained.active_time_sum_sec = 900;
        retained.persist(&mut board).unwrap();

        let mut config = sleepy_config();
        config.is_mqtt_enabled = true;
        config.bme280_check_interval_sec = 60;
        let mut st = station(config, board, FakeBroker::online());

        assert_eq!(st.tick().await, CycleState::Asleep);
        assert_eq!(st.publisher().unwrap().broker().sent.len(), 9);

        let r = &st.cycle.retained;
        assert_eq!(r.last_sensor_read_sec, 961);
        assert_eq!(r.last_publish_sec, 961);
        assert_eq!(r.send_count, 1);
        assert_eq!(r.active_time_sum_sec, 961);
        assert_eq!(r.deep_sleep_time_sum_sec, 900);
        assert_eq!(st.board().slept_us, vec![981_000_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn stays_awake_within_active_window() {
        let mut board = FakeBoard::at(30);
        let mut retained = RetainedState::default();
        retained.active_time_sum_sec = 900;
        retained.persist(&mut board).unwrap();

        let mut st = station(sleepy_config(), board, FakeBroker::online());
        assert_eq!(st.tick().await, CycleState::Active);
        assert!(st.board().slept_us.is_empty());
        // mqtt is off in this config
        assert!(st.publisher().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_wake_skips_sensors_and_network() {
        let mut board = FakeBoard::at(1);
        let mut retained = RetainedState::default();
        retained.active_time_sum_sec = 5000;
        retained.deep_sleep_time_rest_sec = MAX + 10;
        retained.persist(&mut board).unwrap();

        let mut config = sleepy_config();
        config.is_mqtt_enabled = true;
        let mut st = station(config, board, FakeBroker::online());
        assert!(!st.needs_network());

        assert_eq!(st.tick().await, CycleState::Asleep);
        assert!(st.publisher().unwrap().broker().sent.is_empty());
        assert_eq!(st.cycle.retained.last_sensor_read_sec, 0);
        assert_eq!(st.cycle.retained.deep_sleep_time_rest_sec, 10);
        assert_eq!(st.board().slept_us, vec![sleep_duration_us(MAX)]);
    }

    #[tokio::test(start_paused = true)]
    async fn save_configuration_restarts_window() {
        let mut st = station(sleepy_config(), FakeBoard::at(45), FakeBroker::online());
        let mut store = MemConfigStore::default();

        assert!(st.save_configuration(&mut store));
        assert_eq!(st.cycle.data.awake_time_offset_sec, 45);
        assert_eq!(Configuration::load(&mut store).unwrap(), st.cycle.config);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_commands_apply_before_sleeping() {
        let mut board = FakeBoard::at(1);
        let mut retained = RetainedState::default();
        retained.deep_sleep_time_rest_sec = 10;
        retained.persist(&mut board).unwrap();

        let mut config = sleepy_config();
        config.is_mqtt_enabled = true;
        let mut broker = FakeBroker::online();
        broker.inbound.push_back(InboundMessage {
            topic: format!("{}/SendEverySec", config.topic_prefix()),
            payload: b"42".to_vec(),
        });
        let mut st = station(config, board, broker);

        assert_eq!(st.tick().await, CycleState::Asleep);
        assert_eq!(st.cycle.config.mqtt_send_every_sec, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_send_interval_does_not_block_sleep() {
        let mut board = FakeBoard::at(61);
        let mut retained = RetainedState::default();
        retained.active_time_sum_sec = 900;
        retained.persist(&mut board).unwrap();

        let mut config = sleepy_config();
        config.is_mqtt_enabled = true;
        config.mqtt_send_every_sec = 0;
        let mut st = station(config, board, FakeBroker::online());

        assert_eq!(st.tick().await, CycleState::Asleep);
        assert_eq!(st.cycle.retained.send_count, 1);
        assert_eq!(st.board().slept_us, vec![981_000_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_broker_counts_connection_error() {
        let mut board = FakeBoard::at(61);
        let mut retained = RetainedState::default();
        retained.active_time_sum_sec = 900;
        retained.persist(&mut board).unwrap();

        let mut config = sleepy_config();
        config.is_mqtt_enabled = true;
        config.mqtt_send_every_sec = 900;
        let mut st: TestStation = Station::new(config, board, FakeSensor::working(0x77), FakeAdc(130), None);

        assert_eq!(st.tick().await, CycleState::Asleep);
        let r = &st.cycle.retained;
        assert_eq!(r.conn_error_count, 1);
        assert_eq!(r.last_publish_sec, 961);
        assert_eq!(r.send_count, 0);
        assert_eq!(RetainedState::load(st.board_mut()).conn_error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_broker_follows_mqtt_flag() {
        let board = FakeBoard::at(5);
        let mut st: TestStation = Station::new(sleepy_config(), board, FakeSensor::working(0x76), FakeAdc(0), None);
        st.attach_broker(FakeBroker::online());
        assert!(st.publisher().is_none());

        st.cycle.config.is_mqtt_enabled = true;
        st.attach_broker(FakeBroker::online());
        assert!(st.publisher().is_some());
    }
}
// EOF
