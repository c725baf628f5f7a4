//! Physical disks: activity tracking, power state, temperature and forced
//! standby.

use std::{
    collections::BTreeMap,
    convert::Infallible,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use tokio::{
    sync::Mutex,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::CacheValue,
    config::{DiskCfg, MonitorTemperature},
    diskstats::{DiskstatsReader, DiskstatsSnapshot},
    disk_status::{DiskPowerState, PowerStatus},
    duration::parse_optional,
    error::Result,
    sensor::{HardwareSensor, TemperatureSource},
};

/// Inactivity after which a disk counts as idle when not configured.
pub const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(60);
/// Period of the forced standby check.
pub const STANDBY_POLL: Duration = Duration::from_secs(5 * 60);

const STATUS_VALIDITY: Duration = Duration::from_secs(60);
const ACTIVITY_REFRESH: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Activity {
    stats: Option<Arc<DiskstatsSnapshot>>,
    last_activity: Option<Instant>,
}

/// One physical disk.
#[derive(Debug)]
pub struct Disk {
    name: String,
    device: PathBuf,
    device_name: String,
    idle_after: Duration,
    standby_after: Duration,
    monitor_temperature: MonitorTemperature,
    power_status: Option<Arc<dyn PowerStatus>>,
    temperature_sensor: Option<Arc<dyn HardwareSensor>>,
    active: CacheValue<DiskPowerState>,
    temperature: CacheValue<i32>,
    activity: Mutex<Activity>,
    diskstats: Arc<DiskstatsReader>,
}

impl Disk {
    /// Builds a disk, resolving its device symlink to the kernel device.
    ///
    /// Without a `power_status` name the only configured probe is used, if
    /// there is exactly one.
    pub fn new(
        name: impl Into<String>,
        config: &DiskCfg,
        power_statuses: &BTreeMap<String, Arc<dyn PowerStatus>>,
        sensors: &BTreeMap<String, Arc<dyn HardwareSensor>>,
        diskstats: Arc<DiskstatsReader>,
    ) -> Result<Self> {
        let name = name.into();
        let device = resolve_device(Path::new(&config.device))?;
        let device_name = device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let idle_after = parse_optional(&config.last_active)?.unwrap_or(DEFAULT_IDLE_AFTER);
        let standby_after = parse_optional(&config.standby_after)?.unwrap_or_default();

        let mut power_status = power_statuses.get(&config.power_status).cloned();
        if power_status.is_none() && power_statuses.len() == 1 {
            power_status = power_statuses.values().next().cloned();
        }
        if power_status.is_none() {
            warn!("disk {name:?} has no power status available");
        }

        let temperature_sensor = if config.temperature_sensor.is_empty() {
            None
        } else {
            let sensor = sensors.get(&config.temperature_sensor).cloned();
            if sensor.is_none() {
                warn!(
                    "disk {name:?}: unknown temperature sensor {:?}",
                    config.temperature_sensor
                );
            }
            sensor
        };

        debug!("device {name}: {}", device.display());
        Ok(Self {
            name,
            device,
            device_name,
            idle_after,
            standby_after,
            monitor_temperature: config.monitor_temperature,
            power_status,
            temperature_sensor,
            active: CacheValue::new(STATUS_VALIDITY),
            temperature: CacheValue::new(STATUS_VALIDITY),
            activity: Mutex::new(Activity::default()),
            diskstats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel device node, e.g. `/dev/sda`.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Kernel device name, e.g. `sda`.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Expansion of `$DEVICE` and `$DEVICE_NAME` in commands and paths.
    pub fn expand(&self, name: &str) -> String {
        match name {
            "DEVICE" => self.device.to_string_lossy().into_owned(),
            "DEVICE_NAME" => self.device_name.clone(),
            other => format!("${other}"),
        }
    }

    /// True when the disk spins, cached for a minute. Always false without
    /// a power status probe.
    pub async fn is_active(&self) -> bool {
        let Some(power_status) = &self.power_status else {
            return false;
        };
        let expand = |name: &str| self.expand(name);
        let state = self
            .active
            .get(|| async { Ok::<_, Infallible>(power_status.get(&expand).await) })
            .await;
        matches!(state, Ok(DiskPowerState::Active))
    }

    pub fn has_temperature(&self) -> bool {
        self.monitor_temperature != MonitorTemperature::Never
    }

    /// Whether reading the temperature now is allowed without waking the
    /// disk up.
    pub async fn temperature_available(&self) -> bool {
        match self.monitor_temperature {
            MonitorTemperature::Never => false,
            MonitorTemperature::Always => true,
            MonitorTemperature::WhenActive => self.is_active().await && !self.is_idle().await,
        }
    }

    /// Disk temperature, cached for a minute; 0 when unavailable.
    pub async fn temperature(&self) -> i32 {
        let Some(sensor) = &self.temperature_sensor else {
            return 0;
        };
        if !self.temperature_available().await {
            return 0;
        }
        let expand = |name: &str| self.expand(name);
        match self.temperature.get(|| sensor.get(Some(&expand))).await {
            Ok(temperature) => temperature,
            Err(e) => {
                debug!("{}: cannot read temperature: {e}", self.name);
                0
            }
        }
    }

    /// Last time the disk (or one of its partitions) read or wrote.
    ///
    /// The first call starts tracking and reports now. Later calls diff the
    /// shared diskstats snapshot at most once a minute.
    pub async fn last_activity(&self) -> Instant {
        let mut activity = self.activity.lock().await;
        let now = Instant::now();

        let (Some(previous), Some(last)) = (activity.stats.clone(), activity.last_activity) else {
            activity.stats = self.diskstats.snapshot().await.ok();
            activity.last_activity = Some(now);
            return now;
        };
        if last + ACTIVITY_REFRESH > now {
            return last;
        }

        match self.diskstats.snapshot().await {
            Ok(current) => {
                let (read, write) =
                    current.partitions_io_activity_from(&previous, &self.device_name);
                trace!(
                    "{}: {read} sectors read, {write} written, {} I/Os in flight",
                    self.name,
                    current.io_in_progress(&self.device_name)
                );
                if read > 0 || write > 0 {
                    activity.last_activity = Some(current.timestamp());
                }
                activity.stats = Some(current);
            }
            Err(e) => {
                debug!("{}: cannot read diskstats: {e}", self.name);
                activity.last_activity = Some(now);
            }
        }
        activity.last_activity.unwrap_or(now)
    }

    /// True when no I/O happened for longer than `last_active`.
    pub async fn is_idle(&self) -> bool {
        self.last_activity().await + self.idle_after < Instant::now()
    }

    /// True when the disk is forced into standby after `standby_after`.
    pub fn has_forced_standby(&self) -> bool {
        !self.standby_after.is_zero()
    }

    pub fn standby_after(&self) -> Duration {
        self.standby_after
    }

    /// Puts the disk into standby every five minutes while it spins and has
    /// been inactive for longer than `standby_after`. Errors never stop the
    /// loop. Returns at once when forced standby is disabled.
    pub async fn standby_watch(self: Arc<Self>, token: CancellationToken) {
        if !self.has_forced_standby() {
            return;
        }
        info!(
            "will set {} in standby mode after {:?} of inactivity",
            self.device.display(),
            self.standby_after
        );

        let mut ticker = interval(STANDBY_POLL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("{}: standby watch stopped", self.name);
                    break;
                }
                _ = ticker.tick() => {
                    self.enforce_standby().await;
                }
            }
        }
    }

    async fn enforce_standby(&self) {
        if !self.is_active().await {
            return;
        }
        if self.last_activity().await + self.standby_after >= Instant::now() {
            return;
        }
        let Some(power_status) = &self.power_status else {
            return;
        };
        info!("{}: no activity for {:?}, entering standby", self.name, self.standby_after);
        let expand = |name: &str| self.expand(name);
        if let Err(e) = power_status.standby(&expand).await {
            error!("{}: {e}", self.name);
        }
        // TODO: cache Standby instead once confirmed it does not hide a failed spin down
        self.active.set(DiskPowerState::Active).await;
    }
}

#[async_trait]
impl TemperatureSource for Disk {
    async fn read_temperature(&self) -> Result<i32> {
        Ok(self.temperature().await)
    }
}

fn resolve_device(device: &Path) -> Result<PathBuf> {
    let metadata = std::fs::symlink_metadata(device)?;
    if metadata.file_type().is_symlink() {
        return Ok(std::fs::canonicalize(device)?);
    }
    Ok(device.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::fake::RecordingCommand, config::PowerStatusCfg, disk_status::DiskStatus,
    };
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::sleep;

    struct Fixture {
        dir: TempDir,
        diskstats: Arc<DiskstatsReader>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("sda"), "").unwrap();
            fs::create_dir(dir.path().join("by-id")).unwrap();
            std::os::unix::fs::symlink("../sda", dir.path().join("by-id/ata-WDC_WD40EFRX"))
                .unwrap();
            let fixture = Self {
                diskstats: Arc::new(DiskstatsReader::new(
                    dir.path().join("diskstats"),
                    Duration::from_secs(60),
                )),
                dir,
            };
            fixture.write_stats(100, 100);
            fixture
        }

        fn write_stats(&self, read: u64, write: u64) {
            let content = format!(
                "   8  0 sda 1 0 0 0 0 0 0 0 0 0 0 0\n   8  1 sda1 1 0 {read} 0 0 0 {write} 0 0 0 0\n"
            );
            fs::write(self.dir.path().join("diskstats"), content).unwrap();
        }

        fn device(&self) -> String {
            self.dir.path().join("by-id/ata-WDC_WD40EFRX").display().to_string()
        }

        fn disk(&self, config: DiskCfg, power_status: Option<Arc<dyn PowerStatus>>) -> Disk {
            let mut statuses = BTreeMap::new();
            if let Some(status) = power_status {
                statuses.insert("hdparm".to_string(), status);
            }
            Disk::new(
                "data",
                &DiskCfg {
                    device: self.device(),
                    ..config
                },
                &statuses,
                &BTreeMap::new(),
                self.diskstats.clone(),
            )
            .unwrap()
        }
    }

    fn hdparm(check: &Arc<RecordingCommand>, standby: &Arc<RecordingCommand>) -> Arc<dyn PowerStatus> {
        let config = PowerStatusCfg {
            active: "active/idle".into(),
            standby: "standby".into(),
            ..Default::default()
        };
        Arc::new(DiskStatus::with_commands(
            "hdparm",
            &config,
            Some(check.clone()),
            Some(standby.clone()),
        ))
    }

    #[test]
    fn device_symlink_is_resolved() {
        let fixture = Fixture::new();
        let disk = fixture.disk(DiskCfg::default(), None);
        assert_eq!(disk.device_name(), "sda");
        assert_eq!(disk.expand("DEVICE_NAME"), "sda");
        assert!(disk.expand("DEVICE").ends_with("/sda"));
        assert_eq!(disk.expand("OTHER"), "$OTHER");
        assert!(!disk.has_forced_standby());
    }

    #[test]
    fn missing_device_is_an_error() {
        let fixture = Fixture::new();
        let err = Disk::new(
            "ghost",
            &DiskCfg {
                device: fixture.dir.path().join("sdz").display().to_string(),
                ..Default::default()
            },
            &BTreeMap::new(),
            &BTreeMap::new(),
            fixture.diskstats.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(_)));
    }

    #[tokio::test]
    async fn without_power_status_disk_is_inactive() {
        let fixture = Fixture::new();
        let disk = fixture.disk(DiskCfg::default(), None);
        assert!(!disk.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn active_status_is_cached() {
        let fixture = Fixture::new();
        let check = RecordingCommand::new("hdparm -C $DEVICE", "drive state is: active/idle");
        let standby = RecordingCommand::new("hdparm -y $DEVICE", "");
        let disk = fixture.disk(DiskCfg::default(), Some(hdparm(&check, &standby)));

        assert!(disk.is_active().await);
        check.set_output("drive state is: standby");
        assert!(disk.is_active().await);
        assert_eq!(check.runs().len(), 1);

        sleep(Duration::from_secs(61)).await;
        assert!(!disk.is_active().await);
        assert_eq!(check.runs().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_is_tracked_from_partitions() {
        let fixture = Fixture::new();
        let disk = fixture.disk(
            DiskCfg {
                last_active: "2m".into(),
                ..Default::default()
            },
            None,
        );

        let start = disk.last_activity().await;
        assert!(!disk.is_idle().await);

        sleep(Duration::from_secs(90)).await;
        assert_eq!(disk.last_activity().await, start);

        fixture.write_stats(180, 100);
        sleep(Duration::from_secs(60)).await;
        let moved = disk.last_activity().await;
        assert!(moved > start);

        sleep(Duration::from_secs(150)).await;
        assert!(disk.is_idle().await);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_diskstats_count_as_activity() {
        let fixture = Fixture::new();
        let disk = fixture.disk(DiskCfg::default(), None);
        let start = disk.last_activity().await;

        fs::remove_file(fixture.dir.path().join("diskstats")).unwrap();
        sleep(Duration::from_secs(120)).await;
        let now = disk.last_activity().await;
        assert!(now >= start + Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn standby_is_issued_on_every_poll_while_reported_active() {
        let fixture = Fixture::new();
        let check = RecordingCommand::new("hdparm -C $DEVICE", "drive state is: active/idle");
        let standby = RecordingCommand::new("hdparm -y $DEVICE", "");
        let disk = Arc::new(fixture.disk(
            DiskCfg {
                standby_after: "10m".into(),
                ..Default::default()
            },
            Some(hdparm(&check, &standby)),
        ));
        assert!(disk.has_forced_standby());

        let token = CancellationToken::new();
        let watch = tokio::spawn(disk.clone().standby_watch(token.clone()));

        // polls at 0, 5, 10 and 15 minutes; inactive for more than 10 at 15
        sleep(Duration::from_secs(16 * 60)).await;
        assert_eq!(standby.runs().len(), 1);
        assert!(standby.runs()[0].ends_with("/sda"));

        sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(standby.runs().len(), 2);

        token.cancel();
        watch.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn standby_watch_is_disabled_without_delay() {
        let fixture = Fixture::new();
        let disk = Arc::new(fixture.disk(DiskCfg::default(), None));
        // returns immediately
        disk.standby_watch(CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn temperature_follows_monitor_policy() {
        let fixture = Fixture::new();
        let sensor_dir = fixture.dir.path().join("hwmon");
        fs::create_dir(&sensor_dir).unwrap();
        fs::write(sensor_dir.join("sda_temp"), "38").unwrap();
        let sensor_cfg = crate::config::SensorCfg {
            file: format!("{}/${{DEVICE_NAME}}_temp", sensor_dir.display()),
            ..Default::default()
        };
        let mut sensors: BTreeMap<String, Arc<dyn HardwareSensor>> = BTreeMap::new();
        sensors.insert(
            "drivetemp".into(),
            Arc::new(crate::sensor::HwSensor::new("drivetemp", &sensor_cfg).unwrap()),
        );

        let build = |monitor| {
            Disk::new(
                "data",
                &DiskCfg {
                    device: fixture.device(),
                    temperature_sensor: "drivetemp".into(),
                    monitor_temperature: monitor,
                    ..Default::default()
                },
                &BTreeMap::new(),
                &sensors,
                fixture.diskstats.clone(),
            )
            .unwrap()
        };

        let never = build(MonitorTemperature::Never);
        assert!(!never.has_temperature());
        assert_eq!(never.temperature().await, 0);

        let always = build(MonitorTemperature::Always);
        assert!(always.has_temperature());
        assert_eq!(always.read_temperature().await.unwrap(), 38);

        // no power status: never active, so never read
        let when_active = build(MonitorTemperature::WhenActive);
        assert_eq!(when_active.temperature().await, 0);
    }
}
