use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sensor_ingest::{
    config::IngestConfig,
    db::{self, StoredReading},
    ingest::Ingestor,
    link::{Link, LinkOpener, PortDiscovery, PortId, Release},
};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::{
    sync::{Notify, oneshot},
    task::JoinHandle,
    time::sleep,
};

const READ_TIMEOUT: Duration = Duration::from_millis(5);

const DB_FILE: &str = "readings.db";

enum Event {
    Frame(&'static str),
    Fail(io::ErrorKind),
    /// Holds the script until the test notifies.
    Gate(Arc<Notify>),
}

#[derive(Clone, Default)]
struct Counters {
    discoveries: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

struct FixedDiscovery {
    port: PortId,
    counters: Counters,
}

impl PortDiscovery for FixedDiscovery {
    fn list_candidate_ports(&self) -> Vec<PortId> {
        self.counters.discoveries.fetch_add(1, Ordering::SeqCst);
        vec![self.port.clone()]
    }
}

/// Link that plays back a script, then idles like a quiet serial port.
struct ScriptedLink {
    port: PortId,
    events: VecDeque<Event>,
    counters: Counters,
}

#[async_trait]
impl Link for ScriptedLink {
    fn port(&self) -> &PortId {
        &self.port
    }

    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);

        loop {
            match self.events.pop_front() {
                Some(Event::Frame(line)) => return Ok(Some(format!("{line}\r\n").into_bytes())),
                Some(Event::Fail(kind)) => return Err(io::Error::new(kind, "scripted failure")),
                Some(Event::Gate(gate)) => gate.notified().await,
                None => {
                    sleep(READ_TIMEOUT).await;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(self: Box<Self>) -> io::Result<Release> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(Release::Closed)
    }
}

/// Each successful open gets the next script; once scripts run out links stay quiet.
struct ScriptedOpener {
    scripts: Mutex<VecDeque<Vec<Event>>>,
    counters: Counters,
}

#[async_trait]
impl LinkOpener for ScriptedOpener {
    async fn open(&self, port: &PortId) -> io::Result<Box<dyn Link>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let events = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        Ok(Box::new(ScriptedLink {
            port: port.clone(),
            events: events.into(),
            counters: self.counters.clone(),
        }))
    }
}

struct Harness {
    dir: TempDir,
    pool: SqlitePool,
    counters: Counters,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Harness {
    fn config(stall_timeout: Duration) -> IngestConfig {
        IngestConfig {
            stall_timeout,
            read_timeout: READ_TIMEOUT,
            attempt_delay: Duration::ZERO,
            sweep_delay: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn start(scripts: Vec<Vec<Event>>, stall_timeout: Duration) -> Self {
        Self::start_with(scripts, Self::config(stall_timeout)).await
    }

    async fn start_with(scripts: Vec<Vec<Event>>, config: IngestConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = db::new_pool(&dir.path().join(DB_FILE)).await.unwrap();
        db::ensure_schema(&pool).await.unwrap();

        let counters = Counters::default();
        let discovery = FixedDiscovery {
            port: PortId::new("/dev/rfcomm0"),
            counters: counters.clone(),
        };
        let opener = ScriptedOpener {
            scripts: Mutex::new(scripts.into()),
            counters: counters.clone(),
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let ingestor = Ingestor::new(discovery, opener, pool.clone(), &config);
        let task = tokio::spawn(ingestor.run(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            dir,
            pool,
            counters,
            shutdown,
            task,
        }
    }

    async fn wait_for_rows(&self, expected: i64) -> Vec<StoredReading> {
        for _ in 0..500 {
            if db::count_readings(&self.pool).await.unwrap() >= expected {
                return db::latest_readings(&self.pool, 100).await.unwrap();
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("store never reached {expected} rows");
    }

    async fn wait_until(&self, condition: impl Fn(&Counters) -> bool) {
        for _ in 0..500 {
            if condition(&self.counters) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Stops the ingestor. The directory is handed back so the store can be reopened.
    async fn stop(self) -> (SqlitePool, TempDir) {
        self.shutdown.send(()).unwrap();
        self.task.await.unwrap();
        (self.pool, self.dir)
    }
}

const SCENARIO_A: &str = "25.0,60.0,5.0,27.2,40.0,27.0,0.5,39.0,1.2";

#[tokio::test]
async fn valid_frame_is_committed_and_visible_to_latest_query() {
    let harness = Harness::start(
        vec![vec![Event::Frame(SCENARIO_A)]],
        Duration::from_secs(10),
    )
    .await;

    harness.wait_for_rows(1).await;
    let latest = db::latest_readings(&harness.pool, 1).await.unwrap();

    assert_eq!(latest.len(), 1);
    let row = &latest[0];
    assert_eq!(row.temperature, 25.0);
    assert_eq!(row.humidity, 60.0);
    assert_eq!(row.co_level, 5.0);
    assert_eq!(row.heat_index, 27.2);
    assert_eq!(row.air_quality_index, 40.0);
    assert_eq!(row.mean_heat_index, 27.0);
    assert_eq!(row.std_dev_heat_index, 0.5);
    assert_eq!(row.mean_aqi, 39.0);
    assert_eq!(row.std_dev_aqi, 1.2);

    let (pool, _dir) = harness.stop().await;
    assert!(pool.is_closed());
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_stopping_the_loop() {
    let harness = Harness::start(
        vec![vec![
            Event::Frame("25.0,60.0"),
            Event::Frame("25.0,60.0,oops,27.2,40.0,27.0,0.5,39.0,1.2"),
            Event::Frame(""),
            Event::Frame("1,2,3,4,5,6,7,8,9"),
        ]],
        Duration::from_secs(10),
    )
    .await;

    let rows = harness.wait_for_rows(1).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(db::count_readings(&harness.pool).await.unwrap(), 1);
    assert_eq!(rows[0].temperature, 1.0);
    assert_eq!(harness.counters.opens.load(Ordering::SeqCst), 1);

    harness.stop().await;
}

#[tokio::test]
async fn readings_are_stored_in_arrival_order() {
    let harness = Harness::start(
        vec![vec![
            Event::Frame("1,0,0,0,0,0,0,0,0"),
            Event::Frame("2,0,0,0,0,0,0,0,0"),
            Event::Frame("3,0,0,0,0,0,0,0,0"),
        ]],
        Duration::from_secs(10),
    )
    .await;

    let rows = harness.wait_for_rows(3).await;
    let temperatures: Vec<f64> = rows.iter().map(|r| r.temperature).collect();
    assert_eq!(temperatures, vec![1.0, 2.0, 3.0]);
    assert!(rows.windows(2).all(|w| w[0].real_time <= w[1].real_time));

    harness.stop().await;
}

#[tokio::test]
async fn stalled_link_triggers_rediscovery() {
    let harness = Harness::start(
        vec![vec![Event::Frame(SCENARIO_A)]],
        Duration::from_millis(50),
    )
    .await;

    harness.wait_for_rows(1).await;
    harness
        .wait_until(|c| {
            c.discoveries.load(Ordering::SeqCst) >= 2 && c.opens.load(Ordering::SeqCst) >= 2
        })
        .await;

    // The stale link is closed before discovery runs again.
    assert!(harness.counters.closes.load(Ordering::SeqCst) >= 1);

    harness.stop().await;
}

#[tokio::test]
async fn io_error_mid_read_reconnects_and_keeps_ingesting() {
    let harness = Harness::start(
        vec![
            vec![
                Event::Frame("1,0,0,0,0,0,0,0,0"),
                Event::Fail(io::ErrorKind::BrokenPipe),
            ],
            vec![Event::Frame("2,0,0,0,0,0,0,0,0")],
        ],
        Duration::from_secs(10),
    )
    .await;

    let rows = harness.wait_for_rows(2).await;
    let temperatures: Vec<f64> = rows.iter().map(|r| r.temperature).collect();
    assert_eq!(temperatures, vec![1.0, 2.0]);
    assert_eq!(harness.counters.opens.load(Ordering::SeqCst), 2);
    assert_eq!(harness.counters.discoveries.load(Ordering::SeqCst), 2);
    assert_eq!(harness.counters.closes.load(Ordering::SeqCst), 1);

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_releases_link_and_store() {
    let harness = Harness::start(Vec::new(), Duration::from_secs(10)).await;
    harness
        .wait_until(|c| c.opens.load(Ordering::SeqCst) == 1)
        .await;

    let closes = harness.counters.closes.clone();
    let (pool, _dir) = harness.stop().await;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(pool.is_closed());
}

#[tokio::test]
async fn pending_readings_are_flushed_on_shutdown() {
    let harness = Harness::start_with(
        vec![vec![
            Event::Frame("1,0,0,0,0,0,0,0,0"),
            Event::Frame("2,0,0,0,0,0,0,0,0"),
        ]],
        IngestConfig {
            batch_size: 5,
            ..Harness::config(Duration::from_secs(10))
        },
    )
    .await;

    // The third read only starts once both frames have been accepted.
    harness
        .wait_until(|c| c.reads.load(Ordering::SeqCst) >= 3)
        .await;
    assert_eq!(db::count_readings(&harness.pool).await.unwrap(), 0);

    let (_, dir) = harness.stop().await;
    let pool = db::new_read_only_pool(&dir.path().join(DB_FILE))
        .await
        .unwrap();

    let rows = db::latest_readings(&pool, 10).await.unwrap();
    let temperatures: Vec<f64> = rows.iter().map(|r| r.temperature).collect();
    assert_eq!(temperatures, vec![1.0, 2.0]);
}

#[tokio::test]
async fn store_failure_keeps_readings_until_the_store_recovers() {
    let first = Arc::new(Notify::new());
    let second = Arc::new(Notify::new());
    let harness = Harness::start(
        vec![vec![
            Event::Gate(first.clone()),
            Event::Frame("1,0,0,0,0,0,0,0,0"),
            Event::Gate(second.clone()),
            Event::Frame("2,0,0,0,0,0,0,0,0"),
        ]],
        Duration::from_secs(10),
    )
    .await;

    harness
        .wait_until(|c| c.reads.load(Ordering::SeqCst) >= 1)
        .await;
    sqlx::query("DROP TABLE sensor_readings")
        .execute(&harness.pool)
        .await
        .unwrap();
    first.notify_one();

    // The next read starts after the failed flush of the first reading.
    harness
        .wait_until(|c| c.reads.load(Ordering::SeqCst) >= 2)
        .await;
    db::ensure_schema(&harness.pool).await.unwrap();
    assert_eq!(db::count_readings(&harness.pool).await.unwrap(), 0);
    second.notify_one();

    let rows = harness.wait_for_rows(2).await;
    let temperatures: Vec<f64> = rows.iter().map(|r| r.temperature).collect();
    assert_eq!(temperatures, vec![1.0, 2.0]);
    assert_eq!(harness.counters.opens.load(Ordering::SeqCst), 1);

    harness.stop().await;
}
