use serde_json::json;
use simwatch::config::PipelineConfig;
use simwatch::data::Sample;
use simwatch::error::PresentError;
use simwatch::pipeline::{
    Graph, MonitorId, MonitorStatus, Pipeline, Presenter, RenderInfo, View,
};
use simwatch::transport::{ConnectionState, MemoryTransport};
use simwatch::wire::{DataUpdate, Inbound, NodeListing, Outbound, ServerNode};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum Drawn {
    Scalar { latest: f32, points: usize },
    Vector(usize),
    Image { rows: usize, cols: usize },
}

#[derive(Default)]
struct RecordingPresenter {
    next: usize,
    live: BTreeSet<usize>,
    released: Vec<usize>,
    titles: BTreeMap<usize, String>,
    drawn: Vec<(usize, Drawn)>,
    statuses: BTreeMap<usize, MonitorStatus>,
    infos: BTreeMap<usize, RenderInfo>,
    gone_on_render: BTreeSet<usize>,
    fail_on_render: BTreeSet<usize>,
    panic_on_render: bool,
    panic_on_lookup: bool,
}

impl RecordingPresenter {
    /// Closes a target behind the pipeline's back.
    fn kill(&mut self, target: usize) {
        self.live.remove(&target);
    }

    fn drawn_for(&self, target: usize) -> Vec<Drawn> {
        self.drawn
            .iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, d)| d.clone())
            .collect()
    }
}

impl Presenter for RecordingPresenter {
    type Target = usize;

    fn open_target(&mut self, _id: &MonitorId, title: &str) -> Result<usize, PresentError> {
        let target = self.next;
        self.next += 1;
        self.live.insert(target);
        self.titles.insert(target, title.to_string());
        Ok(target)
    }

    fn target_exists(&self, target: &usize) -> bool {
        if self.panic_on_lookup {
            panic!("presenter blew up during lookup");
        }
        self.live.contains(target)
    }

    fn render(&mut self, target: &usize, view: View<'_>) -> Result<(), PresentError> {
        if self.panic_on_render {
            panic!("presenter exploded");
        }
        if self.gone_on_render.contains(target) {
            return Err(PresentError::TargetGone);
        }
        if self.fail_on_render.contains(target) {
            return Err(PresentError::Failed("no colormap".into()));
        }
        let drawn = match view {
            View::Scalar { latest, history } => Drawn::Scalar {
                latest,
                points: history.len(),
            },
            View::Vector(values) => Drawn::Vector(values.len()),
            View::Image(image) => Drawn::Image {
                rows: image.rows,
                cols: image.cols,
            },
        };
        self.drawn.push((*target, drawn));
        Ok(())
    }

    fn set_status(&mut self, target: &usize, status: &MonitorStatus) {
        self.statuses.insert(*target, status.clone());
    }

    fn set_info(&mut self, target: &usize, info: &RenderInfo) {
        self.infos.insert(*target, info.clone());
    }

    fn release_target(&mut self, target: usize) {
        self.live.remove(&target);
        self.released.push(target);
    }
}

type TestPipeline = Pipeline<Graph, RecordingPresenter>;

fn graph() -> Graph {
    let mut graph = Graph::new();
    graph.insert("a1b2c3", "PSF", "PSF");
    graph.insert("d4e5f6", "DM", "dm");
    graph.insert("cam-01", "Custom", "Camera");
    graph
}

fn setup_with(config: PipelineConfig) -> (TestPipeline, Arc<MemoryTransport>) {
    let transport = MemoryTransport::new();
    let pipeline =
        Pipeline::new(config, graph(), RecordingPresenter::default(), transport.clone()).unwrap();
    (pipeline, transport)
}

fn setup() -> (TestPipeline, Arc<MemoryTransport>) {
    setup_with(PipelineConfig::default())
}

fn connected() -> (TestPipeline, Arc<MemoryTransport>) {
    let (mut p, t) = setup();
    p.connect().unwrap();
    t.take_sent();
    (p, t)
}

fn data(name: &str, sample: Sample) -> Inbound {
    Inbound::DataUpdate(DataUpdate {
        name: name.to_string(),
        sample,
    })
}

fn target(p: &TestPipeline, id: &MonitorId) -> usize {
    *p.monitor(id).unwrap().target()
}

fn unsubscribes(t: &MemoryTransport, name: &str) -> usize {
    t.count_sent(|m| matches!(m, Outbound::Unsubscribe { output } if output == name))
}

fn newdata_count(t: &MemoryTransport) -> usize {
    t.count_sent(|m| matches!(m, Outbound::NewData(_)))
}

#[test]
fn refcount_follows_open_monitors() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("a1b2c3", "out").unwrap();
    let c = p.open("a1b2c3", "out").unwrap();
    assert_eq!(p.subscribers("psf.out"), 3);
    // only the first subscriber puts the name on the wire
    assert_eq!(newdata_count(&t), 1);

    p.close(&b);
    assert_eq!(p.subscribers("psf.out"), 2);
    p.close(&a);
    assert_eq!(p.subscribers("psf.out"), 1);
    assert_eq!(unsubscribes(&t, "psf.out"), 0);

    p.close(&c);
    assert_eq!(p.subscribers("psf.out"), 0);
    assert_eq!(unsubscribes(&t, "psf.out"), 1);

    // reopen and close again: one more transition, one more unsubscribe
    let d = p.open("a1b2c3", "out").unwrap();
    assert_eq!(p.subscribers("psf.out"), 1);
    p.close(&d);
    assert_eq!(unsubscribes(&t, "psf.out"), 2);
}

#[test]
fn close_twice_is_a_noop() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let tgt = target(&p, &a);
    assert!(p.close(&a));
    assert!(!p.close(&a));
    assert_eq!(unsubscribes(&t, "psf.out"), 1);
    assert_eq!(p.presenter().released, vec![tgt]);
}

#[test]
fn data_queue_drops_oldest() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "sr").unwrap();
    for i in 0..150 {
        t.deliver(data("psf.sr", Sample::scalar(i as f32)));
        assert!(p.queued().0 <= 100);
    }
    assert_eq!(p.queued().0, 100);
    assert_eq!(p.stats().data_evicted, 50);

    let now = Instant::now();
    let outcome = p.step(now);
    assert_eq!(outcome.rendered, 1);
    assert_eq!(outcome.deferred, 4);
    let tgt = target(&p, &a);
    assert_eq!(
        p.presenter().drawn_for(tgt),
        vec![Drawn::Scalar {
            latest: 50.0,
            points: 1
        }]
    );
}

#[test]
fn status_queue_drops_oldest() {
    let (mut p, _t) = setup();
    p.open("a1b2c3", "out").unwrap();
    let sink = p.sink();
    for _ in 0..70 {
        sink(Ok(Inbound::Disconnect));
    }
    assert_eq!(p.queued().1, 50);
    assert_eq!(p.stats().status_evicted, 20);
}

#[test]
fn close_purges_queued_items() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("d4e5f6", "out").unwrap();
    for i in 0..5 {
        t.deliver(data("psf.out", Sample::scalar(i as f32)));
        t.deliver(data("dm.out", Sample::scalar(i as f32)));
    }
    t.deliver(Inbound::Disconnect);
    assert!(p.queue_references(&a));

    p.close(&a);
    assert!(!p.queue_references(&a));
    assert!(p.queue_references(&b));
    assert_eq!(p.queued().0, 5);
}

#[test]
fn larger_images_throttle_longer() {
    let (mut p, t) = connected();
    let small = p.open("a1b2c3", "small").unwrap();
    let large = p.open("a1b2c3", "large").unwrap();
    t.deliver(data(
        "psf.small",
        Sample::with_shape(vec![0.5; 100 * 100], vec![100, 100]),
    ));
    t.deliver(data(
        "psf.large",
        Sample::with_shape(vec![0.5; 2000 * 2000], vec![2000, 2000]),
    ));
    p.step(Instant::now());

    let small_interval = p.monitor(&small).unwrap().min_interval;
    let large_interval = p.monitor(&large).unwrap().min_interval;
    assert_eq!(small_interval, Duration::from_millis(50));
    assert_eq!(large_interval, Duration::from_millis(500));
    assert!(large_interval >= small_interval);
}

#[test]
fn vectors_do_not_retune_interval() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    t.deliver(data("psf.out", Sample::with_shape(vec![1.0; 50_000], vec![50_000])));
    p.step(Instant::now());
    assert_eq!(p.monitor(&a).unwrap().min_interval, Duration::from_millis(100));
    assert_eq!(
        p.presenter().drawn_for(target(&p, &a)),
        vec![Drawn::Vector(50_000)]
    );
}

#[test]
fn end_to_end() {
    let (mut p, t) = setup();

    // opened while disconnected: registered, nothing on the wire
    let a = p.open("a1b2c3", "out").unwrap();
    assert_eq!(p.subscribers("psf.out"), 1);
    assert!(t.sent().is_empty());
    assert_eq!(p.monitor(&a).unwrap().status, MonitorStatus::Disconnected);

    p.connect().unwrap();
    assert_eq!(p.connection_state(), ConnectionState::Connected);
    let sent = t.take_sent();
    assert_eq!(sent[0], Outbound::GetParams);
    assert!(sent.contains(&Outbound::NewData(vec!["psf.out".into()])));
    assert!(sent.contains(&Outbound::TestConnection {
        client: "node_editor".into()
    }));

    let mut nodes = BTreeMap::new();
    nodes.insert(
        "psf".to_string(),
        ServerNode {
            class: "PSF".into(),
            outputs: vec!["out".into()],
        },
    );
    t.deliver(Inbound::Params(NodeListing { nodes }));
    p.step(Instant::now());
    assert_eq!(p.resolve("a1b2c3", "out"), "psf.out");

    assert!(p.request_next_frame());
    assert_eq!(t.take_sent(), vec![Outbound::NewData(vec!["psf.out".into()])]);

    assert!(t.deliver_line(
        br#"{"event":"data_update","data":{"name":"psf.out","data":[[1,2],[3,4]]}}"#
    ));
    assert_eq!(p.queued().0, 1);
    let outcome = p.step(Instant::now());
    assert_eq!(outcome.rendered, 1);
    assert_eq!(outcome.request_after, Some(Duration::from_millis(20)));

    let tgt = target(&p, &a);
    assert_eq!(
        p.presenter().drawn_for(tgt),
        vec![Drawn::Image { rows: 2, cols: 2 }]
    );
    assert_eq!(p.monitor(&a).unwrap().status, MonitorStatus::Receiving);
    let info = &p.presenter().infos[&tgt];
    assert_eq!(info.updates, 1);
    assert_eq!(info.sample.range, Some((1.0, 4.0)));

    // `done` triggers exactly one further request
    t.deliver(Inbound::Done(json!({})));
    assert_eq!(t.take_sent(), vec![Outbound::NewData(vec!["psf.out".into()])]);
}

#[test]
fn shared_name_keeps_flowing_after_one_close() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("a1b2c3", "out").unwrap();
    p.close(&a);
    assert_eq!(p.subscribers("psf.out"), 1);
    assert_eq!(unsubscribes(&t, "psf.out"), 0);

    t.deliver(data("psf.out", Sample::scalar(3.0)));
    p.step(Instant::now());
    assert_eq!(p.presenter().drawn_for(target(&p, &b)).len(), 1);
}

#[test]
fn both_monitors_render_a_shared_sample() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("a1b2c3", "out").unwrap();
    t.deliver(data("psf.out", Sample::scalar(1.0)));
    assert_eq!(p.queued().0, 2);
    p.step(Instant::now());
    assert_eq!(p.presenter().drawn_for(target(&p, &a)).len(), 1);
    assert_eq!(p.presenter().drawn_for(target(&p, &b)).len(), 1);
}

#[test]
fn pending_slot_keeps_most_recent() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let tgt = target(&p, &a);
    let start = Instant::now();

    for v in [1.0, 2.0, 3.0] {
        t.deliver(data("psf.out", Sample::scalar(v)));
    }
    let outcome = p.step(start);
    assert_eq!(outcome.rendered, 1);
    assert_eq!(outcome.deferred, 2);
    assert_eq!(p.stats().skipped, 2);

    // not due yet: nothing more drawn
    let outcome = p.step(start + Duration::from_millis(10));
    assert_eq!(outcome.rendered, 0);

    let outcome = p.step(start + Duration::from_millis(150));
    assert_eq!(outcome.rendered, 1);
    assert_eq!(
        p.presenter().drawn_for(tgt),
        vec![
            Drawn::Scalar {
                latest: 1.0,
                points: 1
            },
            Drawn::Scalar {
                latest: 3.0,
                points: 2
            },
        ]
    );
    assert!(p.monitor(&a).unwrap().pending.is_none());
}

#[test]
fn fresh_render_drops_older_pending() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let tgt = target(&p, &a);
    let start = Instant::now();

    t.deliver(data("psf.out", Sample::scalar(1.0)));
    assert_eq!(p.step(start).rendered, 1);
    t.deliver(data("psf.out", Sample::scalar(2.0)));
    assert_eq!(p.step(start + Duration::from_millis(10)).deferred, 1);

    t.deliver(data("psf.out", Sample::scalar(3.0)));
    assert_eq!(p.step(start + Duration::from_millis(150)).rendered, 1);
    assert!(p.monitor(&a).unwrap().pending.is_none());
    assert_eq!(p.step(start + Duration::from_millis(400)).rendered, 0);

    let latest: Vec<f32> = p
        .presenter()
        .drawn_for(tgt)
        .into_iter()
        .filter_map(|d| match d {
            Drawn::Scalar { latest, .. } => Some(latest),
            _ => None,
        })
        .collect();
    assert_eq!(latest, vec![1.0, 3.0]);
}

#[test]
fn backlog_suppresses_frame_request() {
    let (mut p, t) = connected();
    p.open("a1b2c3", "out").unwrap();
    for i in 0..30 {
        t.deliver(data("psf.out", Sample::scalar(i as f32)));
    }
    let outcome = p.step(Instant::now());
    assert_eq!(outcome.rendered, 1);
    assert_eq!(outcome.queued, 25);
    assert_eq!(outcome.request_after, None);
    assert_eq!(outcome.rearm_frames, 1);
}

#[test]
fn rearm_cadence() {
    let (mut p, t) = connected();
    p.open("a1b2c3", "out").unwrap();
    assert_eq!(p.step(Instant::now()).rearm_frames, 10);
    for i in 0..8 {
        t.deliver(data("psf.out", Sample::scalar(i as f32)));
    }
    assert_eq!(p.step(Instant::now()).rearm_frames, 2);
}

#[test]
fn no_request_while_disconnected() {
    let (mut p, t) = setup();
    let a = p.open("a1b2c3", "out").unwrap();
    assert!(!p.request_next_frame());
    // data can still arrive from a transport that raced the disconnect
    let sink = p.sink();
    sink(Ok(data("psf.out", Sample::scalar(1.0))));
    let outcome = p.step(Instant::now());
    assert_eq!(outcome.rendered, 1);
    assert_eq!(outcome.request_after, None);
    p.close(&a);
    assert!(t.sent().is_empty());
}

#[test]
fn unrouted_and_malformed_are_counted() {
    let (mut p, t) = connected();
    p.open("a1b2c3", "out").unwrap();
    t.deliver(data("nobody.out", Sample::scalar(1.0)));
    t.deliver_line(br#"{"event":"data_update","data":{"data":[1]}}"#);
    t.deliver_line(br#"{"event":"data_update","data":{"name":"psf.out","data":[[1],[2,3]]}}"#);
    t.deliver_line(br#"{"event":"surprise"}"#);
    t.deliver_line(b"garbage");
    let stats = p.stats();
    assert_eq!(stats.unrouted, 1);
    assert_eq!(stats.malformed, 4);
    assert_eq!(p.queued().0, 0);
}

#[test]
fn malformed_shapes_are_counted() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    t.deliver_line(
        br#"{"event":"data_update","data":{"name":"psf.out","data":[1,2],"shape":[9223372036854775809,2]}}"#,
    );
    assert_eq!(p.stats().malformed, 1);
    t.deliver_line(br#"{"event":"data_update","data":{"name":"psf.out","data":[1,2],"shape":[2,-1]}}"#);
    assert_eq!(p.stats().malformed, 2);
    assert_eq!(p.queued().0, 0);

    // the link is still usable afterwards
    assert_eq!(p.connection_state(), ConnectionState::Connected);
    t.deliver(data("psf.out", Sample::scalar(1.0)));
    assert_eq!(p.step(Instant::now()).rendered, 1);
    assert!(p.monitor(&a).is_some());
}

#[test]
fn closed_monitor_items_never_render() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("d4e5f6", "out").unwrap();
    t.deliver(data("psf.out", Sample::scalar(1.0)));
    p.close(&a);
    t.deliver(data("dm.out", Sample::scalar(1.0)));
    let outcome = p.step(Instant::now());
    assert_eq!(outcome.discarded, 0);
    assert_eq!(outcome.rendered, 1);
    assert!(p.monitor(&b).is_some());
}

#[test]
fn sweep_closes_vanished_targets() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("d4e5f6", "out").unwrap();
    let tgt = target(&p, &a);
    p.presenter_mut().kill(tgt);

    assert_eq!(p.sweep(), 1);
    assert!(p.monitor(&a).is_none());
    assert!(p.monitor(&b).is_some());
    assert_eq!(unsubscribes(&t, "psf.out"), 1);
    // the presenter already dropped it
    assert!(p.presenter().released.is_empty());
    assert!(!p.close(&a));
}

#[test]
fn sweep_runs_on_its_frame_period() {
    let mut config = PipelineConfig::default();
    config.sweep_every_frames = 5;
    let (mut p, _t) = setup_with(config);
    let a = p.open("a1b2c3", "out").unwrap();
    let tgt = target(&p, &a);
    p.presenter_mut().kill(tgt);
    let now = Instant::now();
    for _ in 0..4 {
        p.tick(now);
    }
    assert!(p.monitor(&a).is_some());
    p.tick(now);
    assert!(p.monitor(&a).is_none());
    assert!(!p.is_running());
}

#[test]
fn target_gone_during_render_closes() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let tgt = target(&p, &a);
    p.presenter_mut().gone_on_render.insert(tgt);
    t.deliver(data("psf.out", Sample::scalar(1.0)));
    p.step(Instant::now());
    assert!(p.monitor(&a).is_none());
    assert_eq!(unsubscribes(&t, "psf.out"), 1);
}

#[test]
fn render_failure_surfaces_as_status() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let tgt = target(&p, &a);
    p.presenter_mut().fail_on_render.insert(tgt);
    t.deliver(data("psf.out", Sample::scalar(1.0)));
    p.step(Instant::now());
    assert!(matches!(
        p.monitor(&a).unwrap().status,
        MonitorStatus::Error(_)
    ));
    assert!(matches!(
        p.presenter().statuses[&tgt],
        MonitorStatus::Error(_)
    ));
}

#[test]
fn tick_rearms_after_panic() {
    let (mut p, t) = connected();
    p.open("a1b2c3", "out").unwrap();
    p.presenter_mut().panic_on_render = true;
    t.deliver(data("psf.out", Sample::scalar(1.0)));
    let now = Instant::now();
    assert!(p.tick(now).is_none());
    assert!(p.is_running());

    p.presenter_mut().panic_on_render = false;
    t.deliver(data("psf.out", Sample::scalar(2.0)));
    let mut stepped = false;
    for _ in 0..20 {
        if p.tick(now).is_some() {
            stepped = true;
            break;
        }
    }
    assert!(stepped);
}

#[test]
fn tick_survives_a_panicking_sweep() {
    let mut config = PipelineConfig::default();
    config.sweep_every_frames = 1;
    config.health_every_frames = 1;
    let (mut p, t) = setup_with(config);
    p.connect().unwrap();
    let a = p.open("a1b2c3", "out").unwrap();
    p.presenter_mut().panic_on_lookup = true;
    let now = Instant::now();
    assert!(p.tick(now).is_none());
    assert!(p.is_running());
    assert!(p.monitor(&a).is_some());

    p.presenter_mut().panic_on_lookup = false;
    t.deliver(data("psf.out", Sample::scalar(1.0)));
    let mut rendered = 0;
    for _ in 0..20 {
        if let Some(outcome) = p.tick(now) {
            rendered += outcome.rendered;
            break;
        }
    }
    assert_eq!(rendered, 1);
}

#[test]
fn link_loss_reaches_every_monitor() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("d4e5f6", "out").unwrap();
    t.drop_link();
    assert_eq!(p.connection_state(), ConnectionState::Disconnected);
    p.step(Instant::now());
    assert_eq!(p.monitor(&a).unwrap().status, MonitorStatus::Disconnected);
    assert_eq!(p.monitor(&b).unwrap().status, MonitorStatus::Disconnected);
    assert!(!p.request_next_frame());
}

#[test]
fn reconnect_resubscribes_everything() {
    let (mut p, t) = connected();
    p.open("a1b2c3", "out").unwrap();
    p.open("d4e5f6", "out").unwrap();
    t.drop_link();
    t.take_sent();

    p.reconnect().unwrap();
    assert_eq!(p.connection_state(), ConnectionState::Connected);
    assert!(t
        .sent()
        .contains(&Outbound::NewData(vec!["dm.out".into(), "psf.out".into()])));
}

#[test]
fn refused_connect_stays_disconnected() {
    let (mut p, t) = setup();
    let a = p.open("a1b2c3", "out").unwrap();
    t.refuse_connections(Some("connection refused"));
    assert!(p.connect().is_err());
    assert_eq!(p.connection_state(), ConnectionState::Disconnected);
    p.step(Instant::now());
    assert_eq!(p.monitor(&a).unwrap().status, MonitorStatus::Disconnected);
}

#[test]
fn resubscribe_reissues_request() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    t.take_sent();
    assert!(p.resubscribe(&a));
    assert_eq!(t.take_sent(), vec![Outbound::NewData(vec!["psf.out".into()])]);
    assert_eq!(p.subscribers("psf.out"), 1);
    assert_eq!(p.monitor(&a).unwrap().status, MonitorStatus::Subscribed);
    p.close(&a);
    assert!(!p.resubscribe(&a));
}

#[test]
fn listing_remaps_unknown_types() {
    let (mut p, t) = connected();
    assert_eq!(p.resolve("cam-01", "frame"), "custom.frame");
    let mut nodes = BTreeMap::new();
    nodes.insert(
        "camera".to_string(),
        ServerNode {
            class: "Detector".into(),
            outputs: vec![],
        },
    );
    t.deliver(Inbound::Params(NodeListing { nodes }));
    let a = p.open("cam-01", "frame").unwrap();
    assert_eq!(p.monitor(&a).unwrap().server_name, "camera.frame");
}

#[test]
fn queue_health_compacts_per_monitor() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("d4e5f6", "out").unwrap();
    for i in 0..40 {
        t.deliver(data("psf.out", Sample::scalar(i as f32)));
        t.deliver(data("dm.out", Sample::scalar(i as f32)));
    }
    assert_eq!(p.queued().0, 80);
    assert_eq!(p.check_queue_health(), 78);
    assert_eq!(p.queued().0, 2);
    assert_eq!(p.stats().compacted, 78);

    p.step(Instant::now());
    let latest = Drawn::Scalar {
        latest: 39.0,
        points: 1,
    };
    assert_eq!(p.presenter().drawn_for(target(&p, &a)), vec![latest.clone()]);
    assert_eq!(p.presenter().drawn_for(target(&p, &b)), vec![latest]);
}

#[test]
fn small_queue_is_left_alone() {
    let (mut p, t) = connected();
    p.open("a1b2c3", "out").unwrap();
    for i in 0..10 {
        t.deliver(data("psf.out", Sample::scalar(i as f32)));
    }
    assert_eq!(p.check_queue_health(), 0);
    assert_eq!(p.queued().0, 10);
}

#[test]
fn speed_report_is_kept() {
    let (p, t) = connected();
    t.deliver(Inbound::SpeedReport(json!({"fps": 12.5})));
    assert_eq!(p.stats().speed_report, Some(json!({"fps": 12.5})));
}

#[test]
fn three_dimensional_payload_is_reduced() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "cube").unwrap();
    t.deliver_line(
        br#"{"event":"data_update","data":{"name":"psf.cube","data":{"type":"float32","data":[1,2,3,4,5,6,7,8,9,10,11,12],"shape":[2,2,3]}}}"#,
    );
    p.step(Instant::now());
    let tgt = target(&p, &a);
    assert_eq!(
        p.presenter().drawn_for(tgt),
        vec![Drawn::Image { rows: 2, cols: 2 }]
    );
    assert_eq!(p.presenter().infos[&tgt].sample.type_label, "float32");
}

#[test]
fn shutdown_tears_everything_down() {
    let (mut p, t) = connected();
    let a = p.open("a1b2c3", "out").unwrap();
    let b = p.open("d4e5f6", "out").unwrap();
    let (ta, tb) = (target(&p, &a), target(&p, &b));
    t.deliver(data("psf.out", Sample::scalar(1.0)));

    p.shutdown();
    assert_eq!(unsubscribes(&t, "psf.out"), 1);
    assert_eq!(unsubscribes(&t, "dm.out"), 1);
    assert_eq!(p.monitors().count(), 0);
    assert_eq!(p.queued(), (0, 0));
    assert!(!p.is_running());
    assert!(!t.is_connected());
    assert_eq!(p.connection_state(), ConnectionState::Disconnected);
    let mut released = p.presenter().released.clone();
    released.sort();
    assert_eq!(released, vec![ta, tb]);
    assert_eq!(p.presenter().statuses[&ta], MonitorStatus::Unsubscribed);
}

#[test]
fn shutdown_while_disconnected_skips_wire() {
    let (mut p, t) = setup();
    p.open("a1b2c3", "out").unwrap();
    p.shutdown();
    assert!(t.sent().is_empty());
    assert_eq!(p.monitors().count(), 0);
    assert_eq!(p.subscribers("psf.out"), 0);
}

#[test]
fn titles_use_display_names() {
    let (mut p, _t) = setup();
    let a = p.open("d4e5f6", "").unwrap();
    let tgt = target(&p, &a);
    assert_eq!(p.presenter().titles[&tgt], "dm.output");
    assert_eq!(p.monitor(&a).unwrap().server_name, "dm.output");
}
