// sim-monitor
//
// Live terminal view of simulation outputs. Each positional argument opens
// one monitor panel.
//
// Usage: sim-monitor [options] [ID=]TYPE[@NAME][:OUTPUT] ...
// Keys:  q / Esc / Ctrl-C quit, Up/Down select, r reconnect, s resubscribe,
//        n duplicate, c close, x drop panel

use chrono::{DateTime, Local};
use crossbeam::channel;
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, event, style, terminal, ExecutableCommand, QueueableCommand};
use simwatch::data::Image;
use simwatch::error::PresentError;
use simwatch::pipeline::{
    Graph, MonitorId, MonitorStatus, Pipeline, Presenter, RenderInfo, View,
};
use simwatch::transport::{ConnectionState, TcpTransport};
use simwatch_tools::{common_opts, init_logging, load_config, parse_opts, sparkline};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PLOT_WIDTH: usize = 60;

/// One monitor request from the command line.
#[derive(Debug, Clone, PartialEq)]
struct PanelSpec {
    node_id: String,
    node_type: String,
    name: String,
    output: String,
}

fn parse_panel(arg: &str, index: usize) -> Result<PanelSpec, String> {
    let (node_id, rest) = match arg.split_once('=') {
        Some((id, rest)) if !id.is_empty() => (id.to_string(), rest),
        Some(_) => return Err(format!("empty node id in '{}'", arg)),
        None => (format!("node{:02}", index), arg),
    };
    let (node, output) = match rest.split_once(':') {
        Some((node, output)) => (node, output.to_string()),
        None => (rest, String::new()),
    };
    let (node_type, name) = match node.split_once('@') {
        Some((t, n)) => (t.to_string(), n.to_string()),
        None => (node.to_string(), String::new()),
    };
    if node_type.is_empty() {
        return Err(format!("missing node type in '{}'", arg));
    }
    Ok(PanelSpec {
        node_id,
        node_type,
        name,
        output,
    })
}

#[derive(Debug, Default)]
struct Panel {
    title: String,
    status: String,
    info: String,
    lines: Vec<String>,
}

/// Presenter drawing each monitor as a block of text lines.
#[derive(Default)]
struct TextPresenter {
    next: u32,
    panels: BTreeMap<u32, Panel>,
}

impl TextPresenter {
    /// Removes a panel behind the pipeline's back, like a user closing a
    /// plot window.
    fn drop_panel(&mut self, target: u32) {
        self.panels.remove(&target);
    }
}

fn image_lines(image: &Image) -> Vec<String> {
    let (lo, hi, sum) = image.pixels.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
        |(lo, hi, sum), &v| (lo.min(v), hi.max(v), sum + v as f64),
    );
    let mean = if image.is_empty() {
        0.0
    } else {
        sum / image.len() as f64
    };
    let row_means: Vec<f32> = image
        .pixels
        .chunks(image.cols.max(1))
        .map(|row| row.iter().sum::<f32>() / row.len() as f32)
        .collect();
    vec![
        format!(
            "{}x{} min {:.4} max {:.4} mean {:.4}",
            image.rows, image.cols, lo, hi, mean
        ),
        format!("rows {}", sparkline(&row_means, PLOT_WIDTH)),
    ]
}

impl Presenter for TextPresenter {
    type Target = u32;

    fn open_target(&mut self, _id: &MonitorId, title: &str) -> Result<u32, PresentError> {
        self.next += 1;
        self.panels.insert(
            self.next,
            Panel {
                title: title.to_string(),
                ..Default::default()
            },
        );
        Ok(self.next)
    }

    fn target_exists(&self, target: &u32) -> bool {
        self.panels.contains_key(target)
    }

    fn render(&mut self, target: &u32, view: View<'_>) -> Result<(), PresentError> {
        let panel = self.panels.get_mut(target).ok_or(PresentError::TargetGone)?;
        panel.lines = match view {
            View::Scalar { latest, history } => vec![
                format!("{:>14.6}", latest),
                sparkline(history.iter(), PLOT_WIDTH),
            ],
            View::Vector(values) => vec![
                format!("{} values", values.len()),
                sparkline(values, PLOT_WIDTH),
            ],
            View::Image(image) => image_lines(image),
        };
        Ok(())
    }

    fn set_status(&mut self, target: &u32, status: &MonitorStatus) {
        if let Some(panel) = self.panels.get_mut(target) {
            panel.status = status.to_string();
        }
    }

    fn set_info(&mut self, target: &u32, info: &RenderInfo) {
        if let Some(panel) = self.panels.get_mut(target) {
            panel.info = format!(
                "{} | {} | #{}",
                info.sample,
                info.updated.format("%H:%M:%S%.3f"),
                info.updates
            );
        }
    }

    fn release_target(&mut self, target: u32) {
        self.panels.remove(&target);
    }
}

/// Outcome of the last user action, with the time it happened.
#[derive(Default)]
struct Notice(Option<(DateTime<Local>, String)>);

impl Notice {
    fn set(&mut self, text: impl Into<String>) {
        self.0 = Some((Local::now(), text.into()));
    }

    fn render(&self) -> Option<String> {
        self.0
            .as_ref()
            .map(|(at, text)| format!("[{}] {}", at.format("%H:%M:%S"), text))
    }
}

struct Tui {
    stdout: io::Stdout,
}

impl Tui {
    fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        Ok(Self { stdout })
    }

    fn teardown(&mut self) {
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        let _ = self.stdout.flush();
    }

    fn line(&mut self, text: &str) -> io::Result<()> {
        self.stdout.queue(style::Print(text))?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;
        Ok(())
    }

    fn draw(
        &mut self,
        pipeline: &Pipeline<Graph, TextPresenter>,
        selected: usize,
        notice: &Notice,
    ) -> io::Result<()> {
        self.stdout.queue(cursor::MoveTo(0, 0))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::All))?;

        let state = pipeline.connection_state();
        let color = match state {
            ConnectionState::Connected => Color::Green,
            ConnectionState::Connecting => Color::Yellow,
            ConnectionState::Disconnected => Color::Red,
        };
        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.stdout.queue(style::Print(format!(
            "sim-monitor  {}  ",
            pipeline.config().server_url
        )))?;
        self.stdout.queue(SetForegroundColor(color))?;
        self.stdout.queue(style::Print(format!("{:?}", state)))?;
        self.stdout.queue(ResetColor)?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(cursor::MoveToNextLine(2))?;

        let presenter = pipeline.presenter();
        for (i, monitor) in pipeline.monitors().enumerate() {
            let Some(panel) = presenter.panels.get(monitor.target()) else {
                continue;
            };
            let marker = if i == selected { '>' } else { ' ' };
            self.stdout.queue(SetAttribute(Attribute::Bold))?;
            self.line(&format!(
                "{} {}  [{}]  -> {}",
                marker, panel.title, panel.status, monitor.server_name
            ))?;
            self.stdout.queue(SetAttribute(Attribute::Reset))?;
            for l in &panel.lines {
                self.line(&format!("    {}", l))?;
            }
            self.stdout.queue(SetForegroundColor(Color::DarkGrey))?;
            self.line(&format!("    {}", panel.info))?;
            self.stdout.queue(ResetColor)?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }
        if pipeline.monitors().next().is_none() {
            self.line("no monitors open")?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }

        let stats = pipeline.stats();
        let (data, status) = pipeline.queued();
        self.stdout.queue(SetForegroundColor(Color::DarkGrey))?;
        self.line(&format!(
            "frame {}  loop {}  queued {}/{}  renders {}  skipped {}  requests {}",
            pipeline.frame(),
            if pipeline.is_running() { "on" } else { "off" },
            data,
            status,
            stats.renders,
            stats.skipped,
            stats.frame_requests,
        ))?;
        self.line(&format!(
            "evicted {}/{}  compacted {}  stale {}  malformed {}  unrouted {}  emit errors {}",
            stats.data_evicted,
            stats.status_evicted,
            stats.compacted,
            stats.stale,
            stats.malformed,
            stats.unrouted,
            stats.emit_failures,
        ))?;
        if let Some(report) = &stats.speed_report {
            self.line(&format!("speed {}", report))?;
        }
        self.stdout.queue(ResetColor)?;
        if let Some(text) = notice.render() {
            self.line(&text)?;
        }
        self.line("q quit  r reconnect  s resubscribe  n duplicate  c close  x drop panel")?;
        self.stdout.flush()
    }
}

fn selected_id(pipeline: &Pipeline<Graph, TextPresenter>, selected: usize) -> Option<MonitorId> {
    pipeline.monitors().nth(selected).map(|m| m.id.clone())
}

fn main() -> ExitCode {
    let mut opts = common_opts();
    opts.optopt("u", "url", "server url (default from config)", "url");
    opts.optopt("", "fps", "host frame rate (default 30)", "n");

    let args: Vec<String> = std::env::args().collect();

    macro_rules! die{
        ($f:expr,$($a:tt)*)=>{
        {
            die!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            eprintln!("ERROR: {}", $msg);
            return ExitCode::FAILURE;
        }
        };
    }

    let usage = format!(
        "Usage: {} [options] [ID=]TYPE[@NAME][:OUTPUT] ...",
        args.first().map(String::as_str).unwrap_or("sim-monitor")
    );
    let matches = match parse_opts(&opts, &args) {
        Ok(m) => m,
        Err(e) => die!("{}\n{}", e, opts.usage(&usage)),
    };
    if matches.opt_present("h") {
        println!("{}", opts.usage(&usage));
        return ExitCode::SUCCESS;
    }

    let mut config = match load_config(&matches) {
        Ok(c) => c,
        Err(e) => die!(e),
    };
    if let Some(url) = matches.opt_str("u") {
        config.server_url = url;
    }
    let fps: u32 = match matches.opt_str("fps").as_deref().unwrap_or("30").parse() {
        Ok(n) if n > 0 => n,
        _ => die!("invalid frame rate"),
    };

    let mut panels = Vec::new();
    for (i, arg) in matches.free.iter().enumerate() {
        match parse_panel(arg, i) {
            Ok(p) => panels.push(p),
            Err(e) => die!("{}\n{}", e, opts.usage(&usage)),
        }
    }

    if let Err(e) = init_logging(&matches, false) {
        die!(e);
    }

    let mut graph = Graph::new();
    for p in &panels {
        graph.insert(&p.node_id, &p.node_type, &p.name);
    }

    let mut pipeline = match Pipeline::new(
        config,
        graph,
        TextPresenter::default(),
        TcpTransport::new(),
    ) {
        Ok(p) => p,
        Err(e) => die!("invalid configuration: {}", e),
    };

    for p in &panels {
        if let Err(e) = pipeline.open(&p.node_id, &p.output) {
            die!("cannot open monitor for {}: {}", p.node_id, e);
        }
    }
    let mut notice = Notice::default();
    if let Err(e) = pipeline.connect() {
        notice.set(format!("connection failed: {}", e));
    }

    let mut tui = match Tui::setup() {
        Ok(t) => t,
        Err(e) => die!("TUI setup failed: {}", e),
    };
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let mut t = Tui {
            stdout: io::stdout(),
        };
        t.teardown();
        original_hook(panic_info);
    }));

    let (key_tx, key_rx) = channel::unbounded();
    let spawned = std::thread::Builder::new()
        .name("keys".to_string())
        .spawn(move || loop {
            if let Ok(ev) = event::read() {
                if key_tx.send(ev).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tui.teardown();
        die!("cannot start key reader: {}", e);
    }

    let frame = channel::tick(Duration::from_secs(1) / fps);
    let supervisor = channel::tick(Duration::from_secs(1));
    let mut selected = 0usize;

    'main: loop {
        crossbeam::select! {
            recv(key_rx) -> ev => {
                let Ok(event::Event::Key(k)) = ev else { continue };
                if k.kind != event::KeyEventKind::Press {
                    continue;
                }
                use event::{KeyCode, KeyModifiers};
                let quit = k.code == KeyCode::Char('q')
                         || k.code == KeyCode::Esc
                         || (k.code == KeyCode::Char('c') && k.modifiers == KeyModifiers::CONTROL);
                if quit { break 'main; }

                let count = pipeline.monitors().count();
                match k.code {
                    KeyCode::Up => selected = selected.saturating_sub(1),
                    KeyCode::Down => selected = (selected + 1).min(count.saturating_sub(1)),
                    KeyCode::Char('r') => {
                        notice.set(match pipeline.reconnect() {
                            Ok(()) => "reconnecting".to_string(),
                            Err(e) => format!("reconnect failed: {}", e),
                        });
                    }
                    KeyCode::Char('s') => {
                        if let Some(id) = selected_id(&pipeline, selected) {
                            pipeline.resubscribe(&id);
                            notice.set(format!("resubscribed {}", id));
                        }
                    }
                    KeyCode::Char('n') => {
                        let dup = pipeline
                            .monitors()
                            .nth(selected)
                            .map(|m| (m.node_id.clone(), m.output.clone()));
                        if let Some((node, output)) = dup {
                            notice.set(match pipeline.open(&node, &output) {
                                Ok(id) => format!("opened {}", id),
                                Err(e) => format!("open failed: {}", e),
                            });
                        }
                    }
                    KeyCode::Char('c') => {
                        if let Some(id) = selected_id(&pipeline, selected) {
                            pipeline.close(&id);
                            notice.set(format!("closed {}", id));
                        }
                    }
                    KeyCode::Char('x') => {
                        let target = pipeline.monitors().nth(selected).map(|m| *m.target());
                        if let Some(target) = target {
                            pipeline.presenter_mut().drop_panel(target);
                            notice.set("panel dropped");
                        }
                    }
                    _ => {}
                }
                selected = selected.min(pipeline.monitors().count().saturating_sub(1));
            }

            recv(frame) -> _ => {
                pipeline.tick(Instant::now());
                if let Err(e) = tui.draw(&pipeline, selected, &notice) {
                    warn!("draw failed: {}", e);
                }
            }

            recv(supervisor) -> _ => {
                if pipeline.supervise() {
                    notice.set("consumer loop restarted");
                }
            }
        }
    }

    tui.teardown();
    pipeline.shutdown();
    info!("exiting");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_arguments() {
        assert_eq!(
            parse_panel("PSF", 3).unwrap(),
            PanelSpec {
                node_id: "node03".into(),
                node_type: "PSF".into(),
                name: String::new(),
                output: String::new(),
            }
        );
        let p = parse_panel("a1=DM@dm:out_shape", 0).unwrap();
        assert_eq!(p.node_id, "a1");
        assert_eq!(p.node_type, "DM");
        assert_eq!(p.name, "dm");
        assert_eq!(p.output, "out_shape");
        assert!(parse_panel("=PSF", 0).is_err());
        assert!(parse_panel(":out", 0).is_err());
    }

    #[test]
    fn dropped_panel_is_gone() {
        let mut p = TextPresenter::default();
        let id = MonitorId::new("n", "output", 0);
        let t = p.open_target(&id, "n.output").unwrap();
        assert!(p.target_exists(&t));
        p.drop_panel(t);
        assert!(!p.target_exists(&t));
        assert!(matches!(
            p.render(&t, View::Vector(&[1.0])),
            Err(PresentError::TargetGone)
        ));
    }

    #[test]
    fn notice_is_timestamped() {
        let mut n = Notice::default();
        assert!(n.render().is_none());
        n.set("closed x");
        let text = n.render().unwrap();
        assert!(text.starts_with('['));
        assert!(text.ends_with("] closed x"));
    }
}
