//! sim-server
//!
//! Scripted stand-in for a simulation server. Speaks the JSON-lines event
//! protocol over TCP and answers every frame request with synthetic data,
//! so the monitor can be exercised without a running simulation.

use getopts::Options;
use serde::Deserialize;
use serde_json::{json, Value};
use simwatch::config::default_type_names;
use simwatch::wire::{Envelope, Outbound};
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shape of the synthetic data produced for one output.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Waveform {
    Scalar,
    Vector { len: usize },
    Image { rows: usize, cols: usize },
    /// Multi-channel image, channels last.
    Channels { rows: usize, cols: usize, channels: usize },
}

#[derive(Debug, Clone, Deserialize)]
struct ScenarioNode {
    class: String,
    outputs: BTreeMap<String, Waveform>,
}

/// Server-side node table, keyed by server node name.
#[derive(Debug, Clone, Deserialize)]
struct Scenario {
    nodes: BTreeMap<String, ScenarioNode>,
    /// Frames between two speed reports.
    #[serde(default = "default_report_every")]
    report_every: u64,
}

fn default_report_every() -> u64 {
    50
}

impl Default for Scenario {
    fn default() -> Self {
        let waveform = |class: &str| match class {
            "PSF" | "CCD" => Waveform::Image { rows: 32, cols: 32 },
            "AtmoPropagation" | "AtmoEvolution" => Waveform::Channels {
                rows: 16,
                cols: 16,
                channels: 3,
            },
            "Modalrec" | "Integrator" | "DM" => Waveform::Vector { len: 64 },
            _ => Waveform::Scalar,
        };
        let nodes = default_type_names()
            .into_iter()
            .map(|(class, name)| {
                let outputs = [("out".to_string(), waveform(&class))].into();
                (name, ScenarioNode { class, outputs })
            })
            .collect();
        Scenario {
            nodes,
            report_every: default_report_every(),
        }
    }
}

impl Scenario {
    fn params(&self) -> Value {
        self.nodes
            .iter()
            .map(|(name, node)| {
                let outputs: Vec<&String> = node.outputs.keys().collect();
                (
                    name.clone(),
                    json!({ "class": node.class, "outputs": outputs }),
                )
            })
            .collect::<serde_json::Map<_, _>>()
            .into()
    }

    fn waveform(&self, output: &str) -> Option<Waveform> {
        let (node, port) = output.split_once('.')?;
        self.nodes.get(node)?.outputs.get(port).copied()
    }
}

fn wave(i: usize, n: usize, t: f64) -> f64 {
    (2.0 * std::f64::consts::PI * (i as f64 / n.max(1) as f64) + t).sin()
}

/// Builds the `data_update` payload for one output at time `t`.
fn synthesize(name: &str, waveform: Waveform, t: f64) -> Value {
    match waveform {
        Waveform::Scalar => json!({ "name": name, "data": t.sin() }),
        Waveform::Vector { len } => {
            let v: Vec<f64> = (0..len).map(|i| wave(i, len, t)).collect();
            json!({ "name": name, "data": { "type": "vector", "data": v } })
        }
        Waveform::Image { rows, cols } => {
            let img: Vec<Vec<f64>> = (0..rows)
                .map(|r| {
                    (0..cols)
                        .map(|c| wave(r, rows, t) * wave(c, cols, t * 0.5))
                        .collect()
                })
                .collect();
            json!({ "name": name, "data": { "type": "image", "data": img } })
        }
        Waveform::Channels {
            rows,
            cols,
            channels,
        } => {
            let flat: Vec<f64> = (0..rows * cols * channels)
                .map(|i| wave(i / channels % cols, cols, t + (i % channels) as f64))
                .collect();
            json!({ "name": name, "data": flat, "shape": [rows, cols, channels] })
        }
    }
}

fn send(stream: &mut TcpStream, event: &str, data: Value) -> io::Result<()> {
    let line = Envelope::new(event, data).to_line().map_err(io::Error::other)?;
    stream.write_all(&line)
}

struct Session {
    peer: SocketAddr,
    scenario: Scenario,
    frame_delay: Duration,
    started: Instant,
    frames: u64,
}

impl Session {
    fn handle(&mut self, stream: &mut TcpStream, msg: Outbound) -> io::Result<()> {
        match msg {
            Outbound::GetParams => send(stream, "params", self.scenario.params()),
            Outbound::NewData(names) => self.frame(stream, &names),
            Outbound::Unsubscribe { output } => {
                info!(peer = %self.peer, output = %output, "client unsubscribed");
                Ok(())
            }
            Outbound::TestConnection { client } => {
                info!(peer = %self.peer, client = %client, "connection test");
                Ok(())
            }
        }
    }

    fn frame(&mut self, stream: &mut TcpStream, names: &[String]) -> io::Result<()> {
        thread::sleep(self.frame_delay);
        self.frames += 1;
        let t = self.started.elapsed().as_secs_f64();
        for name in names {
            match self.scenario.waveform(name) {
                Some(w) => send(stream, "data_update", synthesize(name, w, t))?,
                None => debug!(peer = %self.peer, name = %name, "unknown output requested"),
            }
        }
        send(stream, "done", json!({ "frame": self.frames }))?;
        if self.scenario.report_every > 0 && self.frames % self.scenario.report_every == 0 {
            let fps = self.frames as f64 / t.max(f64::EPSILON);
            send(
                stream,
                "speed_report",
                json!({ "frames": self.frames, "fps": fps }),
            )?;
        }
        Ok(())
    }
}

fn serve_client(mut stream: TcpStream, scenario: Scenario, frame_delay: Duration) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    info!(%peer, "client connected");
    let reader = BufReader::new(stream.try_clone()?);
    let mut session = Session {
        peer,
        scenario,
        frame_delay,
        started: Instant::now(),
        frames: 0,
    };
    for line in reader.split(b'\n') {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let msg = Envelope::from_line(&line)
            .and_then(|env| Outbound::decode(&env.event, env.data));
        match msg {
            Ok(msg) => session.handle(&mut stream, msg)?,
            Err(e) => warn!(%peer, "bad client message: {}", e),
        }
    }
    info!(%peer, frames = session.frames, "client disconnected");
    Ok(())
}

fn create_listener_thread(
    addr: SocketAddr,
    client_send: crossbeam::channel::Sender<TcpStream>,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    thread::Builder::new()
        .name("listener".to_string())
        .spawn(move || {
            for res in listener.incoming() {
                match res {
                    Ok(stream) => {
                        if client_send.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("error accepting client: {}", err),
                }
            }
        })?;
    Ok(())
}

fn main() -> ExitCode {
    let mut opts = Options::new();
    opts.optopt("p", "", "TCP port to listen on (default 5000)", "port");
    opts.optopt("s", "", "scenario file (YAML)", "file");
    opts.optopt("d", "", "delay before each frame in ms (default 20)", "ms");
    opts.optflag("v", "", "debug logging");

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
    macro_rules! die_usage{
        ($f:expr,$($a:tt)*)=>{
        {
            die_usage!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            let usage = format!("Usage: {} [-p port] [-s scenario.yaml] [-d ms] [-v]", &args[0]);
            die!("{}\n{}", $msg, opts.usage(&usage));
        }
        };
    }

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => die_usage!("{}", f.to_string()),
    };

    let level = if matches.opt_present("v") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    let port = matches.opt_str("p").unwrap_or("5000".to_string());
    let port = match port.parse::<u16>() {
        Ok(p) => p,
        Err(_) => die_usage!("Invalid port '{}'", port),
    };
    let delay = matches.opt_str("d").unwrap_or("20".to_string());
    let frame_delay = match delay.parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => die_usage!("Invalid frame delay '{}'", delay),
    };
    let scenario = match matches.opt_str("s") {
        Some(path) => {
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => die!("cannot read '{}': {}", path, e),
            };
            match serde_yaml::from_str::<Scenario>(&text) {
                Ok(s) => s,
                Err(e) => die!("invalid scenario '{}': {}", path, e),
            }
        }
        None => Scenario::default(),
    };

    let (client_send, new_client) = crossbeam::channel::bounded::<TcpStream>(10);
    let addr = SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), port);
    if let Err(e) = create_listener_thread(addr, client_send) {
        die!("cannot listen on {}: {}", addr, e);
    }
    info!(%addr, nodes = scenario.nodes.len(), "serving");

    for stream in new_client.iter() {
        let scenario = scenario.clone();
        let spawned = thread::Builder::new()
            .name("client".to_string())
            .spawn(move || {
                if let Err(e) = serve_client(stream, scenario, frame_delay) {
                    debug!("client session ended: {}", e);
                }
            });
        if let Err(e) = spawned {
            warn!("cannot start client thread: {}", e);
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use simwatch::data::{classify, Shaped};
    use simwatch::wire::{decode_line, Inbound};

    fn decoded(payload: Value) -> Inbound {
        let line = Envelope::new("data_update", payload).to_line().unwrap();
        decode_line(&line).unwrap()
    }

    #[test]
    fn default_scenario_lists_type_table() {
        let s = Scenario::default();
        let params = s.params();
        assert_eq!(params["psf"]["class"], "PSF");
        assert_eq!(params["dm"]["outputs"][0], "out");
        assert_eq!(
            s.waveform("psf.out"),
            Some(Waveform::Image { rows: 32, cols: 32 })
        );
        assert_eq!(s.waveform("psf.nope"), None);
        assert_eq!(s.waveform("psf"), None);
    }

    #[test]
    fn synthetic_payloads_decode() {
        let Inbound::DataUpdate(u) = decoded(synthesize("a.out", Waveform::Scalar, 1.0)) else {
            panic!("not a data update");
        };
        assert!(matches!(classify(&u.sample), Shaped::Scalar(_)));

        let Inbound::DataUpdate(u) =
            decoded(synthesize("a.out", Waveform::Vector { len: 8 }, 0.0))
        else {
            panic!("not a data update");
        };
        assert!(matches!(classify(&u.sample), Shaped::Vector(v) if v.len() == 8));

        let rgb = Waveform::Channels {
            rows: 3,
            cols: 4,
            channels: 3,
        };
        let Inbound::DataUpdate(u) = decoded(synthesize("a.out", rgb, 0.0)) else {
            panic!("not a data update");
        };
        assert_eq!(u.sample.shape, vec![3, 4, 3]);
        assert!(matches!(classify(&u.sample), Shaped::Image(img) if img.len() == 12));
    }

    #[test]
    fn scenario_from_yaml() {
        let s: Scenario = serde_yaml::from_str(
            "nodes:\n  psf:\n    class: PSF\n    outputs:\n      out: !image {rows: 4, cols: 4}\n      sr: scalar\n",
        )
        .unwrap();
        assert_eq!(s.report_every, 50);
        assert_eq!(s.waveform("psf.sr"), Some(Waveform::Scalar));
    }
}
