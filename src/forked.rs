//! Displays rendered by a separate process.
//!
//! The parent keeps a [`ForkedSpsDisplay`] handle and only sends lifecycle
//! and query commands, one per line, on the child's stdin. The child (this
//! binary's `render` subcommand, see [`run_renderer`]) owns a
//! [`LocalSpsDisplay`] and its own refresh loop, and answers on stdout.

use crate::{
    Backend, CancelToken, Colormap, DisplayError, LiveDisplay, LocalSpsDisplay, ManagedChild,
    Norm, Rates, RefreshScheduler, SchedulerExit, SchedulerHook, SharedArrayHandle, SurfaceKind,
    TestImage, Ticker,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::{
    cell::RefCell,
    fmt,
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    process::{ChildStdin, Command as Process, Stdio},
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Parent → child.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Command {
    Stop,
    Rates,
    Test(TestImage),
    GetNorm,
    SetNorm(Norm),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["stop"] => Some(Self::Stop),
            ["rates"] => Some(Self::Rates),
            ["test", "on"] => Some(Self::Test(TestImage::Pattern)),
            ["test", "off"] => Some(Self::Test(TestImage::Off)),
            ["norm"] => Some(Self::GetNorm),
            ["norm", min, max, auto] => Some(Self::SetNorm(parse_norm(min, max, auto)?)),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Rates => write!(f, "rates"),
            Self::Test(TestImage::Pattern) => write!(f, "test on"),
            Self::Test(TestImage::Off) => write!(f, "test off"),
            Self::GetNorm => write!(f, "norm"),
            Self::SetNorm(n) => write!(f, "norm {} {} {}", n.min, n.max, n.auto_range as u8),
        }
    }
}

/// Child → parent.
#[derive(Clone, PartialEq, Debug)]
pub enum Reply {
    Ready,
    Error(String),
    Rates(Rates),
    Norm(Norm),
    Ok,
    Closed,
}

impl Reply {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if let Some(msg) = line.strip_prefix("error ") {
            return Some(Self::Error(msg.to_string()));
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["ready"] => Some(Self::Ready),
            ["ok"] => Some(Self::Ok),
            ["closed"] => Some(Self::Closed),
            ["rates", update, refresh] => Some(Self::Rates(Rates {
                update: update.parse().ok()?,
                refresh: refresh.parse().ok()?,
            })),
            ["norm", min, max, auto] => Some(Self::Norm(parse_norm(min, max, auto)?)),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Error(msg) => write!(f, "error {}", msg.replace('\n', " ")),
            Self::Rates(r) => write!(f, "rates {:.1} {:.1}", r.update, r.refresh),
            Self::Norm(n) => write!(f, "norm {} {} {}", n.min, n.max, n.auto_range as u8),
            Self::Ok => write!(f, "ok"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

fn parse_norm(min: &str, max: &str, auto: &str) -> Option<Norm> {
    Some(Norm {
        min: min.parse().ok()?,
        max: max.parse().ok()?,
        auto_range: match auto {
            "0" => false,
            "1" => true,
            _ => return None,
        },
    })
}

/// Everything the child needs to open its display.
#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub program: PathBuf,
    pub config: Option<PathBuf>,
    pub spec: SharedArrayHandle,
    pub caption: String,
    pub refresh: Duration,
    pub surface: SurfaceKind,
    pub colormap: Colormap,
    pub reattach: Option<Duration>,
}

impl RendererOptions {
    /// Command line for the `render` subcommand.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        let colormap = match self.colormap {
            Colormap::Grayscale => "grayscale",
            Colormap::Temperature => "temperature",
        };
        args.extend([
            "render".to_string(),
            "--spec".to_string(),
            self.spec.namespace.clone(),
            "--array".to_string(),
            self.spec.name.clone(),
            "--caption".to_string(),
            self.caption.clone(),
            "--refresh-ms".to_string(),
            self.refresh.as_millis().to_string(),
            "--surface".to_string(),
            self.surface.as_str().to_string(),
            "--colormap".to_string(),
            colormap.to_string(),
            "--reattach-ms".to_string(),
            self.reattach.map_or(0, |d| d.as_millis()).to_string(),
        ]);
        args
    }
}

/// Parent-side handle of a display rendered in a child process.
pub struct ForkedSpsDisplay {
    caption: String,
    stdin: Option<ChildStdin>,
    replies: Receiver<Reply>,
    child: ManagedChild,
    closed: bool,
    rates: Rates,
    norm: Norm,
    test_image: TestImage,
}

impl ForkedSpsDisplay {
    /// Start the renderer and wait until its window exists.
    pub fn spawn(opts: &RendererOptions) -> Result<Self, DisplayError> {
        let mut cmd = Process::new(&opts.program);
        cmd.args(opts.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = ManagedChild::spawn(&format!("renderer {:?}", opts.caption), &mut cmd)?;
        let stdout = child
            .child_mut()
            .stdout
            .take()
            .ok_or_else(|| DisplayError::Renderer("renderer stdout not captured".to_string()))?;
        let stdin = child.child_mut().stdin.take();

        let (tx, rx) = unbounded();
        thread::spawn(move || forward_replies(BufReader::new(stdout), tx));

        match rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Reply::Ready) => {}
            Ok(Reply::Error(msg)) => return Err(DisplayError::WindowCreation(msg)),
            Ok(other) => {
                return Err(DisplayError::Renderer(format!(
                    "unexpected startup reply {other:?}"
                )))
            }
            Err(_) => {
                return Err(DisplayError::Renderer(
                    "renderer did not come up".to_string(),
                ))
            }
        }
        info!("forked display {:?} on {} ready", opts.caption, opts.spec);

        Ok(Self {
            caption: opts.caption.clone(),
            stdin,
            replies: rx,
            child,
            closed: false,
            rates: Rates::default(),
            norm: Norm::default(),
            test_image: TestImage::Off,
        })
    }

    fn send(&mut self, cmd: Command) -> Result<(), DisplayError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DisplayError::Renderer("renderer input closed".to_string()))?;
        writeln!(stdin, "{cmd}")?;
        stdin.flush()?;
        Ok(())
    }

    fn request(&mut self, cmd: Command) -> Result<Reply, DisplayError> {
        if self.is_closed() {
            return Err(DisplayError::Renderer("renderer closed".to_string()));
        }
        self.send(cmd)?;
        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(left) {
                Ok(Reply::Closed) => self.closed = true,
                Ok(Reply::Error(msg)) => return Err(DisplayError::Renderer(msg)),
                Ok(reply) => return Ok(reply),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DisplayError::Renderer(format!("no reply to {cmd:?}")))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.closed = true;
                    return Err(DisplayError::Renderer("renderer exited".to_string()));
                }
            }
        }
    }

    fn drain(&mut self) {
        while let Ok(reply) = self.replies.try_recv() {
            match reply {
                Reply::Closed => self.closed = true,
                other => debug!("{}: stray reply {other:?}", self.caption),
            }
        }
    }

    /// Ask the child to stop and wait for it.
    pub fn close_window(&mut self) {
        if self.stdin.is_some() && !self.child.has_exited() {
            if let Err(e) = self.send(Command::Stop) {
                debug!("{}: stop not delivered: {e}", self.caption);
            }
        }
        self.stdin = None;
        self.child.finish(STOP_GRACE);
        self.closed = true;
    }
}

impl LiveDisplay for ForkedSpsDisplay {
    fn caption(&self) -> &str {
        &self.caption
    }

    /// The child refreshes itself.
    fn refresh(&mut self) -> Result<(), DisplayError> {
        self.drain();
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        self.drain();
        if !self.closed && self.child.has_exited() {
            self.closed = true;
        }
        self.closed
    }

    fn rates(&mut self) -> Rates {
        match self.request(Command::Rates) {
            Ok(Reply::Rates(rates)) => self.rates = rates,
            Ok(other) => warn!("{}: unexpected reply {other:?}", self.caption),
            Err(e) => debug!("{}: rates unavailable: {e}", self.caption),
        }
        self.rates
    }

    fn set_test_image(&mut self, mode: TestImage) -> Result<(), DisplayError> {
        self.request(Command::Test(mode))?;
        self.test_image = mode;
        Ok(())
    }

    fn test_image(&self) -> TestImage {
        self.test_image
    }

    fn norm(&mut self) -> Norm {
        match self.request(Command::GetNorm) {
            Ok(Reply::Norm(norm)) => self.norm = norm,
            Ok(other) => warn!("{}: unexpected reply {other:?}", self.caption),
            Err(e) => debug!("{}: norm unavailable: {e}", self.caption),
        }
        self.norm
    }

    fn set_norm(&mut self, norm: Norm) -> Result<(), DisplayError> {
        self.request(Command::SetNorm(norm))?;
        self.norm = norm;
        Ok(())
    }
}

impl Drop for ForkedSpsDisplay {
    fn drop(&mut self) {
        self.close_window();
    }
}

fn forward_replies(reader: impl BufRead, tx: Sender<Reply>) {
    for line in reader.lines() {
        let Ok(line) = line else {
            break;
        };
        match Reply::parse(&line) {
            Some(reply) => {
                if tx.send(reply).is_err() {
                    break;
                }
            }
            None => debug!("ignoring renderer output {line:?}"),
        }
    }
}

fn forward_commands(reader: impl BufRead, tx: Sender<Command>) {
    for line in reader.lines() {
        let Ok(line) = line else {
            break;
        };
        match Command::parse(&line) {
            Some(cmd) => {
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            None => warn!("unknown renderer command {line:?}"),
        }
    }
    // parent went away
    let _ = tx.send(Command::Stop);
}

/// What the child renders.
#[derive(Clone, Debug)]
pub struct RenderSpec {
    pub spec: SharedArrayHandle,
    pub caption: String,
    pub colormap: Colormap,
    pub reattach: Option<Duration>,
}

struct ControlHook<W: Write> {
    commands: Receiver<Command>,
    out: Rc<RefCell<W>>,
    cancel: CancelToken,
}

impl<W: Write> ControlHook<W> {
    fn answer(&self, reply: Reply) {
        let mut out = self.out.borrow_mut();
        if writeln!(out, "{reply}").and_then(|_| out.flush()).is_err() {
            // nobody is listening any more
            self.cancel.cancel();
        }
    }
}

impl<W: Write> SchedulerHook for ControlHook<W> {
    fn after_tick(&mut self, displays: &mut [Box<dyn LiveDisplay>]) {
        while let Ok(cmd) = self.commands.try_recv() {
            debug!("renderer command {cmd}");
            let display = match (cmd, displays.first_mut()) {
                (Command::Stop, _) => {
                    self.cancel.cancel();
                    return;
                }
                (_, Some(display)) => display,
                (_, None) => {
                    self.answer(Reply::Error("window closed".to_string()));
                    continue;
                }
            };
            let reply = match cmd {
                Command::Rates => Reply::Rates(display.rates()),
                Command::GetNorm => Reply::Norm(display.norm()),
                Command::Test(mode) => display
                    .set_test_image(mode)
                    .map_or_else(|e| Reply::Error(e.to_string()), |()| Reply::Ok),
                Command::SetNorm(norm) => display
                    .set_norm(norm)
                    .map_or_else(|e| Reply::Error(e.to_string()), |()| Reply::Ok),
                Command::Stop => Reply::Ok,
            };
            self.answer(reply);
        }
    }
}

/// Child side: open the window, report `ready` (or `error`), then run the
/// refresh loop until told to stop or the window closes.
pub fn run_renderer<T, R, W>(
    backend: &mut dyn Backend,
    spec: &RenderSpec,
    ticker: T,
    cancel: CancelToken,
    input: R,
    output: W,
) -> Result<SchedulerExit, DisplayError>
where
    T: Ticker,
    R: BufRead + Send + 'static,
    W: Write + 'static,
{
    let out = Rc::new(RefCell::new(output));
    let say = |reply: Reply| -> Result<(), DisplayError> {
        let mut out = out.borrow_mut();
        writeln!(out, "{reply}")?;
        out.flush()?;
        Ok(())
    };

    let mut display = match LocalSpsDisplay::create_window(backend, &spec.caption) {
        Ok(display) => display.with_reattach(spec.reattach),
        Err(e) => {
            say(Reply::Error(e.to_string()))?;
            return Err(e);
        }
    };
    display.sink().set_colormap(spec.colormap);
    match display.set_spec_array(&spec.spec.namespace, &spec.spec.name) {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => warn!("{}: {e}; waiting for producer", spec.caption),
        Err(e) => {
            say(Reply::Error(e.to_string()))?;
            return Err(e);
        }
    }
    say(Reply::Ready)?;

    let (tx, rx) = unbounded();
    thread::spawn(move || forward_commands(input, tx));

    let mut scheduler = RefreshScheduler::new(ticker, cancel.clone());
    scheduler.register(Box::new(display));
    scheduler.add_hook(Box::new(ControlHook {
        commands: rx,
        out: Rc::clone(&out),
        cancel,
    }));
    let exit = scheduler.run();
    scheduler.close_all();
    if exit == SchedulerExit::AllClosed {
        say(Reply::Closed)?;
    }
    info!("renderer {:?} finished: {exit:?}", spec.caption);
    Ok(exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::tests::unique_handle;
    use crate::surface::HeadlessSurface;
    use crate::{
        Depth, HeadlessBackend, HeadlessProbe, ManualTicker, SharedArrayWriter, Surface,
    };
    use std::{
        fs,
        io::Cursor,
        os::unix::{fs::PermissionsExt, net::UnixStream},
    };

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.borrow().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn render_spec(handle: SharedArrayHandle) -> RenderSpec {
        RenderSpec {
            spec: handle,
            caption: "child".to_string(),
            colormap: Colormap::Grayscale,
            reattach: None,
        }
    }

    #[test]
    fn commands_and_replies_parse() {
        for line in ["stop", "rates", "test on", "test off", "norm", "norm 3 900 0"] {
            let cmd = Command::parse(line).unwrap();
            assert_eq!(cmd.to_string(), line);
        }
        assert_eq!(Command::parse("norm 1 2 maybe"), None);
        assert_eq!(Command::parse("launch"), None);

        assert_eq!(
            Reply::parse("rates 9.5 10.0"),
            Some(Reply::Rates(Rates {
                update: 9.5,
                refresh: 10.0
            }))
        );
        assert_eq!(
            Reply::parse("error cannot create window: no tty"),
            Some(Reply::Error("cannot create window: no tty".to_string()))
        );
        assert_eq!(Reply::parse("closed"), Some(Reply::Closed));
        assert_eq!(Reply::parse("garbage here"), None);
    }

    #[test]
    fn renderer_options_build_render_command() {
        let opts = RendererOptions {
            program: PathBuf::from("/usr/bin/live_view"),
            config: Some(PathBuf::from("view.toml")),
            spec: SharedArrayHandle::new("GLDisplayTest", "Simulator").unwrap(),
            caption: "Forked GLDisplayTest@Simulator".to_string(),
            refresh: Duration::from_millis(10),
            surface: SurfaceKind::Headless,
            colormap: Colormap::Temperature,
            reattach: None,
        };
        let args = opts.args();
        assert_eq!(&args[..3], ["--config", "view.toml", "render"]);
        let pos = args.iter().position(|a| a == "--reattach-ms").unwrap();
        assert_eq!(args[pos + 1], "0");
        let pos = args.iter().position(|a| a == "--surface").unwrap();
        assert_eq!(args[pos + 1], "headless");
    }

    #[test]
    fn renderer_answers_then_stops() {
        let handle = unique_handle("child");
        let mut writer = SharedArrayWriter::create(handle.clone(), 2, 2, Depth::U8).unwrap();
        writer.write_frame(&[0, 1, 2, 3]).unwrap();

        let mut backend = HeadlessBackend::new();
        let out = SharedBuf::default();
        let input = Cursor::new(b"rates\ntest on\nnorm 0 10 0\nnorm\nstop\n".to_vec());
        let exit = run_renderer(
            &mut backend,
            &render_spec(handle),
            ManualTicker::new(),
            CancelToken::new(),
            input,
            out.clone(),
        )
        .unwrap();

        assert_eq!(exit, SchedulerExit::Cancelled);
        let lines = out.lines();
        assert_eq!(lines[0], "ready");
        assert!(lines[1].starts_with("rates "));
        assert_eq!(&lines[2..], ["ok", "ok", "norm 0 10 0"]);
        assert!(backend.probes[0].presents() >= 1);
    }

    /// Hands out one prepared surface.
    struct OneShot(Option<HeadlessSurface>);

    impl Backend for OneShot {
        fn create_window(&mut self, _: &str) -> Result<Box<dyn Surface>, DisplayError> {
            match self.0.take() {
                Some(surface) => Ok(Box::new(surface)),
                None => Err(DisplayError::WindowCreation("used".to_string())),
            }
        }
    }

    /// Closes the window on the first wait.
    struct CloseOnWait(HeadlessProbe);

    impl Ticker for CloseOnWait {
        fn wait(&mut self) {
            self.0.close();
        }
    }

    #[test]
    fn renderer_reports_closed_window() {
        let (surface, probe) = HeadlessSurface::new("child");
        let mut backend = OneShot(Some(surface));
        let out = SharedBuf::default();
        // parent end stays open, so no stop arrives
        let (parent, child) = UnixStream::pair().unwrap();
        let exit = run_renderer(
            &mut backend,
            &render_spec(unique_handle("closing")),
            CloseOnWait(probe),
            CancelToken::new(),
            BufReader::new(child),
            out.clone(),
        )
        .unwrap();
        drop(parent);

        assert_eq!(exit, SchedulerExit::AllClosed);
        assert_eq!(out.lines(), ["ready", "closed"]);
    }

    #[test]
    fn unavailable_backend_reports_error() {
        let mut backend = HeadlessBackend::unavailable();
        let out = SharedBuf::default();
        let err = run_renderer(
            &mut backend,
            &render_spec(unique_handle("nowin")),
            ManualTicker::new(),
            CancelToken::new(),
            Cursor::new(Vec::new()),
            out.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, DisplayError::WindowCreation(_)));
        assert_eq!(out.lines(), ["error cannot create window: no display available"]);
    }

    /// Stands in for the `render` subcommand.
    struct FakeRenderer {
        script: PathBuf,
    }

    impl FakeRenderer {
        fn new(tag: &str, body: &str) -> Self {
            let script = std::env::temp_dir()
                .join(format!("live_view_renderer_{tag}_{}.sh", std::process::id()));
            fs::write(&script, format!("#!/bin/sh\n{body}")).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            Self { script }
        }

        fn stop_marker(&self) -> PathBuf {
            self.script.with_extension("stopped")
        }

        fn options(&self) -> RendererOptions {
            RendererOptions {
                program: self.script.clone(),
                config: None,
                spec: SharedArrayHandle::new("GLDisplayTest", "Simulator").unwrap(),
                caption: "forked".to_string(),
                refresh: Duration::from_millis(10),
                surface: SurfaceKind::Headless,
                colormap: Colormap::Grayscale,
                reattach: None,
            }
        }

        fn spawn(&self) -> Result<ForkedSpsDisplay, DisplayError> {
            // a freshly written script can briefly be busy while other tests fork
            for _ in 0..50 {
                match ForkedSpsDisplay::spawn(&self.options()) {
                    Err(DisplayError::Io(e)) if e.raw_os_error() == Some(libc::ETXTBSY) => {
                        thread::sleep(Duration::from_millis(20))
                    }
                    other => return other,
                }
            }
            ForkedSpsDisplay::spawn(&self.options())
        }
    }

    impl Drop for FakeRenderer {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.script);
            let _ = fs::remove_file(self.stop_marker());
        }
    }

    const ANSWERING: &str = r#"echo ready
while read cmd rest; do
    case "$cmd" in
        rates) echo "rates 7.0 8.0" ;;
        norm) if [ -z "$rest" ]; then echo "norm 11 22 0"; else echo ok; fi ;;
        test) echo ok ;;
        stop) : > "${0%.sh}.stopped"; exit 0 ;;
    esac
done
"#;

    #[test]
    fn forked_display_relays_queries() {
        let renderer = FakeRenderer::new("answering", ANSWERING);
        let mut display = renderer.spawn().unwrap();
        assert_eq!(display.caption(), "forked");

        assert_eq!(
            display.rates(),
            Rates {
                update: 7.0,
                refresh: 8.0
            }
        );
        assert_eq!(
            display.norm(),
            Norm {
                min: 11,
                max: 22,
                auto_range: false
            }
        );
        display.set_test_image(TestImage::Pattern).unwrap();
        assert_eq!(display.test_image(), TestImage::Pattern);
        display
            .set_norm(Norm {
                min: 1,
                max: 2,
                auto_range: false,
            })
            .unwrap();
        display.refresh().unwrap();
        assert!(!display.is_closed());

        display.close_window();
        assert!(display.is_closed());
        assert!(renderer.stop_marker().exists());
        // cached after the child is gone
        assert_eq!(display.rates().update, 7.0);
    }

    #[test]
    fn forked_startup_error_is_a_window_error() {
        let renderer = FakeRenderer::new("notty", "echo \"error no tty\"\n");
        match renderer.spawn() {
            Err(DisplayError::WindowCreation(msg)) => assert_eq!(msg, "no tty"),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("renderer should not start"),
        }
    }

    #[test]
    fn forked_renderer_that_dies_early_fails_to_start() {
        let renderer = FakeRenderer::new("silent", "exit 0\n");
        assert!(matches!(renderer.spawn(), Err(DisplayError::Renderer(_))));
    }

    #[test]
    fn forked_display_notices_child_exit() {
        let renderer = FakeRenderer::new("exiting", "echo ready\n");
        let mut display = renderer.spawn().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !display.is_closed() {
            assert!(Instant::now() < deadline, "child exit not noticed");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(display.rates(), Rates::default());
        assert!(display.set_test_image(TestImage::Pattern).is_err());
    }
}
