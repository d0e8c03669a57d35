use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use live_view::{
    config::LogSettings, forked::Reply, run_renderer, signals, AcqMonitor, AcqSettings,
    AcqStatus, Acquisition, Backend, CancelToken, Clock, Colormap, Conf, Depth, DisplayError,
    DisplaySink, ForkedSpsDisplay, FrameBuilder, HeadlessBackend, LiveDisplay, LocalSpsDisplay,
    ManagedChild, RateReporter, RefreshScheduler, RenderSpec, RendererOptions, SchedulerHook,
    SharedArrayHandle, SharedArrayReader, SleepTicker, SurfaceKind, SystemClock, TerminalBackend,
    TestImage, TestImageAlternator,
};
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, TermLogger, TerminalMode, WriteLogger};
use std::{
    env,
    fs::OpenOptions,
    io::{self, BufReader},
    path::PathBuf,
    process::{Command, Stdio},
    rc::Rc,
    thread,
    time::Duration,
};
use time::OffsetDateTime;

#[derive(Parser, Debug)]
#[command(version, about = "Live viewer for frames published in shared memory")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args, Debug, Clone)]
struct ArrayArgs {
    /// Shared array namespace [default: spec_array.spec_name]
    #[arg(long)]
    spec: Option<String>,
    /// Shared array name [default: spec_array.array_name]
    #[arg(long)]
    array: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct DisplayArgs {
    #[arg(long, value_enum)]
    surface: Option<SurfaceKind>,
    #[arg(long, value_enum)]
    colormap: Option<Colormap>,
    /// Refresh period in milliseconds
    #[arg(long)]
    refresh_ms: Option<u64>,
    /// Toggle the test image periodically
    #[arg(long)]
    alternate_test: bool,
    /// Do not log display rates
    #[arg(long)]
    no_rates: bool,
}

#[derive(Args, Debug, Clone)]
struct AcqArgs {
    /// Number of frames, 0 runs until interrupted
    #[arg(long)]
    frames: Option<u64>,
    /// Exposure time in milliseconds
    #[arg(long)]
    exp_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the simulator and view its array from this process
    Simu {
        #[command(flatten)]
        array: ArrayArgs,
        #[command(flatten)]
        display: DisplayArgs,
        #[command(flatten)]
        acq: AcqArgs,
        /// Render in a forked process
        #[arg(long)]
        forked: bool,
    },
    /// Publish simulator frames without a viewer
    Produce {
        #[command(flatten)]
        array: ArrayArgs,
        #[command(flatten)]
        acq: AcqArgs,
    },
    /// View an array published by another process
    View {
        #[command(flatten)]
        array: ArrayArgs,
        #[command(flatten)]
        display: DisplayArgs,
        /// Render in a forked process
        #[arg(long)]
        forked: bool,
        /// Start a producer first
        #[arg(long)]
        spawn_producer: bool,
    },
    /// Start a producer, then show basic, local and forked displays
    Multi {
        #[command(flatten)]
        array: ArrayArgs,
        #[command(flatten)]
        display: DisplayArgs,
    },
    /// Show the synthetic test image
    TestImage {
        #[arg(long, default_value_t = 1024)]
        width: usize,
        #[arg(long, default_value_t = 1024)]
        height: usize,
        /// Bytes per pixel
        #[arg(long, default_value_t = 2)]
        depth: usize,
        #[command(flatten)]
        display: DisplayArgs,
    },
    /// Print the header of a shared array
    Info {
        #[command(flatten)]
        array: ArrayArgs,
    },
    #[command(hide = true)]
    Render {
        #[arg(long)]
        spec: String,
        #[arg(long)]
        array: String,
        #[arg(long)]
        caption: String,
        #[arg(long)]
        refresh_ms: u64,
        #[arg(long, value_enum)]
        surface: SurfaceKind,
        #[arg(long, value_enum)]
        colormap: Colormap,
        #[arg(long)]
        reattach_ms: u64,
    },
}

impl DisplayArgs {
    fn apply(&self, conf: &mut Conf) {
        if let Some(surface) = self.surface {
            conf.display.surface = surface;
        }
        if let Some(colormap) = self.colormap {
            conf.display.colormap = colormap;
        }
        if let Some(ms) = self.refresh_ms {
            conf.display.refresh_ms = ms;
        }
    }
}

impl AcqArgs {
    fn apply(&self, conf: &mut Conf) {
        if let Some(frames) = self.frames {
            conf.acquisition.nb_frames = frames;
        }
        if let Some(ms) = self.exp_ms {
            conf.acquisition.exp_time_ms = ms;
        }
    }
}

impl ArrayArgs {
    fn handle(&self, conf: &Conf) -> Result<SharedArrayHandle> {
        let spec = self.spec.as_deref().unwrap_or(&conf.spec_array.spec_name);
        let array = self.array.as_deref().unwrap_or(&conf.spec_array.array_name);
        Ok(SharedArrayHandle::new(spec, array)?)
    }
}

/// Logs acquisition progress from the display loop.
struct ProgressReporter {
    monitor: AcqMonitor,
    last: Option<u64>,
    finished: bool,
}

impl ProgressReporter {
    fn new(monitor: AcqMonitor) -> Self {
        Self {
            monitor,
            last: None,
            finished: false,
        }
    }
}

impl SchedulerHook for ProgressReporter {
    fn after_tick(&mut self, _: &mut [Box<dyn LiveDisplay>]) {
        let state = self.monitor.state();
        if state.last_image_ready != self.last {
            self.last = state.last_image_ready;
            if let Some(frame) = self.last {
                info!("frame: {frame}");
            }
        }
        if !self.finished && state.status != AcqStatus::Running {
            self.finished = true;
            info!(
                "finished: {} frames ({:?})",
                self.last.map_or(0, |n| n + 1),
                state.status
            );
        }
    }
}

fn init_logging(settings: &LogSettings, file_only: bool) -> Result<()> {
    let level: LevelFilter = settings
        .level
        .parse()
        .map_err(|_| anyhow!("invalid log level {:?}", settings.level))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.file)
        .with_context(|| format!("cannot open log file {}", settings.file.display()))?;
    let config = simplelog::Config::default();
    let installed = if file_only {
        WriteLogger::init(level, config, file)
    } else {
        CombinedLogger::init(vec![
            TermLogger::new(
                level,
                config.clone(),
                TerminalMode::Stderr,
                ColorChoice::Auto,
            ),
            WriteLogger::new(level, config, file),
        ])
    };
    installed.map_err(|e| anyhow!("cannot initialise logging: {e}"))
}

fn open_backend(kind: SurfaceKind) -> Result<Box<dyn Backend>, DisplayError> {
    let backend: Box<dyn Backend> = match kind {
        SurfaceKind::Terminal => Box::new(TerminalBackend::open()?),
        SurfaceKind::Headless => Box::new(HeadlessBackend::new()),
    };
    Ok(backend)
}

fn scheduler(
    conf: &Conf,
    args: &DisplayArgs,
    cancel: CancelToken,
) -> RefreshScheduler<SleepTicker> {
    let mut scheduler = RefreshScheduler::new(SleepTicker::new(conf.display.refresh()), cancel);
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    if !args.no_rates {
        scheduler.add_hook(Box::new(RateReporter::new(
            conf.display.rates_period(),
            Rc::clone(&clock),
        )));
    }
    if args.alternate_test {
        scheduler.add_hook(Box::new(TestImageAlternator::new(
            conf.display.test_alternate(),
            clock,
        )));
    }
    scheduler
}

fn local_display(
    backend: &mut dyn Backend,
    conf: &Conf,
    handle: &SharedArrayHandle,
    caption: &str,
) -> Result<LocalSpsDisplay> {
    let mut display =
        LocalSpsDisplay::create_window(backend, caption)?.with_reattach(conf.display.reattach());
    display.sink().set_colormap(conf.display.colormap);
    match display.set_spec_array(&handle.namespace, &handle.name) {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => warn!("{caption}: {e}; waiting for the producer"),
        Err(e) => return Err(e.into()),
    }
    Ok(display)
}

fn forked_display(
    config: Option<&PathBuf>,
    conf: &Conf,
    handle: &SharedArrayHandle,
    caption: &str,
    surface: SurfaceKind,
) -> Result<ForkedSpsDisplay> {
    let opts = RendererOptions {
        program: env::current_exe().context("cannot locate own executable")?,
        config: config.cloned(),
        spec: handle.clone(),
        caption: caption.to_string(),
        refresh: conf.display.refresh(),
        surface,
        colormap: conf.display.colormap,
        reattach: conf.display.reattach(),
    };
    ForkedSpsDisplay::spawn(&opts).with_context(|| format!("cannot start renderer for {handle}"))
}

fn spawn_producer(
    config: Option<&PathBuf>,
    conf: &Conf,
    handle: &SharedArrayHandle,
) -> Result<ManagedChild> {
    let mut cmd = match &conf.producer.path {
        Some(path) => Command::new(path),
        None => {
            let mut cmd = Command::new(env::current_exe().context("cannot locate own executable")?);
            if let Some(config) = config {
                cmd.arg("--config").arg(config);
            }
            cmd.args(["produce", "--spec", &handle.namespace, "--array", &handle.name]);
            cmd
        }
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = ManagedChild::spawn("producer", &mut cmd).context("cannot start producer")?;
    let grace = conf.producer.grace();
    info!("giving the producer {grace:?} to start");
    thread::sleep(grace);
    Ok(child)
}

fn acquisition(conf: &Conf, handle: SharedArrayHandle) -> Result<Acquisition> {
    let settings = &conf.acquisition;
    let depth = Depth::from_bytes(settings.depth)
        .with_context(|| format!("unsupported depth {}", settings.depth))?;
    let mut builder = FrameBuilder::new(settings.width, settings.height, depth)
        .with_default_peaks()
        .with_noise(settings.noise);
    if let Some(seed) = settings.seed {
        builder = builder.with_seed(seed);
    }
    builder.set_rotation_speed(settings.rotation_speed());
    Ok(Acquisition::new(
        handle,
        builder,
        AcqSettings {
            exp_time: settings.exp_time(),
            nb_frames: settings.nb_frames,
        },
    ))
}

fn ignore_child_exit(conf: &Conf) -> Result<()> {
    if conf.display.ignore_child_signal {
        signals::ignore_child_exit().context("cannot ignore SIGCHLD")?;
    }
    Ok(())
}

fn simu(
    config: Option<&PathBuf>,
    conf: &Conf,
    handle: SharedArrayHandle,
    args: &DisplayArgs,
    forked: bool,
    cancel: CancelToken,
) -> Result<()> {
    let mut acq = acquisition(conf, handle.clone())?;
    acq.prepare()?;

    let caption = handle.to_string();
    let mut scheduler = scheduler(conf, args, cancel);
    let mut backend = None;
    if forked {
        ignore_child_exit(conf)?;
        let display = forked_display(config, conf, &handle, &caption, conf.display.surface)?;
        scheduler.register(Box::new(display));
    } else {
        let mut b = open_backend(conf.display.surface)?;
        scheduler.register(Box::new(local_display(b.as_mut(), conf, &handle, &caption)?));
        backend = Some(b);
    }
    scheduler.add_hook(Box::new(ProgressReporter::new(acq.monitor())));

    acq.start()?;
    let exit = scheduler.run();
    info!("display loop ended: {exit:?}");

    scheduler.close_all();
    drop(backend);
    if acq.status() == AcqStatus::Running {
        acq.stop();
    }
    acq.wait()
}

fn produce(conf: &Conf, handle: SharedArrayHandle, cancel: CancelToken) -> Result<()> {
    let mut acq = acquisition(conf, handle)?;
    acq.prepare()?;
    acq.start()?;

    let ticker = crossbeam_channel::tick(Duration::from_millis(100));
    while acq.is_running() && !cancel.is_cancelled() {
        let _ = ticker.recv();
    }
    acq.stop();
    acq.wait()?;

    if conf.producer.linger && !cancel.is_cancelled() {
        info!("{} stays published until interrupted", acq.handle());
        while !cancel.is_cancelled() {
            let _ = ticker.recv();
        }
    }
    Ok(())
}

fn view(
    config: Option<&PathBuf>,
    conf: &Conf,
    handle: SharedArrayHandle,
    args: &DisplayArgs,
    forked: bool,
    spawn: bool,
    cancel: CancelToken,
) -> Result<()> {
    if forked {
        ignore_child_exit(conf)?;
    }
    let producer = if spawn {
        Some(spawn_producer(config, conf, &handle)?)
    } else {
        None
    };

    let mut scheduler = scheduler(conf, args, cancel);
    let mut backend = None;
    if forked {
        let caption = format!("Forked {handle}");
        let display = forked_display(config, conf, &handle, &caption, conf.display.surface)?;
        scheduler.register(Box::new(display));
    } else {
        let mut b = open_backend(conf.display.surface)?;
        let caption = format!("Local {handle}");
        scheduler.register(Box::new(local_display(b.as_mut(), conf, &handle, &caption)?));
        backend = Some(b);
    }

    let exit = scheduler.run();
    info!("display loop ended: {exit:?}");
    scheduler.close_all();
    drop(backend);
    drop(producer);
    Ok(())
}

fn multi(
    config: Option<&PathBuf>,
    conf: &Conf,
    handle: SharedArrayHandle,
    args: &DisplayArgs,
    cancel: CancelToken,
) -> Result<()> {
    ignore_child_exit(conf)?;
    let producer = spawn_producer(config, conf, &handle)?;

    let mut backend = open_backend(conf.display.surface)?;
    let mut scheduler = scheduler(conf, args, cancel);

    let (width, height) = (conf.acquisition.width, conf.acquisition.height);
    let mut basic = DisplaySink::create_window(backend.as_mut(), "Basic Test")?;
    basic.set_colormap(conf.display.colormap);
    basic.set_buffer(&vec![0; width * height * 2], width, height, 2)?;
    basic.set_test_image(TestImage::Pattern);
    scheduler.register(Box::new(basic));

    let caption = format!("Local {handle}");
    scheduler.register(Box::new(local_display(
        backend.as_mut(),
        conf,
        &handle,
        &caption,
    )?));

    // one process per terminal
    let surface = match conf.display.surface {
        SurfaceKind::Terminal => conf.display.forked_surface,
        SurfaceKind::Headless => SurfaceKind::Headless,
    };
    let caption = format!("Forked {handle}");
    scheduler.register(Box::new(forked_display(
        config, conf, &handle, &caption, surface,
    )?));

    let exit = scheduler.run();
    info!("display loop ended: {exit:?}");
    scheduler.close_all();
    drop(backend);
    drop(producer);
    Ok(())
}

fn test_image(
    conf: &Conf,
    args: &DisplayArgs,
    (width, height, depth): (usize, usize, usize),
    cancel: CancelToken,
) -> Result<()> {
    let depth = Depth::from_bytes(depth).with_context(|| format!("unsupported depth {depth}"))?;
    let mut backend = open_backend(conf.display.surface)?;
    let mut sink = DisplaySink::create_window(backend.as_mut(), "Test Image")?;
    sink.set_colormap(conf.display.colormap);
    sink.set_buffer(
        &vec![0; width * height * depth.bytes()],
        width,
        height,
        depth.bytes(),
    )?;
    sink.set_test_image(TestImage::Pattern);

    let mut scheduler = scheduler(conf, args, cancel);
    scheduler.register(Box::new(sink));
    scheduler.run();
    scheduler.close_all();
    Ok(())
}

fn info(handle: SharedArrayHandle) -> Result<()> {
    let reader = SharedArrayReader::open(handle.clone())
        .with_context(|| format!("cannot open shared array {handle}"))?;
    let info = reader.info();
    let created = OffsetDateTime::from_unix_timestamp_nanos(info.created_ns as i128)
        .map(|t| t.to_string())
        .unwrap_or_else(|_| info.created_ns.to_string());
    println!("Array:\t\t{handle}");
    println!("Object:\t\t{}", handle.object_name());
    println!("Dimensions:\t{}x{}", info.width, info.height);
    println!("Depth:\t\t{} bytes", info.depth.bytes());
    println!("Frames:\t\t{}", info.frames);
    println!("Alive:\t\t{}", info.alive);
    println!("Created:\t{created}");
    Ok(())
}

fn render(
    spec: RenderSpec,
    surface: SurfaceKind,
    refresh: Duration,
    cancel: CancelToken,
) -> Result<()> {
    let mut backend = match open_backend(surface) {
        Ok(backend) => backend,
        Err(e) => {
            println!("{}", Reply::Error(e.to_string()));
            return Err(e.into());
        }
    };
    run_renderer(
        backend.as_mut(),
        &spec,
        SleepTicker::new(refresh),
        cancel,
        BufReader::new(io::stdin()),
        io::stdout(),
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut conf = Conf::load(cli.config.as_ref()).context("cannot load configuration")?;

    match &cli.command {
        Cmd::Simu { display, acq, .. } => {
            display.apply(&mut conf);
            acq.apply(&mut conf);
        }
        Cmd::Produce { acq, .. } => acq.apply(&mut conf),
        Cmd::View { display, .. } | Cmd::Multi { display, .. } | Cmd::TestImage { display, .. } => {
            display.apply(&mut conf)
        }
        Cmd::Info { .. } | Cmd::Render { .. } => {}
    }

    // stderr belongs to the terminal host, or to the parent's
    let file_only = match &cli.command {
        Cmd::Render { .. } => true,
        Cmd::Produce { .. } | Cmd::Info { .. } => false,
        _ => conf.display.surface == SurfaceKind::Terminal,
    };
    init_logging(&conf.logging, file_only)?;
    let cancel = signals::install_interrupt_handler().context("cannot install signal handlers")?;

    let config = cli.config.as_ref();
    match cli.command {
        Cmd::Simu {
            array,
            display,
            forked,
            ..
        } => simu(config, &conf, array.handle(&conf)?, &display, forked, cancel),
        Cmd::Produce { array, .. } => produce(&conf, array.handle(&conf)?, cancel),
        Cmd::View {
            array,
            display,
            forked,
            spawn_producer,
        } => view(
            config,
            &conf,
            array.handle(&conf)?,
            &display,
            forked,
            spawn_producer,
            cancel,
        ),
        Cmd::Multi { array, display } => {
            multi(config, &conf, array.handle(&conf)?, &display, cancel)
        }
        Cmd::TestImage {
            width,
            height,
            depth,
            display,
        } => test_image(&conf, &display, (width, height, depth), cancel),
        Cmd::Info { array } => info(array.handle(&conf)?),
        Cmd::Render {
            spec,
            array,
            caption,
            refresh_ms,
            surface,
            colormap,
            reattach_ms,
        } => {
            let spec = RenderSpec {
                spec: SharedArrayHandle::new(&spec, &array)?,
                caption,
                colormap,
                reattach: (reattach_ms > 0).then(|| Duration::from_millis(reattach_ms)),
            };
            render(spec, surface, Duration::from_millis(refresh_ms.max(1)), cancel)
        }
    }
}
