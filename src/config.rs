use crate::{Colormap, SurfaceKind};
use confique::Config;
use std::{path::PathBuf, time::Duration};

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub display: DisplaySettings,
    #[config(nested)]
    pub spec_array: SpecArraySettings,
    #[config(nested)]
    pub acquisition: AcquisitionSettings,
    #[config(nested)]
    pub producer: ProducerSettings,
    #[config(nested)]
    pub logging: LogSettings,
}

impl Conf {
    /// Defaults, overridden by `path`, then by `LIVE_VIEW_*` variables.
    pub fn load(path: Option<&PathBuf>) -> Result<Self, confique::Error> {
        let mut builder = Conf::builder().env();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        builder.load()
    }
}

#[derive(Config, Debug, Clone)]
pub struct DisplaySettings {
    #[config(default = 10, env = "LIVE_VIEW_REFRESH_MS")]
    pub refresh_ms: u64,
    #[config(default = "terminal")]
    pub surface: SurfaceKind,
    /// Surface of forked renderers when the parent already owns the terminal.
    #[config(default = "headless")]
    pub forked_surface: SurfaceKind,
    #[config(default = "grayscale")]
    pub colormap: Colormap,
    /// 0 disables re-attaching to a missing or replaced array.
    #[config(default = 1000)]
    pub reattach_ms: u64,
    #[config(default = 1000)]
    pub rates_period_ms: u64,
    #[config(default = 5000)]
    pub test_alternate_ms: u64,
    #[config(default = true)]
    pub ignore_child_signal: bool,
}

impl DisplaySettings {
    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(1))
    }

    pub fn reattach(&self) -> Option<Duration> {
        (self.reattach_ms > 0).then(|| Duration::from_millis(self.reattach_ms))
    }

    pub fn rates_period(&self) -> Duration {
        Duration::from_millis(self.rates_period_ms)
    }

    pub fn test_alternate(&self) -> Duration {
        Duration::from_millis(self.test_alternate_ms)
    }
}

#[derive(Config, Debug, Clone)]
pub struct SpecArraySettings {
    #[config(default = "GLDisplayTest")]
    pub spec_name: String,
    #[config(default = "Simulator")]
    pub array_name: String,
}

#[derive(Config, Debug, Clone)]
pub struct AcquisitionSettings {
    #[config(default = 100)]
    pub exp_time_ms: u64,
    /// 0 runs until interrupted.
    #[config(default = 180)]
    pub nb_frames: u64,
    #[config(default = 1024)]
    pub width: usize,
    #[config(default = 1024)]
    pub height: usize,
    /// Bytes per pixel: 1, 2 or 4.
    #[config(default = 2)]
    pub depth: usize,
    #[config(default = 0)]
    pub noise: u64,
    pub seed: Option<u64>,
}

impl AcquisitionSettings {
    pub fn exp_time(&self) -> Duration {
        Duration::from_millis(self.exp_time_ms.max(1))
    }

    /// One full turn over the run, as the simulator test did.
    pub fn rotation_speed(&self) -> f64 {
        if self.nb_frames == 0 {
            2.0
        } else {
            360.0 / self.nb_frames as f64
        }
    }
}

#[derive(Config, Debug, Clone)]
pub struct ProducerSettings {
    /// Producer executable; this binary's `produce` subcommand when unset.
    pub path: Option<PathBuf>,
    #[config(default = 2000)]
    pub grace_ms: u64,
    /// Keep the array published after the last frame until interrupted.
    #[config(default = true)]
    pub linger: bool,
}

impl ProducerSettings {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

#[derive(Config, Debug, Clone)]
pub struct LogSettings {
    #[config(default = "info", env = "LIVE_VIEW_LOG")]
    pub level: String,
    #[config(default = "live_view.log")]
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_load_without_a_file() {
        let conf = Conf::builder().load().unwrap();
        assert_eq!(conf.display.refresh(), Duration::from_millis(10));
        assert_eq!(conf.display.surface, SurfaceKind::Terminal);
        assert_eq!(conf.display.forked_surface, SurfaceKind::Headless);
        assert_eq!(conf.display.reattach(), Some(Duration::from_secs(1)));
        assert_eq!(conf.spec_array.spec_name, "GLDisplayTest");
        assert_eq!(conf.spec_array.array_name, "Simulator");
        assert_eq!(conf.acquisition.nb_frames, 180);
        assert_eq!(conf.acquisition.rotation_speed(), 2.0);
        assert_eq!(conf.acquisition.seed, None);
        assert_eq!(conf.producer.grace(), Duration::from_secs(2));
    }

    #[test]
    fn file_overrides_defaults() {
        let path =
            std::env::temp_dir().join(format!("live_view_conf_{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[display]\nreattach_ms = 0\ncolormap = \"temperature\"\n\n[acquisition]\ndepth = 4\nseed = 3"
        )
        .unwrap();
        drop(file);

        let conf = Conf::builder().file(&path).load().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(conf.display.reattach(), None);
        assert_eq!(conf.display.colormap, Colormap::Temperature);
        assert_eq!(conf.acquisition.depth, 4);
        assert_eq!(conf.acquisition.seed, Some(3));
        assert_eq!(conf.display.refresh_ms, 10);
    }

    #[test]
    fn environment_beats_file() {
        let path =
            std::env::temp_dir().join(format!("live_view_env_{}.toml", std::process::id()));
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\nfile = \"env.log\"\n").unwrap();

        std::env::set_var("LIVE_VIEW_LOG", "debug");
        let conf = Conf::load(Some(&path));
        std::env::remove_var("LIVE_VIEW_LOG");
        std::fs::remove_file(&path).unwrap();

        let conf = conf.unwrap();
        assert_eq!(conf.logging.level, "debug");
        assert_eq!(conf.logging.file, PathBuf::from("env.log"));
    }
}
