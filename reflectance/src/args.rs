use std::path::PathBuf;

use log::LevelFilter;
use structopt::StructOpt;

use crate::kernels::KernelConfig;

pub const USAGE: &str = "reflectance [-a | -i | -r | -o] -f in_file -p out_file_prefix";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "reflectance",
    about = "Precomputes irradiance, prefiltered reflectance and brdf lookup maps from an HDR environment.",
    usage = USAGE,
    help_short = "?"
)]
pub struct Args {
    // mode flags override each other, the last one given wins
    /// Reflectance series followed by the irradiance map
    #[structopt(short = "a", overrides_with_all = &["irradiate", "reflectance", "lut"])]
    pub all: bool,

    /// Irradiance map only
    #[structopt(short = "i", overrides_with_all = &["all", "reflectance", "lut"])]
    pub irradiate: bool,

    /// Reflectance series only
    #[structopt(short = "r", overrides_with_all = &["all", "irradiate", "lut"])]
    pub reflectance: bool,

    /// BRDF integration lookup table only, ignores -f
    #[structopt(short = "o", overrides_with_all = &["all", "irradiate", "reflectance"])]
    pub lut: bool,

    /// Input environment, equirectangular
    #[structopt(short = "f", parse(from_os_str))]
    pub file_in: Option<PathBuf>,

    /// Output file prefix
    #[structopt(short = "p")]
    pub prefix: Option<String>,

    /// Run the kernels on the cpu
    #[structopt(short = "c")]
    pub cpu: bool,

    /// GLSL file to compile the kernels from instead of the built-in one
    #[structopt(short = "k", parse(from_os_str))]
    pub kernels: Option<PathBuf>,

    /// Samples per pixel for the reflectance maps and the lut
    #[structopt(short = "n", default_value = "1024")]
    pub samples: u32,

    /// More logging, repeat for even more
    #[structopt(short = "v", parse(from_occurrences))]
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    BrdfLut,
    Environment {
        input: PathBuf,
        reflectance: bool,
        irradiance: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Job {
    pub task: Task,
    pub prefix: String,
    pub cpu: bool,
    pub kernels: Option<PathBuf>,
    pub config: KernelConfig,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("pick one of -a, -i, -r or -o")]
    Mode,
    #[error("-a, -i and -r need an input file (-f)")]
    MissingInput,
    #[error("an output prefix (-p) is required")]
    MissingPrefix,
    #[error("-n needs at least one sample")]
    Samples,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn validate(self) -> Result<Job, UsageError> {
        let modes = [self.all, self.irradiate, self.reflectance, self.lut];
        if modes.iter().filter(|&&m| m).count() != 1 {
            return Err(UsageError::Mode);
        }
        let task = if self.lut {
            if let Some(file_in) = &self.file_in {
                log::warn!("-o doesn't read {}, ignoring it", file_in.display());
            }
            Task::BrdfLut
        } else {
            Task::Environment {
                input: self.file_in.ok_or(UsageError::MissingInput)?,
                reflectance: self.all || self.reflectance,
                irradiance: self.all || self.irradiate,
            }
        };
        let prefix = self.prefix.ok_or(UsageError::MissingPrefix)?;
        if self.samples == 0 {
            return Err(UsageError::Samples);
        }
        if self.cpu && self.kernels.is_some() {
            log::warn!("-k only applies to the gpu kernels");
        }
        Ok(Job {
            task,
            prefix,
            cpu: self.cpu,
            kernels: self.kernels,
            config: KernelConfig {
                samples: self.samples,
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Job, UsageError> {
        let args = Args::from_iter_safe(std::iter::once("reflectance").chain(args.iter().copied()))
            .unwrap();
        args.validate()
    }

    #[test]
    fn accepts_exactly_the_valid_combinations() {
        for mode in ["-a", "-i", "-r", "-o"] {
            for with_input in [false, true] {
                for with_prefix in [false, true] {
                    let mut args = vec![mode];
                    if with_input {
                        args.extend(["-f", "env.exr"]);
                    }
                    if with_prefix {
                        args.extend(["-p", "out/env"]);
                    }
                    let needs_input = mode != "-o";
                    let valid = with_prefix && (!needs_input || with_input);
                    assert_eq!(parse(&args).is_ok(), valid, "{:?}", args);
                }
            }
        }
    }

    #[test]
    fn reports_what_is_missing() {
        assert_eq!(parse(&["-p", "x"]).unwrap_err(), UsageError::Mode);
        assert_eq!(parse(&["-r", "-p", "x"]).unwrap_err(), UsageError::MissingInput);
        assert_eq!(parse(&["-r", "-f", "e"]).unwrap_err(), UsageError::MissingPrefix);
        assert_eq!(parse(&["-o"]).unwrap_err(), UsageError::MissingPrefix);
        assert_eq!(
            parse(&["-o", "-p", "x", "-n", "0"]).unwrap_err(),
            UsageError::Samples
        );
    }

    #[test]
    fn modes_map_to_tasks() {
        let job = parse(&["-a", "-f", "env.exr", "-p", "out"]).unwrap();
        assert_eq!(
            job.task,
            Task::Environment {
                input: "env.exr".into(),
                reflectance: true,
                irradiance: true,
            }
        );
        assert_eq!(job.prefix, "out");
        assert_eq!(job.config, KernelConfig::default());

        let job = parse(&["-i", "-f", "env.exr", "-p", "out", "-c", "-n", "64"]).unwrap();
        assert_eq!(
            job.task,
            Task::Environment {
                input: "env.exr".into(),
                reflectance: false,
                irradiance: true,
            }
        );
        assert!(job.cpu);
        assert_eq!(job.config.samples, 64);

        // -o doesn't care about -f
        let job = parse(&["-o", "-f", "env.exr", "-p", "lut"]).unwrap();
        assert_eq!(job.task, Task::BrdfLut);
    }

    fn environment(reflectance: bool, irradiance: bool) -> Task {
        Task::Environment {
            input: "e.exr".into(),
            reflectance,
            irradiance,
        }
    }

    #[test]
    fn last_mode_flag_wins() {
        let task = |args: &[&str]| parse(args).unwrap().task;
        assert_eq!(task(&["-i", "-r", "-f", "e.exr", "-p", "x"]), environment(true, false));
        assert_eq!(task(&["-r", "-i", "-f", "e.exr", "-p", "x"]), environment(false, true));
        assert_eq!(task(&["-r", "-a", "-f", "e.exr", "-p", "x"]), environment(true, true));
        assert_eq!(task(&["-ai", "-f", "e.exr", "-p", "x"]), environment(false, true));
        assert_eq!(task(&["-a", "-p", "x", "-o"]), Task::BrdfLut);
        // -o last means -f isn't needed any more
        assert_eq!(task(&["-r", "-o", "-p", "x"]), Task::BrdfLut);
        // and the other way around it is
        assert_eq!(parse(&["-o", "-r", "-p", "x"]).unwrap_err(), UsageError::MissingInput);
    }

    #[test]
    fn help_and_unknown_flags() {
        use structopt::clap::ErrorKind;
        let help = Args::from_iter_safe(["reflectance", "-?"]).unwrap_err();
        assert_eq!(help.kind, ErrorKind::HelpDisplayed);
        let help = Args::from_iter_safe(["reflectance", "--help"]).unwrap_err();
        assert_eq!(help.kind, ErrorKind::HelpDisplayed);
        let unknown = Args::from_iter_safe(["reflectance", "-x"]).unwrap_err();
        assert_eq!(unknown.kind, ErrorKind::UnknownArgument);
    }

    #[test]
    fn verbosity() {
        let args = Args::from_iter_safe(["reflectance", "-o", "-vv"]).unwrap();
        assert_eq!(args.log_level(), LevelFilter::Trace);
    }
}
