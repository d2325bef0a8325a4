use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::imputation::engine::ImpConfig;

pub fn build_cli() -> Command {
    Command::new("kelpie")
        .version(crate_version!())
        .about("Genotype imputation from compressed reference haplotype panels")
        .arg(
            Arg::new("ref")
                .long("ref")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("shell-completion")
                .help("Reference panel of phased genotypes in bref3 format"),
        )
        .arg(
            Arg::new("gt")
                .long("gt")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("shell-completion")
                .help("Target panel of phased genotypes in bref3 format, typed at a subset of the reference markers"),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .required_unless_present("shell-completion")
                .help("Output table of imputed genotypes and dosages"),
        )
        .arg(
            Arg::new("map")
                .long("map")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("PLINK-format genetic map (chrom id cM bp); defaults to a constant 1 cM/Mb"),
        )
        .arg(
            Arg::new("chrom")
                .long("chrom")
                .value_name("CHROM")
                .help("Restrict the run to one chromosome"),
        )
        .arg(
            Arg::new("window")
                .long("window")
                .value_name("CM")
                .default_value("40.0")
                .value_parser(value_parser!(f64))
                .help("Window length in cM"),
        )
        .arg(
            Arg::new("overlap")
                .long("overlap")
                .value_name("CM")
                .default_value("2.0")
                .value_parser(value_parser!(f64))
                .help("Overlap between adjacent windows in cM"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .short('t')
                .value_name("INT")
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Worker threads within a window (0 uses all cores)"),
        )
        .arg(
            Arg::new("n-states")
                .long("n-states")
                .value_name("INT")
                .default_value("1600")
                .value_parser(value_parser!(usize))
                .help("Maximum reference states per sample"),
        )
        .arg(
            Arg::new("n-iter")
                .long("n-iter")
                .value_name("INT")
                .default_value("4")
                .value_parser(value_parser!(usize))
                .help("Haplotype refinement rounds"),
        )
        .arg(
            Arg::new("err")
                .long("err")
                .value_name("FLOAT")
                .default_value("0.0001")
                .value_parser(value_parser!(f64))
                .help("Allele mismatch probability of the HMM"),
        )
        .arg(
            Arg::new("rho")
                .long("rho")
                .value_name("FLOAT")
                .default_value("0.04")
                .value_parser(value_parser!(f64))
                .help("Recombination intensity per cM"),
        )
        .arg(
            Arg::new("f-min")
                .long("f-min")
                .value_name("FLOAT")
                .default_value("0.0001")
                .value_parser(value_parser!(f64))
                .help("Floor applied to empirical allele frequencies"),
        )
        .arg(
            Arg::new("step-cm")
                .long("step-cm")
                .value_name("CM")
                .default_value("0.1")
                .value_parser(value_parser!(f64))
                .help("Minimum IBS step length in cM"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("INT")
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Random seed"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Print debug output"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .help("Print errors only"),
        )
        .arg(
            Arg::new("shell-completion")
                .long("shell-completion")
                .value_name("SHELL")
                .value_parser(value_parser!(Shell))
                .help("Print a shell completion script and exit"),
        )
}

pub fn imp_config_from_matches(matches: &ArgMatches) -> ImpConfig {
    ImpConfig {
        n_states: *matches.get_one::<usize>("n-states").unwrap(),
        n_iter: *matches.get_one::<usize>("n-iter").unwrap(),
        err: *matches.get_one::<f64>("err").unwrap(),
        rho: *matches.get_one::<f64>("rho").unwrap(),
        f_min: *matches.get_one::<f64>("f-min").unwrap(),
        step_cm: *matches.get_one::<f64>("step-cm").unwrap(),
        seed: *matches.get_one::<u64>("seed").unwrap(),
    }
}

pub fn set_log_level(matches: &ArgMatches, is_last: bool) {
    let mut log_level = log::LevelFilter::Info;
    let mut specified = false;
    if matches.get_flag("verbose") {
        specified = true;
        log_level = log::LevelFilter::Debug;
    }
    if matches.get_flag("quiet") {
        specified = true;
        log_level = log::LevelFilter::Error;
    }
    if specified || is_last {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(log_level);
        if let Ok(filters) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
        if builder.try_init().is_err() {
            panic!("Failed to set log level - has it been specified multiple times?")
        }
    }
    if is_last {
        info!("kelpie version {}", crate_version!());
    }
}
