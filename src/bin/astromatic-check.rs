use std::path::PathBuf;

use anyhow::Context;
use ir_reduce::AstromaticConfig;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "astromatic-check",
    about = "Checking SExtractor and SCAMP configuration files"
)]
struct Opt {
    /// Directory with the default configuration files (falls back to IR_REDUCE_CONFIG_DIR)
    #[structopt(long, parse(from_os_str))]
    config_dir: Option<PathBuf>,
    /// SExtractor settings file
    #[structopt(long, parse(from_os_str))]
    sex_config: Option<PathBuf>,
    /// SCAMP settings file
    #[structopt(long, parse(from_os_str))]
    scamp_config: Option<PathBuf>,
    /// SExtractor KEY=VALUE overrides
    #[structopt(short = "x", long)]
    sextractor_override: Vec<String>,
    /// SCAMP KEY=VALUE overrides
    #[structopt(short = "s", long)]
    scamp_override: Vec<String>,
    /// Print the parsed SExtractor settings
    #[structopt(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut config = match opt.config_dir {
        Some(dir) => AstromaticConfig::in_dir(dir),
        None => AstromaticConfig::default(),
    };
    if let Some(path) = opt.sex_config {
        config = config.sex_config(path);
    }
    if let Some(path) = opt.scamp_config {
        config = config.scamp_config(path);
    }
    config = config
        .sextractor_overrides(opt.sextractor_override)
        .scamp_overrides(opt.scamp_override);

    let validated = config
        .validate()
        .context("the astromatic configuration is not valid")?;
    println!("SExtractor settings: {:?}", validated.sex_config);
    println!("SExtractor parameters: {:?}", validated.param_file);
    println!("Neural network: {:?}", validated.nnw_file);
    match &validated.conv_file {
        Some(path) => println!("Filter: {:?}", path),
        None => println!("Filter: none, an empty {:?} will be used", validated.conv_name),
    }
    println!("SCAMP settings: {:?}", validated.scamp_config);
    println!(
        "Catalog: {} (header {})",
        validated.catalog_name, validated.header_name
    );
    println!(
        "sex ... {}\nscamp ... {}",
        validated.sextractor_args.join(" "),
        validated.scamp_args.join(" ")
    );
    if opt.verbose {
        for (key, value) in &validated.settings {
            println!("{key:<16} {value}");
        }
    }
    Ok(())
}
