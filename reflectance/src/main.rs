use structopt::StructOpt;

mod args;
mod buffer;
mod hdr;
mod kernels;
mod pipeline;
mod shaders;

fn main() {
    // help and bad flags exit here, 0 and 1 respectively
    let args = args::Args::from_args();

    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(args.log_level())
        .init()
    {
        eprintln!("couldn't set up logging: {}", e);
    }

    let job = match args.validate() {
        Ok(job) => job,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("usage: {}", args::USAGE);
            std::process::exit(1);
        }
    };

    match pipeline::run(&job) {
        Ok(written) => log::info!("done, wrote {} file(s)", written.len()),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
