extern crate clap;
extern crate dlcheck;
extern crate env_logger;

use clap::Parser;
use dlcheck::Config;
use std::io;
use std::process;

pub fn main() {
	let config = Config::parse();

	env_logger::builder()
		.filter_level(config.log_level())
		.parse_default_env()
		.init();

	let stdout = io::stdout();
	let mut out = stdout.lock();
	if let Err(e) = dlcheck::run(&config, &mut out) {
		eprintln!("{}", e);
		process::exit(e.exit_code());
	}
}
