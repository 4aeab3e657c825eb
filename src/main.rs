use std::env;
use std::process;

use monitorgame::config::Config;

fn main() {
    env_logger::init();
    let mut args = env::args_os();
    let program = args.next().unwrap_or_default();
    let path = match (args.next(), args.next()) {
        (Some(path), None) => path,
        _ => {
            eprintln!("Invalid arguments. Usage: {program:?} <config.ini>");
            process::exit(2);
        },
    };

    let result = Config::from_file(&path).and_then(|config| monitorgame::run(&config));
    match result {
        Ok(output) => {
            let report = output.pool.report();
            println!("{report}");
            println!("Game with {} defender and {} attacker strategies written",
                     output.game.n_defender_actions(), output.game.n_attacker_actions());
        },
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        },
    }
}
