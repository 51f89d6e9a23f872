use log::*;
use std::sync::atomic::Ordering;

use clap::{crate_authors, crate_version, App, AppSettings, Arg, ArgMatches};
use nix::unistd::Pid;

use mainstop::config::{self, PortRange};
use mainstop::{elf, entry, ident, resume, scope, tracer};

fn pid_arg(index: usize) -> Arg<'static> {
    Arg::new("pid")
        .help("Pid of the process to look at")
        .required(true)
        .index(index)
}

fn parse_pid_arg(args: &ArgMatches) -> Pid {
    Pid::from_raw(args.value_of_t_or_exit("pid"))
}

fn inspect(args: &ArgMatches) {
    let pid = parse_pid_arg(args);
    let maps = match tracer::proc::maps(pid) {
        Ok(maps) => maps,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };
    let mapping = match tracer::proc::first_executable(&maps) {
        Some(m) => m,
        None => {
            error!("no executable mapping in process {}", pid);
            std::process::exit(1);
        }
    };
    println!(
        "{:#x}-{:#x} offset {:#x} {}",
        mapping.start, mapping.end, mapping.offset, mapping.pathname
    );

    let info = match elf::read_entry_info_from(std::path::Path::new(&mapping.pathname)) {
        Ok(info) => info,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };
    println!(
        "entry {:#x} ({} sections)",
        info.entry,
        info.sections.len()
    );
    match entry::entry_address(mapping, &info) {
        Some(addr) => println!("runtime entry {:#x}", addr),
        None => {
            error!("no section contains entry {:#x}", info.entry);
            std::process::exit(1);
        }
    }
}

fn ident_port(args: &ArgMatches) {
    let pid = parse_pid_arg(args);
    let mut range = PortRange::default();
    if args.is_present("first") {
        range.first = args.value_of_t_or_exit("first");
    }
    if args.is_present("last") {
        range.last = args.value_of_t_or_exit("last");
    }
    let port = if args.is_present("procfs") {
        match ident::proc_listen_port(pid, &range) {
            Ok(Some(port)) => port,
            Ok(None) => {
                error!(
                    "process {} listens on no port in {}-{}",
                    pid, range.first, range.last
                );
                0
            }
            Err(err) => {
                error!("{}", err);
                0
            }
        }
    } else {
        ident::get_ident_port_in(pid, &range)
    };
    if port == 0 {
        std::process::exit(1);
    }
    println!("{}", port);
}

fn resume(args: &ArgMatches) {
    let pid = parse_pid_arg(args);
    let delay = args.value_of_t_or_exit::<u32>("delay");
    resume::resume_process(pid, delay);
}

fn debugger_present() {
    mainstop::cache_debugger_present();
    println!("{}", mainstop::debugger_present());
}

fn ptrace_scope() {
    let ok = scope::ptrace_scope_ok();
    println!("{}", if ok { "allowed" } else { "denied" });
    if !ok {
        std::process::exit(1);
    }
}

fn setup_logging(matches: &clap::ArgMatches) {
    if matches.is_present("verbose") {
        env_logger::Builder::new().parse_filters("debug").init();
        return;
    }

    let loglevel = matches.value_of("loglevel");
    if let Some(level) = loglevel {
        env_logger::Builder::new().parse_filters(level).init();
        return;
    }

    // default
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn main() {
    let inspect_command = App::new("inspect")
        .about("Show where the entry point of a process is mapped.")
        .version(crate_version!())
        .author(crate_authors!("\n"))
        .arg(pid_arg(1));

    let ident_port_command = App::new("ident-port")
        .about("Find the target control port a process listens on.")
        .version(crate_version!())
        .author(crate_authors!("\n"))
        .arg(pid_arg(1))
        .arg(
            Arg::new("first")
                .long("first")
                .takes_value(true)
                .help("Lowest port to accept [default: 38920]"),
        )
        .arg(
            Arg::new("last")
                .long("last")
                .takes_value(true)
                .help("Highest port to accept [default: 38927]"),
        )
        .arg(
            Arg::new("procfs")
                .long("procfs")
                .help("Look up listening sockets in /proc instead of running lsof"),
        );

    let resume_command = App::new("resume")
        .about("Detach from a process stopped at its entry point and let it run.")
        .version(crate_version!())
        .author(crate_authors!("\n"))
        .arg(pid_arg(1))
        .arg(
            Arg::new("delay")
                .short('d')
                .long("delay")
                .takes_value(true)
                .default_value("0")
                .help("Seconds to keep the process stopped so that a debugger can attach"),
        );

    let debugger_command = App::new("debugger-present")
        .about("Print whether this process is traced.")
        .version(crate_version!())
        .author(crate_authors!("\n"));

    let scope_command = App::new("scope")
        .about("Print whether child processes may be ptraced.")
        .version(crate_version!())
        .author(crate_authors!("\n"));

    let main_app = App::new("mainstop")
        .about("Stop child processes at their entry point and find their target control port.")
        .version(crate_version!())
        .author(crate_authors!("\n"))
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::new("verbose")
             .short('v')
             .conflicts_with("loglevel")
             .help("shorthand for --loglevel debug)"))
        .arg(Arg::new("loglevel")
             .short('l')
             .takes_value(true)
             .help("Finegrained verbosity control. See docs.rs/env_logger. Examples: [error, warn, info, debug, trace]"))
        .arg(Arg::new("no-ptrace")
             .long("no-ptrace")
             .help("Never use ptrace on child processes"))
        .arg(Arg::new("ptrace-logging")
             .long("ptrace-logging")
             .help("Log every ptrace step"))
        .subcommands([
            inspect_command,
            ident_port_command,
            resume_command,
            debugger_command,
            scope_command,
        ]);

    let matches = main_app.get_matches();
    setup_logging(&matches);
    config::PTRACE_CHILD_PROCESSES.store(!matches.is_present("no-ptrace"), Ordering::Release);
    config::PTRACE_LOGGING.store(matches.is_present("ptrace-logging"), Ordering::Release);

    match matches.subcommand() {
        Some(("inspect", sub_matches)) => inspect(sub_matches),
        Some(("ident-port", sub_matches)) => ident_port(sub_matches),
        Some(("resume", sub_matches)) => resume(sub_matches),
        Some(("debugger-present", _)) => debugger_present(),
        Some(("scope", _)) => ptrace_scope(),
        Some((_, _)) => unreachable!(),
        None => unreachable!(),
    }
}
