use std::process::ExitCode;
use std::sync::Arc;

use clap::crate_version;

use unsharedfs::cli;
use unsharedfs::config;
use unsharedfs::fs::UnsharedFs;
use unsharedfs::logger;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let parsed = match cli::parse(args) {
        Ok(parsed) => parsed,
        Err(cli::CliError::Help) => {
            print!("{}", cli::USAGE);
            return ExitCode::SUCCESS;
        }
        Err(cli::CliError::Version) => {
            println!("unsharedfs {}", crate_version!());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("unsharedfs: {e}");
            eprint!("{}", cli::USAGE);
            return ExitCode::FAILURE;
        }
    };

    logger::init(true, parsed.debug);

    // Informational only: unsharedfs works as any user, but unprivileged
    // processes cannot setfsuid/setfsgid to arbitrary ids, so every
    // identity other than the mount owner's own will see EPERM.
    if unsafe { libc::geteuid() } != 0 {
        log::warn!(
            "running as a non-root user; only the mount owner's own identity \
            will be able to switch credentials successfully"
        );
    }

    let config = Arc::new(parsed.config);
    unsharedfs::notice!(
        "mounting {} identities under {} at {}",
        if config.mode == config::Mode::Uid { "uid" } else { "gid" },
        config.backing_root.display(),
        parsed.mountpoint.display()
    );

    let result = fuser::mount2(
        UnsharedFs::new(config),
        &parsed.mountpoint,
        &parsed.mount_options,
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("mount failed: {e}");
            ExitCode::FAILURE
        }
    }
}
