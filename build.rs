// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn library_arg() -> Arg {
    Arg::new("library")
        .required(true)
        .help("Library, e.g. H5P.Question-1.5")
}

fn build_cli() -> Command {
    Command::new("libvault")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Libvault Contributors")
        .about("Versioned content library repository with safe concurrent installs")
        .subcommand_required(false)
        .arg(
            Arg::new("store")
                .short('s')
                .long("store")
                .value_name("DIR")
                .global(true)
                .env("LIBVAULT_STORE")
                .default_value("/var/lib/libvault")
                .help("Repository directory"),
        )
        .arg(
            Arg::new("backend")
                .short('b')
                .long("backend")
                .global(true)
                .env("LIBVAULT_BACKEND")
                .value_parser(["fs", "sqlite"])
                .default_value("fs")
                .help("Storage backend"),
        )
        .arg(
            Arg::new("lock_timeout")
                .long("lock-timeout")
                .value_name("SECS")
                .global(true)
                .env("LIBVAULT_LOCK_TIMEOUT")
                .help("Seconds to wait for a library's install lock"),
        )
        .subcommand(Command::new("init").about("Initialize an empty repository"))
        .subcommand(
            Command::new("install")
                .about("Install the libraries of an extracted package directory")
                .arg(
                    Arg::new("package_dir")
                        .required(true)
                        .help("Directory holding one sub-directory per library"),
                )
                .arg(
                    Arg::new("allow_extension")
                        .long("allow-extension")
                        .value_name("EXT")
                        .action(ArgAction::Append)
                        .help("Additional allowed file extensions"),
                )
                .arg(
                    Arg::new("no_directory_check")
                        .long("no-directory-check")
                        .action(ArgAction::SetTrue)
                        .help("Do not require directories to be named after their library"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List installed libraries")
                .arg(Arg::new("machine_name").help("Only versions of this machine name")),
        )
        .subcommand(
            Command::new("files")
                .about("List the files of an installed library")
                .arg(library_arg()),
        )
        .subcommand(
            Command::new("depends")
                .about("Show a library and everything it depends on")
                .arg(library_arg())
                .arg(
                    Arg::new("editor")
                        .long("editor")
                        .action(ArgAction::SetTrue)
                        .help("Follow editor dependencies"),
                )
                .arg(
                    Arg::new("dynamic")
                        .long("dynamic")
                        .action(ArgAction::SetTrue)
                        .help("Follow dynamic dependencies"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an installed library")
                .arg(library_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Check stored file hashes (sqlite backend only)")
                .arg(library_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"]),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("libvault.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
