#![deny(clippy::all)]

use std::{env, fs::File};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use apk_core::{Database, DbOptions, Stats};

mod cli;

use cli::{ApkCli, Command};

#[derive(Serialize)]
struct Summary {
    status: &'static str,
    packages: usize,
    dirs: usize,
    files: usize,
}

fn main() {
    let cli = ApkCli::parse();
    init_tracing(cli.quiet, cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: &ApkCli) -> Result<()> {
    match &cli.command {
        Command::Create => Database::create(&cli.root),
        Command::Add { files, names } => {
            let mut db = open(cli)?;
            for file in files {
                let pkg = db.pkg_add_file(file)?;
                let entry = db.package(pkg);
                let name = db.name(entry.name).name.clone();
                let version = entry.version.clone();
                db.world_add(&name, Some(version));
            }
            for name in names {
                db.world_add(name, None);
            }
            commit(cli, &mut db)
        }
        Command::Del { names } => {
            let mut db = open(cli)?;
            for name in names {
                if !db.world_del(name) {
                    tracing::warn!(name = %name, "not in world");
                }
            }
            commit(cli, &mut db)
        }
        Command::Upgrade => {
            let mut db = open(cli)?;
            commit(cli, &mut db)
        }
        Command::Index { output, files } => {
            let mut db = Database::open(DbOptions::default())?;
            for file in files {
                db.pkg_add_file(file)?;
            }
            let out = File::create(output)
                .with_context(|| format!("failed to create {}", output.display()))?;
            let mut encoder =
                flate2::GzBuilder::new().write(out, flate2::Compression::default());
            db.index_write(&mut encoder)?;
            encoder.finish().context("failed to finish index")?;
            Ok(())
        }
    }
}

fn open(cli: &ApkCli) -> Result<Database> {
    let repository = cli
        .repository
        .clone()
        .or_else(|| env::var("APK_REPOSITORY").ok());
    Database::open(DbOptions {
        root: Some(cli.root.clone()),
        repository,
        quiet: cli.quiet,
    })
}

fn commit(cli: &ApkCli, db: &mut Database) -> Result<()> {
    let stats = db.recalculate_and_commit()?;
    emit_summary(cli, stats);
    Ok(())
}

fn emit_summary(cli: &ApkCli, stats: Stats) {
    if cli.json {
        let summary = Summary {
            status: "ok",
            packages: stats.packages,
            dirs: stats.dirs,
            files: stats.files,
        };
        match serde_json::to_string(&summary) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("ERROR: {err}"),
        }
        return;
    }
    if cli.quiet {
        // Terminate the progress-dot line.
        println!();
        return;
    }
    println!(
        "OK: {} packages, {} dirs, {} files",
        stats.packages, stats.dirs, stats.files
    );
}

fn init_tracing(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("apk={level},apk_core={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
